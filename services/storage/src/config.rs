//! Configuration for the storage service and the export utility.
//!
//! Both binaries read the same YAML file. Table and column declarations keep the
//! order they were written in, which is the order `CREATE TABLE` uses.

use framevault_pipeline::KafkaConfig;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Table role for flat payload storage
pub const PAYLOADS_ROLE: &str = "payloads";
/// Table role for image blobs in split mode
pub const IMAGES_ROLE: &str = "images";
/// Table role for feature rows in split mode
pub const FEATURES_ROLE: &str = "features";

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the storage service
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Kafka transport configuration
    #[serde(default)]
    pub transport: KafkaConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Table declarations keyed by role, in declaration order
    #[serde(default)]
    pub tables: IndexMap<String, TableConfig>,
    /// Write mode and quota configuration
    #[serde(default)]
    pub data_handling: DataHandlingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database name
    pub name: String,
    /// Login role
    pub user: String,
    /// Password for the login role
    #[serde(default)]
    pub password: String,
    /// Server host name or address
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// One declared table
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    /// SQL table name
    pub name: String,
    /// Disabled tables are neither created nor written
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Column name to SQL type, in declaration order
    #[serde(default)]
    pub columns: IndexMap<String, String>,
}

/// Write mode and quota configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DataHandlingConfig {
    /// Split `image|features|model` payloads into two linked tables
    #[serde(default)]
    pub split_payload: bool,
    /// Database size ceiling in MiB
    #[serde(default = "default_max_db_size_mb")]
    pub max_db_size_mb: u64,
    /// Seconds between size rechecks
    #[serde(default = "default_size_check_period", alias = "t_size_check_period")]
    pub t_size_check_period_seconds: u64,
    /// Committed inserts between size rechecks
    #[serde(default = "default_insert_count_size_check")]
    pub insert_count_size_check: u64,
}

// Default value functions
fn default_service_name() -> String {
    "framevault-storage".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_db_size_mb() -> u64 {
    1024
}

fn default_size_check_period() -> u64 {
    300
}

fn default_insert_count_size_check() -> u64 {
    1000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for DataHandlingConfig {
    fn default() -> Self {
        Self {
            split_payload: false,
            max_db_size_mb: default_max_db_size_mb(),
            t_size_check_period_seconds: default_size_check_period(),
            insert_count_size_check: default_insert_count_size_check(),
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl DataHandlingConfig {
    /// Size ceiling in bytes
    pub fn max_db_size_bytes(&self) -> u64 {
        self.max_db_size_mb.saturating_mul(1024 * 1024)
    }

    /// Get the recheck period as Duration
    pub fn size_check_period(&self) -> Duration {
        Duration::from_secs(self.t_size_check_period_seconds)
    }
}

impl StorageConfig {
    /// Load configuration from a YAML file, then apply `STORAGE__` environment
    /// overrides (e.g. `STORAGE__DATABASE__PASSWORD`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix("STORAGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML text, without environment overrides
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a table by role
    pub fn table(&self, role: &str) -> Option<&TableConfig> {
        self.tables.get(role)
    }

    /// Look up a table by role, only if it is enabled
    pub fn enabled_table(&self, role: &str) -> Option<&TableConfig> {
        self.table(role).filter(|table| table.enabled)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for field in [
            ("database.name", &self.database.name),
            ("database.user", &self.database.user),
            ("database.host", &self.database.host),
        ] {
            if field.1.is_empty() {
                return Err(ConfigError::MissingRequired(field.0.to_string()));
            }
        }

        for (role, table) in self.tables.iter() {
            check_identifier(&format!("tables.{}.name", role), &table.name)?;
            if table.enabled && table.columns.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("tables.{}.columns", role),
                    message: "an enabled table needs at least one column".to_string(),
                });
            }
            for (column, _) in table.columns.iter() {
                check_identifier(&format!("tables.{}.columns", role), column)?;
            }
        }

        let required: &[&str] = if self.data_handling.split_payload {
            &[IMAGES_ROLE, FEATURES_ROLE]
        } else {
            &[PAYLOADS_ROLE]
        };
        for role in required {
            if self.enabled_table(role).is_none() {
                return Err(ConfigError::MissingRequired(format!(
                    "tables.{} (enabled)",
                    role
                )));
            }
        }

        Ok(())
    }
}

/// Accept only plain SQL identifiers: `[A-Za-z_][A-Za-z0-9_]*`
fn check_identifier(key: &str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{}' is not a valid SQL identifier", value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
service:
  name: storage-test
  log_level: debug

database:
  name: framevault
  user: postgres
  password: secret
  host: 127.0.0.1
  port: 5433

tables:
  payloads:
    name: payloads
    enabled: true
    columns:
      id: SERIAL PRIMARY KEY
      timestamp: TIMESTAMPTZ DEFAULT NOW()
      payload_data: BYTEA NOT NULL
  images:
    name: images
    enabled: false
    columns:
      id: SERIAL PRIMARY KEY
      image_data: BYTEA

data_handling:
  split_payload: false
  max_db_size_mb: 512
  t_size_check_period: 60
"#;

    #[test]
    fn test_parse_sample() {
        let config = StorageConfig::from_yaml_str(SAMPLE).unwrap();

        assert_eq!(config.service.name, "storage-test");
        assert_eq!(config.service.log_format, "json");
        assert_eq!(config.service.metrics_port, None);
        assert_eq!(config.database.port, 5433);
        assert_eq!(config.database.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.data_handling.max_db_size_bytes(), 512 * 1024 * 1024);
        assert_eq!(config.data_handling.size_check_period(), Duration::from_secs(60));
        assert_eq!(config.data_handling.insert_count_size_check, 1000);
        assert_eq!(config.transport.topics.features, "framevault.features");
    }

    #[test]
    fn test_table_and_column_order_is_preserved() {
        let config = StorageConfig::from_yaml_str(SAMPLE).unwrap();

        let roles: Vec<&str> = config.tables.keys().map(String::as_str).collect();
        assert_eq!(roles, vec!["payloads", "images"]);

        let payloads = config.table(PAYLOADS_ROLE).unwrap();
        let columns: Vec<(&str, &str)> = payloads
            .columns
            .iter()
            .map(|(name, ty)| (name.as_str(), ty.as_str()))
            .collect();
        assert_eq!(
            columns,
            vec![
                ("id", "SERIAL PRIMARY KEY"),
                ("timestamp", "TIMESTAMPTZ DEFAULT NOW()"),
                ("payload_data", "BYTEA NOT NULL"),
            ]
        );

        assert!(config.enabled_table(IMAGES_ROLE).is_none());
    }

    #[test]
    fn test_split_mode_requires_both_tables() {
        let text = SAMPLE.replace("split_payload: false", "split_payload: true");
        assert!(matches!(
            StorageConfig::from_yaml_str(&text),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        let text = SAMPLE.replace("name: payloads", "name: \"payloads; DROP TABLE x\"");
        assert!(matches!(
            StorageConfig::from_yaml_str(&text),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_database_section() {
        let text = "tables: {}\n";
        assert!(matches!(
            StorageConfig::from_yaml_str(text),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(check_identifier("k", "_images2").is_ok());
        assert!(check_identifier("k", "2images").is_err());
        assert!(check_identifier("k", "").is_err());
        assert!(check_identifier("k", "my-table").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.yml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = StorageConfig::load(&path).unwrap();
        assert_eq!(config.database.name, "framevault");
    }
}
