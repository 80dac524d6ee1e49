//! Write modes: how one payload turns into rows.

use crate::config::{StorageConfig, FEATURES_ROLE, IMAGES_ROLE, PAYLOADS_ROLE};
use crate::engine::PersistenceError;
use crate::store::StoreTransaction;
use std::fmt;

/// Field separator of split payloads
pub const SPLIT_DELIMITER: u8 = b'|';

/// The configured write mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadWriter {
    /// One row per payload in the payloads table
    Flat { table: String },
    /// `image|features[|model]` split into an image row and a feature row
    Split {
        images_table: String,
        features_table: String,
    },
}

/// What a successful write produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub rows: u32,
    pub bytes: usize,
    /// Generated image id in split mode
    pub image_id: Option<i64>,
}

/// A payload parsed in split mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPayload<'a> {
    pub image: &'a [u8],
    pub features: &'a [u8],
    pub model: Option<String>,
}

impl<'a> SplitPayload<'a> {
    /// Take the first three `|`-separated fields; anything after them is ignored.
    /// No escaping is supported.
    pub fn parse(payload: &'a [u8]) -> Result<Self, PersistenceError> {
        let mut fields = payload.splitn(4, |b| *b == SPLIT_DELIMITER);
        let image = fields.next().unwrap_or_default();
        let features = fields.next().unwrap_or_default();
        let model = fields.next().unwrap_or_default();

        if image.is_empty() || features.is_empty() {
            return Err(PersistenceError::InvalidPayloadShape(format!(
                "expected image|features[|model], got {} bytes with empty {}",
                payload.len(),
                if image.is_empty() { "image" } else { "features" }
            )));
        }

        Ok(Self {
            image,
            features,
            model: (!model.is_empty()).then(|| String::from_utf8_lossy(model).into_owned()),
        })
    }
}

impl PayloadWriter {
    /// Pick the mode from `data_handling.split_payload` and resolve table names
    pub fn from_config(config: &StorageConfig) -> Self {
        let table_name = |role: &str| {
            config
                .table(role)
                .map(|table| table.name.clone())
                .unwrap_or_else(|| role.to_string())
        };

        if config.data_handling.split_payload {
            Self::Split {
                images_table: table_name(IMAGES_ROLE),
                features_table: table_name(FEATURES_ROLE),
            }
        } else {
            Self::Flat {
                table: table_name(PAYLOADS_ROLE),
            }
        }
    }

    pub fn is_split(&self) -> bool {
        matches!(self, Self::Split { .. })
    }

    /// Issue the inserts for one payload inside `tx`. Nothing is committed here.
    pub async fn apply<T>(&self, tx: &mut T, payload: &[u8]) -> Result<WriteReceipt, PersistenceError>
    where
        T: StoreTransaction + ?Sized,
    {
        match self {
            Self::Flat { table } => {
                tx.insert_payload(table, payload).await?;
                Ok(WriteReceipt {
                    rows: 1,
                    bytes: payload.len(),
                    image_id: None,
                })
            }
            Self::Split {
                images_table,
                features_table,
            } => {
                let split = SplitPayload::parse(payload)?;

                let image_id = tx.insert_image(images_table, split.image).await?;
                tx.insert_features(features_table, image_id, split.features, split.model.as_deref())
                    .await?;

                Ok(WriteReceipt {
                    rows: 2,
                    bytes: split.image.len() + split.features.len(),
                    image_id: Some(image_id),
                })
            }
        }
    }
}

impl fmt::Display for PayloadWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat { table } => write!(f, "flat ({})", table),
            Self::Split {
                images_table,
                features_table,
            } => write!(f, "split ({} + {})", images_table, features_table),
        }
    }
}
