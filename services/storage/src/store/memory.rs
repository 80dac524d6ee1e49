//! In-memory store for tests, with fault injection.

use super::{Store, StoreError, StoreTransaction, TableSpec};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    CreateTable,
    InsertPayload,
    InsertImage,
    InsertFeatures,
    Commit,
    DatabaseSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemRow {
    pub id: i64,
    pub data: Vec<u8>,
    pub image_id: Option<i64>,
    pub model: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    created: Vec<String>,
    tables: BTreeMap<String, Vec<MemRow>>,
    next_id: i64,
    size: u64,
    fail: HashSet<FailPoint>,
    size_queries: u64,
}

enum Staged {
    Create(String),
    Insert(String, MemRow),
}

/// Cloneable handle; clones share the same tables
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_size(&self, size: u64) {
        self.state().size = size;
    }

    pub fn fail(&self, point: FailPoint) {
        self.state().fail.insert(point);
    }

    pub fn heal(&self, point: FailPoint) {
        self.state().fail.remove(&point);
    }

    /// Committed rows of a table
    pub fn rows(&self, table: &str) -> Vec<MemRow> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    /// Tables created by committed transactions, in creation order
    pub fn created_tables(&self) -> Vec<String> {
        self.state().created.clone()
    }

    pub fn size_queries(&self) -> u64 {
        self.state().size_queries
    }

    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        if self.state().fail.contains(&point) {
            Err(StoreError::Backend(format!("injected failure at {:?}", point)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn StoreTransaction + Send + 'a>, StoreError> {
        self.check(FailPoint::Begin)?;
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: Vec::new(),
            open: true,
        }))
    }

    async fn database_size(&mut self) -> Result<u64, StoreError> {
        self.state().size_queries += 1;
        self.check(FailPoint::DatabaseSize)?;
        Ok(self.state().size)
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    staged: Vec<Staged>,
    open: bool,
}

impl MemoryTransaction {
    fn stage(&mut self, point: FailPoint, op: Staged) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::TransactionClosed);
        }
        self.store.check(point)?;
        self.staged.push(op);
        Ok(())
    }

    fn next_id(&self) -> i64 {
        let mut state = self.store.state();
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn create_table(&mut self, table: &TableSpec) -> Result<(), StoreError> {
        self.stage(FailPoint::CreateTable, Staged::Create(table.name.clone()))
    }

    async fn insert_payload(&mut self, table: &str, data: &[u8]) -> Result<(), StoreError> {
        let row = MemRow {
            id: self.next_id(),
            data: data.to_vec(),
            image_id: None,
            model: None,
        };
        self.stage(FailPoint::InsertPayload, Staged::Insert(table.to_string(), row))
    }

    async fn insert_image(&mut self, table: &str, data: &[u8]) -> Result<i64, StoreError> {
        let id = self.next_id();
        let row = MemRow {
            id,
            data: data.to_vec(),
            image_id: None,
            model: None,
        };
        self.stage(FailPoint::InsertImage, Staged::Insert(table.to_string(), row))?;
        Ok(id)
    }

    async fn insert_features(
        &mut self,
        table: &str,
        image_id: i64,
        features: &[u8],
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        let row = MemRow {
            id: self.next_id(),
            data: features.to_vec(),
            image_id: Some(image_id),
            model: model.map(str::to_string),
        };
        self.stage(FailPoint::InsertFeatures, Staged::Insert(table.to_string(), row))
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::TransactionClosed);
        }
        self.store.check(FailPoint::Commit)?;
        self.open = false;

        let mut state = self.store.state();
        for op in self.staged.drain(..) {
            match op {
                Staged::Create(name) => {
                    if !state.created.contains(&name) {
                        state.created.push(name.clone());
                    }
                    state.tables.entry(name).or_default();
                }
                Staged::Insert(table, row) => state.tables.entry(table).or_default().push(row),
            }
        }
        Ok(())
    }
}
