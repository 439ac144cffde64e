//! In-memory [`KnowledgeRecordStore`] for tests and database-less use.
//!
//! Records live in a `BTreeMap` behind `std::sync::RwLock`, so listings come
//! back ordered by id.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{KnowledgeRecord, RecordField};

use super::{project, KnowledgeRecordStore};

pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<String, KnowledgeRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Seed the store with records.
    pub fn with_records(records: impl IntoIterator<Item = KnowledgeRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            records: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> Error {
    Error::RecordStore("in-memory record store lock poisoned".to_string())
}

#[async_trait]
impl KnowledgeRecordStore for MemoryRecordStore {
    async fn get(&self, id: &str) -> Result<Option<KnowledgeRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(id).cloned())
    }

    async fn get_all(&self, fields: &[RecordField]) -> Result<Vec<KnowledgeRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.values().map(|r| project(r, fields)).collect())
    }

    async fn insert_or_merge(&self, record: &KnowledgeRecord) -> Result<()> {
        if record.id.trim().is_empty() {
            return Err(Error::InvalidInput("record id is empty".to_string()));
        }
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(id).is_some())
    }
}
