//! Persistence for [`KnowledgeRecord`] bookkeeping.
//!
//! The [`KnowledgeRecordStore`] trait is what the refresh orchestrator and
//! scheduler depend on. Two backends ship with the crate:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteRecordStore`] | Production; the `knowledge_records` table |
//! | [`MemoryRecordStore`] | Tests and embedding without a database |
//!
//! Implementations must be `Send + Sync`; refreshes of different records run
//! concurrently against one shared store.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{FieldDescriptor, KnowledgeRecord, ListLocator, RecordField};

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

/// Storage operations for knowledge records.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](KnowledgeRecordStore::get) | Fetch one record by id |
/// | [`get_all`](KnowledgeRecordStore::get_all) | Fetch every record, projected to some fields |
/// | [`insert_or_merge`](KnowledgeRecordStore::insert_or_merge) | Write a record keyed by id |
/// | [`remove`](KnowledgeRecordStore::remove) | Administrative removal |
#[async_trait]
pub trait KnowledgeRecordStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<KnowledgeRecord>>;

    /// Return all records. Only `fields` (plus the id) are populated; the rest
    /// carry default values.
    async fn get_all(&self, fields: &[RecordField]) -> Result<Vec<KnowledgeRecord>>;

    /// Insert a new record or overwrite the stored columns of an existing one.
    ///
    /// Any failure to confirm the write is returned as an error.
    async fn insert_or_merge(&self, record: &KnowledgeRecord) -> Result<()>;

    /// Remove a record. Returns whether a record was removed.
    ///
    /// The refresh pipeline never calls this.
    async fn remove(&self, id: &str) -> Result<bool>;
}

/// Reset every field not named in `fields` to its default.
pub(crate) fn project(record: &KnowledgeRecord, fields: &[RecordField]) -> KnowledgeRecord {
    let has = |f: RecordField| fields.contains(&f);
    KnowledgeRecord {
        id: record.id.clone(),
        name: if has(RecordField::Name) {
            record.name.clone()
        } else {
            String::new()
        },
        list: if has(RecordField::List) {
            record.list.clone()
        } else {
            ListLocator::default()
        },
        question_field: if has(RecordField::QuestionField) {
            record.question_field.clone()
        } else {
            FieldDescriptor::default()
        },
        answer_fields: if has(RecordField::AnswerFields) {
            record.answer_fields.clone()
        } else {
            Vec::new()
        },
        refresh_interval_hours: if has(RecordField::RefreshInterval) {
            record.refresh_interval_hours
        } else {
            0
        },
        last_success_at: record.last_success_at.filter(|_| has(RecordField::LastSuccess)),
        last_attempt_at: record.last_attempt_at.filter(|_| has(RecordField::LastAttempt)),
        last_attempt_error: record
            .last_attempt_error
            .clone()
            .filter(|_| has(RecordField::LastAttemptError)),
    }
}
