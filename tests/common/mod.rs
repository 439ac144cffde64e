//! In-memory fakes for the refresh pipeline's backend traits.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use list_qna_sync::error::{Error, Result};
use list_qna_sync::index_client::{
    ErrorDetail, IndexClient, IndexOperation, OperationError, OperationState, PollPolicy,
    UpdateRequest,
};
use list_qna_sync::list_client::ListContentClient;
use list_qna_sync::models::{FieldDescriptor, KnowledgeRecord, ListLocator, ListPage};
use list_qna_sync::record_store::{KnowledgeRecordStore, MemoryRecordStore};
use list_qna_sync::refresh::RefreshOrchestrator;
use list_qna_sync::staging::StagingStore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ─── List ───────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub enum ListFailure {
    Unauthorized,
    Server,
}

/// Serves a fixed sequence of pages linked by `https://list.test/next/<n>`.
pub struct FakeList {
    pages: Vec<ListPage>,
    fail_at: Option<(usize, ListFailure)>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    pub calls: Mutex<Vec<(Option<String>, Vec<String>)>>,
}

impl FakeList {
    pub fn with_item_counts(counts: &[usize]) -> Self {
        let pages = counts
            .iter()
            .enumerate()
            .map(|(i, &count)| ListPage {
                context: Some("https://list.test/$metadata#items".into()),
                next_link: (i + 1 < counts.len())
                    .then(|| format!("https://list.test/next/{}", i + 1)),
                items: (0..count)
                    .map(|j| {
                        json!({
                            "id": format!("{i}-{j}"),
                            "fields": {
                                "Title": format!("Question {i}-{j}?"),
                                "Answer": format!("Answer {i}-{j}."),
                                "id": format!("{i}-{j}")
                            }
                        })
                    })
                    .collect(),
            })
            .collect();
        Self {
            pages,
            fail_at: None,
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_at(mut self, page: usize, failure: ListFailure) -> Self {
        self.fail_at = Some((page, failure));
        self
    }

    /// Hold every page read open for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Most page reads that were open at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ListContentClient for FakeList {
    async fn page_of(
        &self,
        _list: &ListLocator,
        fields: &[String],
        cursor: Option<&str>,
    ) -> Result<ListPage> {
        self.calls
            .lock()
            .unwrap()
            .push((cursor.map(String::from), fields.to_vec()));

        if let Some(delay) = self.delay {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        let index = match cursor {
            None => 0,
            Some(c) => c
                .rsplit('/')
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| Error::SourceFetch(format!("unknown cursor {c}")))?,
        };

        if let Some((at, failure)) = self.fail_at {
            if at == index {
                return Err(match failure {
                    ListFailure::Unauthorized => {
                        Error::Unauthorized("HTTP 401 Unauthorized: token expired".into())
                    }
                    ListFailure::Server => Error::SourceFetch("HTTP 503: busy".into()),
                });
            }
        }

        self.pages
            .get(index)
            .cloned()
            .ok_or_else(|| Error::SourceFetch(format!("no page {index}")))
    }
}

// ─── Staging ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeStaging {
    pub fail_put_at: Option<usize>,
    pub fail_deletes: bool,
    pub puts: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
    pub contents: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeStaging {
    pub fn failing_put_at(index: usize) -> Self {
        Self {
            fail_put_at: Some(index),
            ..Self::default()
        }
    }

    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    pub fn put_names(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    pub fn deleted_names(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn live_count(&self) -> usize {
        self.contents.lock().unwrap().len()
    }
}

#[async_trait]
impl StagingStore for FakeStaging {
    async fn put(&self, name: &str, content: &[u8]) -> Result<String> {
        let mut puts = self.puts.lock().unwrap();
        if self.fail_put_at == Some(puts.len()) {
            return Err(Error::StagingWrite {
                name: name.to_string(),
                message: "HTTP 500: disk full".into(),
            });
        }
        puts.push(name.to_string());
        self.contents
            .lock()
            .unwrap()
            .insert(name.to_string(), content.to_vec());
        Ok(format!("https://staging.test/{name}"))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.deletes.lock().unwrap().push(name.to_string());
        if self.fail_deletes {
            return Err(Error::StagingDelete {
                name: name.to_string(),
                message: "HTTP 503: slow down".into(),
            });
        }
        self.contents.lock().unwrap().remove(name);
        Ok(())
    }
}

// ─── Index ──────────────────────────────────────────────────────────

/// Index whose operations report `Running` once before their final state.
pub struct FakeIndex {
    pub sources: Mutex<Vec<String>>,
    pub delete_state: OperationState,
    /// Final state of each add batch, by batch position; missing means success.
    pub add_states: Vec<OperationState>,
    pub never_finishes: bool,
    pub updates: Mutex<Vec<UpdateRequest>>,
    pub publishes: Mutex<u32>,
    pub polls: Mutex<u32>,
    ops: Mutex<HashMap<String, (OperationState, Option<OperationError>)>>,
}

impl FakeIndex {
    pub fn with_sources(sources: &[&str]) -> Self {
        Self {
            sources: Mutex::new(sources.iter().map(|s| s.to_string()).collect()),
            delete_state: OperationState::Succeeded,
            add_states: Vec::new(),
            never_finishes: false,
            updates: Mutex::new(Vec::new()),
            publishes: Mutex::new(0),
            polls: Mutex::new(0),
            ops: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_delete_state(mut self, state: OperationState) -> Self {
        self.delete_state = state;
        self
    }

    pub fn with_add_states(mut self, states: &[OperationState]) -> Self {
        self.add_states = states.to_vec();
        self
    }

    pub fn never_finishing(mut self) -> Self {
        self.never_finishes = true;
        self
    }

    pub fn current_sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> u32 {
        *self.publishes.lock().unwrap()
    }

    pub fn delete_requests(&self) -> Vec<Vec<String>> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| u.delete.as_ref().map(|d| d.sources.clone()))
            .collect()
    }

    /// File names of each add batch, in submission order.
    pub fn add_batches(&self) -> Vec<Vec<String>> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| {
                u.add
                    .as_ref()
                    .map(|a| a.files.iter().map(|f| f.file_name.clone()).collect())
            })
            .collect()
    }

    pub fn add_batch_sizes(&self) -> Vec<usize> {
        self.add_batches().iter().map(|b| b.len()).collect()
    }
}

#[async_trait]
impl IndexClient for FakeIndex {
    async fn read_current_sources(&self, _index_id: &str) -> Result<Vec<String>> {
        Ok(self.current_sources())
    }

    async fn submit_update(
        &self,
        _index_id: &str,
        update: &UpdateRequest,
    ) -> Result<IndexOperation> {
        let (id, add_position) = {
            let mut updates = self.updates.lock().unwrap();
            let add_position = updates.iter().filter(|u| u.add.is_some()).count();
            updates.push(update.clone());
            (format!("op-{}", updates.len()), add_position)
        };

        let (phase, state) = if update.delete.is_some() {
            ("delete", self.delete_state)
        } else {
            (
                "add",
                self.add_states
                    .get(add_position)
                    .copied()
                    .unwrap_or(OperationState::Succeeded),
            )
        };

        let error = if state.is_successful() {
            let mut sources = self.sources.lock().unwrap();
            if let Some(ref delete) = update.delete {
                sources.retain(|s| !delete.sources.contains(s));
            }
            if let Some(ref add) = update.add {
                sources.extend(add.files.iter().map(|f| f.file_name.clone()));
            }
            None
        } else {
            Some(OperationError {
                code: "ServiceError".into(),
                message: format!("{phase} rejected by the index"),
                details: vec![ErrorDetail {
                    code: Some("SourceLocked".into()),
                    message: format!("{phase} could not be applied"),
                    target: None,
                }],
            })
        };

        let final_state = if self.never_finishes {
            OperationState::Running
        } else {
            state
        };
        self.ops
            .lock()
            .unwrap()
            .insert(id.clone(), (final_state, error));

        Ok(IndexOperation {
            id,
            state: OperationState::NotStarted,
            error: None,
        })
    }

    async fn get_operation(&self, operation_id: &str) -> Result<IndexOperation> {
        *self.polls.lock().unwrap() += 1;
        let ops = self.ops.lock().unwrap();
        let (state, error) = ops
            .get(operation_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(operation_id.to_string()))?;
        Ok(IndexOperation {
            id: operation_id.to_string(),
            state,
            error,
        })
    }

    async fn publish(&self, _index_id: &str) -> Result<()> {
        *self.publishes.lock().unwrap() += 1;
        Ok(())
    }
}

// ─── Record store ───────────────────────────────────────────────────

/// Reads from an inner store; every write fails.
pub struct ReadOnlyRecordStore {
    pub inner: MemoryRecordStore,
    pub write_attempts: Mutex<u32>,
}

#[async_trait]
impl KnowledgeRecordStore for ReadOnlyRecordStore {
    async fn get(&self, id: &str) -> Result<Option<KnowledgeRecord>> {
        self.inner.get(id).await
    }

    async fn get_all(
        &self,
        fields: &[list_qna_sync::models::RecordField],
    ) -> Result<Vec<KnowledgeRecord>> {
        self.inner.get_all(fields).await
    }

    async fn insert_or_merge(&self, record: &KnowledgeRecord) -> Result<()> {
        *self.write_attempts.lock().unwrap() += 1;
        Err(Error::RecordStore(format!(
            "write of '{}' returned HTTP 412",
            record.id
        )))
    }

    async fn remove(&self, _id: &str) -> Result<bool> {
        Ok(false)
    }
}

// ─── Builders ───────────────────────────────────────────────────────

pub fn fast_poll() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(1),
        max_polls: 50,
    }
}

pub fn record(id: &str) -> KnowledgeRecord {
    KnowledgeRecord {
        id: id.to_string(),
        name: format!("{id} FAQ"),
        list: ListLocator {
            site_id: "contoso.sharepoint.com,1,2".into(),
            list_id: format!("{id}-list"),
        },
        question_field: FieldDescriptor::new("Title", "Question"),
        answer_fields: vec![FieldDescriptor::new("Answer", "Answer")],
        refresh_interval_hours: 24,
        last_success_at: None,
        last_attempt_at: None,
        last_attempt_error: None,
    }
}

pub fn record_last_refreshed(id: &str, at: DateTime<Utc>) -> KnowledgeRecord {
    KnowledgeRecord {
        last_success_at: Some(at),
        ..record(id)
    }
}

pub struct Harness {
    pub list: Arc<FakeList>,
    pub staging: Arc<FakeStaging>,
    pub index: Arc<FakeIndex>,
    pub records: Arc<MemoryRecordStore>,
    pub orchestrator: Arc<RefreshOrchestrator>,
}

pub fn harness(
    list: FakeList,
    staging: FakeStaging,
    index: FakeIndex,
    records: Vec<KnowledgeRecord>,
) -> Harness {
    let list = Arc::new(list);
    let staging = Arc::new(staging);
    let index = Arc::new(index);
    let records = Arc::new(MemoryRecordStore::with_records(records));
    let orchestrator = Arc::new(RefreshOrchestrator::new(
        list.clone(),
        staging.clone(),
        index.clone(),
        records.clone(),
        fast_poll(),
    ));
    Harness {
        list,
        staging,
        index,
        records,
        orchestrator,
    }
}

impl Harness {
    pub async fn stored(&self, id: &str) -> KnowledgeRecord {
        self.records.get(id).await.unwrap().unwrap()
    }
}
