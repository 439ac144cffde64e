//! One refresh attempt for one knowledge record.
//!
//! A refresh pulls every page of the record's list, stages each page,
//! replaces the index's sources with the staged pages, publishes, and then
//! removes the staged pages again. The outcome is recorded on the record;
//! nothing is returned to the caller.
//!
//! # Phases
//!
//! ```text
//! fetch+stage ──▶ delete sources ──▶ add batches ──▶ publish
//!      │                │                 │             │
//!      └────────────────┴─────────────────┴─────────────┴──▶ cleanup ──▶ bookkeeping
//! ```
//!
//! | Phase | Failure effect |
//! |-------|----------------|
//! | fetch / stage | remaining phases skipped; cleanup still runs |
//! | delete ends non-`Succeeded` | recorded; adds still run; publish skipped |
//! | add batch ends non-`Succeeded` | recorded; later batches still run; publish skipped |
//! | request fault, poll timeout, cancellation | recorded; remaining phases skipped |
//! | cleanup | logged only |
//! | bookkeeping write | logged only |
//!
//! A failed attempt leaves `last_success_at` untouched and stores every
//! recorded failure, joined with `"; "`, in `last_attempt_error`. Because
//! each attempt is a full delete, add, publish cycle, the next scheduled
//! attempt simply starts over.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::batching::source_batches;
use crate::error::{Error, Result};
use crate::index_client::{wait_for_completion, IndexClient, PollPolicy, UpdateRequest};
use crate::list_client::ListContentClient;
use crate::models::{KnowledgeRecord, StagedPage};
use crate::record_store::KnowledgeRecordStore;
use crate::staging::{staged_object_name, StagingStore};

/// Runs refresh attempts against shared, stateless backend clients.
///
/// Safe to share across tasks; concurrent refreshes must target different
/// records.
pub struct RefreshOrchestrator {
    lists: Arc<dyn ListContentClient>,
    staging: Arc<dyn StagingStore>,
    index: Arc<dyn IndexClient>,
    records: Arc<dyn KnowledgeRecordStore>,
    poll: PollPolicy,
    cancel: CancellationToken,
}

/// What the update phases produced.
#[derive(Debug, Default)]
struct UpdateOutcome {
    failures: Vec<Error>,
    batches: usize,
    published: bool,
}

impl UpdateOutcome {
    fn describe(&self) -> String {
        if self.failures.is_empty() {
            return "index was not published".to_string();
        }
        self.failures
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl RefreshOrchestrator {
    pub fn new(
        lists: Arc<dyn ListContentClient>,
        staging: Arc<dyn StagingStore>,
        index: Arc<dyn IndexClient>,
        records: Arc<dyn KnowledgeRecordStore>,
        poll: PollPolicy,
    ) -> Self {
        Self {
            lists,
            staging,
            index,
            records,
            poll,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to abort in-flight operation waits.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn records(&self) -> &Arc<dyn KnowledgeRecordStore> {
        &self.records
    }

    /// Run one full attempt for `record` and persist its bookkeeping.
    ///
    /// Never fails; the outcome is visible only through the stored record.
    pub async fn refresh(&self, record: &KnowledgeRecord) {
        let attempt_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "refresh",
            record_id = %record.id,
            attempt_id = %attempt_id
        );
        self.run_attempt(record).instrument(span).await
    }

    /// Load `id` from the record store, refresh it, and return the stored
    /// result.
    pub async fn refresh_by_id(&self, id: &str) -> Result<KnowledgeRecord> {
        let record = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("knowledge record '{id}'")))?;
        self.refresh(&record).await;
        self.records
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("knowledge record '{id}'")))
    }

    async fn run_attempt(&self, record: &KnowledgeRecord) {
        let mut record = record.clone();
        record.last_attempt_at = Some(Utc::now());
        tracing::debug!("attempt started");

        let mut staged = Vec::new();
        let outcome = match self.fetch_and_stage(&record, &mut staged).await {
            Ok(()) => {
                tracing::debug!(pages = staged.len(), "fetch complete");
                self.update_index(&record, &staged).await
            }
            Err(e) => UpdateOutcome {
                failures: vec![e],
                ..UpdateOutcome::default()
            },
        };

        self.cleanup(&staged).await;

        if outcome.failures.is_empty() && outcome.published {
            record.last_success_at = Some(Utc::now());
            record.last_attempt_error = None;
            tracing::info!(
                pages = staged.len(),
                batches = outcome.batches,
                "refresh succeeded"
            );
        } else {
            let description = outcome.describe();
            if outcome.failures.iter().any(Error::is_auth) {
                tracing::error!(error = %description, "list credential was rejected");
            }
            tracing::warn!(
                pages = staged.len(),
                batches = outcome.batches,
                error = %description,
                "refresh failed"
            );
            record.last_attempt_error = Some(description);
        }

        if let Err(e) = self.records.insert_or_merge(&record).await {
            tracing::error!(error = %e, "failed to persist refresh bookkeeping");
        }
    }

    /// Page through the list, staging each page as it arrives.
    ///
    /// Pages staged before a failure stay in `staged` so they can be
    /// cleaned up.
    async fn fetch_and_stage(
        &self,
        record: &KnowledgeRecord,
        staged: &mut Vec<StagedPage>,
    ) -> Result<()> {
        let fields = record.projected_fields();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .lists
                .page_of(&record.list, &fields, cursor.as_deref())
                .await?;
            let body = serde_json::to_vec(&page)?;

            let name = staged_object_name();
            let locator = self.staging.put(&name, &body).await?;
            tracing::debug!(name = %name, items = page.items.len(), "staged page");
            staged.push(StagedPage { name, locator });

            match page.next_cursor() {
                Some(next) => cursor = Some(next.to_string()),
                None => return Ok(()),
            }
        }
    }

    async fn update_index(&self, record: &KnowledgeRecord, staged: &[StagedPage]) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();

        // Delete
        let delete_ok = match self.delete_current_sources(&record.id).await {
            Ok(None) => true,
            Ok(Some(failure)) => {
                outcome.failures.push(failure);
                false
            }
            Err(e) => {
                outcome.failures.push(e);
                return outcome;
            }
        };
        tracing::debug!(succeeded = delete_ok, "delete phase finished");

        // Add
        let mut adds_ok = true;
        for (i, batch) in source_batches(staged).into_iter().enumerate() {
            outcome.batches += 1;
            let request = UpdateRequest::add_pages(batch, &record.question_field.name);
            match self.submit_and_wait(&record.id, &request, "add").await {
                Ok(None) => {
                    tracing::debug!(batch = i, sources = batch.len(), "add batch succeeded");
                }
                Ok(Some(failure)) => {
                    tracing::debug!(batch = i, error = %failure, "add batch failed");
                    outcome.failures.push(failure);
                    adds_ok = false;
                }
                Err(e) => {
                    outcome.failures.push(e);
                    return outcome;
                }
            }
        }

        // Publish
        if delete_ok && adds_ok {
            match self.index.publish(&record.id).await {
                Ok(()) => {
                    tracing::debug!("index published");
                    outcome.published = true;
                }
                Err(e) => outcome.failures.push(e),
            }
        } else {
            tracing::debug!("publish skipped");
        }

        outcome
    }

    /// Remove every source currently on the index.
    ///
    /// `Ok(None)` on success, `Ok(Some(_))` when the operation ended in a
    /// non-succeeding state. An index with no sources needs no update.
    async fn delete_current_sources(&self, index_id: &str) -> Result<Option<Error>> {
        let sources = self.index.read_current_sources(index_id).await?;
        if sources.is_empty() {
            tracing::debug!("index has no sources to delete");
            return Ok(None);
        }
        tracing::debug!(sources = sources.len(), "deleting current sources");
        let request = UpdateRequest::delete_sources(sources);
        self.submit_and_wait(index_id, &request, "delete").await
    }

    async fn submit_and_wait(
        &self,
        index_id: &str,
        request: &UpdateRequest,
        phase: &str,
    ) -> Result<Option<Error>> {
        let submitted = self.index.submit_update(index_id, request).await?;
        let finished =
            wait_for_completion(self.index.as_ref(), submitted, &self.poll, &self.cancel).await?;
        Ok(finished.failure(phase))
    }

    async fn cleanup(&self, staged: &[StagedPage]) {
        let mut failed = 0usize;
        for page in staged {
            if let Err(e) = self.staging.delete(&page.name).await {
                failed += 1;
                tracing::warn!(name = %page.name, error = %e, "failed to delete staged page");
            }
        }
        tracing::debug!(pages = staged.len(), failed, "cleanup finished");
    }
}
