//! Periodic selection and execution of due refreshes.
//!
//! A tick loads every record (projected to the fields a refresh needs),
//! keeps the ones whose `last_success_at + refresh_interval_hours` is
//! already in the past, and refreshes them concurrently. Records with a
//! zero interval, or that have never succeeded, are never selected.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::{KnowledgeRecord, RecordField};
use crate::refresh::RefreshOrchestrator;

/// Summary of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub considered: usize,
    pub refreshed: usize,
}

pub struct RefreshScheduler {
    orchestrator: Arc<RefreshOrchestrator>,
    tick_interval: Duration,
    max_concurrent: usize,
}

/// Records due at `now`, each id at most once, in input order.
pub fn select_due(records: Vec<KnowledgeRecord>, now: DateTime<Utc>) -> Vec<KnowledgeRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| r.is_due(now))
        .filter(|r| seen.insert(r.id.clone()))
        .collect()
}

impl RefreshScheduler {
    pub fn new(
        orchestrator: Arc<RefreshOrchestrator>,
        tick_interval: Duration,
        max_concurrent: usize,
    ) -> Result<Self> {
        if tick_interval.is_zero() {
            return Err(Error::InvalidInput("tick_interval must be > 0".to_string()));
        }
        if max_concurrent == 0 {
            return Err(Error::InvalidInput("max_concurrent must be > 0".to_string()));
        }
        Ok(Self {
            orchestrator,
            tick_interval,
            max_concurrent,
        })
    }

    /// Refresh every record due at `now`, at most `max_concurrent` at a time.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let records = self
            .orchestrator
            .records()
            .get_all(&RecordField::SCHEDULING)
            .await?;
        let considered = records.len();
        let due = select_due(records, now);
        if due.is_empty() {
            tracing::debug!(considered, "no records due");
            return Ok(TickReport {
                considered,
                refreshed: 0,
            });
        }
        tracing::info!(considered, due = due.len(), "refreshing due records");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for record in due {
            let semaphore = Arc::clone(&semaphore);
            let orchestrator = Arc::clone(&self.orchestrator);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return false;
                };
                orchestrator.refresh(&record).await;
                true
            });
        }

        let mut refreshed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "refresh task did not complete"),
            }
        }

        Ok(TickReport {
            considered,
            refreshed,
        })
    }

    /// Same as [`tick`](Self::tick) at the current time.
    pub async fn refresh_due(&self) -> Result<TickReport> {
        self.tick(Utc::now()).await
    }

    /// Tick every `tick_interval` until `cancel` fires.
    ///
    /// A failed tick is logged and the loop keeps going.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("refresh scheduler cancelled");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.refresh_due().await {
                        tracing::warn!(error = %e, "refresh scheduler tick failed");
                    }
                }
            }
        }
    }
}
