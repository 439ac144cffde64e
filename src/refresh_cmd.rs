//! `lqs refresh`, `lqs tick` and `lqs run`.
//!
//! Builds the production pipeline from [`Config`]: SQLite record store,
//! Microsoft Graph list client, S3 staging store and QnA Maker index
//! client. Secrets are read from the environment variables named in the
//! configuration here and nowhere else.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db;
use crate::index_client::{QnaMakerClient, QnaMakerSettings};
use crate::list_client::{GraphListClient, GraphListSettings};
use crate::refresh::RefreshOrchestrator;
use crate::record_store::SqliteRecordStore;
use crate::scheduler::RefreshScheduler;
use crate::staging_s3::{AwsCredentials, S3StagingSettings, S3StagingStore};
use crate::token::StaticTokenProvider;

fn read_secret(var: &str) -> Result<String> {
    let value =
        std::env::var(var).with_context(|| format!("{} environment variable not set", var))?;
    if value.trim().is_empty() {
        bail!("{} environment variable is empty", var);
    }
    Ok(value)
}

/// Wire up an orchestrator whose operation waits stop when `cancel` fires.
pub async fn build_orchestrator(
    config: &Config,
    cancel: CancellationToken,
) -> Result<Arc<RefreshOrchestrator>> {
    let pool = db::connect(&config.db).await?;
    let records = Arc::new(SqliteRecordStore::new(pool));

    let tokens = Arc::new(StaticTokenProvider::from_env(&config.list.access_token_env)?);
    let lists = Arc::new(GraphListClient::new(
        GraphListSettings {
            endpoint: config.list.endpoint.clone(),
            timeout: Duration::from_secs(config.list.timeout_secs),
        },
        tokens,
    )?);

    let creds = AwsCredentials::from_env()?;
    let staging = Arc::new(S3StagingStore::new(
        S3StagingSettings::from(&config.staging),
        creds,
    )?);

    let index = Arc::new(QnaMakerClient::new(QnaMakerSettings {
        endpoint: config.index.endpoint.clone(),
        subscription_key: read_secret(&config.index.subscription_key_env)?,
        timeout: Duration::from_secs(config.index.timeout_secs),
    })?);

    let orchestrator =
        RefreshOrchestrator::new(lists, staging, index, records, config.index.poll_policy())
            .with_cancellation(cancel);
    Ok(Arc::new(orchestrator))
}

fn build_scheduler(config: &Config, orchestrator: Arc<RefreshOrchestrator>) -> Result<RefreshScheduler> {
    Ok(RefreshScheduler::new(
        orchestrator,
        Duration::from_secs(config.scheduler.tick_interval_secs),
        config.scheduler.max_concurrent_refreshes,
    )?)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            token.cancel();
        }
    });
}

pub async fn run_refresh(config: &Config, id: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let orchestrator = build_orchestrator(config, cancel).await?;

    let record = orchestrator.refresh_by_id(id).await?;

    println!("refresh {}", record.id);
    println!(
        "  last attempt: {}",
        record
            .last_attempt_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  last success: {}",
        record
            .last_success_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    if let Some(ref error) = record.last_attempt_error {
        println!("  last error:");
        for line in error.lines() {
            println!("    {}", line);
        }
        bail!("Refresh of '{}' failed", id);
    }
    Ok(())
}

pub async fn run_tick(config: &Config) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let orchestrator = build_orchestrator(config, cancel).await?;
    let scheduler = build_scheduler(config, orchestrator)?;

    let report = scheduler.refresh_due().await?;
    println!("tick");
    println!("  records considered: {}", report.considered);
    println!("  refreshes run: {}", report.refreshed);
    Ok(())
}

pub async fn run_scheduler(config: &Config) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let orchestrator = build_orchestrator(config, cancel.clone()).await?;
    let scheduler = build_scheduler(config, orchestrator)?;

    tracing::info!(
        tick_interval_secs = config.scheduler.tick_interval_secs,
        max_concurrent = config.scheduler.max_concurrent_refreshes,
        "scheduler started"
    );
    scheduler.run(cancel).await;
    Ok(())
}
