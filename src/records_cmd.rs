//! `lqs records` subcommands: inspect and administer knowledge records.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::models::{KnowledgeRecord, RecordField};
use crate::record_store::{KnowledgeRecordStore, SqliteRecordStore};

async fn open_store(config: &Config) -> Result<SqliteRecordStore> {
    let pool = db::connect(&config.db).await?;
    Ok(SqliteRecordStore::new(pool))
}

fn format_ts(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

/// First line of an error description, capped for table output.
fn summarize_error(error: Option<&str>) -> String {
    match error {
        None => "-".to_string(),
        Some(e) => {
            let first = e.lines().next().unwrap_or_default();
            if first.chars().count() > 60 {
                format!("{}...", first.chars().take(57).collect::<String>())
            } else {
                first.to_string()
            }
        }
    }
}

pub async fn run_list(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let records = store.get_all(&RecordField::ALL).await?;

    if records.is_empty() {
        println!("No knowledge records.");
        return Ok(());
    }

    println!(
        "{:<38} {:<24} {:>8}  {:<16}  LAST ERROR",
        "ID", "NAME", "EVERY(h)", "LAST SUCCESS"
    );
    for r in &records {
        println!(
            "{:<38} {:<24} {:>8}  {:<16}  {}",
            r.id,
            r.name,
            r.refresh_interval_hours,
            format_ts(r.last_success_at),
            summarize_error(r.last_attempt_error.as_deref())
        );
    }
    println!("\n{} record(s)", records.len());

    store.pool().close().await;
    Ok(())
}

pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let Some(record) = store.get(id).await? else {
        bail!("No knowledge record with id '{}'", id);
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    store.pool().close().await;
    Ok(())
}

/// Reject records the refresh pipeline could not act on.
fn validate(record: &KnowledgeRecord) -> Result<()> {
    if record.id.trim().is_empty() {
        bail!("record id must not be empty");
    }
    if record.list.site_id.trim().is_empty() || record.list.list_id.trim().is_empty() {
        bail!("record '{}': list.site_id and list.list_id are required", record.id);
    }
    if record.question_field.name.trim().is_empty() {
        bail!("record '{}': question_field.name is required", record.id);
    }
    Ok(())
}

/// Parse a JSON array of records.
pub fn parse_records(content: &str) -> Result<Vec<KnowledgeRecord>> {
    let records: Vec<KnowledgeRecord> =
        serde_json::from_str(content).context("Expected a JSON array of knowledge records")?;
    for record in &records {
        validate(record)?;
    }
    Ok(records)
}

pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file: {}", path.display()))?;
    let records = parse_records(&content)?;

    let store = open_store(config).await?;
    for record in &records {
        store
            .insert_or_merge(record)
            .await
            .with_context(|| format!("Failed to import record '{}'", record.id))?;
    }
    println!("Imported {} record(s).", records.len());
    store.pool().close().await;
    Ok(())
}

pub async fn run_remove(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    if !store.remove(id).await? {
        bail!("No knowledge record with id '{}'", id);
    }
    println!("Removed record '{}'.", id);
    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_records_fills_bookkeeping_defaults() {
        let json = r#"[{
            "id": "kb-1",
            "name": "HR FAQ",
            "list": {"site_id": "site", "list_id": "list"},
            "question_field": {"name": "Title", "display_name": "Question"},
            "answer_fields": [{"name": "Answer"}],
            "refresh_interval_hours": 12
        }]"#;
        let records = parse_records(json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].refresh_interval_hours, 12);
        assert_eq!(records[0].answer_fields[0].display_name, "");
        assert!(records[0].last_success_at.is_none());
        assert!(records[0].last_attempt_error.is_none());
    }

    #[test]
    fn parse_records_rejects_missing_question_field_name() {
        let json = r#"[{
            "id": "kb-1",
            "list": {"site_id": "site", "list_id": "list"},
            "question_field": {"name": ""}
        }]"#;
        let err = parse_records(json).unwrap_err();
        assert!(err.to_string().contains("question_field.name"));
    }

    #[test]
    fn summarize_error_keeps_first_line() {
        assert_eq!(summarize_error(None), "-");
        assert_eq!(
            summarize_error(Some("Error Code: X\nError Message: y")),
            "Error Code: X"
        );
        let long = "e".repeat(100);
        assert_eq!(summarize_error(Some(&long)).chars().count(), 60);
    }
}
