use anyhow::Result;
use sqlx::SqlitePool;

/// Create the `knowledge_records` table. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Field descriptors are stored as JSON text; timestamps as RFC 3339.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_records (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            site_id TEXT NOT NULL,
            list_id TEXT NOT NULL,
            question_field TEXT NOT NULL,
            answer_fields TEXT NOT NULL DEFAULT '[]',
            refresh_interval_hours INTEGER NOT NULL DEFAULT 0,
            last_success_at TEXT,
            last_attempt_at TEXT,
            last_attempt_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_knowledge_records_last_success ON knowledge_records(last_success_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
