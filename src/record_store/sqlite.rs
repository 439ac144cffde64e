//! SQLite-backed [`KnowledgeRecordStore`].
//!
//! Maps records onto the `knowledge_records` table created by
//! [`run_migrations`](crate::migrate::run_migrations). Field descriptors are
//! JSON text columns; timestamps are RFC 3339 text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{FieldDescriptor, KnowledgeRecord, ListLocator, RecordField};

use super::KnowledgeRecordStore;

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn columns(field: RecordField) -> &'static [&'static str] {
    match field {
        RecordField::Name => &["name"],
        RecordField::List => &["site_id", "list_id"],
        RecordField::QuestionField => &["question_field"],
        RecordField::AnswerFields => &["answer_fields"],
        RecordField::RefreshInterval => &["refresh_interval_hours"],
        RecordField::LastSuccess => &["last_success_at"],
        RecordField::LastAttempt => &["last_attempt_at"],
        RecordField::LastAttemptError => &["last_attempt_error"],
    }
}

fn select_sql(fields: &[RecordField]) -> String {
    let mut cols = vec!["id"];
    for field in fields {
        for &col in columns(*field) {
            if !cols.contains(&col) {
                cols.push(col);
            }
        }
    }
    format!("SELECT {} FROM knowledge_records", cols.join(", "))
}

fn format_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

fn parse_ts(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::RecordStore(format!("bad timestamp in {column}: {e}")))
        })
        .transpose()
}

fn decode_row(row: &SqliteRow, fields: &[RecordField]) -> Result<KnowledgeRecord> {
    let has = |f: RecordField| fields.contains(&f);

    let name: String = if has(RecordField::Name) {
        row.try_get("name")?
    } else {
        String::new()
    };

    let list = if has(RecordField::List) {
        ListLocator {
            site_id: row.try_get("site_id")?,
            list_id: row.try_get("list_id")?,
        }
    } else {
        ListLocator::default()
    };

    let question_field: FieldDescriptor = if has(RecordField::QuestionField) {
        let raw: String = row.try_get("question_field")?;
        serde_json::from_str(&raw)?
    } else {
        FieldDescriptor::default()
    };

    let answer_fields: Vec<FieldDescriptor> = if has(RecordField::AnswerFields) {
        let raw: String = row.try_get("answer_fields")?;
        serde_json::from_str(&raw)?
    } else {
        Vec::new()
    };

    let refresh_interval_hours = if has(RecordField::RefreshInterval) {
        let hours: i64 = row.try_get("refresh_interval_hours")?;
        u32::try_from(hours).map_err(|_| {
            Error::RecordStore(format!("refresh_interval_hours out of range: {hours}"))
        })?
    } else {
        0
    };

    let last_success_at = if has(RecordField::LastSuccess) {
        parse_ts("last_success_at", row.try_get("last_success_at")?)?
    } else {
        None
    };

    let last_attempt_at = if has(RecordField::LastAttempt) {
        parse_ts("last_attempt_at", row.try_get("last_attempt_at")?)?
    } else {
        None
    };

    let last_attempt_error: Option<String> = if has(RecordField::LastAttemptError) {
        row.try_get("last_attempt_error")?
    } else {
        None
    };

    Ok(KnowledgeRecord {
        id: row.try_get("id")?,
        name,
        list,
        question_field,
        answer_fields,
        refresh_interval_hours,
        last_success_at,
        last_attempt_at,
        last_attempt_error,
    })
}

#[async_trait]
impl KnowledgeRecordStore for SqliteRecordStore {
    async fn get(&self, id: &str) -> Result<Option<KnowledgeRecord>> {
        let sql = format!("{} WHERE id = ?", select_sql(&RecordField::ALL));
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_row(&r, &RecordField::ALL)).transpose()
    }

    async fn get_all(&self, fields: &[RecordField]) -> Result<Vec<KnowledgeRecord>> {
        let sql = format!("{} ORDER BY id", select_sql(fields));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(|r| decode_row(r, fields)).collect()
    }

    async fn insert_or_merge(&self, record: &KnowledgeRecord) -> Result<()> {
        if record.id.trim().is_empty() {
            return Err(Error::InvalidInput("record id is empty".to_string()));
        }

        let question_field = serde_json::to_string(&record.question_field)?;
        let answer_fields = serde_json::to_string(&record.answer_fields)?;

        let result = sqlx::query(
            r#"
            INSERT INTO knowledge_records (id, name, site_id, list_id, question_field,
                                           answer_fields, refresh_interval_hours,
                                           last_success_at, last_attempt_at, last_attempt_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                site_id = excluded.site_id,
                list_id = excluded.list_id,
                question_field = excluded.question_field,
                answer_fields = excluded.answer_fields,
                refresh_interval_hours = excluded.refresh_interval_hours,
                last_success_at = excluded.last_success_at,
                last_attempt_at = excluded.last_attempt_at,
                last_attempt_error = excluded.last_attempt_error
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.list.site_id)
        .bind(&record.list.list_id)
        .bind(&question_field)
        .bind(&answer_fields)
        .bind(i64::from(record.refresh_interval_hours))
        .bind(format_ts(record.last_success_at))
        .bind(format_ts(record.last_attempt_at))
        .bind(&record.last_attempt_error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::RecordStore(format!(
                "insert-or-merge of record '{}' affected no rows",
                record.id
            )));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM knowledge_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
