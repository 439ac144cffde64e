//! Core data models shared by the refresh pipeline.
//!
//! These types describe the knowledge records being kept in sync, the pages
//! of list content pulled from the source list, and the transient staged
//! objects handed to the index backend.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Name of the list column that uniquely identifies a row.
pub const ROW_ID_FIELD: &str = "id";

/// Addresses a remote list: the hosting site and the list within it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListLocator {
    pub site_id: String,
    pub list_id: String,
}

/// A list column used as the question or as one of the answer fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Internal column name; this is what gets projected and mapped.
    pub name: String,
    /// Human-readable column title.
    #[serde(default)]
    pub display_name: String,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
        }
    }
}

/// Per-index bookkeeping persisted by the knowledge record store.
///
/// Created externally. The refresh orchestrator is the only writer of the
/// `last_*` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    /// Index identifier in the Q&A backend; doubles as the record key.
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub list: ListLocator,
    pub question_field: FieldDescriptor,
    #[serde(default)]
    pub answer_fields: Vec<FieldDescriptor>,
    /// Hours between refreshes; zero disables scheduled refresh.
    #[serde(default)]
    pub refresh_interval_hours: u32,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_attempt_error: Option<String>,
}

impl KnowledgeRecord {
    /// Field projection for list reads: question, answers in order, row id.
    pub fn projected_fields(&self) -> Vec<String> {
        let mut fields = Vec::with_capacity(self.answer_fields.len() + 2);
        fields.push(self.question_field.name.clone());
        fields.extend(self.answer_fields.iter().map(|f| f.name.clone()));
        fields.push(ROW_ID_FIELD.to_string());
        fields
    }

    /// When the next scheduled refresh becomes due, if ever.
    ///
    /// Records that have never succeeded or have a zero interval are not
    /// scheduled.
    pub fn next_refresh_due(&self) -> Option<DateTime<Utc>> {
        if self.refresh_interval_hours == 0 {
            return None;
        }
        self.last_success_at
            .map(|last| last + Duration::hours(i64::from(self.refresh_interval_hours)))
    }

    /// True when the refresh interval has fully elapsed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_refresh_due().is_some_and(|due| due < now)
    }
}

/// Projectable columns of a [`KnowledgeRecord`].
///
/// The record id is always returned; unprojected fields come back with
/// their default values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    Name,
    List,
    QuestionField,
    AnswerFields,
    RefreshInterval,
    LastSuccess,
    LastAttempt,
    LastAttemptError,
}

impl RecordField {
    pub const ALL: [RecordField; 8] = [
        RecordField::Name,
        RecordField::List,
        RecordField::QuestionField,
        RecordField::AnswerFields,
        RecordField::RefreshInterval,
        RecordField::LastSuccess,
        RecordField::LastAttempt,
        RecordField::LastAttemptError,
    ];

    /// Fields the scheduler needs to decide and run a refresh.
    pub const SCHEDULING: [RecordField; 7] = [
        RecordField::Name,
        RecordField::List,
        RecordField::QuestionField,
        RecordField::AnswerFields,
        RecordField::RefreshInterval,
        RecordField::LastSuccess,
        RecordField::LastAttempt,
    ];
}

/// One page of list content as returned by the list backend.
///
/// Serialized as-is into the staged object, so the wire names are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    #[serde(rename = "@odata.context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Opaque continuation cursor; absent on the final page.
    #[serde(rename = "@odata.nextLink", default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
    #[serde(rename = "value", default)]
    pub items: Vec<serde_json::Value>,
}

impl ListPage {
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_link.as_deref().filter(|s| !s.is_empty())
    }
}

/// A staged page owned by a single refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPage {
    /// Object name in the staging store (also the index source file name).
    pub name: String,
    /// Fetchable location handed to the index backend.
    pub locator: String,
}
