//! Error taxonomy for the refresh pipeline.
//!
//! Every component returns [`Result`]. The orchestrator never lets these
//! escape `refresh`; their `Display` text is what ends up in a record's
//! `last_attempt_error`.

use crate::index_client::{OperationError, OperationState};

/// Common error type for `list_qna_sync`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Reading a page of list content failed for a reason other than auth.
    #[error("list fetch failed: {0}")]
    SourceFetch(String),

    /// The list backend rejected the bearer credential (HTTP 401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The credential is valid but lacks access to the list (HTTP 403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("staging write failed for '{name}': {message}")]
    StagingWrite { name: String, message: String },

    #[error("staging delete failed for '{name}': {message}")]
    StagingDelete { name: String, message: String },

    /// Transport failure or non-2xx response from the index backend.
    #[error("index request failed ({context}): {message}")]
    IndexRequest { context: String, message: String },

    /// An index operation reached a terminal state other than `Succeeded`.
    #[error("{phase} operation ended in state {state}: {error}")]
    IndexUpdate {
        phase: String,
        state: OperationState,
        error: OperationError,
    },

    #[error("operation {operation_id} still running after {polls} polls")]
    OperationTimeout { operation_id: String, polls: u32 },

    #[error("wait for operation {0} was cancelled")]
    Cancelled(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("record store error: {0}")]
    RecordStore(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a `reqwest` transport error raised while talking to the index.
    pub fn index_request(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::IndexRequest {
            context: context.into(),
            message: source.to_string(),
        }
    }

    /// True for failures caused by the list credential rather than the list.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::RecordStore(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Truncate a response body for inclusion in an error message.
pub(crate) fn truncate_body(body: &str) -> String {
    body.chars().take(500).collect()
}
