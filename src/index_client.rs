//! Q&A index backend client and long-running operation tracking.
//!
//! Updates to an index are asynchronous: submitting an add/delete returns an
//! [`IndexOperation`] that has to be polled until it reaches a terminal
//! [`OperationState`]. [`wait_for_completion`] does that polling as a
//! cooperative async loop, bounded by a [`PollPolicy`] and cancellable
//! through a [`CancellationToken`].
//!
//! # State machine
//!
//! ```text
//!  NotStarted ──▶ Running ──▶ Succeeded
//!       │            │
//!       └────────────┴──────▶ Failed | BadArgument | Unauthorized
//!                             Forbidden | NotFound | Unspecified
//! ```
//!
//! Only `NotStarted` and `Running` are non-terminal. Unknown state strings
//! from the backend are read as `Unspecified`, which is terminal.
//!
//! # Wire protocol ([`QnaMakerClient`])
//!
//! | Operation | Request |
//! |-----------|---------|
//! | read sources | `GET {endpoint}/knowledgebases/{id}` |
//! | submit update | `PATCH {endpoint}/knowledgebases/{id}` |
//! | get operation | `GET {endpoint}/operations/{operationId}` |
//! | publish | `POST {endpoint}/knowledgebases/{id}` |
//!
//! Every request carries the `Ocp-Apim-Subscription-Key` header.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio_util::sync::CancellationToken;

use crate::error::{truncate_body, Error, Result};
use crate::models::StagedPage;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Extraction format the backend uses to read staged list pages.
pub const LIST_EXTRACTION_FORMAT: &str = "SharepointListJson";

// ═══════════════════════════════════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    BadArgument,
    Unauthorized,
    Forbidden,
    NotFound,
    Unspecified,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::BadArgument => "BadArgument",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "NotFound",
            Self::Unspecified => "Unspecified",
        }
    }

    /// Parse a backend state string. Unknown values map to `Unspecified`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "NotStarted" => Self::NotStarted,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "BadArgument" => Self::BadArgument,
            "Unauthorized" => Self::Unauthorized,
            "Forbidden" => Self::Forbidden,
            "NotFound" => Self::NotFound,
            _ => Self::Unspecified,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NotStarted | Self::Running)
    }

    pub fn is_successful(&self) -> bool {
        *self == Self::Succeeded
    }
}

/// True iff `state` is `Succeeded`.
pub fn is_successful(state: OperationState) -> bool {
    state.is_successful()
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OperationState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub target: Option<String>,
}

/// Structured error reported with a non-succeeding operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

impl OperationError {
    /// Placeholder for a failed operation that came back without detail.
    pub fn missing(state: OperationState) -> Self {
        Self {
            code: state.as_str().to_string(),
            message: "operation reported no error detail".to_string(),
            details: Vec::new(),
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details = self
            .details
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        write!(
            f,
            "Error Code: {}\nError Message: {}\nError Details: {}",
            self.code, self.message, details
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOperation {
    pub id: String,
    pub state: OperationState,
    pub error: Option<OperationError>,
}

impl IndexOperation {
    /// Convert a terminal, non-succeeding operation into an [`Error::IndexUpdate`].
    ///
    /// Returns `None` for a succeeded or still-running operation.
    pub fn failure(&self, phase: &str) -> Option<Error> {
        if !self.state.is_terminal() || self.state.is_successful() {
            return None;
        }
        Some(Error::IndexUpdate {
            phase: phase.to_string(),
            state: self.state,
            error: self
                .error
                .clone()
                .unwrap_or_else(|| OperationError::missing(self.state)),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    #[serde(default)]
    operation_id: String,
    operation_state: OperationState,
    #[serde(default)]
    error_response: Option<ErrorResponse>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: OperationError,
}

impl From<OperationResponse> for IndexOperation {
    fn from(r: OperationResponse) -> Self {
        Self {
            id: r.operation_id,
            state: r.operation_state,
            error: r.error_response.map(|e| e.error),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Update requests
// ═══════════════════════════════════════════════════════════════════════

/// Partial index update: sources to add and/or sources to delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add: Option<AddSources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<DeleteSources>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddSources {
    pub files: Vec<SourceFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteSources {
    pub sources: Vec<String>,
}

/// One staged page registered as an index source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub file_name: String,
    pub file_uri: String,
    pub extraction_options: ExtractionOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOptions {
    pub format: String,
    pub column_mapping: ColumnMapping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMapping {
    pub question: String,
}

impl UpdateRequest {
    pub fn delete_sources(sources: Vec<String>) -> Self {
        Self {
            add: None,
            delete: Some(DeleteSources { sources }),
        }
    }

    /// One source entry per staged page, each mapped to `question_field`.
    pub fn add_pages(pages: &[StagedPage], question_field: &str) -> Self {
        let files = pages
            .iter()
            .map(|page| SourceFile {
                file_name: page.name.clone(),
                file_uri: page.locator.clone(),
                extraction_options: ExtractionOptions {
                    format: LIST_EXTRACTION_FORMAT.to_string(),
                    column_mapping: ColumnMapping {
                        question: question_field.to_string(),
                    },
                },
            })
            .collect();
        Self {
            add: Some(AddSources { files }),
            delete: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Client trait and polling
// ═══════════════════════════════════════════════════════════════════════

/// Asynchronous, batch-oriented Q&A index backend.
///
/// Implementations wrap a stateless HTTP client and are shared across
/// concurrent refreshes.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Identifiers of the sources currently registered on the index.
    async fn read_current_sources(&self, index_id: &str) -> Result<Vec<String>>;

    /// Submit a partial update; the returned operation may still be running.
    async fn submit_update(&self, index_id: &str, update: &UpdateRequest)
        -> Result<IndexOperation>;

    async fn get_operation(&self, operation_id: &str) -> Result<IndexOperation>;

    /// Promote the index's staged edits to the serving copy.
    async fn publish(&self, index_id: &str) -> Result<()>;
}

/// Bounds on how long [`wait_for_completion`] keeps polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before each poll.
    pub interval: Duration,
    /// Polls allowed before giving up with [`Error::OperationTimeout`].
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_polls: 600,
        }
    }
}

/// Poll `operation` until it reaches a terminal state.
///
/// An operation that is already terminal is returned without polling.
/// Otherwise each cycle sleeps for `policy.interval` and then fetches the
/// operation again. The sleep is cancellable through `cancel`.
///
/// # Errors
///
/// - [`Error::OperationTimeout`] after `policy.max_polls` non-terminal polls.
/// - [`Error::Cancelled`] if `cancel` fires while waiting.
/// - Any error returned by [`IndexClient::get_operation`].
#[tracing::instrument(level = "debug", skip_all, fields(operation_id = %operation.id))]
pub async fn wait_for_completion(
    client: &dyn IndexClient,
    operation: IndexOperation,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<IndexOperation> {
    let operation_id = operation.id.clone();
    let mut current = operation;
    let mut polls = 0u32;

    while !current.state.is_terminal() {
        if polls >= policy.max_polls {
            return Err(Error::OperationTimeout {
                operation_id,
                polls,
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled(operation_id));
            }
            _ = tokio::time::sleep(policy.interval) => {}
        }

        current = client.get_operation(&operation_id).await?;
        polls += 1;
        tracing::trace!(polls, state = %current.state, "polled operation");
    }

    tracing::debug!(polls, state = %current.state, "operation reached terminal state");
    Ok(current)
}

// ═══════════════════════════════════════════════════════════════════════
// QnA Maker REST backend
// ═══════════════════════════════════════════════════════════════════════

/// Settings for [`QnaMakerClient`], resolved by the caller.
#[derive(Debug, Clone)]
pub struct QnaMakerSettings {
    pub endpoint: String,
    pub subscription_key: String,
    pub timeout: Duration,
}

pub struct QnaMakerClient {
    http: reqwest::Client,
    endpoint: String,
    subscription_key: String,
}

#[derive(Debug, Deserialize)]
struct KnowledgeBaseDetails {
    #[serde(default)]
    sources: Vec<String>,
}

impl QnaMakerClient {
    pub fn new(settings: QnaMakerSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::index_request("build http client", e))?;
        Ok(Self {
            http,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            subscription_key: settings.subscription_key,
        })
    }

    fn knowledge_base_url(&self, index_id: &str) -> String {
        format!("{}/knowledgebases/{}", self.endpoint, index_id)
    }

    fn operation_url(&self, operation_id: &str) -> String {
        format!("{}/operations/{}", self.endpoint, operation_id)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response> {
        let resp = request
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .send()
            .await
            .map_err(|e| Error::index_request(context, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::IndexRequest {
                context: context.to_string(),
                message: format!("HTTP {}: {}", status, truncate_body(&body)),
            });
        }
        Ok(resp)
    }

    async fn read_operation(resp: reqwest::Response, context: &str) -> Result<IndexOperation> {
        let parsed: OperationResponse = resp
            .json()
            .await
            .map_err(|e| Error::index_request(context, e))?;
        Ok(parsed.into())
    }
}

#[async_trait]
impl IndexClient for QnaMakerClient {
    async fn read_current_sources(&self, index_id: &str) -> Result<Vec<String>> {
        let context = "get knowledge base";
        let resp = self
            .send(self.http.get(self.knowledge_base_url(index_id)), context)
            .await?;
        let details: KnowledgeBaseDetails = resp
            .json()
            .await
            .map_err(|e| Error::index_request(context, e))?;
        Ok(details.sources)
    }

    async fn submit_update(
        &self,
        index_id: &str,
        update: &UpdateRequest,
    ) -> Result<IndexOperation> {
        let context = "update knowledge base";
        let resp = self
            .send(
                self.http.patch(self.knowledge_base_url(index_id)).json(update),
                context,
            )
            .await?;
        Self::read_operation(resp, context).await
    }

    async fn get_operation(&self, operation_id: &str) -> Result<IndexOperation> {
        let context = "get operation";
        let resp = self
            .send(self.http.get(self.operation_url(operation_id)), context)
            .await?;
        Self::read_operation(resp, context).await
    }

    async fn publish(&self, index_id: &str) -> Result<()> {
        self.send(
            self.http.post(self.knowledge_base_url(index_id)),
            "publish knowledge base",
        )
        .await
        .map_err(|e| Error::Publish(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves a scripted sequence of states from `get_operation`.
    struct ScriptedOperations {
        states: Mutex<VecDeque<OperationState>>,
        polls: Mutex<u32>,
    }

    impl ScriptedOperations {
        fn new(states: &[OperationState]) -> Self {
            Self {
                states: Mutex::new(states.iter().copied().collect()),
                polls: Mutex::new(0),
            }
        }

        fn polls(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl IndexClient for ScriptedOperations {
        async fn read_current_sources(&self, _index_id: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn submit_update(
            &self,
            _index_id: &str,
            _update: &UpdateRequest,
        ) -> Result<IndexOperation> {
            unreachable!("not used by polling tests")
        }

        async fn get_operation(&self, operation_id: &str) -> Result<IndexOperation> {
            *self.polls.lock().unwrap() += 1;
            let state = self
                .states
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(OperationState::Running);
            Ok(IndexOperation {
                id: operation_id.to_string(),
                state,
                error: None,
            })
        }

        async fn publish(&self, _index_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn op(state: OperationState) -> IndexOperation {
        IndexOperation {
            id: "op-1".into(),
            state,
            error: None,
        }
    }

    fn fast_policy(max_polls: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_polls,
        }
    }

    #[test]
    fn terminality_and_success() {
        use OperationState::*;
        for s in [NotStarted, Running] {
            assert!(!s.is_terminal());
            assert!(!is_successful(s));
        }
        for s in [Failed, BadArgument, Unauthorized, Forbidden, NotFound, Unspecified] {
            assert!(s.is_terminal());
            assert!(!is_successful(s));
        }
        assert!(Succeeded.is_terminal());
        assert!(is_successful(Succeeded));
    }

    #[test]
    fn unknown_wire_state_is_unspecified() {
        let s: OperationState = serde_json::from_str(r#""Exploded""#).unwrap();
        assert_eq!(s, OperationState::Unspecified);
        let s: OperationState = serde_json::from_str(r#""BadArgument""#).unwrap();
        assert_eq!(s, OperationState::BadArgument);
        assert_eq!(serde_json::to_string(&OperationState::NotStarted).unwrap(), r#""NotStarted""#);
    }

    #[test]
    fn operation_response_carries_error_detail() {
        let json = r#"{
            "operationState": "Failed",
            "operationId": "abc",
            "createdTimestamp": "2024-01-01T00:00:00Z",
            "errorResponse": {
                "error": {
                    "code": "ExtractionFailure",
                    "message": "Unable to read file",
                    "details": [
                        {"code": "InvalidFile", "message": "page-1.json is empty", "target": "page-1.json"},
                        {"message": "page-2.json is empty"}
                    ]
                }
            }
        }"#;
        let resp: OperationResponse = serde_json::from_str(json).unwrap();
        let op: IndexOperation = resp.into();
        assert_eq!(op.id, "abc");
        assert_eq!(op.state, OperationState::Failed);
        let err = op.error.clone().unwrap();
        assert_eq!(
            err.to_string(),
            "Error Code: ExtractionFailure\nError Message: Unable to read file\nError Details: page-1.json is empty\npage-2.json is empty"
        );

        match op.failure("add") {
            Some(Error::IndexUpdate { phase, state, .. }) => {
                assert_eq!(phase, "add");
                assert_eq!(state, OperationState::Failed);
            }
            other => panic!("expected IndexUpdate, got {other:?}"),
        }
    }

    #[test]
    fn failure_is_none_for_success_and_running() {
        assert!(op(OperationState::Succeeded).failure("delete").is_none());
        assert!(op(OperationState::Running).failure("delete").is_none());
        let err = op(OperationState::NotFound).failure("delete").unwrap();
        assert!(err.to_string().contains("operation reported no error detail"));
    }

    #[test]
    fn update_request_serializes_only_present_halves() {
        let pages = vec![StagedPage {
            name: "a.json".into(),
            locator: "https://staging/a.json".into(),
        }];
        let add = serde_json::to_value(UpdateRequest::add_pages(&pages, "Title")).unwrap();
        assert_eq!(
            add,
            serde_json::json!({
                "add": {
                    "files": [{
                        "fileName": "a.json",
                        "fileUri": "https://staging/a.json",
                        "extractionOptions": {
                            "format": "SharepointListJson",
                            "columnMapping": {"question": "Title"}
                        }
                    }]
                }
            })
        );

        let delete =
            serde_json::to_value(UpdateRequest::delete_sources(vec!["old.json".into()])).unwrap();
        assert_eq!(delete, serde_json::json!({"delete": {"sources": ["old.json"]}}));
    }

    #[tokio::test]
    async fn terminal_operation_is_returned_without_polling() {
        let client = ScriptedOperations::new(&[]);
        let cancel = CancellationToken::new();
        let done = wait_for_completion(&client, op(OperationState::Failed), &fast_policy(5), &cancel)
            .await
            .unwrap();
        assert_eq!(done.state, OperationState::Failed);
        assert_eq!(client.polls(), 0);
    }

    #[tokio::test]
    async fn running_running_succeeded_takes_two_poll_cycles() {
        let client = ScriptedOperations::new(&[OperationState::Running, OperationState::Succeeded]);
        let cancel = CancellationToken::new();
        let policy = PollPolicy {
            interval: Duration::from_millis(20),
            max_polls: 10,
        };
        let started = std::time::Instant::now();
        let done = wait_for_completion(&client, op(OperationState::Running), &policy, &cancel)
            .await
            .unwrap();
        assert_eq!(done.state, OperationState::Succeeded);
        assert_eq!(client.polls(), 2);
        assert!(started.elapsed() >= policy.interval * 2);
    }

    #[tokio::test]
    async fn exhausting_max_polls_is_a_timeout() {
        let client = ScriptedOperations::new(&[]);
        let cancel = CancellationToken::new();
        let err = wait_for_completion(&client, op(OperationState::NotStarted), &fast_policy(3), &cancel)
            .await
            .unwrap_err();
        match err {
            Error::OperationTimeout { operation_id, polls } => {
                assert_eq!(operation_id, "op-1");
                assert_eq!(polls, 3);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(client.polls(), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait() {
        let client = ScriptedOperations::new(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = PollPolicy {
            interval: Duration::from_secs(60),
            max_polls: 10,
        };
        let err = wait_for_completion(&client, op(OperationState::Running), &policy, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(id) if id == "op-1"));
        assert_eq!(client.polls(), 0);
    }

    #[test]
    fn client_urls_trim_trailing_slash() {
        let client = QnaMakerClient::new(QnaMakerSettings {
            endpoint: "https://qna.example.com/qnamaker/v4.0/".into(),
            subscription_key: "key".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(
            client.knowledge_base_url("kb-1"),
            "https://qna.example.com/qnamaker/v4.0/knowledgebases/kb-1"
        );
        assert_eq!(
            client.operation_url("op-9"),
            "https://qna.example.com/qnamaker/v4.0/operations/op-9"
        );
    }
}
