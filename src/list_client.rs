//! Paginated reads of remote list content.
//!
//! A [`ListContentClient`] returns one [`ListPage`] per call. The first call
//! for a list passes no cursor; each following call passes the
//! `@odata.nextLink` of the previous page verbatim. A page without a next
//! link is the last one.
//!
//! # Microsoft Graph backend
//!
//! [`GraphListClient`] reads
//!
//! ```text
//! GET {endpoint}/sites/{site}/lists/{list}/items?expand=fields(select=Title,Answer,id)
//! Authorization: Bearer <token>
//! ```
//!
//! | Status | Error |
//! |--------|-------|
//! | 401 | [`Error::Unauthorized`] |
//! | 403 | [`Error::Forbidden`] |
//! | other non-2xx / transport | [`Error::SourceFetch`] |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{truncate_body, Error, Result};
use crate::models::{ListLocator, ListPage};
use crate::token::TokenProvider;

#[async_trait]
pub trait ListContentClient: Send + Sync {
    /// Fetch one page of items projected to `fields`.
    ///
    /// `cursor` is `None` for the first page and the previous page's next
    /// link afterwards.
    async fn page_of(
        &self,
        list: &ListLocator,
        fields: &[String],
        cursor: Option<&str>,
    ) -> Result<ListPage>;
}

#[derive(Debug, Clone)]
pub struct GraphListSettings {
    pub endpoint: String,
    pub timeout: Duration,
}

pub struct GraphListClient {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
}

impl GraphListClient {
    pub fn new(settings: GraphListSettings, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::SourceFetch(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// URL of the first page for `list`.
    pub fn first_page_url(&self, list: &ListLocator, fields: &[String]) -> String {
        format!(
            "{}/sites/{}/lists/{}/items?expand=fields(select={})",
            self.endpoint,
            list.site_id,
            list.list_id,
            fields.join(",")
        )
    }
}

#[async_trait]
impl ListContentClient for GraphListClient {
    #[tracing::instrument(level = "debug", skip_all, fields(list_id = %list.list_id, first = cursor.is_none()))]
    async fn page_of(
        &self,
        list: &ListLocator,
        fields: &[String],
        cursor: Option<&str>,
    ) -> Result<ListPage> {
        let url = match cursor {
            Some(next) => next.to_string(),
            None => self.first_page_url(list, fields),
        };
        let token = self.tokens.access_token().await?;

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::SourceFetch(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status, truncate_body(&body));
            return Err(match status {
                StatusCode::UNAUTHORIZED => Error::Unauthorized(message),
                StatusCode::FORBIDDEN => Error::Forbidden(message),
                _ => Error::SourceFetch(message),
            });
        }

        let page: ListPage = resp
            .json()
            .await
            .map_err(|e| Error::SourceFetch(format!("invalid page body: {e}")))?;
        tracing::debug!(items = page.items.len(), more = page.next_cursor().is_some(), "fetched list page");
        Ok(page)
    }
}
