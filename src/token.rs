//! Bearer credentials for list reads.
//!
//! The list client asks a [`TokenProvider`] for a token on every request,
//! so providers that refresh short-lived credentials can be plugged in
//! without touching the client.

use async_trait::async_trait;

use crate::error::{Error, Result};

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a bearer token valid for the next request.
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, typically read from the environment at startup.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Read the token from environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self> {
        let token = std::env::var(var)
            .map_err(|_| Error::InvalidInput(format!("{var} environment variable not set")))?;
        if token.trim().is_empty() {
            return Err(Error::InvalidInput(format!("{var} is empty")));
        }
        Ok(Self::new(token))
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_returns_its_token() {
        let provider = StaticTokenProvider::new("abc");
        assert_eq!(provider.access_token().await.unwrap(), "abc");
    }

    #[test]
    fn from_env_reports_missing_variable() {
        let err = StaticTokenProvider::from_env("LQS_TEST_TOKEN_THAT_IS_NEVER_SET")
            .err()
            .unwrap();
        assert!(err.to_string().contains("LQS_TEST_TOKEN_THAT_IS_NEVER_SET"));
    }
}
