use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_pool::Credential;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Failures of a single credential refresh.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh endpoint rejected credential with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("refresh transport failure: {0}")]
    Transport(String),
    #[error("refresh endpoint returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
/// Trait contract for `CredentialAuthorizer` behavior.
pub trait CredentialAuthorizer: Send + Sync {
    /// Exchanges the stored credential for a fresh upstream access token.
    async fn refresh(&self, credential: &Credential) -> Result<String, RefreshError>;
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
    account: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
}

/// Refreshes credentials against an HTTP token endpoint.
pub struct HttpCredentialAuthorizer {
    client: Client,
    refresh_url: String,
}

impl HttpCredentialAuthorizer {
    pub fn new(refresh_url: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1_000)))
            .build()
            .context("failed to construct reqwest client for credential refresh")?;
        Ok(Self {
            client,
            refresh_url: refresh_url.trim().to_string(),
        })
    }
}

#[async_trait]
impl CredentialAuthorizer for HttpCredentialAuthorizer {
    async fn refresh(&self, credential: &Credential) -> Result<String, RefreshError> {
        let response = self
            .client
            .post(self.refresh_url.as_str())
            .json(&RefreshRequest {
                refresh_token: &credential.token,
                account: &credential.identifier,
            })
            .send()
            .await
            .map_err(|error| RefreshError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }
        let parsed = response
            .json::<RefreshResponse>()
            .await
            .map_err(|error| RefreshError::InvalidResponse(error.to_string()))?;
        parsed
            .access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| RefreshError::InvalidResponse("missing access_token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    fn credential() -> Credential {
        Credential {
            identifier: "acct@example.com".to_string(),
            secret: "pw".to_string(),
            token: "refresh-1".to_string(),
        }
    }

    #[tokio::test]
    async fn integration_http_authorizer_returns_access_token() {
        let server = MockServer::start_async().await;
        let refresh = server.mock(|when, then| {
            when.method(POST)
                .path("/auth/refresh")
                .json_body(json!({"refresh_token": "refresh-1", "account": "acct@example.com"}));
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"access-1","expires_in":864000}"#);
        });
        let authorizer =
            HttpCredentialAuthorizer::new(&server.url("/auth/refresh"), 5_000).expect("authorizer");
        let token = authorizer.refresh(&credential()).await.expect("refresh");
        assert_eq!(token, "access-1");
        refresh.assert();
    }

    #[tokio::test]
    async fn regression_http_authorizer_reports_rejection_and_missing_token() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/rejected");
            then.status(401).body("invalid_grant");
        });
        server.mock(|when, then| {
            when.method(POST).path("/empty");
            then.status(200)
                .header("content-type", "application/json")
                .body("{}");
        });

        let rejected = HttpCredentialAuthorizer::new(&server.url("/rejected"), 5_000)
            .expect("authorizer")
            .refresh(&credential())
            .await
            .expect_err("rejected");
        assert_eq!(
            rejected,
            RefreshError::Rejected {
                status: 401,
                detail: "invalid_grant".to_string()
            }
        );

        let empty = HttpCredentialAuthorizer::new(&server.url("/empty"), 5_000)
            .expect("authorizer")
            .refresh(&credential())
            .await
            .expect_err("missing token");
        assert!(matches!(empty, RefreshError::InvalidResponse(_)));
    }
}
