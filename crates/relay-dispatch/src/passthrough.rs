//! OpenAI-compatible HTTP pass-through session.
//!
//! Forwards the caller payload to `{base}/v1/chat/completions` using the bound
//! credential. Base URL, proxy and user agent rotate per session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use relay_config::GatewaySettings;
use relay_pool::{Credential, RefreshRecords};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Proxy};
use serde_json::Value;
use tracing::debug;

use crate::error::SessionError;
use crate::session::{Requirements, SessionFactory, SessionOverrides, UpstreamReply, UpstreamSession};

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const REQUIREMENTS_TOKEN_HEADER: &str = "openai-sentinel-chat-requirements-token";
const HISTORY_DISABLED_FIELD: &str = "history_and_training_disabled";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `PassthroughConfig` used across Relay components.
pub struct PassthroughConfig {
    pub requirements_path: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            requirements_path: None,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Public struct `PassthroughSessionFactory` used across Relay components.
pub struct PassthroughSessionFactory {
    config: PassthroughConfig,
    refresh_records: Arc<RefreshRecords>,
    rotation: AtomicUsize,
}

impl PassthroughSessionFactory {
    pub fn new(config: PassthroughConfig, refresh_records: Arc<RefreshRecords>) -> Self {
        Self {
            config,
            refresh_records,
            rotation: AtomicUsize::new(0),
        }
    }

    /// Access token sent upstream: the refreshed one when a refresh record
    /// exists for the credential, otherwise the stored token itself.
    fn access_token_for(&self, credential: &Credential) -> String {
        self.refresh_records
            .get(&credential.token)
            .map(|record| record.token)
            .filter(|token| !token.trim().is_empty())
            .unwrap_or_else(|| credential.token.clone())
    }
}

fn rotate(entries: &[String], turn: usize) -> Option<&str> {
    if entries.is_empty() {
        return None;
    }
    entries.get(turn % entries.len()).map(String::as_str)
}

#[async_trait]
impl SessionFactory for PassthroughSessionFactory {
    async fn open_session(
        &self,
        credential: &Credential,
        settings: &GatewaySettings,
    ) -> Result<Box<dyn UpstreamSession>, SessionError> {
        let turn = self.rotation.fetch_add(1, Ordering::Relaxed);
        let base_url = rotate(&settings.upstream_base_urls, turn)
            .ok_or_else(|| SessionError::Other("no upstream base url configured".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(self.config.connect_timeout_ms));
        if let Some(proxy_url) = rotate(&settings.proxy_urls, turn) {
            let proxy = Proxy::all(proxy_url).map_err(|error| {
                SessionError::Other(format!("invalid proxy url '{proxy_url}': {error}"))
            })?;
            builder = builder.proxy(proxy);
        }
        if let Some(user_agent) = rotate(&settings.user_agents, turn) {
            builder = builder.user_agent(user_agent.to_string());
        }
        let client = builder
            .build()
            .map_err(|error| SessionError::Other(format!("failed to build http client: {error}")))?;

        debug!(base_url, credential = %credential.masked_token(), "opened pass-through session");
        Ok(Box::new(PassthroughSession {
            client: Some(client),
            base_url,
            requirements_path: self.config.requirements_path.clone(),
            access_token: self.access_token_for(credential),
            payload: None,
            requirements: Requirements::default(),
            prepared_headers: None,
        }))
    }
}

struct PassthroughSession {
    client: Option<Client>,
    base_url: String,
    requirements_path: Option<String>,
    access_token: String,
    payload: Option<Value>,
    requirements: Requirements,
    prepared_headers: Option<HeaderMap>,
}

impl PassthroughSession {
    fn client(&self, action: &'static str) -> Result<&Client, SessionError> {
        self.client.as_ref().ok_or(SessionError::InvalidState(action))
    }
}

async fn status_error(response: reqwest::Response) -> SessionError {
    let status = response.status().as_u16();
    let detail = response
        .text()
        .await
        .unwrap_or_else(|error| format!("failed to read upstream error body: {error}"));
    SessionError::status(status, detail)
}

#[async_trait]
impl UpstreamSession for PassthroughSession {
    async fn configure(
        &mut self,
        payload: &Value,
        overrides: &SessionOverrides,
    ) -> Result<(), SessionError> {
        let mut payload = payload.clone();
        let Some(fields) = payload.as_object_mut() else {
            return Err(SessionError::InvalidPayload(
                "request body must be a JSON object".to_string(),
            ));
        };
        // A caller-supplied value wins over the gateway default.
        if overrides.history_disabled {
            fields
                .entry(HISTORY_DISABLED_FIELD)
                .or_insert(Value::Bool(true));
        }
        self.payload = Some(payload);
        Ok(())
    }

    async fn fetch_requirements(&mut self) -> Result<Requirements, SessionError> {
        let Some(path) = self.requirements_path.clone() else {
            return Ok(Requirements::default());
        };
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let response = self
            .client("fetch requirements")?
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let detail = response
            .json::<Value>()
            .await
            .map_err(|error| SessionError::Requirements(error.to_string()))?;
        let token = detail
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.requirements = Requirements { token, detail };
        Ok(self.requirements.clone())
    }

    async fn prepare(&mut self) -> Result<(), SessionError> {
        if self.payload.is_none() {
            return Err(SessionError::InvalidState("prepare"));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.requirements.token {
            let value = HeaderValue::from_str(token).map_err(|error| {
                SessionError::Requirements(format!("requirements token is not a header value: {error}"))
            })?;
            headers.insert(REQUIREMENTS_TOKEN_HEADER, value);
        }
        self.prepared_headers = Some(headers);
        Ok(())
    }

    async fn send(&mut self) -> Result<UpstreamReply, SessionError> {
        let (Some(payload), Some(headers)) = (self.payload.as_ref(), self.prepared_headers.clone())
        else {
            return Err(SessionError::InvalidState("send"));
        };
        let streaming = payload
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let response = self
            .client("send")?
            .post(format!("{}{CHAT_COMPLETIONS_PATH}", self.base_url))
            .bearer_auth(&self.access_token)
            .headers(headers)
            .json(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        if streaming {
            let chunks = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(SessionError::from))
                .boxed();
            return Ok(UpstreamReply::Stream(chunks));
        }
        let document = response
            .json::<Value>()
            .await
            .map_err(|error| SessionError::Transport(format!("invalid upstream document: {error}")))?;
        Ok(UpstreamReply::Document(document))
    }

    async fn release(&mut self) -> Result<(), SessionError> {
        if self.client.take().is_some() {
            debug!(base_url = %self.base_url, "released pass-through session");
        }
        self.payload = None;
        self.prepared_headers = None;
        Ok(())
    }
}
