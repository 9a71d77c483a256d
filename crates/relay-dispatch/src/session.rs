//! Upstream session contract.
//!
//! A session is bound to one credential and used for exactly one dispatch
//! attempt. The pipeline drives it through `configure`, `fetch_requirements`,
//! `prepare` and `send`, then calls `release` once the reply is delivered or
//! the attempt failed.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use relay_config::GatewaySettings;
use relay_pool::Credential;
use serde_json::Value;

use crate::error::SessionError;

/// Lazily produced upstream chunks, forwarded to the caller verbatim.
pub type ChunkStream = BoxStream<'static, Result<Bytes, SessionError>>;

/// Per-request options derived from the live settings snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOverrides {
    pub history_disabled: bool,
}

impl SessionOverrides {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            history_disabled: settings.history_disabled,
        }
    }
}

/// What the upstream demands before a conversation may be sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Requirements {
    pub token: Option<String>,
    pub detail: Value,
}

pub enum UpstreamReply {
    Stream(ChunkStream),
    Document(Value),
}

impl std::fmt::Debug for UpstreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("UpstreamReply::Stream(..)"),
            Self::Document(value) => f.debug_tuple("UpstreamReply::Document").field(value).finish(),
        }
    }
}

#[async_trait]
/// Trait contract for `UpstreamSession` behavior.
pub trait UpstreamSession: Send {
    async fn configure(
        &mut self,
        payload: &Value,
        overrides: &SessionOverrides,
    ) -> Result<(), SessionError>;

    async fn fetch_requirements(&mut self) -> Result<Requirements, SessionError>;

    async fn prepare(&mut self) -> Result<(), SessionError>;

    async fn send(&mut self) -> Result<UpstreamReply, SessionError>;

    /// Frees upstream resources. Must be safe to call more than once.
    async fn release(&mut self) -> Result<(), SessionError>;
}

#[async_trait]
/// Trait contract for `SessionFactory` behavior.
pub trait SessionFactory: Send + Sync {
    async fn open_session(
        &self,
        credential: &Credential,
        settings: &GatewaySettings,
    ) -> Result<Box<dyn UpstreamSession>, SessionError>;
}
