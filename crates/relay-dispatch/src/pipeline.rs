//! Per-request dispatch: admission, session lifecycle, retry across
//! credentials, and delivery with exactly-once release.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use relay_config::{ConfigStore, GatewaySettings};
use relay_pool::{ClientKeyRegistry, Credential, CredentialPool};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::{DispatchError, SessionError};
use crate::retry::{classify_failure, FailureClass, RetryPolicy, RetryReason};
use crate::selector::CredentialSelector;
use crate::session::{ChunkStream, SessionFactory, SessionOverrides, UpstreamReply, UpstreamSession};

const DELIVERY_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Received,
    Validated,
    Bound,
    RequirementsFetched,
    Sent,
    Delivering,
    Closed,
    Failed,
}

impl DispatchStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Bound => "bound",
            Self::RequirementsFetched => "requirements_fetched",
            Self::Sent => "sent",
            Self::Delivering => "delivering",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream chunks in arrival order plus the task that owns the session.
pub struct StreamDelivery {
    pub frames: ReceiverStream<Result<Bytes, SessionError>>,
    pub delivery_task: JoinHandle<()>,
}

pub enum Delivery {
    Stream(StreamDelivery),
    Document(Value),
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Delivery::Stream(..)"),
            Self::Document(value) => f.debug_tuple("Delivery::Document").field(value).finish(),
        }
    }
}

enum AttemptReply {
    Stream(Box<dyn UpstreamSession>, ChunkStream),
    Document(Value),
}

/// Public struct `Dispatcher` used across Relay components.
pub struct Dispatcher {
    config: Arc<ConfigStore>,
    pool: Arc<CredentialPool>,
    registry: Arc<ClientKeyRegistry>,
    factory: Arc<dyn SessionFactory>,
    selector: CredentialSelector,
    next_request_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        config: Arc<ConfigStore>,
        pool: Arc<CredentialPool>,
        registry: Arc<ClientKeyRegistry>,
        factory: Arc<dyn SessionFactory>,
        selector: CredentialSelector,
    ) -> Self {
        Self {
            config,
            pool,
            registry,
            factory,
            selector,
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Runs one inbound request to completion or to a deliverable reply.
    pub async fn dispatch(
        &self,
        raw_body: &[u8],
        presented_key: Option<&str>,
    ) -> Result<Delivery, DispatchError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        log_stage(request_id, 0, DispatchStage::Received);

        let payload = match serde_json::from_slice::<Value>(raw_body) {
            Ok(payload) => payload,
            Err(error) => {
                log_stage(request_id, 0, DispatchStage::Failed);
                return Err(DispatchError::InvalidBody(error.to_string()));
            }
        };
        let settings = self.config.snapshot();
        if !self
            .registry
            .is_authorized(presented_key, settings.auth_key_override())
        {
            log_stage(request_id, 0, DispatchStage::Failed);
            return Err(DispatchError::Unauthorized);
        }
        log_stage(request_id, 0, DispatchStage::Validated);

        let overrides = SessionOverrides::from_settings(&settings);
        let policy = RetryPolicy::from_settings(&settings);
        let mut tried = HashSet::new();
        let mut last_error = None;

        for attempt in 1..=policy.max_attempts() {
            let Some(credential) = self.selector.select(&self.pool, &tried, settings.enable_limit)
            else {
                break;
            };
            tried.insert(credential.token.clone());

            let error = match self
                .run_attempt(request_id, attempt, &credential, &payload, &overrides, &settings)
                .await
            {
                Ok(AttemptReply::Stream(session, stream)) => {
                    self.selector.record_success(&credential.token);
                    log_stage(request_id, attempt, DispatchStage::Delivering);
                    return Ok(Delivery::Stream(spawn_delivery(
                        request_id, attempt, session, stream,
                    )));
                }
                Ok(AttemptReply::Document(document)) => {
                    self.selector.record_success(&credential.token);
                    log_stage(request_id, attempt, DispatchStage::Closed);
                    return Ok(Delivery::Document(document));
                }
                Err(error) => error,
            };

            let class = classify_failure(&error);
            self.note_failure(&credential, class);
            if !policy.should_retry(attempt, class) {
                log_stage(request_id, attempt, DispatchStage::Failed);
                return Err(DispatchError::Upstream(error));
            }
            warn!(
                request_id,
                attempt,
                max_attempts = policy.max_attempts(),
                credential = %credential.masked_token(),
                error = %error,
                "dispatch attempt failed, retrying"
            );
            last_error = Some(error);
        }

        log_stage(request_id, 0, DispatchStage::Failed);
        Err(last_error
            .map(DispatchError::Upstream)
            .unwrap_or(DispatchError::NoCredential))
    }

    async fn run_attempt(
        &self,
        request_id: u64,
        attempt: usize,
        credential: &Credential,
        payload: &Value,
        overrides: &SessionOverrides,
        settings: &GatewaySettings,
    ) -> Result<AttemptReply, SessionError> {
        let mut session = self.factory.open_session(credential, settings).await?;
        log_stage(request_id, attempt, DispatchStage::Bound);

        match drive_session(request_id, attempt, session.as_mut(), payload, overrides).await {
            Ok(UpstreamReply::Stream(stream)) => Ok(AttemptReply::Stream(session, stream)),
            Ok(UpstreamReply::Document(document)) => {
                // The document is fully buffered, so nothing left to send depends on the session.
                release_session(request_id, session.as_mut()).await;
                Ok(AttemptReply::Document(document))
            }
            Err(error) => {
                release_session(request_id, session.as_mut()).await;
                Err(error)
            }
        }
    }

    fn note_failure(&self, credential: &Credential, class: FailureClass) {
        match class {
            FailureClass::Retryable(RetryReason::CredentialRejected) => {
                if let Err(error) = self.pool.record_errored(&credential.token) {
                    warn!(error = %error, "failed to record errored credential");
                }
            }
            FailureClass::Retryable(RetryReason::RateLimited) => {
                self.selector.record_rate_limited(&credential.token);
            }
            _ => {}
        }
    }
}

async fn drive_session(
    request_id: u64,
    attempt: usize,
    session: &mut dyn UpstreamSession,
    payload: &Value,
    overrides: &SessionOverrides,
) -> Result<UpstreamReply, SessionError> {
    session.configure(payload, overrides).await?;
    session
        .fetch_requirements()
        .await
        .map_err(|error| match classify_failure(&error) {
            FailureClass::Fatal => SessionError::Requirements(error.to_string()),
            FailureClass::Retryable(_) => error,
        })?;
    log_stage(request_id, attempt, DispatchStage::RequirementsFetched);
    session.prepare().await?;
    let reply = session.send().await?;
    log_stage(request_id, attempt, DispatchStage::Sent);
    Ok(reply)
}

fn spawn_delivery(
    request_id: u64,
    attempt: usize,
    mut session: Box<dyn UpstreamSession>,
    mut stream: ChunkStream,
) -> StreamDelivery {
    let (tx, rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
    let delivery_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => {
                    debug!(request_id, "caller disconnected during delivery");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            debug!(request_id, "caller disconnected during delivery");
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        warn!(request_id, error = %error, "upstream stream failed mid-delivery");
                        let _ = tx.send(Err(error)).await;
                        break;
                    }
                    None => break,
                }
            }
        }
        drop(stream);
        release_session(request_id, session.as_mut()).await;
        log_stage(request_id, attempt, DispatchStage::Closed);
    });
    StreamDelivery {
        frames: ReceiverStream::new(rx),
        delivery_task,
    }
}

async fn release_session(request_id: u64, session: &mut dyn UpstreamSession) {
    if let Err(error) = session.release().await {
        warn!(request_id, error = %error, "failed to release upstream session");
    }
}

fn log_stage(request_id: u64, attempt: usize, stage: DispatchStage) {
    debug!(request_id, attempt, stage = %stage, "dispatch stage");
}

#[cfg(test)]
mod tests;
