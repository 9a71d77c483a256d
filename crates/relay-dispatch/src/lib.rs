//! Dispatch pipeline for inbound completion requests.
//!
//! Requests are admitted, bound to a fresh single-use upstream session per
//! attempt, retried across credentials on transient failure, and delivered
//! either as one JSON document or as a forwarded chunk stream whose session is
//! released exactly once.

pub mod error;
pub mod passthrough;
pub mod pipeline;
pub mod retry;
pub mod selector;
pub mod session;

pub use error::{DispatchError, SessionError};
pub use passthrough::{PassthroughConfig, PassthroughSessionFactory};
pub use pipeline::{Delivery, DispatchStage, Dispatcher, StreamDelivery};
pub use retry::{classify_failure, FailureClass, RetryPolicy, RetryReason};
pub use selector::CredentialSelector;
pub use session::{
    ChunkStream, Requirements, SessionFactory, SessionOverrides, UpstreamReply, UpstreamSession,
};
