use relay_config::GatewaySettings;

use crate::error::SessionError;

/// Why a failed attempt may be retried with a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Transport,
    ServerError,
    RateLimited,
    CredentialRejected,
    Requirements,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable(RetryReason),
    Fatal,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 409 || status == 425 || status == 429 || status >= 500
}

/// Classifies a session failure. Anything not known to be transient is fatal.
pub fn classify_failure(error: &SessionError) -> FailureClass {
    match error {
        SessionError::UpstreamStatus { status, .. } => match *status {
            401 | 403 => FailureClass::Retryable(RetryReason::CredentialRejected),
            429 => FailureClass::Retryable(RetryReason::RateLimited),
            status if status >= 500 => FailureClass::Retryable(RetryReason::ServerError),
            status if is_retryable_status(status) => {
                FailureClass::Retryable(RetryReason::Conflict)
            }
            _ => FailureClass::Fatal,
        },
        SessionError::Transport(_) => FailureClass::Retryable(RetryReason::Transport),
        SessionError::Requirements(_) => FailureClass::Retryable(RetryReason::Requirements),
        SessionError::InvalidPayload(_) | SessionError::InvalidState(_) | SessionError::Other(_) => {
            FailureClass::Fatal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Public struct `RetryPolicy` used across Relay components.
pub struct RetryPolicy {
    max_attempts: usize,
}

impl RetryPolicy {
    pub fn new(retry_times: u32) -> Self {
        Self {
            max_attempts: usize::try_from(retry_times.max(1)).unwrap_or(usize::MAX),
        }
    }

    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Whether another attempt follows `attempt` (1-based) after `class`.
    pub fn should_retry(&self, attempt: usize, class: FailureClass) -> bool {
        class.is_retryable() && attempt < self.max_attempts
    }
}
