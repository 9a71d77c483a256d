/// Failures raised by an upstream session or its factory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("upstream returned status {status}: {detail}")]
    UpstreamStatus { status: u16, detail: String },
    #[error("upstream transport failure: {0}")]
    Transport(String),
    #[error("failed to fetch upstream requirements: {0}")]
    Requirements(String),
    #[error("invalid request payload: {0}")]
    InvalidPayload(String),
    #[error("session cannot {0} in its current state")]
    InvalidState(&'static str),
    #[error("{0}")]
    Other(String),
}

impl SessionError {
    pub fn status(status: u16, detail: impl Into<String>) -> Self {
        Self::UpstreamStatus {
            status,
            detail: detail.into(),
        }
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::UpstreamStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => Self::status(status.as_u16(), error.to_string()),
            None => Self::Transport(error.to_string()),
        }
    }
}

/// Terminal outcome of a dispatch that produced no deliverable reply.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid JSON body: {0}")]
    InvalidBody(String),
    #[error("client key was not admitted")]
    Unauthorized,
    #[error("no upstream credential is available")]
    NoCredential,
    #[error(transparent)]
    Upstream(#[from] SessionError),
}

const GENERIC_SERVER_ERROR: &str = "Server error";

impl DispatchError {
    /// HTTP status surfaced to the caller. Upstream-declared 4xx statuses pass
    /// through; everything else collapses to 500.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidBody(_) | Self::Upstream(SessionError::InvalidPayload(_)) => 400,
            Self::Unauthorized => 401,
            Self::Upstream(SessionError::UpstreamStatus { status, .. })
                if (400..500).contains(status) =>
            {
                *status
            }
            _ => 500,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Caller-facing message. Server errors never leak upstream detail.
    pub fn public_message(&self) -> String {
        if self.is_server_error() {
            return GENERIC_SERVER_ERROR.to_string();
        }
        match self {
            Self::InvalidBody(_) => "Invalid JSON body".to_string(),
            Self::Unauthorized => "Invalid or missing API key".to_string(),
            Self::Upstream(SessionError::UpstreamStatus { detail, .. }) => detail.clone(),
            Self::Upstream(SessionError::InvalidPayload(detail)) => detail.clone(),
            other => other.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidBody(_) => "invalid_json_body",
            Self::Unauthorized => "invalid_api_key",
            _ if self.is_server_error() => "server_error",
            Self::Upstream(SessionError::UpstreamStatus { status: 429, .. }) => {
                "rate_limit_exceeded"
            }
            Self::Upstream(SessionError::UpstreamStatus { status: 401 | 403, .. }) => {
                "upstream_credential_rejected"
            }
            _ => "upstream_request_rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_upstream_client_errors_keep_declared_status() {
        let error = DispatchError::from(SessionError::status(429, "slow down"));
        assert_eq!(error.status_code(), 429);
        assert_eq!(error.public_message(), "slow down");
        assert_eq!(error.code(), "rate_limit_exceeded");
    }

    #[test]
    fn unit_server_and_unknown_failures_are_normalized() {
        for error in [
            DispatchError::from(SessionError::status(502, "bad gateway body")),
            DispatchError::from(SessionError::Transport("connection reset".to_string())),
            DispatchError::from(SessionError::Other("boom".to_string())),
            DispatchError::NoCredential,
        ] {
            assert_eq!(error.status_code(), 500);
            assert_eq!(error.public_message(), "Server error");
            assert_eq!(error.code(), "server_error");
        }
    }

    #[test]
    fn unit_caller_errors_are_surfaced_verbatim() {
        assert_eq!(DispatchError::InvalidBody("eof".to_string()).status_code(), 400);
        assert_eq!(DispatchError::Unauthorized.status_code(), 401);
        assert_eq!(
            DispatchError::Unauthorized.public_message(),
            "Invalid or missing API key"
        );
    }
}
