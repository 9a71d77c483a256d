use super::*;

const DISPATCH_CLIENT_ERROR_TYPE: &str = "invalid_request_error";
const DISPATCH_SERVER_ERROR_TYPE: &str = "server_error";
const ADMIN_ERROR_TYPE: &str = "admin_error";

/// Error envelope rendered as `{"error":{"type","code","message"}}`.
///
/// Dispatch failures carry the OpenAI error types; admin failures carry
/// `admin_error` so callers can tell the two planes apart.
#[derive(Debug, Clone)]
pub(super) struct GatewayApiError {
    pub(super) status: StatusCode,
    pub(super) error_type: &'static str,
    pub(super) code: &'static str,
    pub(super) message: String,
}

impl GatewayApiError {
    pub(super) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        let error_type = if status.is_client_error() {
            DISPATCH_CLIENT_ERROR_TYPE
        } else {
            DISPATCH_SERVER_ERROR_TYPE
        };
        Self {
            status,
            error_type,
            code,
            message: message.into(),
        }
    }

    pub(super) fn admin(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_type: ADMIN_ERROR_TYPE,
            code,
            message: message.into(),
        }
    }

    pub(super) fn from_dispatch(error: &DispatchError) -> Self {
        let status = StatusCode::from_u16(error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, error.code(), error.public_message())
    }

    pub(super) fn from_pool(error: &PoolError) -> Self {
        match error {
            PoolError::IndexOutOfRange { .. } => {
                Self::admin(StatusCode::NOT_FOUND, "row_not_found", error.to_string())
            }
            PoolError::Storage(_) => Self::admin(
                StatusCode::INTERNAL_SERVER_ERROR,
                "admin_storage_failure",
                error.to_string(),
            ),
        }
    }
}

impl IntoResponse for GatewayApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": {
                    "type": self.error_type,
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

/// Settings as shown to the admin plane. The override key is masked.
#[derive(Debug, Clone, Serialize)]
pub(super) struct AdminConfigView {
    pub(super) chatgpt_base_url: String,
    pub(super) proxy_url: String,
    pub(super) retry_times: u32,
    pub(super) enable_limit: bool,
    pub(super) scheduled_refresh: bool,
    pub(super) auth_key: Option<String>,
    pub(super) user_agents: Vec<String>,
    pub(super) history_disabled: bool,
}

impl From<&GatewaySettings> for AdminConfigView {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            chatgpt_base_url: settings.upstream_base_urls.join(","),
            proxy_url: settings.proxy_urls.join(","),
            retry_times: settings.retry_times,
            enable_limit: settings.enable_limit,
            scheduled_refresh: settings.scheduled_refresh,
            auth_key: settings.auth_key_override().map(mask_token),
            user_agents: settings.user_agents.clone(),
            history_disabled: settings.history_disabled,
        }
    }
}

/// Everything the admin view renders, in one consistent snapshot.
#[derive(Debug, Clone, Serialize)]
pub(super) struct AdminStateView {
    pub(super) api_prefix: Option<String>,
    pub(super) accounts: Vec<TableRow>,
    pub(super) users: Vec<TableRow>,
    pub(super) config: AdminConfigView,
    pub(super) tokens_count: usize,
    pub(super) error_tokens: Vec<String>,
    pub(super) refresh_records: usize,
    pub(super) session_endpoints: usize,
}
