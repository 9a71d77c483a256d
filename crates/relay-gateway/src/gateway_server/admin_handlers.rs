//! Admin control plane: table mutations, config updates, and the views.

use super::*;

#[derive(Debug, Deserialize)]
pub(super) struct BulkUploadForm {
    pub(super) text: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct AccountEditForm {
    pub(super) account: String,
    pub(super) password: String,
    pub(super) token: String,
}

impl AccountEditForm {
    fn into_row(self) -> TableRow {
        TableRow::new(
            self.account.trim(),
            self.password.trim(),
            self.token.trim(),
        )
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct UserEditForm {
    pub(super) user: String,
    pub(super) key: String,
    pub(super) note: String,
}

impl UserEditForm {
    fn into_row(self) -> TableRow {
        TableRow::new(self.user.trim(), self.key.trim(), self.note.trim())
    }
}

/// Config form as posted by the admin page. Every field is optional; a
/// blank `chatgpt_base_url`, `auth_key` or `user_agents` leaves the current
/// value in place; a blank `proxy_url` clears the proxy list.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ConfigUpdateForm {
    #[serde(default)]
    pub(super) chatgpt_base_url: Option<String>,
    #[serde(default)]
    pub(super) proxy_url: Option<String>,
    #[serde(default)]
    pub(super) retry_times: Option<String>,
    #[serde(default)]
    pub(super) enable_limit: Option<String>,
    #[serde(default)]
    pub(super) scheduled_refresh: Option<String>,
    #[serde(default)]
    pub(super) auth_key: Option<String>,
    #[serde(default)]
    pub(super) user_agents: Option<String>,
    #[serde(default)]
    pub(super) history_disabled: Option<String>,
}

impl ConfigUpdateForm {
    pub(super) fn into_update(self) -> ConfigUpdate {
        fn non_blank(raw: Option<String>) -> Option<String> {
            raw.filter(|value| !value.trim().is_empty())
        }
        ConfigUpdate {
            chatgpt_base_url: non_blank(self.chatgpt_base_url),
            proxy_url: self.proxy_url,
            retry_times: non_blank(self.retry_times).map(ConfigValue::Text),
            enable_limit: self.enable_limit.map(ConfigValue::Text),
            scheduled_refresh: self.scheduled_refresh.map(ConfigValue::Text),
            auth_key: non_blank(self.auth_key).map(|raw| raw.trim().to_string()),
            user_agents: non_blank(self.user_agents),
            history_disabled: self.history_disabled.map(ConfigValue::Text),
        }
    }
}

fn admin_mutation_result<T>(
    state: &GatewayState,
    operation: &'static str,
    result: Result<T, PoolError>,
    status: StatusCode,
    tab: &str,
) -> Response {
    match result {
        Ok(_) => state.admin_redirect(status, tab),
        Err(error) => {
            let api_error = GatewayApiError::from_pool(&error);
            if api_error.status.is_server_error() {
                error!(operation, error = %error, "admin mutation failed");
            } else {
                warn!(operation, error = %error, "admin mutation rejected");
            }
            api_error.into_response()
        }
    }
}

fn row_position(
    operation: &'static str,
    path: Result<AxumPath<usize>, PathRejection>,
) -> Result<usize, Response> {
    path.map(|AxumPath(position)| position).map_err(|rejection| {
        let detail = rejection.body_text();
        warn!(operation, error = %detail, "admin row position rejected");
        GatewayApiError::admin(
            StatusCode::BAD_REQUEST,
            "invalid_position",
            format!("row position must be a non-negative integer: {detail}"),
        )
        .into_response()
    })
}

pub(super) async fn handle_admin_page(State(state): State<Arc<GatewayState>>) -> Html<String> {
    Html(render_admin_page(
        &state.admin_base_path(),
        &state.collect_admin_state(),
    ))
}

pub(super) async fn handle_admin_state(State(state): State<Arc<GatewayState>>) -> Response {
    (StatusCode::OK, Json(state.collect_admin_state())).into_response()
}

pub(super) async fn handle_upload_account(
    State(state): State<Arc<GatewayState>>,
    Form(form): Form<BulkUploadForm>,
) -> Response {
    let result = state.stores.pool.append_rows(parse_bulk_rows(&form.text));
    admin_mutation_result(
        &state,
        "upload-account",
        result,
        StatusCode::SEE_OTHER,
        ADMIN_ACCOUNTS_TAB,
    )
}

pub(super) async fn handle_edit_account(
    State(state): State<Arc<GatewayState>>,
    path: Result<AxumPath<usize>, PathRejection>,
    Form(form): Form<AccountEditForm>,
) -> Response {
    let position = match row_position("edit-account", path) {
        Ok(position) => position,
        Err(response) => return response,
    };
    let result = state.stores.pool.update_row(position, form.into_row());
    admin_mutation_result(
        &state,
        "edit-account",
        result,
        StatusCode::FOUND,
        ADMIN_ACCOUNTS_TAB,
    )
}

pub(super) async fn handle_delete_account(
    State(state): State<Arc<GatewayState>>,
    path: Result<AxumPath<usize>, PathRejection>,
) -> Response {
    let position = match row_position("delete-account", path) {
        Ok(position) => position,
        Err(response) => return response,
    };
    let result = state.stores.pool.remove_row(position);
    admin_mutation_result(
        &state,
        "delete-account",
        result,
        StatusCode::FOUND,
        ADMIN_ACCOUNTS_TAB,
    )
}

pub(super) async fn handle_delete_all_accounts(State(state): State<Arc<GatewayState>>) -> Response {
    let result = state.stores.pool.remove_all();
    admin_mutation_result(
        &state,
        "delete-all-accounts",
        result,
        StatusCode::FOUND,
        ADMIN_ACCOUNTS_TAB,
    )
}

pub(super) async fn handle_upload_user(
    State(state): State<Arc<GatewayState>>,
    Form(form): Form<BulkUploadForm>,
) -> Response {
    let result = state.stores.registry.append_rows(parse_bulk_rows(&form.text));
    admin_mutation_result(
        &state,
        "upload-user",
        result,
        StatusCode::FOUND,
        ADMIN_USERS_TAB,
    )
}

pub(super) async fn handle_edit_user(
    State(state): State<Arc<GatewayState>>,
    path: Result<AxumPath<usize>, PathRejection>,
    Form(form): Form<UserEditForm>,
) -> Response {
    let position = match row_position("edit-user", path) {
        Ok(position) => position,
        Err(response) => return response,
    };
    let result = state.stores.registry.update_row(position, form.into_row());
    admin_mutation_result(&state, "edit-user", result, StatusCode::FOUND, ADMIN_USERS_TAB)
}

pub(super) async fn handle_delete_user(
    State(state): State<Arc<GatewayState>>,
    path: Result<AxumPath<usize>, PathRejection>,
) -> Response {
    let position = match row_position("delete-user", path) {
        Ok(position) => position,
        Err(response) => return response,
    };
    let result = state.stores.registry.remove_row(position);
    admin_mutation_result(
        &state,
        "delete-user",
        result,
        StatusCode::FOUND,
        ADMIN_USERS_TAB,
    )
}

pub(super) async fn handle_delete_all_users(State(state): State<Arc<GatewayState>>) -> Response {
    let result = state.stores.registry.remove_all();
    admin_mutation_result(
        &state,
        "delete-all-users",
        result,
        StatusCode::FOUND,
        ADMIN_USERS_TAB,
    )
}

pub(super) async fn handle_update_config(
    State(state): State<Arc<GatewayState>>,
    Form(form): Form<ConfigUpdateForm>,
) -> Response {
    match state.stores.config.apply(form.into_update()) {
        Ok(settings) => {
            info!(settings = ?settings, "gateway settings updated");
            state.admin_redirect(StatusCode::FOUND, ADMIN_CONFIG_TAB)
        }
        Err(error) => {
            warn!(error = %error, "config update rejected");
            let status = match error {
                relay_config::ConfigError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            };
            GatewayApiError::admin(status, "invalid_config_update", error.to_string())
                .into_response()
        }
    }
}
