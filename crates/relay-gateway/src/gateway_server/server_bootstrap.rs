//! Router wiring and the serve loop.

use super::*;

/// Builds the full HTTP router for `state`.
pub fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    let admin_base = state.admin_base_path();
    Router::new()
        .route(
            OPENAI_CHAT_COMPLETIONS_ENDPOINT,
            post(handle_chat_completions),
        )
        .route(OPENAI_MODELS_ENDPOINT, get(handle_models))
        .route(admin_base.as_str(), get(handle_admin_page))
        .route(&format!("{admin_base}/state"), get(handle_admin_state))
        .route(
            &format!("{admin_base}/upload-account"),
            post(handle_upload_account),
        )
        .route(
            &format!("{admin_base}/edit-account/{{position}}"),
            post(handle_edit_account),
        )
        .route(
            &format!("{admin_base}/delete-account/{{position}}"),
            post(handle_delete_account),
        )
        .route(
            &format!("{admin_base}/delete-all-accounts"),
            post(handle_delete_all_accounts),
        )
        .route(
            &format!("{admin_base}/upload-user"),
            post(handle_upload_user),
        )
        .route(
            &format!("{admin_base}/edit-user/{{position}}"),
            post(handle_edit_user),
        )
        .route(
            &format!("{admin_base}/delete-user/{{position}}"),
            post(handle_delete_user),
        )
        .route(
            &format!("{admin_base}/delete-all-users"),
            post(handle_delete_all_users),
        )
        .route(
            &format!("{admin_base}/update-config"),
            post(handle_update_config),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the gateway on `bind` until Ctrl-C.
pub async fn run_gateway_server(bind: &str, state: Arc<GatewayState>) -> Result<()> {
    let bind_addr = bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{bind}'"))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway server address")?;
    info!(
        addr = %local_addr,
        completions_endpoint = OPENAI_CHAT_COMPLETIONS_ENDPOINT,
        admin_endpoint = %state.admin_base_path(),
        "gateway server listening"
    );

    let app = build_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")?;
    info!("gateway server stopped");
    Ok(())
}
