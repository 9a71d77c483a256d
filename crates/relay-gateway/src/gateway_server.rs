use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::rejection::PathRejection;
use axum::extract::{Form, Path as AxumPath, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_config::{ConfigStore, ConfigUpdate, ConfigValue, GatewaySettings};
use relay_core::unix_now;
use relay_dispatch::{CredentialSelector, Delivery, DispatchError, Dispatcher, SessionFactory};
use relay_pool::{
    mask_token, parse_bulk_rows, ClientKeyRegistry, CredentialPool, PoolError, RefreshRecords,
    SessionEndpointRecords, TableRow, REFRESH_MAP_FILE, WSS_MAP_FILE,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

mod admin_handlers;
mod admin_page;
mod completions_handler;
mod server_bootstrap;
mod state;
mod types;

use admin_handlers::{
    handle_admin_page, handle_admin_state, handle_delete_account, handle_delete_all_accounts,
    handle_delete_all_users, handle_delete_user, handle_edit_account, handle_edit_user,
    handle_update_config, handle_upload_account, handle_upload_user,
};
use admin_page::render_admin_page;
use completions_handler::{handle_chat_completions, handle_models};
pub use server_bootstrap::{build_gateway_router, run_gateway_server};
pub use state::{GatewayState, GatewayStores};
use types::{AdminConfigView, AdminStateView, GatewayApiError};

const OPENAI_CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";
const OPENAI_MODELS_ENDPOINT: &str = "/v1/models";
const OPENAI_OWNER: &str = "relay";
const ADVERTISED_MODELS: [&str; 5] = [
    "gpt-3.5-turbo",
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4o",
    "gpt-4o-mini",
];
const ADMIN_ACCOUNTS_TAB: &str = "tab-1";
const ADMIN_USERS_TAB: &str = "tab-2";
const ADMIN_CONFIG_TAB: &str = "tab-3";
