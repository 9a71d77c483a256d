use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use httpmock::Method::POST;
use httpmock::MockServer;
use relay_config::{ConfigUpdate, ConfigValue, GatewaySettings};
use relay_dispatch::{CredentialSelector, PassthroughConfig, PassthroughSessionFactory};
use relay_gateway::{build_gateway_router, GatewayState, GatewayStores};
use relay_pool::parse_bulk_rows;
use relay_scheduler::{CredentialRefresher, HttpCredentialAuthorizer, RefreshRunOutcome};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

const CLIENT_KEY: &str = "sk-integration";

fn open_stores(temp: &TempDir, upstream: &MockServer) -> GatewayStores {
    let settings = GatewaySettings {
        upstream_base_urls: vec![upstream.base_url()],
        ..GatewaySettings::default()
    };
    let stores = GatewayStores::open(settings, temp.path()).expect("open stores");
    stores
        .registry
        .append_rows(parse_bulk_rows(&format!("ci,{CLIENT_KEY},integration")))
        .expect("seed client key");
    stores
}

async fn spawn_gateway(stores: GatewayStores) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let factory = Arc::new(PassthroughSessionFactory::new(
        PassthroughConfig::default(),
        Arc::clone(&stores.refresh_records),
    ));
    let state = Arc::new(GatewayState::new(
        stores,
        factory,
        CredentialSelector::new(600),
        None,
    ));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("resolve listener addr");
    let app = build_gateway_router(state);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (addr, handle)
}

async fn post_chat(addr: SocketAddr, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .bearer_auth(CLIENT_KEY)
        .json(&body)
        .send()
        .await
        .expect("send chat request")
}

#[tokio::test]
async fn integration_rejected_credential_is_recorded_and_next_one_serves() {
    let upstream = MockServer::start_async().await;
    let rejected = upstream.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer tok1");
        then.status(401).body("token revoked");
    });
    let served = upstream.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer tok2");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"id":"chatcmpl-int","object":"chat.completion"}"#);
    });

    let temp = tempfile::tempdir().expect("tempdir");
    let stores = open_stores(&temp, &upstream);
    stores
        .pool
        .append_rows(parse_bulk_rows("a1,p1,tok1\na2,p2,tok2"))
        .expect("seed accounts");
    let pool = Arc::clone(&stores.pool);
    let (addr, handle) = spawn_gateway(stores).await;

    let response = post_chat(addr, json!({"model": "gpt-4o", "messages": []})).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let document = response.json::<Value>().await.expect("document");
    assert_eq!(document["id"], "chatcmpl-int");
    rejected.assert();
    served.assert();
    assert!(pool.is_errored("tok1"));
    assert_eq!(pool.available().into_iter().collect::<Vec<_>>(), vec!["tok2"]);

    let persisted = std::fs::read_to_string(temp.path().join(relay_pool::ERROR_TOKENS_FILE))
        .expect("read errored tokens");
    assert!(persisted.lines().any(|line| line.trim() == "tok1"));
    handle.abort();
}

#[tokio::test]
async fn integration_refreshed_access_token_is_used_upstream() {
    let upstream = MockServer::start_async().await;
    let refresh = upstream.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"access_token":"access-fresh"}"#);
    });
    let completions = upstream.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer access-fresh");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body("data: {\"choices\":[]}\n\ndata: [DONE]\n\n");
    });

    let temp = tempfile::tempdir().expect("tempdir");
    let stores = open_stores(&temp, &upstream);
    stores
        .pool
        .append_rows(parse_bulk_rows("a1,p1,refresh-1"))
        .expect("seed accounts");
    let authorizer =
        HttpCredentialAuthorizer::new(&upstream.url("/auth/refresh"), 5_000).expect("authorizer");
    let refresher = CredentialRefresher::new(
        Arc::clone(&stores.pool),
        Arc::clone(&stores.refresh_records),
        Arc::new(authorizer),
        3_600,
    );
    assert!(matches!(
        refresher.refresh_all(true).await,
        RefreshRunOutcome::Completed(summary) if summary.refreshed == 1
    ));
    refresh.assert();

    let (addr, handle) = spawn_gateway(stores).await;
    let response = post_chat(
        addr,
        json!({"model": "gpt-4o", "stream": true, "messages": []}),
    )
    .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.expect("stream body");
    assert_eq!(body, "data: {\"choices\":[]}\n\ndata: [DONE]\n\n");
    completions.assert();
    handle.abort();
}

#[tokio::test]
async fn integration_config_overlay_drives_retry_budget_after_reopen() {
    let upstream = MockServer::start_async().await;
    let failing = upstream.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(503).body("overloaded");
    });

    let temp = tempfile::tempdir().expect("tempdir");
    {
        let stores = open_stores(&temp, &upstream);
        stores
            .pool
            .append_rows(parse_bulk_rows("a1,p1,tok1"))
            .expect("seed accounts");
        stores
            .config
            .apply(ConfigUpdate {
                retry_times: Some(ConfigValue::Text("2".to_string())),
                ..ConfigUpdate::default()
            })
            .expect("apply config");
    }

    let stores = open_stores(&temp, &upstream);
    assert_eq!(stores.config.snapshot().retry_times, 2);
    let (addr, handle) = spawn_gateway(stores).await;
    let response = post_chat(addr, json!({"model": "gpt-4o", "messages": []})).await;
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = response.json::<Value>().await.expect("error envelope");
    assert_eq!(envelope["error"]["message"], "Server error");
    failing.assert_hits(2);
    handle.abort();
}
