use super::*;
use crate::session::Requirements;
use async_trait::async_trait;
use futures_util::stream;
use relay_config::ConfigUpdate;
use relay_pool::parse_bulk_rows;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

const BODY: &[u8] = br#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#;
const CLIENT_KEY: &str = "sk-test";

#[derive(Clone)]
enum Script {
    FailOnRequirements(SessionError),
    FailOnSend(SessionError),
    Document(Value),
    Chunks(Vec<Result<Bytes, SessionError>>),
    ChunksThenHang(Vec<Bytes>),
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    released: AtomicUsize,
    tokens: Mutex<Vec<String>>,
}

impl Counters {
    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct ScriptedFactory {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    counters: Arc<Counters>,
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open_session(
        &self,
        credential: &Credential,
        _settings: &GatewaySettings,
    ) -> Result<Box<dyn UpstreamSession>, SessionError> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.counters
            .tokens
            .lock()
            .expect("tokens lock")
            .push(credential.token.clone());
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Box::new(ScriptedSession {
            script: Some(script),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedSession {
    script: Option<Script>,
    counters: Arc<Counters>,
}

#[async_trait]
impl UpstreamSession for ScriptedSession {
    async fn configure(
        &mut self,
        _payload: &Value,
        _overrides: &SessionOverrides,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    async fn fetch_requirements(&mut self) -> Result<Requirements, SessionError> {
        if let Some(Script::FailOnRequirements(error)) = &self.script {
            return Err(error.clone());
        }
        Ok(Requirements::default())
    }

    async fn prepare(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn send(&mut self) -> Result<UpstreamReply, SessionError> {
        match self.script.take() {
            Some(Script::FailOnSend(error)) | Some(Script::FailOnRequirements(error)) => {
                Err(error)
            }
            Some(Script::Document(document)) => Ok(UpstreamReply::Document(document)),
            Some(Script::Chunks(chunks)) => Ok(UpstreamReply::Stream(stream::iter(chunks).boxed())),
            Some(Script::ChunksThenHang(chunks)) => Ok(UpstreamReply::Stream(
                stream::iter(chunks.into_iter().map(Ok))
                    .chain(stream::pending())
                    .boxed(),
            )),
            None => Err(SessionError::InvalidState("send")),
        }
    }

    async fn release(&mut self) -> Result<(), SessionError> {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    _temp: TempDir,
    config: Arc<ConfigStore>,
    pool: Arc<CredentialPool>,
    counters: Arc<Counters>,
    dispatcher: Dispatcher,
}

fn fixture(retry_times: u32, accounts: &str, scripts: Vec<Script>, fallback: Script) -> Fixture {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(ConfigStore::new(GatewaySettings {
        retry_times,
        ..GatewaySettings::default()
    }));
    let pool = Arc::new(CredentialPool::open(temp.path()).expect("open pool"));
    pool.append_rows(parse_bulk_rows(accounts))
        .expect("seed accounts");
    let registry = Arc::new(ClientKeyRegistry::open(temp.path()).expect("open registry"));
    registry
        .append_rows(parse_bulk_rows(&format!("tester,{CLIENT_KEY},")))
        .expect("seed users");
    let counters = Arc::new(Counters::default());
    let factory = Arc::new(ScriptedFactory {
        scripts: Mutex::new(scripts.into()),
        fallback,
        counters: Arc::clone(&counters),
    });
    let dispatcher = Dispatcher::new(
        Arc::clone(&config),
        Arc::clone(&pool),
        registry,
        factory,
        CredentialSelector::new(600),
    );
    Fixture {
        _temp: temp,
        config,
        pool,
        counters,
        dispatcher,
    }
}

fn ok_document() -> Script {
    Script::Document(json!({"id": "chatcmpl-1", "object": "chat.completion"}))
}

fn unavailable() -> Script {
    Script::FailOnSend(SessionError::status(503, "upstream unavailable"))
}

#[tokio::test]
async fn functional_retry_opens_one_session_per_attempt_until_success() {
    let fixture = fixture(
        3,
        "a,p,tok1",
        vec![unavailable(), unavailable(), ok_document()],
        unavailable(),
    );
    let delivery = fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .expect("dispatch succeeds on third attempt");
    let Delivery::Document(document) = delivery else {
        panic!("expected document delivery");
    };
    assert_eq!(document["id"], "chatcmpl-1");
    assert_eq!(fixture.counters.opened(), 3);
    assert_eq!(fixture.counters.released(), 3);
}

#[tokio::test]
async fn functional_permanent_transient_failure_uses_exactly_n_attempts() {
    let fixture = fixture(
        4,
        "a,p,tok1\nb,p,tok2",
        Vec::new(),
        Script::FailOnSend(SessionError::status(502, "bad gateway")),
    );
    let error = fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .expect_err("exhausted");
    assert_eq!(error.status_code(), 500);
    assert_eq!(error.public_message(), "Server error");
    assert_eq!(fixture.counters.opened(), 4);
    assert_eq!(fixture.counters.released(), 4);
}

#[tokio::test]
async fn regression_zero_retry_times_means_single_attempt() {
    let fixture = fixture(
        0,
        "a,p,tok1",
        Vec::new(),
        Script::FailOnSend(SessionError::Transport("connection reset".to_string())),
    );
    assert!(fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .is_err());
    assert_eq!(fixture.counters.opened(), 1);
    assert_eq!(fixture.counters.released(), 1);
}

#[tokio::test]
async fn functional_fatal_client_error_is_surfaced_without_retry() {
    let fixture = fixture(
        3,
        "a,p,tok1",
        Vec::new(),
        Script::FailOnSend(SessionError::status(400, "model not supported")),
    );
    let error = fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .expect_err("fatal");
    assert_eq!(error.status_code(), 400);
    assert_eq!(error.public_message(), "model not supported");
    assert_eq!(fixture.counters.opened(), 1);
    assert_eq!(fixture.counters.released(), 1);
}

#[tokio::test]
async fn regression_invalid_json_is_rejected_before_any_session() {
    let fixture = fixture(3, "a,p,tok1", Vec::new(), ok_document());
    let error = fixture
        .dispatcher
        .dispatch(b"{not json", Some(CLIENT_KEY))
        .await
        .expect_err("invalid body");
    assert!(matches!(error, DispatchError::InvalidBody(_)));
    assert_eq!(error.status_code(), 400);
    assert_eq!(fixture.counters.opened(), 0);
}

#[tokio::test]
async fn regression_unadmitted_key_is_rejected_before_any_session() {
    let fixture = fixture(3, "a,p,tok1", Vec::new(), ok_document());
    for presented in [Some("sk-wrong"), None] {
        let error = fixture
            .dispatcher
            .dispatch(BODY, presented)
            .await
            .expect_err("rejected");
        assert!(matches!(error, DispatchError::Unauthorized));
    }
    assert_eq!(fixture.counters.opened(), 0);
}

#[tokio::test]
async fn functional_override_key_is_admitted_after_config_update() {
    let fixture = fixture(1, "a,p,tok1", Vec::new(), ok_document());
    fixture
        .config
        .apply(ConfigUpdate {
            auth_key: Some("sk-admin".to_string()),
            ..ConfigUpdate::default()
        })
        .expect("apply override");
    assert!(fixture
        .dispatcher
        .dispatch(BODY, Some("sk-admin"))
        .await
        .is_ok());
}

#[tokio::test]
async fn functional_stream_forwards_chunks_in_order_and_releases_once() {
    let fixture = fixture(
        1,
        "a,p,tok1",
        vec![Script::Chunks(vec![
            Ok(Bytes::from_static(b"data: {\"n\":1}\n\n")),
            Ok(Bytes::from_static(b"data: {\"n\":2}\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ])],
        ok_document(),
    );
    let Delivery::Stream(delivery) = fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .expect("dispatch")
    else {
        panic!("expected stream delivery");
    };
    let frames = delivery
        .frames
        .map(|frame| frame.expect("frame"))
        .collect::<Vec<_>>()
        .await;
    let body = frames.concat();
    assert_eq!(
        String::from_utf8(body).expect("utf8"),
        "data: {\"n\":1}\n\ndata: {\"n\":2}\n\ndata: [DONE]\n\n"
    );
    delivery.delivery_task.await.expect("delivery task");
    assert_eq!(fixture.counters.released(), 1);
}

#[tokio::test]
async fn regression_stream_failure_after_first_chunk_releases_once() {
    let fixture = fixture(
        3,
        "a,p,tok1",
        vec![Script::Chunks(vec![
            Ok(Bytes::from_static(b"data: first\n\n")),
            Err(SessionError::Transport("reset mid-stream".to_string())),
        ])],
        ok_document(),
    );
    let Delivery::Stream(delivery) = fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .expect("dispatch")
    else {
        panic!("expected stream delivery");
    };
    let frames = delivery.frames.collect::<Vec<_>>().await;
    assert_eq!(frames.len(), 2);
    assert!(frames[0].is_ok());
    assert!(frames[1].is_err());
    delivery.delivery_task.await.expect("delivery task");
    assert_eq!(fixture.counters.opened(), 1, "mid-stream failures are not retried");
    assert_eq!(fixture.counters.released(), 1);
}

#[tokio::test]
async fn regression_caller_disconnect_still_releases_session() {
    let fixture = fixture(
        1,
        "a,p,tok1",
        vec![Script::ChunksThenHang(vec![Bytes::from_static(b"data: first\n\n")])],
        ok_document(),
    );
    let Delivery::Stream(StreamDelivery {
        mut frames,
        delivery_task,
    }) = fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .expect("dispatch")
    else {
        panic!("expected stream delivery");
    };
    let first = frames.next().await.expect("first frame").expect("chunk");
    assert_eq!(first.as_ref(), b"data: first\n\n");
    drop(frames);

    tokio::time::timeout(Duration::from_secs(2), delivery_task)
        .await
        .expect("delivery task ends after disconnect")
        .expect("delivery task");
    assert_eq!(fixture.counters.released(), 1);
}

#[tokio::test]
async fn functional_rejected_credential_is_recorded_and_skipped() {
    let fixture = fixture(
        3,
        "a,p,tok1\nb,p,tok2",
        vec![
            Script::FailOnSend(SessionError::status(401, "token expired")),
            ok_document(),
        ],
        ok_document(),
    );
    fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .expect("second credential succeeds");
    let tokens = fixture.counters.tokens.lock().expect("tokens").clone();
    assert_eq!(tokens.len(), 2);
    assert_ne!(tokens[0], tokens[1]);
    assert!(fixture.pool.is_errored(&tokens[0]));
    assert!(!fixture.pool.is_errored(&tokens[1]));
}

#[tokio::test]
async fn functional_requirements_failure_is_retried() {
    let fixture = fixture(
        2,
        "a,p,tok1",
        vec![
            Script::FailOnRequirements(SessionError::status(400, "challenge unsolved")),
            ok_document(),
        ],
        ok_document(),
    );
    assert!(fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .is_ok());
    assert_eq!(fixture.counters.opened(), 2);
    assert_eq!(fixture.counters.released(), 2);
}

#[tokio::test]
async fn regression_rate_limited_single_credential_surfaces_429() {
    let fixture = fixture(
        3,
        "a,p,tok1",
        Vec::new(),
        Script::FailOnSend(SessionError::status(429, "Too many requests")),
    );
    let error = fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .expect_err("rate limited");
    assert_eq!(error.status_code(), 429);
    assert_eq!(error.public_message(), "Too many requests");
    assert_eq!(
        fixture.counters.opened(),
        1,
        "cooling credential is not reused while the limit is enabled"
    );
}

#[tokio::test]
async fn regression_empty_pool_is_a_server_error() {
    let fixture = fixture(3, "", Vec::new(), ok_document());
    let error = fixture
        .dispatcher
        .dispatch(BODY, Some(CLIENT_KEY))
        .await
        .expect_err("no credential");
    assert!(matches!(error, DispatchError::NoCredential));
    assert_eq!(error.status_code(), 500);
    assert_eq!(fixture.counters.opened(), 0);
}
