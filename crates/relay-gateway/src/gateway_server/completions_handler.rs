//! OpenAI-compatible completions and models endpoints.

use super::*;

fn bearer_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?;
    let raw = header.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

pub(super) async fn handle_chat_completions(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let presented_key = bearer_token_from_headers(&headers);
    match state
        .dispatcher
        .dispatch(&body, presented_key.as_deref())
        .await
    {
        Ok(Delivery::Document(document)) => (StatusCode::OK, Json(document)).into_response(),
        Ok(Delivery::Stream(delivery)) => {
            // The delivery task owns the session and releases it once the
            // body is drained or dropped.
            let mut response = Response::new(Body::from_stream(delivery.frames));
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
        }
        Err(error) => {
            if error.is_server_error() {
                error!(error = %error, "chat completion failed");
            } else {
                warn!(
                    status = error.status_code(),
                    code = error.code(),
                    "chat completion rejected"
                );
            }
            GatewayApiError::from_dispatch(&error).into_response()
        }
    }
}

pub(super) fn build_models_payload(created: u64) -> Value {
    let data = ADVERTISED_MODELS
        .iter()
        .map(|model| {
            json!({
                "id": model,
                "object": "model",
                "created": created,
                "owned_by": OPENAI_OWNER,
            })
        })
        .collect::<Vec<_>>();
    json!({
        "object": "list",
        "data": data,
    })
}

pub(super) async fn handle_models() -> Response {
    (
        StatusCode::OK,
        Json(build_models_payload(unix_now())),
    )
        .into_response()
}
