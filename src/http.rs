use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use crate::router::{DispatchOutcome, WebhookRouter};

/// Webhook bodies above this size are refused outright.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Header carrying the HMAC signature on inbound notifications.
pub const SIGNATURE_HEADER: &str = "x-webex-signature";

/// Build the inbound HTTP surface: every path falls through to the webhook
/// router, which decides whether it is ours. Hosts either serve this router
/// directly or merge it into their own.
pub fn router(webhooks: Arc<WebhookRouter>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(dispatch)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(webhooks)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

async fn dispatch(
    State(webhooks): State<Arc<WebhookRouter>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > MAX_BODY_BYTES {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large");
    }
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match webhooks.dispatch(uri.path(), &method, &body, signature).await {
        DispatchOutcome::Handled => (StatusCode::OK, Json(json!({"ok": true}))).into_response(),
        DispatchOutcome::NotFound => error_response(StatusCode::NOT_FOUND, "Not found"),
        DispatchOutcome::MethodNotAllowed => {
            let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("POST"));
            response
        }
        DispatchOutcome::BadRequest(reason) => error_response(StatusCode::BAD_REQUEST, reason),
        DispatchOutcome::Unauthorized => error_response(StatusCode::UNAUTHORIZED, "Unauthorized"),
        DispatchOutcome::Internal => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}
