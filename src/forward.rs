//! C4 — the request forwarder (spec §4.4): accepts
//! `/forward/v1/:device_key/*path`, serializes it as a forward frame, parks
//! the HTTP response, and delivers the first matching reply.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::info;

use crate::codec::encode_forward_frame;
use crate::pending::ForwardOutcome;
use crate::registry::Registry;

/// Request bodies are read upstream with this cap; bodies larger than this
/// are rejected with 413 by the `DefaultBodyLimit` layer in `main.rs` before
/// this handler ever runs (spec §6 — body parsing is out of core scope).
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/forward/v1/:device_key", any(redirect_trailing_slash))
        .route("/forward/v1/:device_key/*path", any(forward_handler))
        .with_state(registry)
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({ "message": message }))).into_response()
}

async fn redirect_trailing_slash(Path(device_key): Path<String>) -> Response {
    // `axum::response::Redirect::permanent` emits 308, not the 301 spec §6
    // requires; build the response directly instead.
    let target = format!("/forward/v1/{device_key}/");
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, target)],
    )
        .into_response()
}

async fn forward_handler(
    State(registry): State<Arc<Registry>>,
    Path((device_key, path)): Path<(String, String)>,
    request: Request,
) -> Response {
    if device_key.is_empty() {
        return json_error(
            StatusCode::UNAUTHORIZED,
            "No device key was specified or an invalid format was used.",
        );
    }

    let session = match registry.lookup(&device_key) {
        Some(session) => session,
        None => {
            return json_error(
                StatusCode::NOT_FOUND,
                "Specified device does not exist or is not connected.",
            );
        }
    };

    let (parts, body) = request.into_parts();
    let forwarded_path = if path.is_empty() { "/".to_string() } else { format!("/{path}") };
    let forwarded_path = match parts.uri.query() {
        Some(query) => format!("{forwarded_path}?{query}"),
        None => forwarded_path,
    };

    // Body-size enforcement is the `DefaultBodyLimit` layer's job (spec §1 —
    // body parsing is an external collaborator, not the core); by the time a
    // request reaches this handler it has already passed that check.
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let (resolve_tx, resolve_rx) = oneshot::channel();
    let request_id = match session.allocate_pending(resolve_tx).await {
        Some(id) => id,
        None => {
            return json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Too many in-flight requests for this device.",
            );
        }
    };

    let frame = encode_forward_frame(
        request_id,
        &parts.method,
        &forwarded_path,
        parts.version,
        &parts.headers,
        &body_bytes,
    );

    if session.send_forward_frame(frame).await.is_err() {
        session.cancel_pending(request_id).await;
        return json_error(StatusCode::BAD_GATEWAY, "Failed to reach device.");
    }

    let mut guard = CancelOnDrop {
        session: session.clone(),
        request_id,
        resolved: false,
    };

    let outcome = resolve_rx.await;
    guard.resolved = true;

    match outcome {
        Ok(ForwardOutcome::DeviceReplied(body)) => {
            info!(device_key = %device_key, request_id = %request_id, "forwarded request resolved");
            axum::body::Bytes::from(body).into_response()
        }
        Ok(ForwardOutcome::SessionTornDown) => {
            (StatusCode::BAD_GATEWAY, "controller session was torn down").into_response()
        }
        Err(_) => {
            // Sender dropped without resolving — can only happen if the
            // entry was cancelled from under us, which we never do while
            // still awaiting it ourselves.
            (StatusCode::BAD_GATEWAY, "controller session was torn down").into_response()
        }
    }
}

/// Drops the pending entry if this forward's future is cancelled (the
/// originating HTTP client disconnected) before a reply arrived (spec §4.4
/// step 7).
struct CancelOnDrop {
    session: Arc<crate::session::Session>,
    request_id: crate::codec::RequestId,
    resolved: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.resolved {
            let session = self.session.clone();
            let id = self.request_id;
            tokio::spawn(async move {
                session.cancel_pending(id).await;
            });
        }
    }
}
