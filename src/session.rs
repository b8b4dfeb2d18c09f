//! C3 — the controller session: admission, liveness, inbound-frame
//! handling, teardown (spec §4.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::auth::Plugin;
use crate::codec::{decode_response_frame, DecodeError, RequestId};
use crate::liveness;
use crate::pending::{ForwardOutcome, PendingResponse, PendingTable};
use crate::registry::{InsertOutcome, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Alive,
    AwaitingPong,
    Dead,
}

pub enum LivenessAction {
    SendPing,
    TearDown,
}

pub struct Session {
    pub device_key: String,
    ws_tx: Mutex<Option<SplitSink<WebSocket, Message>>>,
    pending: Mutex<PendingTable>,
    liveness: Mutex<LivenessState>,
    liveness_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl Session {
    /// Creates a session with no attached socket yet. Used during admission
    /// so the session can be handed to `Registry::try_insert` before the
    /// socket is split — on a lost race the caller still holds the intact
    /// `WebSocket` and can reply with an `ERR:` frame.
    fn new_pending(device_key: String) -> Arc<Self> {
        Arc::new(Self {
            device_key,
            ws_tx: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            liveness: Mutex::new(LivenessState::Alive),
            liveness_task: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        })
    }

    async fn attach_socket(&self, ws_tx: SplitSink<WebSocket, Message>) {
        *self.ws_tx.lock().await = Some(ws_tx);
    }

    #[cfg(test)]
    pub fn new_for_test(device_key: String) -> Arc<Self> {
        Self::new_pending(device_key)
    }

    pub(crate) async fn send(&self, msg: Message) -> Result<(), axum::Error> {
        let mut tx = self.ws_tx.lock().await;
        match tx.as_mut() {
            Some(sink) => sink.send(msg).await,
            None => Err(axum::Error::new(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session has no live socket",
            ))),
        }
    }

    /// Transmits an already-encoded forward frame on this session's socket.
    /// Sent as a text frame per spec §4.5; the body segment may itself be
    /// arbitrary bytes, so the text payload is built without re-validating
    /// UTF-8 — the bytes reach the wire unchanged either way.
    pub async fn send_forward_frame(&self, frame: Vec<u8>) -> Result<(), axum::Error> {
        let text = unsafe { String::from_utf8_unchecked(frame) };
        self.send(Message::Text(text)).await
    }

    /// Allocates a fresh, currently-unused request id and parks a resolver
    /// under it. Draws uniformly from the full id space with bounded
    /// rejection sampling on collision (spec §4.4); `None` means the table
    /// is saturated.
    pub async fn allocate_pending(
        &self,
        resolver: oneshot::Sender<ForwardOutcome>,
    ) -> Option<RequestId> {
        use rand::Rng;
        const MAX_ATTEMPTS: usize = 128;
        let mut pending = self.pending.lock().await;
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_ATTEMPTS {
            let candidate = RequestId::from_u16(rng.gen());
            if !pending.contains_key(&candidate) {
                pending.insert(candidate, PendingResponse::new(resolver));
                return Some(candidate);
            }
        }
        None
    }

    /// Removes a pending entry without resolving it — used when the
    /// originating HTTP client disconnects before a reply arrives.
    pub async fn cancel_pending(&self, id: RequestId) {
        self.pending.lock().await.remove(&id);
    }

    /// Looks up `id` in the pending table and, on a hit, resolves it with
    /// the device's reply and removes it. A miss is a no-op (logged by the
    /// caller) and mutates no HTTP response.
    async fn resolve_from_device(&self, id: RequestId, body: Vec<u8>) -> bool {
        let entry = self.pending.lock().await.remove(&id);
        match entry {
            Some(pending) => {
                pending.resolve(ForwardOutcome::DeviceReplied(body));
                true
            }
            None => false,
        }
    }

    async fn mark_alive(&self) {
        *self.liveness.lock().await = LivenessState::Alive;
    }

    /// Advances the liveness state machine on a tick (spec §4.3/§4.6).
    pub async fn liveness_tick(&self) -> LivenessAction {
        let mut state = self.liveness.lock().await;
        match *state {
            LivenessState::Alive => {
                *state = LivenessState::AwaitingPong;
                LivenessAction::SendPing
            }
            LivenessState::AwaitingPong | LivenessState::Dead => {
                *state = LivenessState::Dead;
                LivenessAction::TearDown
            }
        }
    }

    /// Idempotent teardown (spec §4.3 step-by-step): stop the ticker,
    /// remove from the registry (only if still the stored instance), fail
    /// every pending entry with a 502 outcome, drop the socket.
    pub async fn teardown(self: &Arc<Self>, registry: &Registry) {
        if self
            .torn_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Some(handle) = self.liveness_task.lock().await.take() {
            handle.abort();
        }

        registry.remove(&self.device_key, self);

        let mut pending = self.pending.lock().await;
        for (_, entry) in pending.drain() {
            entry.resolve(ForwardOutcome::SessionTornDown);
        }
        drop(pending);

        *self.ws_tx.lock().await = None;

        info!(device_key = %self.device_key, "controller session torn down");
    }

    async fn set_liveness_task(&self, handle: tokio::task::JoinHandle<()>) {
        *self.liveness_task.lock().await = Some(handle);
    }
}

#[derive(Deserialize)]
struct ConnectQuery {
    #[serde(rename = "deviceKey")]
    device_key: Option<String>,
}

pub fn router(registry: Arc<Registry>, auth: Arc<Plugin>) -> Router {
    Router::new()
        .route("/socket/v1", get(socket_handler))
        .fallback(invalid_path_fallback)
        .with_state((registry, auth))
}

async fn invalid_path_fallback(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|socket| async move {
        send_admission_error(socket, "ERR: invalid path.").await;
    })
}

async fn socket_handler(
    State((registry, auth)): State<(Arc<Registry>, Arc<Plugin>)>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| admit(socket, registry, auth, query.device_key))
}

/// Admission protocol (spec §4.3): each failing step replies with a single
/// `ERR:` text frame, then closes.
async fn admit(
    socket: WebSocket,
    registry: Arc<Registry>,
    auth: Arc<Plugin>,
    device_key: Option<String>,
) {
    let device_key = match device_key.filter(|k| !k.is_empty()) {
        Some(k) => k,
        None => {
            send_admission_error(socket, "ERR: deviceKey was not properly specified.").await;
            return;
        }
    };

    if registry.lookup(&device_key).is_some() {
        send_admission_error(
            socket,
            "ERR: A controller with this device key is already connected.",
        )
        .await;
        return;
    }

    match auth.validate_key(&device_key).await {
        Ok(true) => {}
        Ok(false) => {
            send_admission_error(socket, "ERR: Invalid device key.").await;
            return;
        }
        Err(err) => {
            tracing::error!(device_key = %device_key, error = %err, "auth plugin error during admission");
            send_admission_error(socket, "ERR: Error validating device key.").await;
            return;
        }
    }

    // Inserted before the socket is split so a lost race against a
    // concurrent admission for the same key still leaves `socket` intact to
    // carry the `ERR:` reply (spec §4.3 step 3).
    let session = Session::new_pending(device_key.clone());
    match registry.try_insert(device_key.clone(), session.clone()) {
        InsertOutcome::Inserted => {}
        InsertOutcome::AlreadyPresent => {
            send_admission_error(
                socket,
                "ERR: A controller with this device key is already connected.",
            )
            .await;
            return;
        }
    }

    info!(device_key = %device_key, "controller admitted");

    let (ws_tx, ws_rx) = socket.split();
    session.attach_socket(ws_tx).await;

    let liveness_handle = liveness::spawn(session.clone(), registry.clone());
    session.set_liveness_task(liveness_handle).await;

    read_loop(session.clone(), ws_rx).await;
    session.teardown(&registry).await;
}

async fn read_loop(
    session: Arc<Session>,
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
) {
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                warn!(device_key = %session.device_key, error = %err, "controller socket error");
                break;
            }
        };

        match msg {
            Message::Text(text) => handle_inbound_frame(&session, text.as_bytes()).await,
            Message::Binary(bytes) => handle_inbound_frame(&session, &bytes).await,
            Message::Pong(_) => session.mark_alive().await,
            Message::Ping(_) => {}
            Message::Close(_) => break,
        }
    }
}

async fn handle_inbound_frame(session: &Arc<Session>, data: &[u8]) {
    match decode_response_frame(data) {
        Ok(frame) => {
            if !session.resolve_from_device(frame.request_id, frame.body).await {
                warn!(
                    device_key = %session.device_key,
                    request_id = %frame.request_id,
                    "response frame for unknown or already-resolved request id"
                );
            }
        }
        Err(DecodeError::NoTerminator) | Err(DecodeError::InvalidHeaderUtf8) | Err(DecodeError::Malformed) => {
            warn!(device_key = %session.device_key, "discarding malformed controller frame");
        }
    }
}

async fn send_admission_error(mut socket: WebSocket, message: &str) {
    let _ = socket.send(Message::Text(message.to_string())).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: axum::extract::ws::close_code::NORMAL,
            reason: "".into(),
        })))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[tokio::test]
    async fn request_ids_are_unique_within_a_session() {
        let session = Session::new_for_test("k1".to_string());
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        let id1 = session.allocate_pending(tx1).await.unwrap();
        let id2 = session.allocate_pending(tx2).await.unwrap();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn device_reply_resolves_pending_entry_exactly_once() {
        let session = Session::new_for_test("k1".to_string());
        let (tx, rx) = oneshot::channel();
        let id = session.allocate_pending(tx).await.unwrap();

        assert!(session.resolve_from_device(id, b"OK".to_vec()).await);
        // Second delivery for the same id is a miss — already removed.
        assert!(!session.resolve_from_device(id, b"again".to_vec()).await);

        match rx.await.unwrap() {
            ForwardOutcome::DeviceReplied(body) => assert_eq!(body, b"OK"),
            ForwardOutcome::SessionTornDown => panic!("expected a device reply"),
        }
    }

    #[tokio::test]
    async fn cancel_pending_removes_without_resolving() {
        let session = Session::new_for_test("k1".to_string());
        let (tx, rx) = oneshot::channel();
        let id = session.allocate_pending(tx).await.unwrap();

        session.cancel_pending(id).await;
        // A later device reply for the cancelled id is a lookup miss.
        assert!(!session.resolve_from_device(id, b"late".to_vec()).await);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn liveness_state_machine_transitions() {
        let session = Session::new_for_test("k1".to_string());
        assert!(matches!(session.liveness_tick().await, LivenessAction::SendPing));
        // No pong arrived before the next tick.
        assert!(matches!(session.liveness_tick().await, LivenessAction::TearDown));

        session.mark_alive().await;
        assert!(matches!(session.liveness_tick().await, LivenessAction::SendPing));
        session.mark_alive().await;
        assert!(matches!(session.liveness_tick().await, LivenessAction::SendPing));
    }

    #[tokio::test]
    async fn teardown_resolves_every_pending_entry_and_is_idempotent() {
        let session = Session::new_for_test("k1".to_string());
        let registry = Registry::new();
        registry.try_insert("k1".to_string(), session.clone());

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        session.allocate_pending(tx1).await.unwrap();
        session.allocate_pending(tx2).await.unwrap();

        session.teardown(&registry).await;
        assert!(registry.lookup("k1").is_none());
        assert!(matches!(rx1.await.unwrap(), ForwardOutcome::SessionTornDown));
        assert!(matches!(rx2.await.unwrap(), ForwardOutcome::SessionTornDown));

        // Idempotent: calling again must not panic or double-resolve anything.
        session.teardown(&registry).await;
    }
}
