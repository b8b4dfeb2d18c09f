//! C6 — the per-session liveness ticker (spec §4.6).
//!
//! One 10-second ticker per session. Owns no state beyond driving the
//! session's `Alive`/`AwaitingPong`/`Dead` transitions; a missed pong tears
//! the session down, which atomically fails its pending requests.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tracing::warn;

use crate::registry::Registry;
use crate::session::{LivenessAction, Session};

const LIVENESS_INTERVAL: Duration = Duration::from_secs(10);

/// Spawns the ticker task for `session`. Stopped by aborting the returned
/// handle, which `Session::teardown` does.
pub fn spawn(session: Arc<Session>, registry: Arc<Registry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
        // The first tick fires immediately; consume it so the first real
        // liveness check happens a full interval after admission.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match session.liveness_tick().await {
                LivenessAction::SendPing => {
                    if session.send(Message::Ping(Vec::new())).await.is_err() {
                        warn!(device_key = %session.device_key, "failed to send liveness ping");
                        session.teardown(&registry).await;
                        break;
                    }
                }
                LivenessAction::TearDown => {
                    warn!(device_key = %session.device_key, "controller missed liveness pong, tearing down");
                    session.teardown(&registry).await;
                    break;
                }
            }
        }
    })
}
