//! The per-device pending-request table (spec §3, §9's Open Question
//! resolved in favor of per-device scoping).

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::codec::RequestId;

/// How a parked HTTP response was ultimately resolved.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// The device replied; deliver this body verbatim with HTTP 200.
    DeviceReplied(Vec<u8>),
    /// The session was torn down (close, error, or liveness timeout) while
    /// this request was still pending; deliver HTTP 502.
    SessionTornDown,
}

/// An in-flight forwarded request awaiting a device reply.
///
/// `resolve` is the exclusive handle described in spec §3 as `responseSink`:
/// sending through it delivers the outcome to the parked HTTP handler
/// exactly once, per invariant 3.
pub struct PendingResponse {
    resolve: oneshot::Sender<ForwardOutcome>,
    /// Correlation id for observability (spec §3's optional `logContext`).
    pub log_context: uuid::Uuid,
}

impl PendingResponse {
    pub fn new(resolve: oneshot::Sender<ForwardOutcome>) -> Self {
        Self {
            resolve,
            log_context: uuid::Uuid::new_v4(),
        }
    }

    pub fn resolve(self, outcome: ForwardOutcome) {
        let _ = self.resolve.send(outcome);
    }
}

pub type PendingTable = HashMap<RequestId, PendingResponse>;
