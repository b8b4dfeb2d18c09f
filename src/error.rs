//! Crate-wide error types.
//!
//! `GatewayError::Fatal` is the only variant that ever reaches `main` — every
//! other failure mode has a wire-level representation (an `ERR:` frame, a
//! JSON HTTP body, or a silently discarded frame) and is handled where it
//! occurs rather than propagated.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unknown authentication plugin: {0}")]
    UnknownPlugin(String),

    #[error("authentication plugin failed to initialize: {0}")]
    PluginInit(#[source] anyhow::Error),

    #[error("failed to bind {0}: {1}")]
    Bind(String, #[source] std::io::Error),
}
