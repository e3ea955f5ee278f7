//! Runtime error types.

use conductor_core::CollabError;
use thiserror::Error;

/// Errors raised inside the orchestration runtime.
///
/// Nothing above the dispatcher boundary sees these raw — every dispatch
/// path resolves to a typed outcome with a user-displayable message.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Session does not exist.
    #[error("session {0} not found")]
    SessionNotFound(String),

    /// The turn already has a blocking gate outstanding.
    #[error("turn {turn_id} already has a blocking gate outstanding")]
    BlockingGateOutstanding {
        /// Turn with the outstanding gate.
        turn_id: String,
    },

    /// No agent with this name is registered.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// The agent registry has no coordinator entry.
    #[error("no coordinator agent registered")]
    NoCoordinator,

    /// Parallel delegation was requested with zero valid items.
    #[error("parallel delegation requires at least one valid item")]
    EmptyDelegation,

    /// A projection failed while applying an event.
    #[error("projection error: {0}")]
    Projection(String),

    /// An external collaborator failed.
    #[error(transparent)]
    Collab(#[from] CollabError),
}
