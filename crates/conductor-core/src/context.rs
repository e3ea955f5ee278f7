//! Per-command request identity.

use serde::{Deserialize, Serialize};

use crate::envelope::WorkflowEnvelope;
use crate::events::WorkflowEventKind;
use crate::ids;

/// Identity of one inbound command, created once at the dispatch boundary
/// and threaded unchanged through every event produced while handling it.
///
/// `turn_id` scopes which gates and obligations belong to the current user
/// turn; a blocking-gate resumption is a fresh command (new `request_id`)
/// carrying the *same* `turn_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Session being addressed.
    pub session_id: String,
    /// Inbound command identity.
    pub request_id: String,
    /// User turn this command belongs to.
    pub turn_id: String,
}

impl RequestContext {
    /// Context for a brand-new turn in a session (fresh request + turn IDs).
    #[must_use]
    pub fn new_turn(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: ids::new_request_id(),
            turn_id: ids::new_turn_id(),
        }
    }

    /// Context resuming an existing turn (fresh request ID, same turn).
    #[must_use]
    pub fn resume_turn(session_id: impl Into<String>, turn_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: ids::new_request_id(),
            turn_id: turn_id.into(),
        }
    }

    /// Build an envelope carrying this context.
    ///
    /// Pure and side-effect free; generates a fresh `event_id` per call.
    #[must_use]
    pub fn event(&self, kind: WorkflowEventKind) -> WorkflowEnvelope {
        WorkflowEnvelope::new(&self.session_id, &self.request_id, &self.turn_id, kind)
    }
}
