//! Conversation state — the per-session view derived from bus events.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | (root) | [`ConversationState`] and its component types |
//! | `projection` | [`StateProjection`] — the only writer of conversation state |
//! | `audit` | [`AuditProjection`] — structured-logging event consumer |

pub mod audit;
pub mod projection;

use conductor_core::events::TodoItem;
use serde::{Deserialize, Serialize};

use crate::gates::{PendingApproval, PendingQuestion};
use crate::obligations::SessionObligation;

pub use audit::AuditProjection;
pub use projection::StateProjection;

/// Coarse phase of a session's current turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    /// No turn in flight.
    #[default]
    Idle,
    /// Turn received, agent not yet acting.
    Qualification,
    /// Agent acting (tools, delegation).
    Execution,
    /// Candidate answer under review.
    Review,
    /// Suspended on a blocking gate.
    WaitingUser,
    /// Turn failed.
    Error,
}

/// One entry of the per-session agent activity history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHistoryEntry {
    /// Acting agent.
    pub agent: String,
    /// What happened (`escalated`, `delegation_completed`, ...).
    pub action: String,
    /// Free-form detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

impl AgentHistoryEntry {
    /// Build an entry stamped with the current time.
    #[must_use]
    pub fn now(agent: impl Into<String>, action: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            agent: agent.into(),
            action: action.into(),
            detail,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Mutable per-session view, owned exclusively by [`StateProjection`].
///
/// Created on the first command for a session; mutated only by the state
/// projection reacting to events; never deleted, only superseded turn over
/// turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    /// Session this state belongs to.
    pub session_id: String,
    /// Current phase.
    pub current_phase: ConversationPhase,
    /// Agent currently handling the turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_agent: Option<String>,
    /// Outstanding approval gates.
    pub pending_approvals: Vec<PendingApproval>,
    /// Outstanding question gates.
    pub pending_questions: Vec<PendingQuestion>,
    /// Obligation ledger.
    pub obligations: Vec<SessionObligation>,
    /// Agent activity history.
    pub agent_history: Vec<AgentHistoryEntry>,
    /// Working plan for the current turn.
    pub todos: Vec<TodoItem>,
    /// Number of the most recent turn.
    pub last_turn: u32,
}

impl ConversationState {
    /// Fresh state for a new session.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_phase: ConversationPhase::Idle,
            active_agent: None,
            pending_approvals: Vec::new(),
            pending_questions: Vec::new(),
            obligations: Vec::new(),
            agent_history: Vec::new(),
            todos: Vec::new(),
            last_turn: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_idle_and_empty() {
        let state = ConversationState::new("sess_1");
        assert_eq!(state.current_phase, ConversationPhase::Idle);
        assert!(state.active_agent.is_none());
        assert!(state.pending_questions.is_empty());
        assert!(state.obligations.is_empty());
        assert_eq!(state.last_turn, 0);
    }

    #[test]
    fn phase_serializes_snake_case() {
        let json = serde_json::to_value(ConversationPhase::WaitingUser).unwrap();
        assert_eq!(json, "waiting_user");
    }
}
