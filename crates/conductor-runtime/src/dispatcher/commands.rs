//! Transport-neutral inbound command schema and dispatch outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::TurnStatus;
use crate::gates::{PendingApproval, PendingQuestion};

/// Commands accepted at the dispatch boundary.
///
/// The wire schema is transport-agnostic: WebSocket, HTTP, and test drivers
/// all produce the same tagged JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundCommand {
    /// A new user request (starts a turn).
    #[serde(rename = "user_request", rename_all = "camelCase")]
    UserRequest {
        /// Session to address (created on first use).
        session_id: String,
        /// Caller-assigned request ID.
        request_id: String,
        /// Request text.
        message: String,
        /// Opaque transport metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// Answer to a pending question gate.
    #[serde(rename = "user_question_answered", rename_all = "camelCase")]
    UserQuestionAnswered {
        /// Session being addressed.
        session_id: String,
        /// Caller-assigned request ID.
        request_id: String,
        /// Question being answered.
        question_id: String,
        /// Answer text.
        answer: String,
    },
    /// Decision on a pending approval gate.
    #[serde(rename = "user_approval_decided", rename_all = "camelCase")]
    UserApprovalDecided {
        /// Session being addressed.
        session_id: String,
        /// Caller-assigned request ID.
        request_id: String,
        /// Approval being decided.
        approval_id: String,
        /// The decision.
        approved: bool,
    },
    /// Decision on a pending plan approval.
    #[serde(rename = "user_plan_approval_decided", rename_all = "camelCase")]
    UserPlanApprovalDecided {
        /// Session being addressed.
        session_id: String,
        /// Caller-assigned request ID.
        request_id: String,
        /// Plan being decided.
        plan_id: String,
        /// The decision.
        approved: bool,
        /// Optional rejection rationale.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Typed result of one dispatch. Nothing above this boundary sees raw
/// errors — `message` is always user-displayable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    /// Terminal status of the command.
    pub status: TurnStatus,
    /// Session addressed.
    pub session_id: String,
    /// Request that was handled.
    pub request_id: String,
    /// Turn the command mapped onto, when one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    /// User-displayable outcome message.
    pub message: String,
    /// Final answer, when the turn completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Reconnect snapshot handed to a client before replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAck {
    /// Highest sequence number buffered for this session.
    pub current_seq: u64,
    /// Outstanding approval gates.
    pub pending_approvals: Vec<PendingApproval>,
    /// Outstanding question gates.
    pub pending_questions: Vec<PendingQuestion>,
    /// Descriptions of unresolved obligations (outstanding actions).
    pub pending_actions: Vec<String>,
}
