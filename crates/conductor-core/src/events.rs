//! Domain event kinds for the orchestration core.
//!
//! [`WorkflowEventKind`] is a tagged union keyed by a dot-namespaced type
//! string (`"agent.started"`, `"tool.result"`, ...), one payload shape per
//! tag. Projections match on it exhaustively — adding a variant requires ONE
//! edit (inside the `workflow_events!` invocation) and the compiler flags
//! every consumer that must handle it.
//!
//! The kind carries only the payload; session/turn/ordering metadata lives in
//! [`crate::envelope::WorkflowEnvelope`], which flattens the kind into its
//! wire form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Supporting payload enums
// ─────────────────────────────────────────────────────────────────────────────

/// Risk level attached to an approval gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Routine operation.
    Low,
    /// Reversible but notable.
    Medium,
    /// Destructive or outward-facing.
    High,
}

/// Normalized delegation outcome vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    /// Delegate completed the objective.
    Success,
    /// Delegate completed some of the objective.
    Partial,
    /// Delegate failed.
    Failed,
    /// Delegate handed control back to the coordinator.
    Escalated,
}

/// What an obligation tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    /// Something the user asked for.
    UserRequest,
    /// A sub-task handed to a specialist agent.
    Delegation,
}

/// Where an obligation came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationOrigin {
    /// The turn's primary request.
    Primary,
    /// A question surfaced to the user mid-turn (resolved by free-text match).
    Inbox,
    /// Created when a delegation was dispatched.
    Delegation,
}

/// Obligation lifecycle status.
///
/// Transitions are one-way: `Open` → one of the terminal states, never back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    /// Outstanding commitment.
    Open,
    /// Covered with evidence.
    Satisfied,
    /// Deliberately set aside.
    Waived,
    /// Attempted and failed.
    Failed,
}

impl ObligationStatus {
    /// Whether this status is terminal (anything but `Open`).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Todo status in a turn's working plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    /// Not started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
}

/// One entry of a turn's working plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    /// Stable ID within the session.
    pub id: String,
    /// Short description.
    pub title: String,
    /// Current status.
    pub status: TodoStatus,
}

// ─────────────────────────────────────────────────────────────────────────────
// workflow_events! macro — generates WorkflowEventKind and event_type()
// ─────────────────────────────────────────────────────────────────────────────

/// Declarative macro that generates [`WorkflowEventKind`], its
/// `event_type()` accessor, and a compile-time variant count for tests.
macro_rules! workflow_events {
    ($(
        $(#[doc = $doc:literal])*
        $variant:ident {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty
            ),*
            $(,)?
        } => $rename:literal
    ),* $(,)?) => {
        /// One domain event payload, tagged by its dot-namespaced type string.
        #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "type")]
        #[allow(missing_docs)]
        pub enum WorkflowEventKind {
            $(
                $(#[doc = $doc])*
                #[serde(rename = $rename)]
                $variant {
                    $(
                        $(#[$fmeta])*
                        $field: $ty,
                    )*
                },
            )*
        }

        impl WorkflowEventKind {
            /// Get the dot-namespaced event type string.
            #[must_use]
            pub fn event_type(&self) -> &'static str {
                match self {
                    $(Self::$variant { .. } => $rename,)*
                }
            }
        }

        /// Number of `WorkflowEventKind` variants (compile-time constant for tests).
        #[cfg(test)]
        pub(crate) const VARIANT_COUNT: usize = [$($rename),*].len();
    };
}

workflow_events! {
    // -- Session / turn lifecycle --

    /// Session created; first event of every session.
    SessionStarted {} => "session.started",

    /// A user turn began. Carries the inbound message.
    TurnStarted {
        turn: u32,
        message: String,
    } => "turn.started",

    /// Turn reached a terminal outcome.
    TurnCompleted {
        turn: u32,
    } => "turn.completed",

    /// Turn failed before reaching an outcome.
    TurnFailed {
        turn: u32,
        error: String,
    } => "turn.failed",

    // -- Agent lifecycle --

    /// An agent began handling the turn.
    AgentStarted {
        agent: String,
    } => "agent.started",

    /// The agent finished its part of the turn.
    AgentCompleted {
        agent: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    } => "agent.completed",

    /// A delegate handed control back to the coordinator mid-turn.
    AgentEscalated {
        #[serde(rename = "fromAgent")]
        from_agent: String,
        reason: String,
    } => "agent.escalated",

    /// Final assistant answer for the turn.
    AssistantMessage {
        content: String,
    } => "message.assistant",

    // -- Tool execution --

    /// A tool call was dispatched.
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        arguments: Value,
    } => "tool.call",

    /// A tool call settled (success or failure).
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    } => "tool.result",

    // -- Gates --

    /// A question was surfaced to the user.
    QuestionAsked {
        #[serde(rename = "questionId")]
        question_id: String,
        question: String,
        #[serde(rename = "fromAgent")]
        from_agent: String,
        blocking: bool,
        #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
        expires_at: Option<String>,
    } => "gate.question_asked",

    /// The user answered a pending question.
    QuestionAnswered {
        #[serde(rename = "questionId")]
        question_id: String,
        answer: String,
    } => "gate.question_answered",

    /// An approval was requested.
    ApprovalRequested {
        #[serde(rename = "approvalId")]
        approval_id: String,
        description: String,
        #[serde(rename = "riskLevel")]
        risk_level: RiskLevel,
        #[serde(rename = "fromAgent")]
        from_agent: String,
        #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
        expires_at: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fingerprint: Option<String>,
    } => "gate.approval_requested",

    /// The user decided a pending approval.
    ApprovalDecided {
        #[serde(rename = "approvalId")]
        approval_id: String,
        approved: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    } => "gate.approval_decided",

    // -- Delegation --

    /// A sub-task was handed to a specialist agent.
    DelegationDispatched {
        #[serde(rename = "delegationId")]
        delegation_id: String,
        #[serde(rename = "targetAgent")]
        target_agent: String,
        domain: String,
        objective: String,
    } => "delegation.dispatched",

    /// A delegation settled with a normalized status.
    DelegationCompleted {
        #[serde(rename = "delegationId")]
        delegation_id: String,
        #[serde(rename = "targetAgent")]
        target_agent: String,
        status: DelegationStatus,
        summary: String,
    } => "delegation.completed",

    /// A delegation's callable failed outright.
    DelegationFailed {
        #[serde(rename = "delegationId")]
        delegation_id: String,
        #[serde(rename = "targetAgent")]
        target_agent: String,
        error: String,
    } => "delegation.failed",

    // -- Obligations --

    /// A commitment was recorded in the ledger.
    ObligationOpened {
        #[serde(rename = "obligationId")]
        obligation_id: String,
        kind: ObligationKind,
        description: String,
        #[serde(rename = "requiredOutcome", skip_serializing_if = "Option::is_none")]
        required_outcome: Option<String>,
        #[serde(rename = "sourceAgent")]
        source_agent: String,
        origin: ObligationOrigin,
        blocking: bool,
    } => "obligation.opened",

    /// A commitment reached a terminal status.
    ObligationResolved {
        #[serde(rename = "obligationId")]
        obligation_id: String,
        status: ObligationStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        evidence: Option<String>,
    } => "obligation.resolved",

    // -- Loop internals --

    /// Self-validation verdict on a candidate answer.
    SelfValidation {
        #[serde(rename = "isComplete")]
        is_complete: bool,
        confidence: f64,
        feedback: String,
    } => "loop.self_validation",

    /// Iteration ceiling reached; summary built from step history.
    LoopExhausted {
        iterations: u32,
        summary: String,
    } => "loop.exhausted",

    // -- Misc --

    /// Working plan updated.
    TodoUpdated {
        todos: Vec<TodoItem>,
    } => "todo.updated",

    /// An error surfaced to the user.
    ErrorRaised {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    } => "error",
}
