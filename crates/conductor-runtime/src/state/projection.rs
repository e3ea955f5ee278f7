//! [`StateProjection`] — the only writer of [`ConversationState`].
//!
//! Reacts to every bus event with an exhaustive match, so adding an event
//! kind forces a decision about its state effect at compile time. The loop
//! and dispatcher read state through [`state_of`](StateProjection::state_of)
//! snapshots; they never mutate it directly.

use async_trait::async_trait;
use conductor_core::events::{ObligationStatus, WorkflowEventKind};
use conductor_core::WorkflowEnvelope;
use dashmap::DashMap;
use tracing::debug;

use crate::bus::Projection;
use crate::errors::RuntimeError;
use crate::gates::{PendingApproval, PendingQuestion};
use crate::obligations::{self, ObligationSpec};
use crate::state::{AgentHistoryEntry, ConversationPhase, ConversationState};

/// Owns every session's [`ConversationState`], keyed by session ID.
#[derive(Default)]
pub struct StateProjection {
    states: DashMap<String, ConversationState>,
}

impl StateProjection {
    /// Create an empty projection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a session's state.
    #[must_use]
    pub fn state_of(&self, session_id: &str) -> Option<ConversationState> {
        self.states.get(session_id).map(|s| s.clone())
    }

    /// Number of sessions tracked.
    pub fn session_count(&self) -> usize {
        self.states.len()
    }

    fn apply_kind(&self, envelope: &WorkflowEnvelope) {
        let mut state = self
            .states
            .entry(envelope.session_id.clone())
            .or_insert_with(|| ConversationState::new(envelope.session_id.clone()));
        let turn_id = envelope.turn_id.clone();

        match &envelope.kind {
            WorkflowEventKind::SessionStarted {} => {
                // Entry creation above is the whole effect.
            }
            WorkflowEventKind::TurnStarted { turn, message: _ } => {
                state.last_turn = *turn;
                state.current_phase = ConversationPhase::Qualification;
            }
            WorkflowEventKind::TurnCompleted { turn: _ } => {
                state.current_phase = ConversationPhase::Idle;
                state.active_agent = None;
            }
            WorkflowEventKind::TurnFailed { turn: _, error: _ } => {
                state.current_phase = ConversationPhase::Error;
                state.active_agent = None;
            }
            WorkflowEventKind::AgentStarted { agent } => {
                state.active_agent = Some(agent.clone());
                state.current_phase = ConversationPhase::Execution;
            }
            WorkflowEventKind::AgentCompleted { agent, summary } => {
                state
                    .agent_history
                    .push(AgentHistoryEntry::now(agent, "completed", summary.clone()));
            }
            WorkflowEventKind::AgentEscalated { from_agent, reason } => {
                state.agent_history.push(AgentHistoryEntry::now(
                    from_agent,
                    "escalated",
                    Some(reason.clone()),
                ));
            }
            WorkflowEventKind::AssistantMessage { content: _ } => {
                state.current_phase = ConversationPhase::Review;
            }
            WorkflowEventKind::ToolCall { .. } => {}
            WorkflowEventKind::ToolResult {
                tool_name,
                success,
                error,
                ..
            } => {
                if !success {
                    let agent = state.active_agent.clone().unwrap_or_else(|| "loop".into());
                    state.agent_history.push(AgentHistoryEntry::now(
                        agent,
                        "tool_failed",
                        Some(format!(
                            "{tool_name}: {}",
                            error.as_deref().unwrap_or("unknown error")
                        )),
                    ));
                }
            }
            WorkflowEventKind::QuestionAsked {
                question_id,
                question,
                from_agent,
                blocking,
                expires_at,
            } => {
                state.pending_questions.push(PendingQuestion {
                    id: question_id.clone(),
                    question: question.clone(),
                    from_agent: from_agent.clone(),
                    turn_id,
                    blocking: *blocking,
                    expires_at: expires_at.clone(),
                    asked_at: envelope.timestamp.clone(),
                });
                if *blocking {
                    state.current_phase = ConversationPhase::WaitingUser;
                }
            }
            WorkflowEventKind::QuestionAnswered {
                question_id,
                answer,
            } => {
                let removed = state
                    .pending_questions
                    .iter()
                    .position(|q| &q.id == question_id)
                    .map(|idx| state.pending_questions.remove(idx));
                if let Some(question) = removed {
                    if question.blocking {
                        state.current_phase = ConversationPhase::Execution;
                    }
                    // Non-blocking questions track an inbox obligation keyed
                    // by the question's own ID; a direct answer settles it.
                    let _ = obligations::resolve(
                        &mut state.obligations,
                        question_id,
                        ObligationStatus::Satisfied,
                        Some(answer.as_str()),
                    );
                } else {
                    debug!(question_id, "answer for unknown question ignored");
                }
            }
            WorkflowEventKind::ApprovalRequested {
                approval_id,
                description,
                risk_level,
                from_agent,
                expires_at,
                fingerprint,
            } => {
                let duplicate = fingerprint.as_ref().is_some_and(|fp| {
                    state
                        .pending_approvals
                        .iter()
                        .any(|a| a.turn_id == turn_id && a.fingerprint.as_ref() == Some(fp))
                });
                if !duplicate {
                    state.pending_approvals.push(PendingApproval {
                        id: approval_id.clone(),
                        description: description.clone(),
                        risk_level: *risk_level,
                        from_agent: from_agent.clone(),
                        turn_id,
                        expires_at: expires_at.clone(),
                        fingerprint: fingerprint.clone(),
                        requested_at: envelope.timestamp.clone(),
                    });
                }
                state.current_phase = ConversationPhase::WaitingUser;
            }
            WorkflowEventKind::ApprovalDecided {
                approval_id,
                approved: _,
                reason: _,
            } => {
                let removed = state
                    .pending_approvals
                    .iter()
                    .position(|a| &a.id == approval_id)
                    .map(|idx| state.pending_approvals.remove(idx));
                if removed.is_some() {
                    state.current_phase = ConversationPhase::Execution;
                } else {
                    debug!(approval_id, "decision for unknown approval ignored");
                }
            }
            WorkflowEventKind::DelegationDispatched {
                target_agent,
                objective,
                ..
            } => {
                state.agent_history.push(AgentHistoryEntry::now(
                    target_agent,
                    "delegated",
                    Some(objective.clone()),
                ));
            }
            WorkflowEventKind::DelegationCompleted {
                target_agent,
                status,
                summary,
                ..
            } => {
                state.agent_history.push(AgentHistoryEntry::now(
                    target_agent,
                    format!("delegation_{}", serde_variant_name(*status)),
                    Some(summary.clone()),
                ));
            }
            WorkflowEventKind::DelegationFailed {
                target_agent,
                error,
                ..
            } => {
                state.agent_history.push(AgentHistoryEntry::now(
                    target_agent,
                    "delegation_failed",
                    Some(error.clone()),
                ));
            }
            WorkflowEventKind::ObligationOpened {
                obligation_id,
                kind,
                description,
                required_outcome,
                source_agent,
                origin,
                blocking,
            } => {
                let _ = obligations::add_or_reuse(
                    &mut state.obligations,
                    obligation_id,
                    &ObligationSpec {
                        kind: *kind,
                        description: description.clone(),
                        required_outcome: required_outcome.clone(),
                        source_agent: source_agent.clone(),
                        origin: *origin,
                        blocking: *blocking,
                    },
                    Some(turn_id.as_str()),
                );
            }
            WorkflowEventKind::ObligationResolved {
                obligation_id,
                status,
                evidence,
            } => {
                let _ = obligations::resolve(
                    &mut state.obligations,
                    obligation_id,
                    *status,
                    evidence.as_deref(),
                );
            }
            WorkflowEventKind::SelfValidation {
                is_complete,
                confidence,
                feedback,
            } => {
                let agent = state.active_agent.clone().unwrap_or_else(|| "loop".into());
                state.agent_history.push(AgentHistoryEntry::now(
                    agent,
                    "self_validation",
                    Some(format!(
                        "complete={is_complete} confidence={confidence:.2}: {feedback}"
                    )),
                ));
            }
            WorkflowEventKind::LoopExhausted {
                iterations,
                summary,
            } => {
                let agent = state.active_agent.clone().unwrap_or_else(|| "loop".into());
                state.agent_history.push(AgentHistoryEntry::now(
                    agent,
                    "exhausted",
                    Some(format!("{iterations} iterations: {summary}")),
                ));
            }
            WorkflowEventKind::TodoUpdated { todos } => {
                state.todos = todos.clone();
            }
            WorkflowEventKind::ErrorRaised { error, context } => {
                let agent = state.active_agent.clone().unwrap_or_else(|| "loop".into());
                let detail = match context {
                    Some(context) => format!("{context}: {error}"),
                    None => error.clone(),
                };
                state
                    .agent_history
                    .push(AgentHistoryEntry::now(agent, "error", Some(detail)));
            }
        }
    }
}

/// Lowercase wire name of a delegation status, for history actions.
fn serde_variant_name(status: conductor_core::events::DelegationStatus) -> &'static str {
    use conductor_core::events::DelegationStatus;
    match status {
        DelegationStatus::Success => "success",
        DelegationStatus::Partial => "partial",
        DelegationStatus::Failed => "failed",
        DelegationStatus::Escalated => "escalated",
    }
}

#[async_trait]
impl Projection for StateProjection {
    fn name(&self) -> &'static str {
        "conversation-state"
    }

    async fn apply(&self, envelope: &WorkflowEnvelope) -> Result<(), RuntimeError> {
        self.apply_kind(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::events::{ObligationKind, ObligationOrigin, RiskLevel};
    use conductor_core::RequestContext;

    async fn apply(projection: &StateProjection, envelope: WorkflowEnvelope) {
        projection.apply(&envelope).await.unwrap();
    }

    #[tokio::test]
    async fn session_started_creates_state() {
        let projection = StateProjection::new();
        let ctx = RequestContext::new_turn("sess_1");
        apply(&projection, ctx.event(WorkflowEventKind::SessionStarted {})).await;

        let state = projection.state_of("sess_1").unwrap();
        assert_eq!(state.session_id, "sess_1");
        assert_eq!(state.current_phase, ConversationPhase::Idle);
    }

    #[tokio::test]
    async fn turn_and_agent_lifecycle_drive_phase() {
        let projection = StateProjection::new();
        let ctx = RequestContext::new_turn("sess_1");

        apply(
            &projection,
            ctx.event(WorkflowEventKind::TurnStarted {
                turn: 1,
                message: "hello".into(),
            }),
        )
        .await;
        assert_eq!(
            projection.state_of("sess_1").unwrap().current_phase,
            ConversationPhase::Qualification
        );

        apply(
            &projection,
            ctx.event(WorkflowEventKind::AgentStarted {
                agent: "coordinator".into(),
            }),
        )
        .await;
        let state = projection.state_of("sess_1").unwrap();
        assert_eq!(state.current_phase, ConversationPhase::Execution);
        assert_eq!(state.active_agent.as_deref(), Some("coordinator"));

        apply(&projection, ctx.event(WorkflowEventKind::TurnCompleted { turn: 1 })).await;
        let state = projection.state_of("sess_1").unwrap();
        assert_eq!(state.current_phase, ConversationPhase::Idle);
        assert!(state.active_agent.is_none());
    }

    #[tokio::test]
    async fn blocking_question_suspends_and_answer_resumes() {
        let projection = StateProjection::new();
        let ctx = RequestContext::new_turn("sess_1");

        apply(
            &projection,
            ctx.event(WorkflowEventKind::QuestionAsked {
                question_id: "q_1".into(),
                question: "which repo?".into(),
                from_agent: "coordinator".into(),
                blocking: true,
                expires_at: None,
            }),
        )
        .await;
        let state = projection.state_of("sess_1").unwrap();
        assert_eq!(state.current_phase, ConversationPhase::WaitingUser);
        assert_eq!(state.pending_questions.len(), 1);
        assert_eq!(state.pending_questions[0].turn_id, ctx.turn_id);

        apply(
            &projection,
            ctx.event(WorkflowEventKind::QuestionAnswered {
                question_id: "q_1".into(),
                answer: "this one".into(),
            }),
        )
        .await;
        let state = projection.state_of("sess_1").unwrap();
        assert_eq!(state.current_phase, ConversationPhase::Execution);
        assert!(state.pending_questions.is_empty());
    }

    #[tokio::test]
    async fn direct_answer_settles_linked_inbox_obligation() {
        let projection = StateProjection::new();
        let ctx = RequestContext::new_turn("sess_1");

        apply(
            &projection,
            ctx.event(WorkflowEventKind::QuestionAsked {
                question_id: "q_1".into(),
                question: "pick a color".into(),
                from_agent: "coordinator".into(),
                blocking: false,
                expires_at: None,
            }),
        )
        .await;
        apply(
            &projection,
            ctx.event(WorkflowEventKind::ObligationOpened {
                obligation_id: "q_1".into(),
                kind: ObligationKind::UserRequest,
                description: "pick a color".into(),
                required_outcome: None,
                source_agent: "coordinator".into(),
                origin: ObligationOrigin::Inbox,
                blocking: false,
            }),
        )
        .await;
        apply(
            &projection,
            ctx.event(WorkflowEventKind::QuestionAnswered {
                question_id: "q_1".into(),
                answer: "blue".into(),
            }),
        )
        .await;

        let state = projection.state_of("sess_1").unwrap();
        let obligation = &state.obligations[0];
        assert_eq!(obligation.status, ObligationStatus::Satisfied);
        assert_eq!(obligation.evidence, vec!["blue".to_string()]);
    }

    #[tokio::test]
    async fn approval_requests_dedupe_by_fingerprint() {
        let projection = StateProjection::new();
        let ctx = RequestContext::new_turn("sess_1");

        for id in ["appr_1", "appr_2"] {
            apply(
                &projection,
                ctx.event(WorkflowEventKind::ApprovalRequested {
                    approval_id: id.into(),
                    description: "force-push main".into(),
                    risk_level: RiskLevel::High,
                    from_agent: "coordinator".into(),
                    expires_at: None,
                    fingerprint: Some("fp_force_push".into()),
                }),
            )
            .await;
        }

        let state = projection.state_of("sess_1").unwrap();
        assert_eq!(state.pending_approvals.len(), 1);
        assert_eq!(state.pending_approvals[0].id, "appr_1");
        assert_eq!(state.current_phase, ConversationPhase::WaitingUser);
    }

    #[tokio::test]
    async fn obligation_events_flow_through_ledger() {
        let projection = StateProjection::new();
        let ctx = RequestContext::new_turn("sess_1");

        apply(
            &projection,
            ctx.event(WorkflowEventKind::ObligationOpened {
                obligation_id: "obl_1".into(),
                kind: ObligationKind::UserRequest,
                description: "summarize repo".into(),
                required_outcome: None,
                source_agent: "user".into(),
                origin: ObligationOrigin::Primary,
                blocking: true,
            }),
        )
        .await;
        apply(
            &projection,
            ctx.event(WorkflowEventKind::ObligationResolved {
                obligation_id: "obl_1".into(),
                status: ObligationStatus::Satisfied,
                evidence: Some("done".into()),
            }),
        )
        .await;
        // At-least-once delivery: a second resolution is a no-op.
        apply(
            &projection,
            ctx.event(WorkflowEventKind::ObligationResolved {
                obligation_id: "obl_1".into(),
                status: ObligationStatus::Failed,
                evidence: None,
            }),
        )
        .await;

        let state = projection.state_of("sess_1").unwrap();
        assert_eq!(state.obligations.len(), 1);
        assert_eq!(state.obligations[0].status, ObligationStatus::Satisfied);
    }

    #[tokio::test]
    async fn todo_updates_replace_the_working_plan() {
        use conductor_core::events::{TodoItem, TodoStatus};

        let projection = StateProjection::new();
        let ctx = RequestContext::new_turn("sess_1");

        apply(
            &projection,
            ctx.event(WorkflowEventKind::TodoUpdated {
                todos: vec![
                    TodoItem {
                        id: "t1".into(),
                        title: "scan files".into(),
                        status: TodoStatus::Completed,
                    },
                    TodoItem {
                        id: "t2".into(),
                        title: "write summary".into(),
                        status: TodoStatus::InProgress,
                    },
                ],
            }),
        )
        .await;
        apply(
            &projection,
            ctx.event(WorkflowEventKind::TodoUpdated {
                todos: vec![TodoItem {
                    id: "t2".into(),
                    title: "write summary".into(),
                    status: TodoStatus::Completed,
                }],
            }),
        )
        .await;

        let state = projection.state_of("sess_1").unwrap();
        assert_eq!(state.todos.len(), 1);
        assert_eq!(state.todos[0].status, TodoStatus::Completed);
    }

    #[tokio::test]
    async fn history_records_escalation_and_failures() {
        let projection = StateProjection::new();
        let ctx = RequestContext::new_turn("sess_1");

        apply(
            &projection,
            ctx.event(WorkflowEventKind::AgentEscalated {
                from_agent: "researcher".into(),
                reason: "needs guidance".into(),
            }),
        )
        .await;
        apply(
            &projection,
            ctx.event(WorkflowEventKind::ToolResult {
                tool_call_id: "tc_1".into(),
                tool_name: "fs_read".into(),
                success: false,
                output: None,
                error: Some("not found".into()),
                duration_ms: 2,
            }),
        )
        .await;

        let state = projection.state_of("sess_1").unwrap();
        let actions: Vec<&str> = state.agent_history.iter().map(|h| h.action.as_str()).collect();
        assert_eq!(actions, vec!["escalated", "tool_failed"]);
    }
}
