//! [`GateManager`] — asks question/approval gates and matches inbound
//! answers against them.
//!
//! Per-turn state machines: `question_pending → answered | expired` and,
//! independently, `approval_pending → approved | rejected`. At most one
//! *blocking* gate may be outstanding per turn; non-blocking questions
//! coexist with ongoing work. Matching an inbound answer requires `turn_id`
//! equality and an unexpired gate — anything else is reported as
//! [`GateMatch::Stale`] so the dispatcher can reclassify the input as a new
//! request instead of silently discarding it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_core::events::{ObligationKind, ObligationOrigin, RiskLevel, WorkflowEventKind};
use conductor_core::{ids, EventSource, RequestContext};
use tracing::{debug, instrument};

use crate::bus::WorkflowBus;
use crate::errors::RuntimeError;
use crate::gates::{is_expired, PendingApproval, PendingQuestion};
use crate::state::StateProjection;

/// Result of matching an inbound answer to a pending gate.
#[derive(Clone, Debug)]
pub enum GateMatch {
    /// Answer matches this pending question.
    Question(PendingQuestion),
    /// Decision matches this pending approval.
    Approval(PendingApproval),
    /// No live gate matched; the input should be treated as a new request.
    Stale {
        /// Why the match failed (unknown gate, wrong turn, expired).
        reason: String,
    },
}

/// Asks gates through the bus and matches answers against projected state.
#[derive(Clone)]
pub struct GateManager {
    bus: Arc<WorkflowBus>,
    state: Arc<StateProjection>,
}

impl GateManager {
    /// Create a gate manager over the shared bus and state projection.
    #[must_use]
    pub fn new(bus: Arc<WorkflowBus>, state: Arc<StateProjection>) -> Self {
        Self { bus, state }
    }

    /// Whether the turn already has a blocking gate outstanding.
    fn has_blocking_gate(&self, session_id: &str, turn_id: &str) -> bool {
        let Some(state) = self.state.state_of(session_id) else {
            return false;
        };
        state
            .pending_questions
            .iter()
            .any(|q| q.blocking && q.turn_id == turn_id)
            || state.pending_approvals.iter().any(|a| a.turn_id == turn_id)
    }

    /// Surface a question to the user.
    ///
    /// A blocking question suspends the turn (the caller returns
    /// `waiting_for_user`); a non-blocking one also opens an inbox-origin
    /// obligation keyed by the question ID so a later free-text reply can
    /// settle it.
    #[instrument(skip(self, ctx, question), fields(session_id = %ctx.session_id, turn_id = %ctx.turn_id))]
    pub async fn ask_question(
        &self,
        ctx: &RequestContext,
        from_agent: &str,
        question: &str,
        blocking: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String, RuntimeError> {
        if blocking && self.has_blocking_gate(&ctx.session_id, &ctx.turn_id) {
            return Err(RuntimeError::BlockingGateOutstanding {
                turn_id: ctx.turn_id.clone(),
            });
        }

        let question_id = ids::new_question_id();
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::QuestionAsked {
                    question_id: question_id.clone(),
                    question: question.to_string(),
                    from_agent: from_agent.to_string(),
                    blocking,
                    expires_at: expires_at.map(|t| t.to_rfc3339()),
                })
                .from_source(EventSource::Gate),
            )
            .await;

        if !blocking {
            let _ = self
                .bus
                .emit(
                    &ctx.event(WorkflowEventKind::ObligationOpened {
                        obligation_id: question_id.clone(),
                        kind: ObligationKind::UserRequest,
                        description: question.to_string(),
                        required_outcome: None,
                        source_agent: from_agent.to_string(),
                        origin: ObligationOrigin::Inbox,
                        blocking: false,
                    })
                    .from_source(EventSource::Gate)
                    .internal(),
                )
                .await;
        }

        debug!(question_id, blocking, "question surfaced");
        Ok(question_id)
    }

    /// Request a boolean approval. Always blocking.
    ///
    /// An identical `fingerprint` within the same turn reuses the existing
    /// gate (the state projection drops the duplicate record).
    #[instrument(skip(self, ctx, description), fields(session_id = %ctx.session_id, turn_id = %ctx.turn_id))]
    pub async fn request_approval(
        &self,
        ctx: &RequestContext,
        from_agent: &str,
        description: &str,
        risk_level: RiskLevel,
        expires_at: Option<DateTime<Utc>>,
        fingerprint: Option<String>,
    ) -> Result<String, RuntimeError> {
        if self.has_blocking_gate(&ctx.session_id, &ctx.turn_id) {
            return Err(RuntimeError::BlockingGateOutstanding {
                turn_id: ctx.turn_id.clone(),
            });
        }

        let approval_id = ids::new_approval_id();
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::ApprovalRequested {
                    approval_id: approval_id.clone(),
                    description: description.to_string(),
                    risk_level,
                    from_agent: from_agent.to_string(),
                    expires_at: expires_at.map(|t| t.to_rfc3339()),
                    fingerprint,
                })
                .from_source(EventSource::Gate),
            )
            .await;

        debug!(approval_id, "approval requested");
        Ok(approval_id)
    }

    /// Match an inbound answer to a pending question.
    ///
    /// Accepted only when the gate exists, belongs to `active_turn_id`, and
    /// has not expired.
    #[must_use]
    pub fn match_question(
        &self,
        session_id: &str,
        active_turn_id: &str,
        question_id: &str,
        now: DateTime<Utc>,
    ) -> GateMatch {
        let Some(state) = self.state.state_of(session_id) else {
            return GateMatch::Stale {
                reason: format!("no state for session {session_id}"),
            };
        };
        let Some(question) = state.pending_questions.iter().find(|q| q.id == question_id) else {
            return GateMatch::Stale {
                reason: format!("no pending question {question_id}"),
            };
        };
        if question.turn_id != active_turn_id {
            return GateMatch::Stale {
                reason: format!(
                    "question {question_id} belongs to turn {}, not the active turn",
                    question.turn_id
                ),
            };
        }
        if is_expired(question.expires_at.as_deref(), now) {
            return GateMatch::Stale {
                reason: format!("question {question_id} expired"),
            };
        }
        GateMatch::Question(question.clone())
    }

    /// Match an inbound decision to a pending approval. Same acceptance
    /// rules as [`match_question`](Self::match_question).
    #[must_use]
    pub fn match_approval(
        &self,
        session_id: &str,
        active_turn_id: &str,
        approval_id: &str,
        now: DateTime<Utc>,
    ) -> GateMatch {
        let Some(state) = self.state.state_of(session_id) else {
            return GateMatch::Stale {
                reason: format!("no state for session {session_id}"),
            };
        };
        let Some(approval) = state.pending_approvals.iter().find(|a| a.id == approval_id) else {
            return GateMatch::Stale {
                reason: format!("no pending approval {approval_id}"),
            };
        };
        if approval.turn_id != active_turn_id {
            return GateMatch::Stale {
                reason: format!(
                    "approval {approval_id} belongs to turn {}, not the active turn",
                    approval.turn_id
                ),
            };
        }
        if is_expired(approval.expires_at.as_deref(), now) {
            return GateMatch::Stale {
                reason: format!("approval {approval_id} expired"),
            };
        }
        GateMatch::Approval(approval.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use conductor_core::events::ObligationStatus;

    fn harness() -> (GateManager, Arc<StateProjection>, Arc<WorkflowBus>) {
        let bus = Arc::new(WorkflowBus::new());
        let state = Arc::new(StateProjection::new());
        bus.register(Arc::clone(&state) as Arc<dyn crate::bus::Projection>);
        let manager = GateManager::new(Arc::clone(&bus), Arc::clone(&state));
        (manager, state, bus)
    }

    #[tokio::test]
    async fn blocking_question_suspends_turn() {
        let (manager, state, _bus) = harness();
        let ctx = RequestContext::new_turn("sess_1");

        let qid = manager
            .ask_question(&ctx, "coordinator", "which repo?", true, None)
            .await
            .unwrap();

        let snapshot = state.state_of("sess_1").unwrap();
        assert_eq!(snapshot.pending_questions.len(), 1);
        assert_eq!(snapshot.pending_questions[0].id, qid);
        assert_eq!(
            snapshot.current_phase,
            crate::state::ConversationPhase::WaitingUser
        );
    }

    #[tokio::test]
    async fn at_most_one_blocking_gate_per_turn() {
        let (manager, _state, _bus) = harness();
        let ctx = RequestContext::new_turn("sess_1");

        let _ = manager
            .ask_question(&ctx, "coordinator", "first?", true, None)
            .await
            .unwrap();
        let err = manager
            .ask_question(&ctx, "coordinator", "second?", true, None)
            .await
            .unwrap_err();
        assert_matches!(err, RuntimeError::BlockingGateOutstanding { .. });

        let err = manager
            .request_approval(&ctx, "coordinator", "deploy", RiskLevel::High, None, None)
            .await
            .unwrap_err();
        assert_matches!(err, RuntimeError::BlockingGateOutstanding { .. });
    }

    #[tokio::test]
    async fn non_blocking_questions_coexist_and_open_inbox_obligations() {
        let (manager, state, _bus) = harness();
        let ctx = RequestContext::new_turn("sess_1");

        let q1 = manager
            .ask_question(&ctx, "coordinator", "preferred color?", false, None)
            .await
            .unwrap();
        let _q2 = manager
            .ask_question(&ctx, "coordinator", "preferred font?", false, None)
            .await
            .unwrap();

        let snapshot = state.state_of("sess_1").unwrap();
        assert_eq!(snapshot.pending_questions.len(), 2);
        assert_ne!(
            snapshot.current_phase,
            crate::state::ConversationPhase::WaitingUser
        );
        let obligation = snapshot
            .obligations
            .iter()
            .find(|o| o.obligation_id == q1)
            .unwrap();
        assert_eq!(obligation.status, ObligationStatus::Open);
        assert!(!obligation.blocking);
    }

    #[tokio::test]
    async fn match_requires_turn_equality() {
        let (manager, _state, _bus) = harness();
        let ctx = RequestContext::new_turn("sess_1");
        let qid = manager
            .ask_question(&ctx, "coordinator", "which repo?", true, None)
            .await
            .unwrap();

        assert_matches!(
            manager.match_question("sess_1", &ctx.turn_id, &qid, Utc::now()),
            GateMatch::Question(_)
        );
        assert_matches!(
            manager.match_question("sess_1", "turn_other", &qid, Utc::now()),
            GateMatch::Stale { .. }
        );
    }

    #[tokio::test]
    async fn match_rejects_expired_gates() {
        let (manager, _state, _bus) = harness();
        let ctx = RequestContext::new_turn("sess_1");
        let expiry = Utc::now() + Duration::seconds(30);
        let qid = manager
            .ask_question(&ctx, "coordinator", "which repo?", true, Some(expiry))
            .await
            .unwrap();

        assert_matches!(
            manager.match_question("sess_1", &ctx.turn_id, &qid, Utc::now()),
            GateMatch::Question(_)
        );
        let after_expiry = expiry + Duration::seconds(1);
        assert_matches!(
            manager.match_question("sess_1", &ctx.turn_id, &qid, after_expiry),
            GateMatch::Stale { .. }
        );
    }

    #[tokio::test]
    async fn match_unknown_gate_is_stale() {
        let (manager, _state, _bus) = harness();
        let ctx = RequestContext::new_turn("sess_1");
        assert_matches!(
            manager.match_question("sess_1", &ctx.turn_id, "q_missing", Utc::now()),
            GateMatch::Stale { .. }
        );
        assert_matches!(
            manager.match_approval("sess_1", &ctx.turn_id, "appr_missing", Utc::now()),
            GateMatch::Stale { .. }
        );
    }

    #[tokio::test]
    async fn approval_match_round_trip() {
        let (manager, _state, _bus) = harness();
        let ctx = RequestContext::new_turn("sess_1");
        let aid = manager
            .request_approval(
                &ctx,
                "coordinator",
                "force-push main",
                RiskLevel::High,
                None,
                Some("fp_1".into()),
            )
            .await
            .unwrap();

        let matched = manager.match_approval("sess_1", &ctx.turn_id, &aid, Utc::now());
        assert_matches!(matched, GateMatch::Approval(a) if a.description == "force-push main");
    }
}
