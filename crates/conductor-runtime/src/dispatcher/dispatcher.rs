//! [`Dispatcher`] — the external-facing entry point.
//!
//! Maps transport-neutral commands onto session resolution, loop invocation,
//! event emission, and turn persistence. Command handling is serialized per
//! session (one async mutex per session entry); distinct sessions proceed
//! fully concurrently.
//!
//! Gate answers are matched against the active turn: a stale or mismatched
//! answer is never dropped or misapplied — it is reclassified as a brand-new
//! `user_request`. A new request arriving while the turn is suspended on a
//! blocking gate is rejected with a typed outcome; it never silently cancels
//! the pending gate.

use std::sync::Arc;

use chrono::Utc;
use conductor_core::collab::{NotificationSink, TurnPersister};
use conductor_core::events::{ObligationStatus, WorkflowEventKind};
use conductor_core::{ids, EventSource, RequestContext};
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::agent::{DecisionLoop, TurnReport, TurnStatus};
use crate::bus::WorkflowBus;
use crate::dispatcher::commands::{DispatchOutcome, HelloAck, InboundCommand};
use crate::dispatcher::replay::{BroadcastProjection, SequencedEnvelope};
use crate::gates::{GateManager, GateMatch};
use crate::obligations::{self, matcher::match_inbox_obligations, ResponseMatcher};
use crate::state::StateProjection;

/// Which gate a suspended turn is waiting on.
#[derive(Clone, Debug, PartialEq, Eq)]
enum WaitingGate {
    Question(String),
    Approval(String),
}

impl WaitingGate {
    fn describe(&self) -> String {
        match self {
            Self::Question(id) => format!("question {id}"),
            Self::Approval(id) => format!("approval {id}"),
        }
    }
}

/// The turn currently owned by a session, if any.
#[derive(Clone, Debug)]
struct ActiveTurn {
    turn_id: String,
    turn: u32,
    request: String,
    waiting_gate: Option<WaitingGate>,
}

/// Per-session dispatch bookkeeping, guarded by the session mutex.
#[derive(Default)]
struct SessionCell {
    turn_counter: u32,
    active: Option<ActiveTurn>,
}

/// One session's entry in the registry.
#[derive(Default)]
struct SessionEntry {
    cell: Mutex<SessionCell>,
}

/// Command dispatcher and session/replay registry.
pub struct Dispatcher {
    bus: Arc<WorkflowBus>,
    state: Arc<StateProjection>,
    broadcast: Arc<BroadcastProjection>,
    decision_loop: Arc<DecisionLoop>,
    gates: GateManager,
    matcher: Arc<dyn ResponseMatcher>,
    persister: Arc<dyn TurnPersister>,
    notifier: Arc<dyn NotificationSink>,
    sessions: DashMap<String, Arc<SessionEntry>>,
}

impl Dispatcher {
    /// Wire up a dispatcher over an already-registered projection pipeline.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        bus: Arc<WorkflowBus>,
        state: Arc<StateProjection>,
        broadcast: Arc<BroadcastProjection>,
        decision_loop: Arc<DecisionLoop>,
        gates: GateManager,
        matcher: Arc<dyn ResponseMatcher>,
        persister: Arc<dyn TurnPersister>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            bus,
            state,
            broadcast,
            decision_loop,
            gates,
            matcher,
            persister,
            notifier,
            sessions: DashMap::new(),
        }
    }

    /// Handle one inbound command to a typed outcome.
    #[instrument(skip(self, command))]
    pub async fn dispatch(&self, command: InboundCommand) -> DispatchOutcome {
        counter!("commands_total").increment(1);
        match command {
            InboundCommand::UserRequest {
                session_id,
                request_id,
                message,
                metadata: _,
            } => self.handle_user_request(session_id, request_id, message).await,
            InboundCommand::UserQuestionAnswered {
                session_id,
                request_id,
                question_id,
                answer,
            } => {
                self.handle_question_answered(session_id, request_id, question_id, answer)
                    .await
            }
            InboundCommand::UserApprovalDecided {
                session_id,
                request_id,
                approval_id,
                approved,
            } => {
                self.handle_approval_decided(session_id, request_id, approval_id, approved, None)
                    .await
            }
            InboundCommand::UserPlanApprovalDecided {
                session_id,
                request_id,
                plan_id,
                approved,
                reason,
            } => {
                self.handle_approval_decided(session_id, request_id, plan_id, approved, reason)
                    .await
            }
        }
    }

    /// Reconnect snapshot for a session.
    #[must_use]
    pub fn hello_ack(&self, session_id: &str) -> HelloAck {
        let state = self.state.state_of(session_id);
        let (pending_approvals, pending_questions, pending_actions) = match state {
            Some(state) => {
                let actions = obligations::unresolved(&state.obligations, None, false)
                    .into_iter()
                    .map(|o| o.description.clone())
                    .collect();
                (state.pending_approvals, state.pending_questions, actions)
            }
            None => (Vec::new(), Vec::new(), Vec::new()),
        };
        HelloAck {
            current_seq: self.broadcast.current_seq(session_id),
            pending_approvals,
            pending_questions,
            pending_actions,
        }
    }

    /// Replay buffered envelopes with `seq > after_seq`.
    #[must_use]
    pub fn events_since(&self, session_id: &str, after_seq: u64) -> Vec<SequencedEnvelope> {
        self.broadcast.events_since(session_id, after_seq)
    }

    /// Number of sessions this dispatcher has seen.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn session_entry(&self, session_id: &str) -> (Arc<SessionEntry>, bool) {
        let mut created = false;
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(SessionEntry::default())
            })
            .clone();
        if created {
            #[allow(clippy::cast_precision_loss)]
            gauge!("sessions_tracked").set(self.sessions.len() as f64);
        }
        (entry, created)
    }

    // ── user_request ──────────────────────────────────────────────────

    async fn handle_user_request(
        &self,
        session_id: String,
        request_id: String,
        message: String,
    ) -> DispatchOutcome {
        let (entry, created) = self.session_entry(&session_id);
        let mut cell = entry.cell.lock().await;

        // A pending blocking gate is never silently cancelled by new input.
        if let Some(active) = &cell.active {
            if let Some(gate) = &active.waiting_gate {
                warn!(session_id, gate = %gate.describe(), "request rejected: blocking gate outstanding");
                return DispatchOutcome {
                    status: TurnStatus::Error,
                    session_id,
                    request_id,
                    turn_id: Some(active.turn_id.clone()),
                    message: format!(
                        "This session is waiting for your input on {}. Answer it (or let it expire) before sending a new request.",
                        gate.describe()
                    ),
                    answer: None,
                };
            }
        }

        cell.turn_counter += 1;
        let turn = cell.turn_counter;
        let ctx = RequestContext {
            session_id: session_id.clone(),
            request_id: request_id.clone(),
            turn_id: ids::new_turn_id(),
        };

        if created {
            let _ = self
                .bus
                .emit(&ctx.event(WorkflowEventKind::SessionStarted {}).internal())
                .await;
            info!(session_id, "session created");
        }

        // Free-text replies may settle open inbox obligations from earlier
        // non-blocking questions before the new turn begins.
        if let Some(state) = self.state.state_of(&session_id) {
            for (obligation_id, evidence) in
                match_inbox_obligations(&state.obligations, &message, self.matcher.as_ref())
            {
                let _ = self
                    .bus
                    .emit(
                        &ctx.event(WorkflowEventKind::ObligationResolved {
                            obligation_id,
                            status: ObligationStatus::Satisfied,
                            evidence: Some(evidence),
                        })
                        .internal(),
                    )
                    .await;
            }
        }

        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::TurnStarted {
                    turn,
                    message: message.clone(),
                })
                .internal(),
            )
            .await;
        cell.active = Some(ActiveTurn {
            turn_id: ctx.turn_id.clone(),
            turn,
            request: message.clone(),
            waiting_gate: None,
        });

        let report = self.decision_loop.run_turn(&ctx, &message, vec![]).await;
        self.finish_turn(&mut cell, &ctx, turn, report).await
    }

    // ── user_question_answered ────────────────────────────────────────

    async fn handle_question_answered(
        &self,
        session_id: String,
        request_id: String,
        question_id: String,
        answer: String,
    ) -> DispatchOutcome {
        let (entry, _) = self.session_entry(&session_id);
        let mut cell = entry.cell.lock().await;

        let Some(active) = cell.active.clone() else {
            drop(cell);
            return self
                .reclassify_as_request(session_id, answer, "no active turn")
                .await;
        };

        match self
            .gates
            .match_question(&session_id, &active.turn_id, &question_id, Utc::now())
        {
            GateMatch::Question(question) => {
                let ctx = RequestContext {
                    session_id: session_id.clone(),
                    request_id: request_id.clone(),
                    turn_id: active.turn_id.clone(),
                };
                let _ = self
                    .bus
                    .emit(
                        &ctx.event(WorkflowEventKind::QuestionAnswered {
                            question_id: question_id.clone(),
                            answer: answer.clone(),
                        })
                        .from_source(EventSource::Gate),
                    )
                    .await;

                let was_waiting = matches!(
                    &active.waiting_gate,
                    Some(WaitingGate::Question(id)) if *id == question_id
                );
                if question.blocking && was_waiting {
                    // Resumption: a fresh loop invocation carrying the same
                    // turn, with the answer as its opening context.
                    if let Some(active) = cell.active.as_mut() {
                        active.waiting_gate = None;
                    }
                    let note = format!(
                        "The user answered \"{}\" with: {answer}",
                        question.question
                    );
                    let report = self
                        .decision_loop
                        .run_turn(&ctx, &active.request, vec![note])
                        .await;
                    return self.finish_turn(&mut cell, &ctx, active.turn, report).await;
                }

                // Non-blocking answer: recorded, obligation settled by the
                // state projection; no loop re-entry.
                DispatchOutcome {
                    status: TurnStatus::Completed,
                    session_id,
                    request_id,
                    turn_id: Some(active.turn_id),
                    message: "Answer recorded.".into(),
                    answer: None,
                }
            }
            GateMatch::Stale { reason } => {
                drop(cell);
                self.reclassify_as_request(session_id, answer, &reason).await
            }
            GateMatch::Approval(_) => {
                drop(cell);
                self.reclassify_as_request(session_id, answer, "gate mismatch")
                    .await
            }
        }
    }

    // ── user_approval_decided / user_plan_approval_decided ────────────

    async fn handle_approval_decided(
        &self,
        session_id: String,
        request_id: String,
        approval_id: String,
        approved: bool,
        reason: Option<String>,
    ) -> DispatchOutcome {
        let decision_text = if approved {
            "approved".to_string()
        } else {
            match &reason {
                Some(reason) => format!("rejected: {reason}"),
                None => "rejected".to_string(),
            }
        };

        let (entry, _) = self.session_entry(&session_id);
        let mut cell = entry.cell.lock().await;

        let Some(active) = cell.active.clone() else {
            drop(cell);
            return self
                .reclassify_as_request(session_id, decision_text, "no active turn")
                .await;
        };

        match self
            .gates
            .match_approval(&session_id, &active.turn_id, &approval_id, Utc::now())
        {
            GateMatch::Approval(approval) => {
                let ctx = RequestContext {
                    session_id: session_id.clone(),
                    request_id: request_id.clone(),
                    turn_id: active.turn_id.clone(),
                };
                let _ = self
                    .bus
                    .emit(
                        &ctx.event(WorkflowEventKind::ApprovalDecided {
                            approval_id: approval_id.clone(),
                            approved,
                            reason: reason.clone(),
                        })
                        .from_source(EventSource::Gate),
                    )
                    .await;

                let was_waiting = matches!(
                    &active.waiting_gate,
                    Some(WaitingGate::Approval(id)) if *id == approval_id
                );
                if was_waiting {
                    if let Some(active) = cell.active.as_mut() {
                        active.waiting_gate = None;
                    }
                    let note = if approved {
                        format!("The user approved: {}", approval.description)
                    } else {
                        format!(
                            "The user rejected \"{}\"{}",
                            approval.description,
                            reason
                                .map(|r| format!(" because: {r}"))
                                .unwrap_or_default()
                        )
                    };
                    let report = self
                        .decision_loop
                        .run_turn(&ctx, &active.request, vec![note])
                        .await;
                    return self.finish_turn(&mut cell, &ctx, active.turn, report).await;
                }

                DispatchOutcome {
                    status: TurnStatus::Completed,
                    session_id,
                    request_id,
                    turn_id: Some(active.turn_id),
                    message: "Decision recorded.".into(),
                    answer: None,
                }
            }
            GateMatch::Stale { reason: stale_reason } => {
                drop(cell);
                self.reclassify_as_request(session_id, decision_text, &stale_reason)
                    .await
            }
            GateMatch::Question(_) => {
                drop(cell);
                self.reclassify_as_request(session_id, decision_text, "gate mismatch")
                    .await
            }
        }
    }

    // ── Shared tails ──────────────────────────────────────────────────

    /// Stale/mismatched gate input becomes a brand-new request.
    async fn reclassify_as_request(
        &self,
        session_id: String,
        message: String,
        reason: &str,
    ) -> DispatchOutcome {
        counter!("gate_answers_reclassified_total").increment(1);
        info!(session_id, reason, "gate answer reclassified as new request");
        self.handle_user_request(session_id, ids::new_request_id(), message)
            .await
    }

    /// Record the turn's terminal state, persist, notify, and build the
    /// outcome. Persistence/notification failures are logged, never
    /// propagated as turn failures.
    async fn finish_turn(
        &self,
        cell: &mut SessionCell,
        ctx: &RequestContext,
        turn: u32,
        report: TurnReport,
    ) -> DispatchOutcome {
        match report.status {
            TurnStatus::Completed => {
                let _ = self
                    .bus
                    .emit(&ctx.event(WorkflowEventKind::TurnCompleted { turn }).internal())
                    .await;
                cell.active = None;
            }
            TurnStatus::WaitingForUser => {
                let gate_id = report.waiting_on.clone().unwrap_or_default();
                let gate = if gate_id.starts_with("appr_") {
                    WaitingGate::Approval(gate_id)
                } else {
                    WaitingGate::Question(gate_id)
                };
                if let Some(active) = cell.active.as_mut() {
                    active.waiting_gate = Some(gate);
                }
            }
            TurnStatus::Error => {
                let _ = self
                    .bus
                    .emit(
                        &ctx.event(WorkflowEventKind::TurnFailed {
                            turn,
                            error: report.message.clone(),
                        })
                        .internal(),
                    )
                    .await;
                cell.active = None;
            }
        }

        if let Err(error) = self
            .persister
            .persist_turn(&ctx.session_id, &ctx.turn_id, &report.message)
            .await
        {
            warn!(session_id = %ctx.session_id, %error, "turn persistence failed; continuing");
        }
        self.notifier.notify(&ctx.session_id, &report.message).await;

        DispatchOutcome {
            status: report.status,
            session_id: ctx.session_id.clone(),
            request_id: ctx.request_id.clone(),
            turn_id: Some(ctx.turn_id.clone()),
            message: report.message,
            answer: report.answer,
        }
    }
}
