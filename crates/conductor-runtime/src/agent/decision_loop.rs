//! [`DecisionLoop`] — the bounded per-turn iteration state machine.
//!
//! Each iteration asks the decision engine for an intent and executes it:
//! tool calls, clarifying questions (blocking questions suspend the turn),
//! delegation (sequential or parallel, with escalation detours), or a final
//! answer (optionally self-validated). Every iteration records a
//! [`StepRecord`] regardless of success; when the iteration ceiling is
//! reached the loop emits a deterministic exhaustion summary built from that
//! history and completes the turn with it.
//!
//! Failure handling follows one rule: nothing escapes as a raw error. A
//! failed planning step becomes synthetic context for the next iteration, a
//! failed tool or delegation is isolated to its step/obligation, and the
//! ceiling is the only backstop — the core never retries on its own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use conductor_core::collab::{ToolExecutor, ToolOutcome};
use conductor_core::events::{ObligationOrigin, ObligationStatus, WorkflowEventKind};
use conductor_core::text::excerpt;
use conductor_core::{ids, CollabError, EventSource, RequestContext};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::agent::decision::{Decision, DecisionEngine, TurnContext};
use crate::agent::registry::AgentRegistry;
use crate::agent::validation::{SelfValidator, ValidationVerdict};
use crate::bus::WorkflowBus;
use crate::delegation::{DelegationRunner, DelegationSpec};
use crate::errors::RuntimeError;
use crate::gates::GateManager;
use crate::obligations;
use crate::state::StateProjection;

/// Maximum characters of tool/delegation output carried into working notes.
const NOTE_CHARS: usize = 400;

/// Maximum characters recorded per step input/output.
const STEP_CHARS: usize = 400;

/// Loop tuning knobs.
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Hard iteration ceiling per turn.
    pub max_iterations: u32,
    /// Deadline for one decision-engine call.
    pub decision_timeout: Duration,
    /// Deadline for one tool execution.
    pub tool_timeout: Duration,
    /// Below this reviewer confidence, an incomplete verdict loops again.
    pub validation_confidence_floor: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            decision_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
            validation_confidence_floor: 0.6,
        }
    }
}

/// Typed terminal status of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Turn produced a final answer (including exhaustion summaries).
    Completed,
    /// Turn is suspended on a blocking gate.
    WaitingForUser,
    /// Turn could not be handled.
    Error,
}

/// One recorded loop iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Iteration index (0-based).
    pub index: u32,
    /// Intent executed (`tool_call`, `clarify`, `answer`, ...).
    pub intent: String,
    /// Agent that decided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Tool name, for tool steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Step input excerpt.
    pub input: String,
    /// Step output excerpt.
    pub output: String,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Error, when the step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one `run_turn` invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnReport {
    /// Terminal status.
    pub status: TurnStatus,
    /// Final answer, when completed.
    pub answer: Option<String>,
    /// Gate ID the turn is suspended on, when waiting.
    pub waiting_on: Option<String>,
    /// User-displayable outcome message.
    pub message: String,
    /// Full step history.
    pub steps: Vec<StepRecord>,
}

/// The agent decision loop.
pub struct DecisionLoop {
    config: LoopConfig,
    registry: Arc<AgentRegistry>,
    engine: Arc<dyn DecisionEngine>,
    tools: Arc<dyn ToolExecutor>,
    validator: Option<Arc<dyn SelfValidator>>,
    delegations: DelegationRunner,
    gates: GateManager,
    bus: Arc<WorkflowBus>,
    state: Arc<StateProjection>,
}

impl DecisionLoop {
    /// Wire up a loop. `validator` is optional — without it, answers are
    /// accepted as-is.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: LoopConfig,
        registry: Arc<AgentRegistry>,
        engine: Arc<dyn DecisionEngine>,
        tools: Arc<dyn ToolExecutor>,
        validator: Option<Arc<dyn SelfValidator>>,
        delegations: DelegationRunner,
        gates: GateManager,
        bus: Arc<WorkflowBus>,
        state: Arc<StateProjection>,
    ) -> Self {
        Self {
            config,
            registry,
            engine,
            tools,
            validator,
            delegations,
            gates,
            bus,
            state,
        }
    }

    /// Run (or resume) one turn to a terminal report.
    ///
    /// Resumption is a fresh invocation carrying the same `turn_id` in `ctx`
    /// plus `resume_notes` describing what unblocked it (e.g. the user's
    /// answer to a blocking question).
    #[instrument(skip(self, ctx, request, resume_notes), fields(session_id = %ctx.session_id, turn_id = %ctx.turn_id))]
    pub async fn run_turn(
        &self,
        ctx: &RequestContext,
        request: &str,
        resume_notes: Vec<String>,
    ) -> TurnReport {
        let turn_started = Instant::now();
        let mut active_agent = self.registry.coordinator().name.clone();
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::AgentStarted {
                    agent: active_agent.clone(),
                })
                .from_source(EventSource::Loop)
                .internal(),
            )
            .await;

        let primary_obligation = self.open_primary_obligation(ctx, request).await;
        let mut steps: Vec<StepRecord> = Vec::new();
        let mut notes = resume_notes;

        for index in 0..self.config.max_iterations {
            let turn_ctx = TurnContext {
                session_id: ctx.session_id.clone(),
                turn_id: ctx.turn_id.clone(),
                active_agent: active_agent.clone(),
                request: request.to_string(),
                notes: notes.clone(),
            };
            let step_started = Instant::now();

            let decision = match self.decide(&turn_ctx).await {
                Ok(decision) => decision,
                Err(error) => {
                    // Decision failure: synthetic error event + next-iteration
                    // context, never a crash.
                    let _ = self
                        .bus
                        .emit(
                            &ctx.event(WorkflowEventKind::ErrorRaised {
                                error: error.to_string(),
                                context: Some("decision".into()),
                            })
                            .from_source(EventSource::Loop)
                            .internal(),
                        )
                        .await;
                    steps.push(StepRecord {
                        index,
                        intent: "decide".into(),
                        agent: Some(active_agent.clone()),
                        tool_name: None,
                        input: excerpt(request, STEP_CHARS),
                        output: String::new(),
                        duration_ms: elapsed_ms(step_started),
                        error: Some(error.to_string()),
                    });
                    notes.push(format!(
                        "The previous planning step failed: {error}. Adjust and continue."
                    ));
                    continue;
                }
            };

            match decision {
                Decision::Continue { note } => {
                    steps.push(StepRecord {
                        index,
                        intent: "continue".into(),
                        agent: Some(active_agent.clone()),
                        tool_name: None,
                        input: String::new(),
                        output: note.clone().unwrap_or_default(),
                        duration_ms: elapsed_ms(step_started),
                        error: None,
                    });
                    if let Some(note) = note {
                        notes.push(note);
                    }
                }

                Decision::ToolCall {
                    tool_name,
                    arguments,
                } => {
                    let (record, note) = self
                        .execute_tool(ctx, index, &active_agent, &tool_name, &arguments, step_started)
                        .await;
                    steps.push(record);
                    notes.push(note);
                }

                Decision::Clarify { question, blocking } => {
                    match self
                        .gates
                        .ask_question(ctx, &active_agent, &question, blocking, None)
                        .await
                    {
                        Ok(question_id) if blocking => {
                            steps.push(StepRecord {
                                index,
                                intent: "clarify".into(),
                                agent: Some(active_agent.clone()),
                                tool_name: None,
                                input: excerpt(&question, STEP_CHARS),
                                output: question_id.clone(),
                                duration_ms: elapsed_ms(step_started),
                                error: None,
                            });
                            info!(question_id, "turn suspended on blocking question");
                            return TurnReport {
                                status: TurnStatus::WaitingForUser,
                                answer: None,
                                waiting_on: Some(question_id),
                                message: question,
                                steps,
                            };
                        }
                        Ok(question_id) => {
                            steps.push(StepRecord {
                                index,
                                intent: "clarify".into(),
                                agent: Some(active_agent.clone()),
                                tool_name: None,
                                input: excerpt(&question, STEP_CHARS),
                                output: question_id,
                                duration_ms: elapsed_ms(step_started),
                                error: None,
                            });
                            notes.push(format!("Asked the user (non-blocking): {question}"));
                        }
                        Err(error) => {
                            steps.push(StepRecord {
                                index,
                                intent: "clarify".into(),
                                agent: Some(active_agent.clone()),
                                tool_name: None,
                                input: excerpt(&question, STEP_CHARS),
                                output: String::new(),
                                duration_ms: elapsed_ms(step_started),
                                error: Some(error.to_string()),
                            });
                            notes.push(format!("Could not surface the question: {error}"));
                        }
                    }
                }

                Decision::RequestApproval {
                    description,
                    risk_level,
                } => {
                    match self
                        .gates
                        .request_approval(ctx, &active_agent, &description, risk_level, None, None)
                        .await
                    {
                        Ok(approval_id) => {
                            steps.push(StepRecord {
                                index,
                                intent: "request_approval".into(),
                                agent: Some(active_agent.clone()),
                                tool_name: None,
                                input: excerpt(&description, STEP_CHARS),
                                output: approval_id.clone(),
                                duration_ms: elapsed_ms(step_started),
                                error: None,
                            });
                            info!(approval_id, "turn suspended on approval");
                            return TurnReport {
                                status: TurnStatus::WaitingForUser,
                                answer: None,
                                waiting_on: Some(approval_id),
                                message: format!("Approval required: {description}"),
                                steps,
                            };
                        }
                        Err(error) => {
                            steps.push(StepRecord {
                                index,
                                intent: "request_approval".into(),
                                agent: Some(active_agent.clone()),
                                tool_name: None,
                                input: excerpt(&description, STEP_CHARS),
                                output: String::new(),
                                duration_ms: elapsed_ms(step_started),
                                error: Some(error.to_string()),
                            });
                            notes.push(format!("Could not request approval: {error}"));
                        }
                    }
                }

                Decision::Delegate(spec) => {
                    let (record, note) = self
                        .run_delegation(ctx, index, &mut active_agent, spec, step_started)
                        .await;
                    steps.push(record);
                    notes.push(note);
                }

                Decision::DelegateParallel(specs) => {
                    let (record, note) = self
                        .run_parallel_delegation(ctx, index, &active_agent, &specs, step_started)
                        .await;
                    steps.push(record);
                    notes.push(note);
                }

                Decision::Escalate { reason } => {
                    let instructions = self
                        .escalate_to_coordinator(ctx, &mut active_agent, &reason, request, &notes)
                        .await;
                    steps.push(StepRecord {
                        index,
                        intent: "escalate".into(),
                        agent: Some(active_agent.clone()),
                        tool_name: None,
                        input: excerpt(&reason, STEP_CHARS),
                        output: excerpt(&instructions, STEP_CHARS),
                        duration_ms: elapsed_ms(step_started),
                        error: None,
                    });
                    notes.push(format!("Coordinator instructions: {instructions}"));
                }

                Decision::Answer { content } => {
                    match self
                        .try_accept_answer(
                            ctx,
                            index,
                            &active_agent,
                            &primary_obligation,
                            request,
                            content,
                            step_started,
                        )
                        .await
                    {
                        AnswerAttempt::Accepted(report_steps) => {
                            steps.push(report_steps.0);
                            let answer = report_steps.1;
                            histogram!("turn_duration_ms").record(elapsed_ms(turn_started) as f64);
                            return TurnReport {
                                status: TurnStatus::Completed,
                                answer: Some(answer.clone()),
                                waiting_on: None,
                                message: answer,
                                steps,
                            };
                        }
                        AnswerAttempt::Rejected(record, note) => {
                            steps.push(record);
                            notes.push(note);
                        }
                    }
                }
            }
        }

        // Iteration ceiling: deterministic summary, status Completed.
        counter!("turns_exhausted_total").increment(1);
        let summary = build_exhaustion_summary(&steps);
        warn!(iterations = self.config.max_iterations, "iteration ceiling reached");
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::LoopExhausted {
                    iterations: self.config.max_iterations,
                    summary: summary.clone(),
                })
                .from_source(EventSource::Loop)
                .internal(),
            )
            .await;
        if let Some(obligation_id) = primary_obligation {
            let _ = self
                .bus
                .emit(
                    &ctx.event(WorkflowEventKind::ObligationResolved {
                        obligation_id,
                        status: ObligationStatus::Waived,
                        evidence: Some("iteration ceiling reached".into()),
                    })
                    .from_source(EventSource::Loop)
                    .internal(),
                )
                .await;
        }
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::AssistantMessage {
                    content: summary.clone(),
                })
                .from_source(EventSource::Loop),
            )
            .await;
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::AgentCompleted {
                    agent: active_agent,
                    summary: None,
                })
                .from_source(EventSource::Loop)
                .internal(),
            )
            .await;

        TurnReport {
            status: TurnStatus::Completed,
            answer: Some(summary.clone()),
            waiting_on: None,
            message: summary,
            steps,
        }
    }

    /// Ask the engine under the decision deadline.
    async fn decide(&self, turn_ctx: &TurnContext) -> Result<Decision, CollabError> {
        match tokio::time::timeout(self.config.decision_timeout, self.engine.decide(turn_ctx)).await
        {
            Ok(result) => result,
            Err(_) => Err(CollabError::Timeout(
                self.config.decision_timeout.as_millis() as u64,
            )),
        }
    }

    /// Open (or reuse) the turn's primary obligation and return the ID the
    /// ledger is actually tracking — on resume, the original open obligation
    /// is reused rather than duplicated.
    async fn open_primary_obligation(
        &self,
        ctx: &RequestContext,
        request: &str,
    ) -> Option<String> {
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::ObligationOpened {
                    obligation_id: ids::new_obligation_id(),
                    kind: conductor_core::events::ObligationKind::UserRequest,
                    description: excerpt(request, NOTE_CHARS),
                    required_outcome: None,
                    source_agent: "user".into(),
                    origin: ObligationOrigin::Primary,
                    blocking: true,
                })
                .from_source(EventSource::Loop)
                .internal(),
            )
            .await;

        self.state.state_of(&ctx.session_id).and_then(|state| {
            obligations::unresolved(&state.obligations, Some(ctx.turn_id.as_str()), false)
                .into_iter()
                .find(|o| o.origin == ObligationOrigin::Primary)
                .map(|o| o.obligation_id.clone())
        })
    }

    /// Execute one tool call under the tool deadline.
    async fn execute_tool(
        &self,
        ctx: &RequestContext,
        index: u32,
        active_agent: &str,
        tool_name: &str,
        arguments: &Value,
        step_started: Instant,
    ) -> (StepRecord, String) {
        let tool_call_id = ids::new_tool_call_id();
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::ToolCall {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.to_string(),
                    arguments: arguments.clone(),
                })
                .from_source(EventSource::Loop),
            )
            .await;

        let timeout_ms = self.config.tool_timeout.as_millis() as u64;
        let outcome =
            match tokio::time::timeout(self.config.tool_timeout, self.tools.execute(tool_name, arguments))
                .await
            {
                Ok(outcome) => outcome,
                // Timeout means failed, never dangling.
                Err(_) => ToolOutcome::failed(format!("tool timed out after {timeout_ms}ms"), timeout_ms),
            };

        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::ToolResult {
                    tool_call_id,
                    tool_name: tool_name.to_string(),
                    success: outcome.success,
                    output: outcome.output.clone(),
                    error: outcome.error.clone(),
                    duration_ms: outcome.duration_ms,
                })
                .from_source(EventSource::Loop),
            )
            .await;
        counter!("tool_calls_total").increment(1);

        let output_text = outcome
            .output
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let note = if outcome.success {
            format!("Tool {tool_name} succeeded: {}", excerpt(&output_text, NOTE_CHARS))
        } else {
            format!(
                "Tool {tool_name} failed: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            )
        };
        let record = StepRecord {
            index,
            intent: "tool_call".into(),
            agent: Some(active_agent.to_string()),
            tool_name: Some(tool_name.to_string()),
            input: excerpt(&arguments.to_string(), STEP_CHARS),
            output: excerpt(&output_text, STEP_CHARS),
            duration_ms: elapsed_ms(step_started),
            error: outcome.error,
        };
        (record, note)
    }

    /// Run one sequential delegation, including the escalation detour.
    async fn run_delegation(
        &self,
        ctx: &RequestContext,
        index: u32,
        active_agent: &mut String,
        spec: DelegationSpec,
        step_started: Instant,
    ) -> (StepRecord, String) {
        if !self.registry.contains(&spec.target_agent) {
            let error = RuntimeError::UnknownAgent(spec.target_agent.clone());
            return (
                StepRecord {
                    index,
                    intent: "delegate".into(),
                    agent: Some(active_agent.clone()),
                    tool_name: None,
                    input: excerpt(&spec.objective, STEP_CHARS),
                    output: String::new(),
                    duration_ms: elapsed_ms(step_started),
                    error: Some(error.to_string()),
                },
                format!("Delegation rejected: {error}"),
            );
        }

        let mut result = self.delegations.delegate(ctx, active_agent, &spec).await;

        if let Some(escalation) = result.escalation.clone() {
            // Detour within the same turn and budget: coordinator takes over,
            // issues explicit instructions, and the delegate is resumed.
            let instructions = self
                .escalate_to_coordinator(
                    ctx,
                    active_agent,
                    &escalation.reason,
                    &spec.objective,
                    &[],
                )
                .await;
            let mut resumed = spec.clone();
            resumed.context = Some(match spec.context {
                Some(existing) => format!("{existing}\nCoordinator instructions: {instructions}"),
                None => format!("Coordinator instructions: {instructions}"),
            });
            result = self.delegations.delegate(ctx, active_agent, &resumed).await;
        }

        let error = if result.status == conductor_core::events::DelegationStatus::Failed {
            Some(result.summary.clone())
        } else {
            None
        };
        let note = excerpt(&result.summary, NOTE_CHARS);
        (
            StepRecord {
                index,
                intent: "delegate".into(),
                agent: Some(spec.target_agent),
                tool_name: None,
                input: excerpt(&spec.objective, STEP_CHARS),
                output: excerpt(&result.summary, STEP_CHARS),
                duration_ms: elapsed_ms(step_started),
                error,
            },
            note,
        )
    }

    /// Run a parallel delegation batch.
    async fn run_parallel_delegation(
        &self,
        ctx: &RequestContext,
        index: u32,
        active_agent: &str,
        specs: &[DelegationSpec],
        step_started: Instant,
    ) -> (StepRecord, String) {
        match self.delegations.delegate_parallel(ctx, active_agent, specs).await {
            Ok(outcome) => {
                let slots: Vec<String> = outcome
                    .results
                    .iter()
                    .zip(specs)
                    .map(|(result, spec)| {
                        format!("{}={:?}", spec.target_agent, result.status)
                    })
                    .collect();
                let note = format!(
                    "Parallel delegation settled ({:?}): {}",
                    outcome.status,
                    slots.join(", ")
                );
                (
                    StepRecord {
                        index,
                        intent: "delegate_parallel".into(),
                        agent: Some(active_agent.to_string()),
                        tool_name: None,
                        input: format!("{} delegations", specs.len()),
                        output: excerpt(&note, STEP_CHARS),
                        duration_ms: elapsed_ms(step_started),
                        error: None,
                    },
                    note,
                )
            }
            Err(error) => (
                StepRecord {
                    index,
                    intent: "delegate_parallel".into(),
                    agent: Some(active_agent.to_string()),
                    tool_name: None,
                    input: format!("{} delegations", specs.len()),
                    output: String::new(),
                    duration_ms: elapsed_ms(step_started),
                    error: Some(error.to_string()),
                },
                format!("Parallel delegation rejected: {error}"),
            ),
        }
    }

    /// Switch control to the coordinator mid-turn and ask it for explicit
    /// next-step instructions.
    async fn escalate_to_coordinator(
        &self,
        ctx: &RequestContext,
        active_agent: &mut String,
        reason: &str,
        request: &str,
        notes: &[String],
    ) -> String {
        let coordinator = self.registry.coordinator().name.clone();
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::AgentEscalated {
                    from_agent: active_agent.clone(),
                    reason: reason.to_string(),
                })
                .from_source(EventSource::Loop),
            )
            .await;
        if *active_agent != coordinator {
            *active_agent = coordinator.clone();
            let _ = self
                .bus
                .emit(
                    &ctx.event(WorkflowEventKind::AgentStarted {
                        agent: coordinator.clone(),
                    })
                    .from_source(EventSource::Loop)
                    .internal(),
                )
                .await;
        }

        let mut detour_notes = notes.to_vec();
        detour_notes.push(format!(
            "A delegate escalated: {reason}. Provide explicit next-step instructions."
        ));
        let turn_ctx = TurnContext {
            session_id: ctx.session_id.clone(),
            turn_id: ctx.turn_id.clone(),
            active_agent: coordinator,
            request: request.to_string(),
            notes: detour_notes,
        };
        match self.decide(&turn_ctx).await {
            Ok(Decision::Answer { content }) => content,
            Ok(Decision::Continue { note: Some(note) }) => note,
            Ok(_) | Err(_) => {
                debug!("coordinator gave no usable instructions; using fallback");
                "Proceed with your best judgment within the original constraints.".to_string()
            }
        }
    }

    /// Validate and, if accepted, finalize an answer.
    #[allow(clippy::too_many_arguments)]
    async fn try_accept_answer(
        &self,
        ctx: &RequestContext,
        index: u32,
        active_agent: &str,
        primary_obligation: &Option<String>,
        request: &str,
        content: String,
        step_started: Instant,
    ) -> AnswerAttempt {
        // A respond action may not conclude the turn while blocking
        // obligations (other than the primary one it resolves) stay open.
        let open_blocking: Vec<String> = self
            .state
            .state_of(&ctx.session_id)
            .map(|state| {
                obligations::unresolved(&state.obligations, Some(ctx.turn_id.as_str()), true)
                    .into_iter()
                    .filter(|o| Some(&o.obligation_id) != primary_obligation.as_ref())
                    .map(|o| o.description.clone())
                    .collect()
            })
            .unwrap_or_default();
        if !open_blocking.is_empty() {
            return AnswerAttempt::Rejected(
                StepRecord {
                    index,
                    intent: "answer".into(),
                    agent: Some(active_agent.to_string()),
                    tool_name: None,
                    input: excerpt(&content, STEP_CHARS),
                    output: String::new(),
                    duration_ms: elapsed_ms(step_started),
                    error: Some("blocking obligations still open".into()),
                },
                format!(
                    "Cannot conclude yet; {} blocking obligations still open: {}",
                    open_blocking.len(),
                    open_blocking.join("; ")
                ),
            );
        }

        if let Some(validator) = &self.validator {
            let verdict = match tokio::time::timeout(
                self.config.decision_timeout,
                validator.validate(request, &content),
            )
            .await
            {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(error)) => {
                    warn!(%error, "self-validation failed; accepting answer");
                    ValidationVerdict::pass()
                }
                Err(_) => {
                    warn!("self-validation timed out; accepting answer");
                    ValidationVerdict::pass()
                }
            };
            let _ = self
                .bus
                .emit(
                    &ctx.event(WorkflowEventKind::SelfValidation {
                        is_complete: verdict.is_complete,
                        confidence: verdict.confidence,
                        feedback: verdict.feedback.clone(),
                    })
                    .from_source(EventSource::Loop)
                    .internal(),
                )
                .await;

            if !verdict.is_complete && verdict.confidence < self.config.validation_confidence_floor
            {
                return AnswerAttempt::Rejected(
                    StepRecord {
                        index,
                        intent: "self_validate".into(),
                        agent: Some(active_agent.to_string()),
                        tool_name: None,
                        input: excerpt(&content, STEP_CHARS),
                        output: excerpt(&verdict.feedback, STEP_CHARS),
                        duration_ms: elapsed_ms(step_started),
                        error: None,
                    },
                    format!("Self-validation found the answer incomplete: {}", verdict.feedback),
                );
            }
        }

        if let Some(obligation_id) = primary_obligation {
            let _ = self
                .bus
                .emit(
                    &ctx.event(WorkflowEventKind::ObligationResolved {
                        obligation_id: obligation_id.clone(),
                        status: ObligationStatus::Satisfied,
                        evidence: Some(excerpt(&content, NOTE_CHARS)),
                    })
                    .from_source(EventSource::Loop)
                    .internal(),
                )
                .await;
        }
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::AssistantMessage {
                    content: content.clone(),
                })
                .from_source(EventSource::Loop),
            )
            .await;
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::AgentCompleted {
                    agent: active_agent.to_string(),
                    summary: None,
                })
                .from_source(EventSource::Loop)
                .internal(),
            )
            .await;

        AnswerAttempt::Accepted((
            StepRecord {
                index,
                intent: "answer".into(),
                agent: Some(active_agent.to_string()),
                tool_name: None,
                input: String::new(),
                output: excerpt(&content, STEP_CHARS),
                duration_ms: elapsed_ms(step_started),
                error: None,
            },
            content,
        ))
    }
}

/// Result of an answer attempt.
enum AnswerAttempt {
    Accepted((StepRecord, String)),
    Rejected(StepRecord, String),
}

/// Deterministic summary built from the recorded step history.
fn build_exhaustion_summary(steps: &[StepRecord]) -> String {
    let tool_ok = steps
        .iter()
        .filter(|s| s.intent == "tool_call" && s.error.is_none())
        .count();
    let tool_failed = steps
        .iter()
        .filter(|s| s.intent == "tool_call" && s.error.is_some())
        .count();
    let last_output = steps
        .iter()
        .rev()
        .find(|s| !s.output.is_empty())
        .map_or_else(|| "none".to_string(), |s| s.output.clone());
    let errors: Vec<String> = steps
        .iter()
        .filter_map(|s| s.error.as_ref().map(|e| format!("step {}: {e}", s.index)))
        .collect();
    let errors = if errors.is_empty() {
        "none".to_string()
    } else {
        errors.join("; ")
    };

    format!(
        "Reached the iteration ceiling after {} steps without a final answer. \
         Tool steps: {tool_ok} successful, {tool_failed} failed. \
         Last output: {last_output}. Step errors: {errors}",
        steps.len()
    )
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
