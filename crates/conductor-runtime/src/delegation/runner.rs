//! [`DelegationRunner`] — sequential and parallel sub-agent dispatch.
//!
//! Normalizes heterogeneous sub-agent outcomes into the
//! `success | partial | failed | escalated` vocabulary. Every delegation
//! (sequential, or each parallel slot) opens exactly one obligation at
//! dispatch time and resolves it exactly once when its outcome is known,
//! including on the error path. The only exception is escalation: the
//! obligation stays open across the coordinator detour and is picked up by
//! ledger reuse when the delegate is re-dispatched in the same turn.

use std::sync::Arc;
use std::time::Duration;

use conductor_core::events::{
    DelegationStatus, ObligationKind, ObligationOrigin, ObligationStatus, WorkflowEventKind,
};
use conductor_core::text::excerpt;
use conductor_core::{ids, CollabError, EventSource, RequestContext};
use futures::future::join_all;
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::bus::WorkflowBus;
use crate::delegation::{
    build_verification_envelope, DelegationResult, DelegationSpec, Escalation, SubagentInvoker,
    SubagentReport,
};
use crate::errors::RuntimeError;
use crate::state::StateProjection;

/// Default wall-clock budget for one sub-agent run.
const DEFAULT_DELEGATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum evidence excerpt recorded on obligation resolution.
const EVIDENCE_CHARS: usize = 200;

/// Aggregate outcome of a parallel delegation batch.
#[derive(Clone, Debug, PartialEq)]
pub struct ParallelOutcome {
    /// `Failed` if any slot failed, else `Success`.
    pub status: DelegationStatus,
    /// Per-slot results, aligned with the submitted specs by index.
    pub results: Vec<DelegationResult>,
}

/// Dispatches sub-agent tasks and resolves their obligations.
#[derive(Clone)]
pub struct DelegationRunner {
    invoker: Arc<dyn SubagentInvoker>,
    bus: Arc<WorkflowBus>,
    state: Arc<StateProjection>,
    timeout: Duration,
}

impl DelegationRunner {
    /// Create a runner with the default sub-agent timeout.
    #[must_use]
    pub fn new(
        invoker: Arc<dyn SubagentInvoker>,
        bus: Arc<WorkflowBus>,
        state: Arc<StateProjection>,
    ) -> Self {
        Self::with_timeout(invoker, bus, state, DEFAULT_DELEGATION_TIMEOUT)
    }

    /// Create a runner with a custom sub-agent timeout.
    #[must_use]
    pub fn with_timeout(
        invoker: Arc<dyn SubagentInvoker>,
        bus: Arc<WorkflowBus>,
        state: Arc<StateProjection>,
        timeout: Duration,
    ) -> Self {
        Self {
            invoker,
            bus,
            state,
            timeout,
        }
    }

    /// Race the invoker against the delegation timeout.
    async fn run_with_timeout(&self, spec: &DelegationSpec) -> Result<SubagentReport, CollabError> {
        match tokio::time::timeout(self.timeout, self.invoker.run(spec)).await {
            Ok(result) => result,
            Err(_) => Err(CollabError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    /// Emit the dispatch pair for one delegation: the client-visible
    /// `delegation.dispatched` and the internal `obligation.opened`.
    ///
    /// Returns `(delegation_id, obligation_id)` where the obligation ID is
    /// the one the ledger is actually tracking — a re-dispatch of the same
    /// objective within a turn (escalation resume, retry) reuses the
    /// original open obligation instead of opening a second one.
    async fn emit_dispatch(
        &self,
        ctx: &RequestContext,
        from_agent: &str,
        spec: &DelegationSpec,
    ) -> (String, String) {
        let delegation_id = ids::new_delegation_id();
        let obligation_id = ids::new_obligation_id();

        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::DelegationDispatched {
                    delegation_id: delegation_id.clone(),
                    target_agent: spec.target_agent.clone(),
                    domain: spec.domain.clone(),
                    objective: spec.objective.clone(),
                })
                .from_source(EventSource::Delegation),
            )
            .await;
        let _ = self
            .bus
            .emit(
                &ctx.event(WorkflowEventKind::ObligationOpened {
                    obligation_id: obligation_id.clone(),
                    kind: ObligationKind::Delegation,
                    description: spec.objective.clone(),
                    required_outcome: spec.expected_outcome.clone(),
                    source_agent: from_agent.to_string(),
                    origin: ObligationOrigin::Delegation,
                    blocking: true,
                })
                .from_source(EventSource::Delegation)
                .internal(),
            )
            .await;

        counter!("delegations_dispatched_total").increment(1);

        let tracked_id = self
            .state
            .state_of(&ctx.session_id)
            .and_then(|state| {
                state
                    .obligations
                    .iter()
                    .find(|o| {
                        o.status == ObligationStatus::Open
                            && o.kind == ObligationKind::Delegation
                            && o.turn_id.as_deref() == Some(ctx.turn_id.as_str())
                            && o.description == spec.objective
                    })
                    .map(|o| o.obligation_id.clone())
            })
            .unwrap_or(obligation_id);
        (delegation_id, tracked_id)
    }

    /// Settle one delegation: emit the completion/failure event, resolve the
    /// obligation, and normalize into a [`DelegationResult`].
    async fn settle(
        &self,
        ctx: &RequestContext,
        spec: &DelegationSpec,
        delegation_id: &str,
        obligation_id: &str,
        outcome: Result<SubagentReport, CollabError>,
    ) -> DelegationResult {
        match outcome {
            Ok(report) => {
                if let Some(reason) = report.escalation.clone() {
                    // Obligation stays open across the coordinator detour.
                    let _ = self
                        .bus
                        .emit(
                            &ctx.event(WorkflowEventKind::DelegationCompleted {
                                delegation_id: delegation_id.to_string(),
                                target_agent: spec.target_agent.clone(),
                                status: DelegationStatus::Escalated,
                                summary: report.summary.clone(),
                            })
                            .from_source(EventSource::Delegation),
                        )
                        .await;
                    debug!(delegation_id, reason, "delegation escalated");
                    return DelegationResult {
                        status: DelegationStatus::Escalated,
                        summary: report.summary,
                        tool_evidence: report.tool_evidence,
                        escalation: Some(Escalation { reason }),
                    };
                }

                let status = if report.partial {
                    DelegationStatus::Partial
                } else {
                    DelegationStatus::Success
                };
                let evidence = if report.partial {
                    format!("partial: {}", excerpt(&report.summary, EVIDENCE_CHARS))
                } else {
                    excerpt(&report.summary, EVIDENCE_CHARS)
                };
                let _ = self
                    .bus
                    .emit(
                        &ctx.event(WorkflowEventKind::ObligationResolved {
                            obligation_id: obligation_id.to_string(),
                            status: ObligationStatus::Satisfied,
                            evidence: Some(evidence),
                        })
                        .from_source(EventSource::Delegation)
                        .internal(),
                    )
                    .await;
                let _ = self
                    .bus
                    .emit(
                        &ctx.event(WorkflowEventKind::DelegationCompleted {
                            delegation_id: delegation_id.to_string(),
                            target_agent: spec.target_agent.clone(),
                            status,
                            summary: report.summary.clone(),
                        })
                        .from_source(EventSource::Delegation),
                    )
                    .await;

                DelegationResult {
                    status,
                    summary: build_verification_envelope(spec, &report),
                    tool_evidence: report.tool_evidence,
                    escalation: None,
                }
            }
            Err(error) => {
                // Surface a formatted message without losing the original
                // exception text.
                let message = format!(
                    "delegation to {} failed: {error}",
                    spec.target_agent
                );
                warn!(delegation_id, %error, "delegation failed");
                counter!("delegations_failed_total").increment(1);

                let _ = self
                    .bus
                    .emit(
                        &ctx.event(WorkflowEventKind::ObligationResolved {
                            obligation_id: obligation_id.to_string(),
                            status: ObligationStatus::Failed,
                            evidence: Some(error.to_string()),
                        })
                        .from_source(EventSource::Delegation)
                        .internal(),
                    )
                    .await;
                let _ = self
                    .bus
                    .emit(
                        &ctx.event(WorkflowEventKind::DelegationFailed {
                            delegation_id: delegation_id.to_string(),
                            target_agent: spec.target_agent.clone(),
                            error: message.clone(),
                        })
                        .from_source(EventSource::Delegation),
                    )
                    .await;

                DelegationResult {
                    status: DelegationStatus::Failed,
                    summary: message,
                    tool_evidence: Vec::new(),
                    escalation: None,
                }
            }
        }
    }

    /// Dispatch one sub-task and wait for its normalized outcome.
    #[instrument(skip(self, ctx, spec), fields(target = %spec.target_agent, turn_id = %ctx.turn_id))]
    pub async fn delegate(
        &self,
        ctx: &RequestContext,
        from_agent: &str,
        spec: &DelegationSpec,
    ) -> DelegationResult {
        let (delegation_id, obligation_id) = self.emit_dispatch(ctx, from_agent, spec).await;
        let outcome = self.run_with_timeout(spec).await;
        self.settle(ctx, spec, &delegation_id, &obligation_id, outcome)
            .await
    }

    /// Run independent sub-tasks concurrently.
    ///
    /// Caller guarantees the specs have no data dependency on each other.
    /// Each failure is isolated to its own result slot; results are aligned
    /// to the submitted specs by index regardless of completion order. A
    /// batch with zero valid items is rejected before any obligation is
    /// created.
    #[instrument(skip(self, ctx, specs), fields(count = specs.len(), turn_id = %ctx.turn_id))]
    pub async fn delegate_parallel(
        &self,
        ctx: &RequestContext,
        from_agent: &str,
        specs: &[DelegationSpec],
    ) -> Result<ParallelOutcome, RuntimeError> {
        if !specs.iter().any(DelegationSpec::is_valid) {
            return Err(RuntimeError::EmptyDelegation);
        }

        // Dispatch phase: obligations are opened in submission order.
        let mut handles: Vec<Option<(String, String)>> = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.is_valid() {
                handles.push(Some(self.emit_dispatch(ctx, from_agent, spec).await));
            } else {
                handles.push(None);
            }
        }

        // Execution phase: all valid slots run concurrently; a slot failing
        // never cancels its siblings.
        let runs = join_all(specs.iter().zip(&handles).map(|(spec, handle)| async move {
            match handle {
                Some(_) => Some(self.run_with_timeout(spec).await),
                None => None,
            }
        }))
        .await;

        // Settlement phase: results matched back to their obligations by
        // submission index, regardless of completion order.
        let mut results = Vec::with_capacity(specs.len());
        for ((spec, handle), outcome) in specs.iter().zip(&handles).zip(runs) {
            let result = match (handle, outcome) {
                (Some((delegation_id, obligation_id)), Some(outcome)) => {
                    self.settle(ctx, spec, delegation_id, obligation_id, outcome)
                        .await
                }
                _ => DelegationResult {
                    status: DelegationStatus::Failed,
                    summary: format!(
                        "invalid delegation spec for '{}': missing target or objective",
                        spec.target_agent
                    ),
                    tool_evidence: Vec::new(),
                    escalation: None,
                },
            };
            results.push(result);
        }

        let status = if results.iter().any(|r| r.status == DelegationStatus::Failed) {
            DelegationStatus::Failed
        } else {
            DelegationStatus::Success
        };
        Ok(ParallelOutcome { status, results })
    }
}
