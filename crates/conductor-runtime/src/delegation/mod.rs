//! Delegation — dispatching sub-tasks to specialist agents.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | (root) | Delegation specs, results, and the [`SubagentInvoker`] boundary |
//! | `runner` | [`DelegationRunner`] — sequential and parallel dispatch |

pub mod runner;

use async_trait::async_trait;
use conductor_core::events::DelegationStatus;
use conductor_core::CollabError;
use serde::{Deserialize, Serialize};

pub use runner::{DelegationRunner, ParallelOutcome};

/// One sub-task to hand to a specialist agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationSpec {
    /// Name of the target agent.
    pub target_agent: String,
    /// Domain the task belongs to.
    pub domain: String,
    /// What the delegate must accomplish.
    pub objective: String,
    /// Extra context for the delegate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Constraints the delegate must honor.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Expected outcome, if stated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
}

impl DelegationSpec {
    /// A spec is dispatchable when it names a target and an objective.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.target_agent.trim().is_empty() && !self.objective.trim().is_empty()
    }
}

/// An escalation raised by a delegate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Escalation {
    /// Why the delegate handed control back.
    pub reason: String,
}

/// Normalized outcome of one delegation (sequential or one parallel slot).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationResult {
    /// Normalized status.
    pub status: DelegationStatus,
    /// Summary for the parent agent. On success this is a verification
    /// envelope embedding objective, outcome, and tool evidence.
    pub summary: String,
    /// Evidence lines collected from the delegate's tool usage.
    pub tool_evidence: Vec<String>,
    /// Present when `status` is `Escalated`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
}

/// What a sub-agent run reports back to the runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubagentReport {
    /// Outcome summary.
    pub summary: String,
    /// Evidence lines from tool usage.
    pub tool_evidence: Vec<String>,
    /// Escalation reason, if the delegate handed control back.
    pub escalation: Option<String>,
    /// Whether only part of the objective was covered.
    pub partial: bool,
}

/// Runs a specialist agent's tool-using loop on a delegated objective.
///
/// In production this is the decision loop recursing into the target agent;
/// the boundary exists so delegation can be exercised without a live model.
#[async_trait]
pub trait SubagentInvoker: Send + Sync {
    /// Run the delegate to completion on one spec.
    async fn run(&self, spec: &DelegationSpec) -> Result<SubagentReport, CollabError>;
}

/// Build the verification envelope the parent agent uses to judge trust in
/// a delegate's claimed outcome.
#[must_use]
pub fn build_verification_envelope(spec: &DelegationSpec, report: &SubagentReport) -> String {
    let mut lines = vec![
        format!("[delegation:{}]", spec.target_agent),
        format!("objective: {}", spec.objective),
        format!("outcome: {}", report.summary),
    ];
    if report.tool_evidence.is_empty() {
        lines.push("evidence: none recorded".to_string());
    } else {
        lines.push(format!("evidence ({} items):", report.tool_evidence.len()));
        for item in &report.tool_evidence {
            lines.push(format!("  - {item}"));
        }
    }
    lines.join("\n")
}
