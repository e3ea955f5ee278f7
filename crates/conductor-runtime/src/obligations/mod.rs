//! Obligation ledger — tracked commitments (user asks, delegations).
//!
//! Makes "did we cover everything the user or a delegate asked for"
//! inspectable and enforceable rather than implicit in prose. The ledger is
//! pure data-structure logic over `Vec<SessionObligation>`; the conversation
//! state projection invokes it while reacting to `obligation.*` events, so
//! the loop never mutates obligations directly.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | (root) | [`SessionObligation`] plus the add/resolve/query operations |
//! | `matcher` | Pluggable free-text resolution for inbox-origin obligations |

pub mod matcher;

use conductor_core::events::{ObligationKind, ObligationOrigin, ObligationStatus};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use matcher::{KeywordOverlapMatcher, ResponseMatcher};

/// A tracked commitment that must reach a terminal resolution before a turn
/// is considered fully covered.
///
/// INVARIANT: `status` transitions are one-way and terminal
/// (`Open` → `Satisfied | Waived | Failed`); a terminal obligation is never
/// reopened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionObligation {
    /// Stable ID (`obl_` prefix, or the originating gate's ID for
    /// inbox-origin obligations).
    pub obligation_id: String,
    /// What this obligation tracks.
    pub kind: ObligationKind,
    /// Human-readable description of the commitment.
    pub description: String,
    /// Expected outcome, if one was stated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_outcome: Option<String>,
    /// Agent that recorded the commitment.
    pub source_agent: String,
    /// Current lifecycle status.
    pub status: ObligationStatus,
    /// Evidence collected at resolution time.
    pub evidence: Vec<String>,
    /// Turn the obligation belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    /// Where the obligation came from.
    pub origin: ObligationOrigin,
    /// Whether an open obligation blocks the turn from concluding.
    pub blocking: bool,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 resolution timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
}

/// What the opener provides when recording an obligation.
#[derive(Clone, Debug, PartialEq)]
pub struct ObligationSpec {
    /// What this obligation tracks.
    pub kind: ObligationKind,
    /// Human-readable description.
    pub description: String,
    /// Expected outcome, if stated.
    pub required_outcome: Option<String>,
    /// Agent recording the commitment.
    pub source_agent: String,
    /// Where the obligation comes from.
    pub origin: ObligationOrigin,
    /// Whether it blocks turn conclusion while open.
    pub blocking: bool,
}

/// Record an obligation, reusing an equivalent open one.
///
/// Equivalence: same turn, same kind, same description. Reuse avoids
/// duplicate tracking when a step is retried. Returns the ID now tracking
/// the commitment (the reused one, or `obligation_id`).
pub fn add_or_reuse(
    obligations: &mut Vec<SessionObligation>,
    obligation_id: &str,
    spec: &ObligationSpec,
    turn_id: Option<&str>,
) -> String {
    if let Some(existing) = obligations.iter().find(|o| {
        o.status == ObligationStatus::Open
            && o.turn_id.as_deref() == turn_id
            && o.kind == spec.kind
            && o.description == spec.description
    }) {
        debug!(
            obligation_id = %existing.obligation_id,
            "reusing equivalent open obligation"
        );
        return existing.obligation_id.clone();
    }

    obligations.push(SessionObligation {
        obligation_id: obligation_id.to_string(),
        kind: spec.kind,
        description: spec.description.clone(),
        required_outcome: spec.required_outcome.clone(),
        source_agent: spec.source_agent.clone(),
        status: ObligationStatus::Open,
        evidence: Vec::new(),
        turn_id: turn_id.map(ToString::to_string),
        origin: spec.origin,
        blocking: spec.blocking,
        created_at: chrono::Utc::now().to_rfc3339(),
        resolved_at: None,
    });
    obligation_id.to_string()
}

/// One-shot terminal transition.
///
/// Returns `true` if the obligation moved to `status`. Calling on an
/// already-terminal (or unknown) obligation is a no-op returning `false` —
/// tolerated, not an error, because event delivery upstream is
/// at-least-once.
pub fn resolve(
    obligations: &mut [SessionObligation],
    obligation_id: &str,
    status: ObligationStatus,
    evidence: Option<&str>,
) -> bool {
    if !status.is_terminal() {
        return false;
    }
    let Some(obligation) = obligations
        .iter_mut()
        .find(|o| o.obligation_id == obligation_id)
    else {
        return false;
    };
    if obligation.status.is_terminal() {
        debug!(
            obligation_id,
            current = ?obligation.status,
            attempted = ?status,
            "ignoring transition on terminal obligation"
        );
        return false;
    }
    obligation.status = status;
    if let Some(evidence) = evidence {
        obligation.evidence.push(evidence.to_string());
    }
    obligation.resolved_at = Some(chrono::Utc::now().to_rfc3339());
    true
}

/// Open obligations, optionally filtered to one turn and/or blocking only.
///
/// Used by the loop and the gate manager to decide whether a "respond to
/// user" action may fully conclude the turn.
#[must_use]
pub fn unresolved<'a>(
    obligations: &'a [SessionObligation],
    turn_id: Option<&str>,
    blocking_only: bool,
) -> Vec<&'a SessionObligation> {
    obligations
        .iter()
        .filter(|o| o.status == ObligationStatus::Open)
        .filter(|o| turn_id.is_none() || o.turn_id.as_deref() == turn_id)
        .filter(|o| !blocking_only || o.blocking)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(description: &str) -> ObligationSpec {
        ObligationSpec {
            kind: ObligationKind::UserRequest,
            description: description.into(),
            required_outcome: None,
            source_agent: "coordinator".into(),
            origin: ObligationOrigin::Primary,
            blocking: true,
        }
    }

    // ── add_or_reuse ──────────────────────────────────────────────────

    #[test]
    fn adds_new_obligation_as_open() {
        let mut ledger = Vec::new();
        let id = add_or_reuse(&mut ledger, "obl_1", &spec("summarize repo"), Some("turn_1"));
        assert_eq!(id, "obl_1");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].status, ObligationStatus::Open);
        assert_eq!(ledger[0].turn_id.as_deref(), Some("turn_1"));
    }

    #[test]
    fn reuses_equivalent_open_obligation() {
        let mut ledger = Vec::new();
        let first = add_or_reuse(&mut ledger, "obl_1", &spec("summarize repo"), Some("turn_1"));
        let second = add_or_reuse(&mut ledger, "obl_2", &spec("summarize repo"), Some("turn_1"));
        assert_eq!(first, second);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn different_turn_is_not_equivalent() {
        let mut ledger = Vec::new();
        let _ = add_or_reuse(&mut ledger, "obl_1", &spec("summarize repo"), Some("turn_1"));
        let _ = add_or_reuse(&mut ledger, "obl_2", &spec("summarize repo"), Some("turn_2"));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn terminal_obligation_is_not_reused() {
        let mut ledger = Vec::new();
        let _ = add_or_reuse(&mut ledger, "obl_1", &spec("summarize repo"), Some("turn_1"));
        let _ = resolve(&mut ledger, "obl_1", ObligationStatus::Satisfied, None);

        let id = add_or_reuse(&mut ledger, "obl_2", &spec("summarize repo"), Some("turn_1"));
        assert_eq!(id, "obl_2");
        assert_eq!(ledger.len(), 2);
    }

    // ── resolve: one-way terminal transitions ─────────────────────────

    #[test]
    fn satisfy_records_evidence_and_timestamp() {
        let mut ledger = Vec::new();
        let _ = add_or_reuse(&mut ledger, "obl_1", &spec("summarize repo"), Some("turn_1"));

        assert!(resolve(
            &mut ledger,
            "obl_1",
            ObligationStatus::Satisfied,
            Some("summary produced"),
        ));
        assert_eq!(ledger[0].status, ObligationStatus::Satisfied);
        assert_eq!(ledger[0].evidence, vec!["summary produced".to_string()]);
        assert!(ledger[0].resolved_at.is_some());
    }

    #[test]
    fn first_terminal_transition_wins() {
        let mut ledger = Vec::new();
        let _ = add_or_reuse(&mut ledger, "obl_1", &spec("summarize repo"), Some("turn_1"));

        assert!(resolve(&mut ledger, "obl_1", ObligationStatus::Satisfied, None));
        assert!(!resolve(&mut ledger, "obl_1", ObligationStatus::Failed, None));
        assert!(!resolve(&mut ledger, "obl_1", ObligationStatus::Waived, None));
        assert_eq!(ledger[0].status, ObligationStatus::Satisfied);
    }

    #[test]
    fn resolve_unknown_id_is_noop() {
        let mut ledger = Vec::new();
        assert!(!resolve(&mut ledger, "obl_missing", ObligationStatus::Failed, None));
    }

    #[test]
    fn resolving_to_open_is_rejected() {
        let mut ledger = Vec::new();
        let _ = add_or_reuse(&mut ledger, "obl_1", &spec("summarize repo"), Some("turn_1"));
        assert!(!resolve(&mut ledger, "obl_1", ObligationStatus::Open, None));
        assert_eq!(ledger[0].status, ObligationStatus::Open);
    }

    // ── unresolved ────────────────────────────────────────────────────

    #[test]
    fn unresolved_filters_by_turn_and_blocking() {
        let mut ledger = Vec::new();
        let _ = add_or_reuse(&mut ledger, "obl_1", &spec("a"), Some("turn_1"));
        let mut non_blocking = spec("b");
        non_blocking.blocking = false;
        let _ = add_or_reuse(&mut ledger, "obl_2", &non_blocking, Some("turn_1"));
        let _ = add_or_reuse(&mut ledger, "obl_3", &spec("c"), Some("turn_2"));
        let _ = resolve(&mut ledger, "obl_3", ObligationStatus::Waived, None);

        assert_eq!(unresolved(&ledger, None, false).len(), 2);
        assert_eq!(unresolved(&ledger, Some("turn_1"), false).len(), 2);
        assert_eq!(unresolved(&ledger, Some("turn_1"), true).len(), 1);
        assert_eq!(unresolved(&ledger, Some("turn_2"), false).len(), 0);
    }
}
