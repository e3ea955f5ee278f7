//! Gates — blocking and non-blocking requests for user input.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | (root) | [`PendingQuestion`] / [`PendingApproval`] gate records |
//! | `manager` | [`GateManager`] — asks gates, matches inbound answers |

pub mod manager;

use conductor_core::events::RiskLevel;
use serde::{Deserialize, Serialize};

pub use manager::{GateManager, GateMatch};

/// A question surfaced to the user, awaiting an answer.
///
/// Blocking questions suspend the turn; non-blocking ones coexist with
/// ongoing work and are usually resolved by free-text keyword matching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuestion {
    /// Gate ID (`q_` prefix).
    pub id: String,
    /// The question text.
    pub question: String,
    /// Agent that asked.
    pub from_agent: String,
    /// Turn the question belongs to.
    pub turn_id: String,
    /// Whether the turn is suspended on this question.
    pub blocking: bool,
    /// RFC 3339 expiry; answers after this point are stale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// RFC 3339 creation timestamp.
    pub asked_at: String,
}

/// An approval request awaiting a boolean decision. Always blocking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    /// Gate ID (`appr_` prefix, or a caller-supplied plan ID).
    pub id: String,
    /// What is being approved.
    pub description: String,
    /// Risk classification shown to the user.
    pub risk_level: RiskLevel,
    /// Agent that requested approval.
    pub from_agent: String,
    /// Turn the approval belongs to.
    pub turn_id: String,
    /// RFC 3339 expiry; decisions after this point are stale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Content fingerprint; identical re-requests within a turn reuse the
    /// existing gate instead of stacking duplicates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// RFC 3339 creation timestamp.
    pub requested_at: String,
}

/// Whether a gate with this expiry is stale at `now` (RFC 3339 compare on
/// parsed timestamps; unparseable expiries are treated as already elapsed).
#[must_use]
pub fn is_expired(expires_at: Option<&str>, now: chrono::DateTime<chrono::Utc>) -> bool {
    match expires_at {
        None => false,
        Some(raw) => match chrono::DateTime::parse_from_rfc3339(raw) {
            Ok(expiry) => expiry.with_timezone(&chrono::Utc) <= now,
            Err(_) => true,
        },
    }
}
