//! Free-text resolution of inbox-origin obligations.
//!
//! When a non-blocking question is surfaced to the user, the answer may
//! arrive as ordinary free text rather than a structured gate answer. The
//! [`ResponseMatcher`] decides whether such a response covers an open
//! obligation. The default [`KeywordOverlapMatcher`] is a best-effort
//! approximation, not a correctness proof — it is a pluggable strategy so a
//! stricter matcher can replace it without touching the state machine.

use std::collections::HashSet;

use conductor_core::events::{ObligationOrigin, ObligationStatus};
use conductor_core::text::excerpt;

use crate::obligations::SessionObligation;

/// Maximum evidence excerpt length in characters.
const EVIDENCE_EXCERPT_CHARS: usize = 160;

/// Decides whether a free-text response satisfies an obligation.
pub trait ResponseMatcher: Send + Sync {
    /// Returns an evidence excerpt if `response` satisfies `obligation`.
    fn match_response(&self, obligation: &SessionObligation, response: &str) -> Option<String>;
}

/// Token-overlap matcher: the response must contain at least
/// `ceil(min_overlap × N)` of the N significant keywords (lowercase tokens
/// longer than 3 characters) drawn from the obligation's required outcome,
/// falling back to its description.
#[derive(Clone, Debug)]
pub struct KeywordOverlapMatcher {
    /// Required fraction of significant keywords present in the response.
    pub min_overlap: f64,
}

impl Default for KeywordOverlapMatcher {
    fn default() -> Self {
        Self { min_overlap: 0.3 }
    }
}

impl KeywordOverlapMatcher {
    fn significant_tokens(text: &str) -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 3)
            .map(ToString::to_string)
            .collect()
    }
}

impl ResponseMatcher for KeywordOverlapMatcher {
    fn match_response(&self, obligation: &SessionObligation, response: &str) -> Option<String> {
        let target = obligation
            .required_outcome
            .as_deref()
            .unwrap_or(&obligation.description);
        let tokens = Self::significant_tokens(target);
        if tokens.is_empty() {
            return None;
        }

        let response_lower = response.to_lowercase();
        let hits = tokens
            .iter()
            .filter(|t| response_lower.contains(t.as_str()))
            .count();

        #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
        let needed = (self.min_overlap * tokens.len() as f64).ceil() as usize;
        if hits >= needed.max(1) {
            Some(excerpt(response, EVIDENCE_EXCERPT_CHARS))
        } else {
            None
        }
    }
}

/// Match a free-text response against every open inbox-origin obligation.
///
/// Returns `(obligation_id, evidence)` pairs for the obligations the
/// response satisfies. The caller emits the corresponding
/// `obligation.resolved` events; this function never mutates the ledger.
#[must_use]
pub fn match_inbox_obligations(
    obligations: &[SessionObligation],
    response: &str,
    matcher: &dyn ResponseMatcher,
) -> Vec<(String, String)> {
    obligations
        .iter()
        .filter(|o| o.status == ObligationStatus::Open && o.origin == ObligationOrigin::Inbox)
        .filter_map(|o| {
            matcher
                .match_response(o, response)
                .map(|evidence| (o.obligation_id.clone(), evidence))
        })
        .collect()
}
