//! Error types shared across the core boundary.

use thiserror::Error;

/// Failure of an external collaborator (model provider, sub-agent callable,
/// persistence sink).
///
/// These never cross the dispatcher boundary raw — every path converts them
/// into a typed outcome with a user-displayable message.
#[derive(Debug, Error)]
pub enum CollabError {
    /// The collaborator reported a failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// The operation lost its timeout race.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The collaborator returned something unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_preserves_original_text() {
        let err = CollabError::Provider("rate limited (429)".into());
        assert!(err.to_string().contains("rate limited (429)"));
    }

    #[test]
    fn timeout_names_the_deadline() {
        assert_eq!(CollabError::Timeout(60_000).to_string(), "timed out after 60000ms");
    }
}
