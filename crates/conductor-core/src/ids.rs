//! Prefixed UUIDv7 identifiers.
//!
//! Every identifier in the system is a short type prefix plus a UUIDv7, so
//! IDs are globally unique, sortable by creation time, and self-describing
//! in logs (`evt_0192...` is always an event, `sess_0192...` a session).

use uuid::Uuid;

/// Generate a fresh event ID (`evt_` prefix).
#[must_use]
pub fn new_event_id() -> String {
    format!("evt_{}", Uuid::now_v7())
}

/// Generate a fresh session ID (`sess_` prefix).
#[must_use]
pub fn new_session_id() -> String {
    format!("sess_{}", Uuid::now_v7())
}

/// Generate a fresh request ID (`req_` prefix).
#[must_use]
pub fn new_request_id() -> String {
    format!("req_{}", Uuid::now_v7())
}

/// Generate a fresh turn ID (`turn_` prefix).
#[must_use]
pub fn new_turn_id() -> String {
    format!("turn_{}", Uuid::now_v7())
}

/// Generate a fresh obligation ID (`obl_` prefix).
#[must_use]
pub fn new_obligation_id() -> String {
    format!("obl_{}", Uuid::now_v7())
}

/// Generate a fresh delegation ID (`del_` prefix).
#[must_use]
pub fn new_delegation_id() -> String {
    format!("del_{}", Uuid::now_v7())
}

/// Generate a fresh question gate ID (`q_` prefix).
#[must_use]
pub fn new_question_id() -> String {
    format!("q_{}", Uuid::now_v7())
}

/// Generate a fresh approval gate ID (`appr_` prefix).
#[must_use]
pub fn new_approval_id() -> String {
    format!("appr_{}", Uuid::now_v7())
}

/// Generate a fresh tool call ID (`tc_` prefix).
#[must_use]
pub fn new_tool_call_id() -> String {
    format!("tc_{}", Uuid::now_v7())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_prefixed_and_long_enough() {
        let id = new_event_id();
        assert!(id.starts_with("evt_"));
        // Idempotency keys require opaque IDs of at least 16 characters.
        assert!(id.len() >= 16);
    }

    #[test]
    fn event_ids_are_unique_per_call() {
        let a = new_event_id();
        let b = new_event_id();
        assert_ne!(a, b);
    }

    #[test]
    fn all_prefixes_distinct() {
        assert!(new_session_id().starts_with("sess_"));
        assert!(new_request_id().starts_with("req_"));
        assert!(new_turn_id().starts_with("turn_"));
        assert!(new_obligation_id().starts_with("obl_"));
        assert!(new_delegation_id().starts_with("del_"));
        assert!(new_question_id().starts_with("q_"));
        assert!(new_approval_id().starts_with("appr_"));
        assert!(new_tool_call_id().starts_with("tc_"));
    }

}
