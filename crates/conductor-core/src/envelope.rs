//! The [`WorkflowEnvelope`] — immutable wrapper around every domain event.
//!
//! One envelope is created per causal step. The envelope is pure data:
//! construction never dispatches anything, and calling a constructor twice
//! with identical inputs yields two distinct envelopes (fresh `event_id`
//! each time). Deduplication on `(session_id, event_id)` is the bus's job,
//! not the constructor's.

use serde::{Deserialize, Serialize};

use crate::events::WorkflowEventKind;
use crate::ids;

/// Which component produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Command dispatcher / routing layer (the default).
    Router,
    /// The agent decision loop.
    Loop,
    /// The gate manager.
    Gate,
    /// The delegation runner.
    Delegation,
    /// Internal machinery (audit, maintenance).
    System,
}

/// Who an event is intended for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Broadcast to connected clients and buffered for replay (the default).
    Ui,
    /// Consumed only by in-process projections (state, audit).
    Internal,
}

/// Immutable record wrapping one domain event with session/turn metadata.
///
/// Idempotency key: `(session_id, event_id)`. Two envelopes agreeing on both
/// are the *same* occurrence and are delivered once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEnvelope {
    /// Globally unique per creation (`evt_` + UUIDv7).
    pub event_id: String,
    /// Session this event belongs to.
    pub session_id: String,
    /// Inbound command that caused this event.
    pub request_id: String,
    /// User turn this event belongs to.
    pub turn_id: String,
    /// RFC 3339 creation timestamp.
    pub timestamp: String,
    /// Producing component.
    pub source: EventSource,
    /// Event that directly caused this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// Groups events across a multi-step exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Intended audience.
    pub visibility: Visibility,
    /// Typed payload, flattened into the wire form under a `type` tag.
    #[serde(flatten)]
    pub kind: WorkflowEventKind,
}

impl WorkflowEnvelope {
    /// Tag this envelope as caused by another event.
    #[must_use]
    pub fn caused_by(mut self, event_id: impl Into<String>) -> Self {
        self.causation_id = Some(event_id.into());
        self
    }

    /// Tag this envelope with a correlation ID.
    #[must_use]
    pub fn correlated(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Override the producing component.
    #[must_use]
    pub fn from_source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    /// Mark this envelope as projection-only (not client-visible).
    #[must_use]
    pub fn internal(mut self) -> Self {
        self.visibility = Visibility::Internal;
        self
    }

    /// Dot-namespaced event type string.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Build an envelope from explicit identity parts.
    ///
    /// Defaults: `source = Router`, `visibility = Ui`, no causation or
    /// correlation. Generates a fresh `event_id` and timestamp on every call.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        turn_id: impl Into<String>,
        kind: WorkflowEventKind,
    ) -> Self {
        Self {
            event_id: ids::new_event_id(),
            session_id: session_id.into(),
            request_id: request_id.into(),
            turn_id: turn_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            source: EventSource::Router,
            causation_id: None,
            correlation_id: None,
            visibility: Visibility::Ui,
            kind,
        }
    }
}
