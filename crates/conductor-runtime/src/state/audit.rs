//! [`AuditProjection`] — structured-logging consumer, registered last.

use async_trait::async_trait;
use conductor_core::WorkflowEnvelope;
use tracing::info;

use crate::bus::Projection;
use crate::errors::RuntimeError;

/// Logs every delivered envelope under the `audit` target.
///
/// Registered after the state and broadcast projections so the audit line is
/// written only for events the rest of the pipeline has already observed.
#[derive(Default)]
pub struct AuditProjection;

impl AuditProjection {
    /// Create the audit projection.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Projection for AuditProjection {
    fn name(&self) -> &'static str {
        "audit-log"
    }

    async fn apply(&self, envelope: &WorkflowEnvelope) -> Result<(), RuntimeError> {
        info!(
            target: "audit",
            session_id = %envelope.session_id,
            request_id = %envelope.request_id,
            turn_id = %envelope.turn_id,
            event_id = %envelope.event_id,
            event_type = envelope.event_type(),
            source = ?envelope.source,
            visibility = ?envelope.visibility,
            "event"
        );
        Ok(())
    }
}
