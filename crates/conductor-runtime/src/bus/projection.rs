//! The [`Projection`] trait — a consumer of the workflow event bus.

use async_trait::async_trait;
use conductor_core::WorkflowEnvelope;

use crate::errors::RuntimeError;

/// A consumer of bus events that derives or mutates a view (conversation
/// state, client stream, audit log).
///
/// Projections are invoked sequentially in registration order; a projection
/// must never assume it runs concurrently with a sibling for the same event.
/// Errors returned from [`apply`](Self::apply) are logged and isolated — they
/// never abort the emit nor block later projections.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Stable name, used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Apply one envelope to this projection's view.
    async fn apply(&self, envelope: &WorkflowEnvelope) -> Result<(), RuntimeError>;
}
