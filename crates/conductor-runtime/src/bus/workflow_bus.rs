//! [`WorkflowBus`] — delivers every accepted envelope to all registered
//! projections, in registration order, exactly once per
//! `(session_id, event_id)`.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use conductor_core::WorkflowEnvelope;
use dashmap::DashMap;
use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::bus::projection::Projection;

/// Default per-session idempotency set capacity.
///
/// Eviction trades perfect long-session idempotency for bounded memory: once
/// a session has seen more than this many unique events, the oldest IDs
/// become replayable again.
const DEFAULT_DEDUP_CAPACITY: usize = 1000;

/// Per-session seen-event set with oldest-first eviction.
#[derive(Default)]
struct SessionDedup {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl SessionDedup {
    /// Admit an event ID. Returns `false` if it was already seen.
    fn admit(&mut self, event_id: &str, capacity: usize) -> bool {
        if self.seen.contains(event_id) {
            return false;
        }
        while self.order.len() >= capacity {
            if let Some(oldest) = self.order.pop_front() {
                let _ = self.seen.remove(&oldest);
            }
        }
        let _ = self.seen.insert(event_id.to_string());
        self.order.push_back(event_id.to_string());
        true
    }
}

/// Ordered, idempotent, multi-consumer event dispatcher.
///
/// INVARIANT: projections are invoked in registration order, each awaited
/// before the next. A projection failure is caught and logged; it never
/// prevents remaining projections from running and never aborts the emit.
pub struct WorkflowBus {
    projections: RwLock<Vec<Arc<dyn Projection>>>,
    dedup: DashMap<String, SessionDedup>,
    dedup_capacity: usize,
}

impl WorkflowBus {
    /// Create a bus with the default idempotency capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dedup_capacity(DEFAULT_DEDUP_CAPACITY)
    }

    /// Create a bus with a custom per-session idempotency capacity.
    #[must_use]
    pub fn with_dedup_capacity(capacity: usize) -> Self {
        Self {
            projections: RwLock::new(Vec::new()),
            dedup: DashMap::new(),
            dedup_capacity: capacity.max(1),
        }
    }

    /// Register a projection. Registration order is dispatch order.
    pub fn register(&self, projection: Arc<dyn Projection>) {
        self.projections.write().push(projection);
    }

    /// Number of registered projections.
    pub fn projection_count(&self) -> usize {
        self.projections.read().len()
    }

    /// Emit one envelope to all projections.
    ///
    /// Returns `false` if the envelope was a duplicate for its session
    /// (nothing dispatched), `true` if it was delivered.
    pub async fn emit(&self, envelope: &WorkflowEnvelope) -> bool {
        let admitted = {
            let mut entry = self.dedup.entry(envelope.session_id.clone()).or_default();
            entry.admit(&envelope.event_id, self.dedup_capacity)
        };
        if !admitted {
            counter!("bus_duplicate_events_total").increment(1);
            debug!(
                session_id = %envelope.session_id,
                event_id = %envelope.event_id,
                event_type = envelope.event_type(),
                "duplicate event dropped"
            );
            return false;
        }
        counter!("bus_events_total").increment(1);

        // Snapshot under the read lock, dispatch outside it.
        let snapshot: Vec<Arc<dyn Projection>> = self.projections.read().clone();
        for projection in snapshot {
            if let Err(error) = projection.apply(envelope).await {
                counter!("bus_projection_failures_total").increment(1);
                warn!(
                    projection = projection.name(),
                    session_id = %envelope.session_id,
                    event_id = %envelope.event_id,
                    event_type = envelope.event_type(),
                    %error,
                    "projection failed; continuing with remaining projections"
                );
            }
        }
        true
    }

    /// Emit a batch sequentially, preserving array order.
    ///
    /// Returns the number of envelopes actually delivered (non-duplicates).
    pub async fn emit_all(&self, envelopes: &[WorkflowEnvelope]) -> usize {
        let mut delivered = 0;
        for envelope in envelopes {
            if self.emit(envelope).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop the idempotency set for a session, permitting a later replay to
    /// be reprocessed (session reset/restart).
    pub fn clear_session(&self, session_id: &str) {
        let _ = self.dedup.remove(session_id);
    }
}

impl Default for WorkflowBus {
    fn default() -> Self {
        Self::new()
    }
}
