//! Client replay — per-session bounded ring buffer of broadcast envelopes.
//!
//! Every client-visible envelope gets a strictly increasing per-session
//! sequence number. A reconnecting client asks for "everything since seq N"
//! and receives exactly the missed envelopes, in order, with no gaps and no
//! duplicates — bounded by buffer capacity. History older than the capacity
//! is not recoverable here; it lives in the persisted transcript.

use std::collections::VecDeque;

use async_trait::async_trait;
use conductor_core::envelope::Visibility;
use conductor_core::WorkflowEnvelope;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::bus::Projection;
use crate::errors::RuntimeError;

/// Default replay capacity per session.
const DEFAULT_REPLAY_CAPACITY: usize = 500;

/// A buffered envelope with its per-session sequence number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedEnvelope {
    /// Strictly increasing within the session, starting at 1.
    pub seq: u64,
    /// The buffered envelope.
    #[serde(flatten)]
    pub envelope: WorkflowEnvelope,
}

/// Fixed-capacity ring of sequenced envelopes for one session.
struct ReplayBuffer {
    next_seq: u64,
    entries: VecDeque<SequencedEnvelope>,
}

impl ReplayBuffer {
    fn new() -> Self {
        Self {
            next_seq: 1,
            entries: VecDeque::new(),
        }
    }

    fn push(&mut self, envelope: WorkflowEnvelope, capacity: usize) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        while self.entries.len() >= capacity {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(SequencedEnvelope { seq, envelope });
        seq
    }

    fn since(&self, after_seq: u64) -> Vec<SequencedEnvelope> {
        self.entries
            .iter()
            .filter(|e| e.seq > after_seq)
            .cloned()
            .collect()
    }

    fn current_seq(&self) -> u64 {
        self.next_seq - 1
    }
}

/// Client-facing projection: buffers every `Visibility::Ui` envelope for
/// replay. Internal envelopes are consumed by state/audit only and never
/// reach clients.
pub struct BroadcastProjection {
    buffers: DashMap<String, ReplayBuffer>,
    capacity: usize,
}

impl BroadcastProjection {
    /// Create with the default per-session capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Create with a custom per-session capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Envelopes with `seq > after_seq`, in order.
    #[must_use]
    pub fn events_since(&self, session_id: &str, after_seq: u64) -> Vec<SequencedEnvelope> {
        self.buffers
            .get(session_id)
            .map(|b| b.since(after_seq))
            .unwrap_or_default()
    }

    /// Highest sequence number assigned for a session (0 if none).
    #[must_use]
    pub fn current_seq(&self, session_id: &str) -> u64 {
        self.buffers.get(session_id).map_or(0, |b| b.current_seq())
    }
}

impl Default for BroadcastProjection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for BroadcastProjection {
    fn name(&self) -> &'static str {
        "client-broadcast"
    }

    async fn apply(&self, envelope: &WorkflowEnvelope) -> Result<(), RuntimeError> {
        if envelope.visibility == Visibility::Ui {
            let _ = self
                .buffers
                .entry(envelope.session_id.clone())
                .or_insert_with(ReplayBuffer::new)
                .push(envelope.clone(), self.capacity);
        }
        Ok(())
    }
}
