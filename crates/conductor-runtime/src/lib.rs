//! # conductor-runtime
//!
//! The event-sourced orchestration core: ordered/idempotent event bus,
//! conversation-state projection, obligation ledger, gate manager,
//! delegation runner, agent decision loop, and the command dispatcher with
//! session lifecycle and replay.
//!
//! - **Bus**: delivers every envelope to all projections, in registration
//!   order, exactly once per `(session_id, event_id)`
//! - **State**: per-session [`state::ConversationState`], mutated only by the
//!   state projection reacting to events
//! - **Obligations**: tracked commitments with one-way terminal transitions
//! - **Gates**: blocking/non-blocking questions and approvals, turn-scoped
//! - **Delegation**: sequential and parallel sub-agent dispatch with
//!   normalized outcomes and escalation detours
//! - **Loop**: bounded qualify → act → gate → complete iteration per turn
//! - **Dispatcher**: transport-neutral commands in, typed outcomes out, with
//!   per-session replay for reconnecting clients
//!
//! ## Crate Position
//!
//! Aggregation layer. Depends on: conductor-core.
//! Tool implementations, LLM providers, and persistence are consumed through
//! the collaborator traits in `conductor_core::collab`.

#![deny(unsafe_code)]

pub mod agent;
pub mod bus;
pub mod delegation;
pub mod dispatcher;
pub mod errors;
pub mod gates;
pub mod obligations;
pub mod state;
#[cfg(test)]
pub(crate) mod testutil;

pub use agent::{DecisionLoop, LoopConfig, TurnReport, TurnStatus};
pub use bus::{Projection, WorkflowBus};
pub use dispatcher::{DispatchOutcome, Dispatcher, HelloAck, InboundCommand};
pub use errors::RuntimeError;
pub use gates::GateManager;
pub use state::{ConversationState, StateProjection};
