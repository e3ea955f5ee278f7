//! # conductor-core
//!
//! Foundation types for the Conductor orchestration core.
//!
//! - **IDs**: prefixed UUIDv7 identifiers (`evt_`, `sess_`, `req_`, ...)
//! - **Envelope**: [`WorkflowEnvelope`] — the immutable record wrapping every
//!   domain event with session/turn/ordering metadata
//! - **Events**: [`WorkflowEventKind`] — tagged union of every event payload,
//!   one shape per dot-namespaced type string
//! - **Context**: [`RequestContext`] — per-command identity threaded through
//!   every event produced while handling that command
//! - **Collaborators**: boundary traits for tools, model generation, and
//!   notification/persistence sinks (implementations live outside this core)
//!
//! ## Crate Position
//!
//! Foundation layer. No internal dependencies.
//! Depended on by: conductor-runtime.

#![deny(unsafe_code)]

pub mod collab;
pub mod context;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod text;

pub use context::RequestContext;
pub use envelope::{EventSource, Visibility, WorkflowEnvelope};
pub use errors::CollabError;
pub use events::WorkflowEventKind;
