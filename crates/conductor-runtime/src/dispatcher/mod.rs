//! Command dispatcher and session/replay registry.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `commands` | Transport-neutral command schema and typed outcomes |
//! | `replay` | Per-session sequenced ring buffer + client-broadcast projection |
//! | `dispatcher` | [`Dispatcher`] — session resolution, loop invocation, gate routing |

pub mod commands;
#[allow(clippy::module_name_repetitions)]
pub mod dispatcher;
pub mod replay;

pub use commands::{DispatchOutcome, HelloAck, InboundCommand};
pub use dispatcher::Dispatcher;
pub use replay::{BroadcastProjection, SequencedEnvelope};
