//! Agent decision machinery.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `registry` | Read-only agent table, injected everywhere it is needed |
//! | `decision` | [`Decision`] intents, engine boundary, model adapter |
//! | `validation` | Optional answer-completeness reviewer |
//! | `decision_loop` | The bounded qualify → act → gate → complete loop |

pub mod decision;
#[allow(clippy::module_name_repetitions)]
pub mod decision_loop;
pub mod registry;
pub mod validation;

pub use decision::{Decision, DecisionEngine, ModelDecisionEngine, TurnContext};
pub use decision_loop::{DecisionLoop, LoopConfig, StepRecord, TurnReport, TurnStatus};
pub use registry::{AgentProfile, AgentRegistry};
pub use validation::{ModelSelfValidator, SelfValidator, ValidationVerdict};
