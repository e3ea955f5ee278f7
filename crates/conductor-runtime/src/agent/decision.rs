//! Decisions — what the loop does next, and where decisions come from.
//!
//! The [`DecisionEngine`] boundary lets the loop run against a scripted
//! engine in tests and against [`ModelDecisionEngine`] (an adapter over the
//! model-generator collaborator) in production. Model output is parsed
//! defensively: structured tool calls win, then a JSON intent object, and
//! anything unrecognized falls back to treating the free text as the final
//! answer.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::collab::{ChatMessage, ModelGenerator, ModelRequest, ToolDescriptor};
use conductor_core::events::RiskLevel;
use conductor_core::CollabError;
use serde_json::Value;
use tracing::debug;

use crate::delegation::DelegationSpec;

/// What the agent decided to do this iteration.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Execute a named tool.
    ToolCall {
        /// Tool to execute.
        tool_name: String,
        /// Arguments as JSON.
        arguments: Value,
    },
    /// Ask the user a question. Blocking questions suspend the turn.
    Clarify {
        /// Question text.
        question: String,
        /// Whether the turn suspends until the answer arrives.
        blocking: bool,
    },
    /// Ask the user to approve an action before proceeding. Always blocking.
    RequestApproval {
        /// What is being approved.
        description: String,
        /// Risk classification shown to the user.
        risk_level: RiskLevel,
    },
    /// Produce the final answer (subject to self-validation).
    Answer {
        /// Answer text.
        content: String,
    },
    /// Keep reasoning; no externally visible effect.
    Continue {
        /// Optional internal note carried into the next iteration.
        note: Option<String>,
    },
    /// Hand a sub-task to a specialist agent.
    Delegate(DelegationSpec),
    /// Hand independent sub-tasks to specialists concurrently.
    DelegateParallel(Vec<DelegationSpec>),
    /// Hand control back to the coordinator.
    Escalate {
        /// Why the current agent cannot proceed.
        reason: String,
    },
}

/// Everything a decision engine sees for one iteration.
#[derive(Clone, Debug)]
pub struct TurnContext {
    /// Session being handled.
    pub session_id: String,
    /// Turn being handled.
    pub turn_id: String,
    /// Agent currently deciding.
    pub active_agent: String,
    /// The user's request for this turn.
    pub request: String,
    /// Accumulated working notes: tool outcomes, validation feedback,
    /// synthetic error context from failed decision steps.
    pub notes: Vec<String>,
}

/// Produces the next [`Decision`] for a turn context.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Decide the next step.
    async fn decide(&self, ctx: &TurnContext) -> Result<Decision, CollabError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// ModelDecisionEngine — adapter over the model-generator collaborator
// ─────────────────────────────────────────────────────────────────────────────

const SYSTEM_PROMPT: &str = "\
You are the decision engine of an orchestration loop. Respond with a single \
JSON object: {\"intent\": \"tool_call\" | \"clarify\" | \"answer\" | \
\"continue\" | \"delegate\" | \"delegate_parallel\" | \"escalate\", ...}. \
Plain text is treated as a final answer.";

/// Decision engine backed by an LLM.
pub struct ModelDecisionEngine {
    model: Arc<dyn ModelGenerator>,
    tools: Vec<ToolDescriptor>,
}

impl ModelDecisionEngine {
    /// Create an engine over a model generator and the tool catalog it may
    /// expose to the model.
    #[must_use]
    pub fn new(model: Arc<dyn ModelGenerator>, tools: Vec<ToolDescriptor>) -> Self {
        Self { model, tools }
    }

    fn build_request(ctx: &TurnContext) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::user(&ctx.request)];
        for note in &ctx.notes {
            messages.push(ChatMessage::user(format!("[context] {note}")));
        }
        messages
    }
}

#[async_trait]
impl DecisionEngine for ModelDecisionEngine {
    async fn decide(&self, ctx: &TurnContext) -> Result<Decision, CollabError> {
        let response = self
            .model
            .generate(ModelRequest {
                messages: Self::build_request(ctx),
                system_prompt: Some(format!(
                    "{SYSTEM_PROMPT}\nYou are acting as: {}",
                    ctx.active_agent
                )),
                tools: if self.tools.is_empty() {
                    None
                } else {
                    Some(self.tools.clone())
                },
            })
            .await?;

        // Structured tool calls take precedence over content parsing.
        if let Some(call) = response.tool_calls.into_iter().next() {
            return Ok(Decision::ToolCall {
                tool_name: call.name,
                arguments: call.arguments,
            });
        }

        Ok(parse_intent(&response.content))
    }
}

/// Parse model content into a decision.
///
/// Unrecognized intents and non-JSON content fall back to `Answer` — a
/// defensive default so a chatty model can never wedge the loop.
pub(crate) fn parse_intent(content: &str) -> Decision {
    let Ok(value) = serde_json::from_str::<Value>(content.trim()) else {
        return Decision::Answer {
            content: content.to_string(),
        };
    };
    let Some(intent) = value.get("intent").and_then(Value::as_str) else {
        return Decision::Answer {
            content: content.to_string(),
        };
    };

    match intent {
        "tool_call" => Decision::ToolCall {
            tool_name: value
                .get("toolName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            arguments: value.get("arguments").cloned().unwrap_or(Value::Null),
        },
        "clarify" => Decision::Clarify {
            question: value
                .get("question")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            blocking: value
                .get("blocking")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        },
        "request_approval" => Decision::RequestApproval {
            description: value
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            risk_level: value
                .get("riskLevel")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or(RiskLevel::Medium),
        },
        "answer" => Decision::Answer {
            content: value
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or(content)
                .to_string(),
        },
        "continue" | "self_validate" => Decision::Continue {
            note: value
                .get("note")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        },
        "delegate" => match serde_json::from_value::<DelegationSpec>(
            value.get("delegation").cloned().unwrap_or(Value::Null),
        ) {
            Ok(spec) => Decision::Delegate(spec),
            Err(error) => {
                debug!(%error, "unparseable delegation; falling back to answer");
                Decision::Answer {
                    content: content.to_string(),
                }
            }
        },
        "delegate_parallel" => match serde_json::from_value::<Vec<DelegationSpec>>(
            value.get("delegations").cloned().unwrap_or(Value::Null),
        ) {
            Ok(specs) => Decision::DelegateParallel(specs),
            Err(error) => {
                debug!(%error, "unparseable parallel delegation; falling back to answer");
                Decision::Answer {
                    content: content.to_string(),
                }
            }
        },
        "escalate" => Decision::Escalate {
            reason: value
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unspecified")
                .to_string(),
        },
        other => {
            debug!(intent = other, "unrecognized intent; treating content as answer");
            Decision::Answer {
                content: content.to_string(),
            }
        }
    }
}
