//! Collaborator contracts consumed by the orchestration core.
//!
//! Concrete tools, LLM providers, and persistence live outside this
//! workspace; the core sees them only through these traits. Each contract is
//! deliberately narrow: execute a named tool, generate a model response,
//! persist a turn, fire a notification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CollabError;

// ─────────────────────────────────────────────────────────────────────────────
// Tool execution
// ─────────────────────────────────────────────────────────────────────────────

/// Settled outcome of one tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    /// Whether the tool succeeded.
    pub success: bool,
    /// Tool output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Human-readable error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time.
    pub duration_ms: u64,
}

impl ToolOutcome {
    /// Successful outcome.
    #[must_use]
    pub fn ok(output: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            duration_ms,
        }
    }

    /// Failed outcome.
    #[must_use]
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Executes named tools on behalf of the loop.
///
/// Safe to call concurrently for read-only tools; mutating tools are called
/// sequentially by the caller's own discipline, not enforced here.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one tool call. Never panics; failures come back as a
    /// `success = false` outcome.
    async fn execute(&self, tool_name: &str, arguments: &Value) -> ToolOutcome;
}

// ─────────────────────────────────────────────────────────────────────────────
// Model generation
// ─────────────────────────────────────────────────────────────────────────────

/// Chat role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instruction.
    System,
    /// User-authored content.
    User,
    /// Model-authored content.
    Assistant,
    /// Tool result content.
    Tool,
}

/// One message in a model request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Speaker role.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl ChatMessage {
    /// Shorthand for a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Shorthand for an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A tool the model may call, described for the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema of the arguments.
    pub parameters: Value,
}

/// Model request at the provider boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// System prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Tools available this call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDescriptor>>,
}

/// A tool call emitted by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelToolCall {
    /// Provider-assigned call ID.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments as JSON.
    pub arguments: Value,
}

/// Why the model stopped generating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of response.
    Stop,
    /// Stopped to call tools.
    ToolUse,
    /// Output limit reached.
    Length,
}

/// Model response at the provider boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    /// Text content.
    pub content: String,
    /// Tool calls requested by the model.
    #[serde(default)]
    pub tool_calls: Vec<ModelToolCall>,
    /// Stop reason.
    pub finish_reason: FinishReason,
}

/// Generates model responses.
#[async_trait]
pub trait ModelGenerator: Send + Sync {
    /// Generate one response for the given request.
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, CollabError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Fire-and-forget user-facing notification sink.
///
/// Failures are the implementation's problem; the core logs and moves on.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a message to the user's notification surface.
    async fn notify(&self, session_id: &str, message: &str);
}

/// Persists completed turn outcomes.
#[async_trait]
pub trait TurnPersister: Send + Sync {
    /// Persist the outcome of one turn. Errors are logged by the caller and
    /// never become turn failures.
    async fn persist_turn(
        &self,
        session_id: &str,
        turn_id: &str,
        message: &str,
    ) -> Result<(), CollabError>;
}
