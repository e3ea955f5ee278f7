//! Self-validation — a secondary reviewer judging answer completeness.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::collab::{ChatMessage, ModelGenerator, ModelRequest};
use conductor_core::CollabError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Verdict of a completeness review.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    /// Whether the answer fully covers the request.
    pub is_complete: bool,
    /// Reviewer confidence in `[0, 1]`.
    pub confidence: f64,
    /// What is missing, when incomplete.
    pub feedback: String,
}

impl ValidationVerdict {
    /// A passing verdict with full confidence.
    #[must_use]
    pub fn pass() -> Self {
        Self {
            is_complete: true,
            confidence: 1.0,
            feedback: String::new(),
        }
    }
}

/// Judges whether a candidate answer fully covers the request.
#[async_trait]
pub trait SelfValidator: Send + Sync {
    /// Review one candidate answer.
    async fn validate(&self, request: &str, answer: &str) -> Result<ValidationVerdict, CollabError>;
}

const REVIEW_PROMPT: &str = "\
You review whether an answer fully covers a request. Respond with a single \
JSON object: {\"isComplete\": bool, \"confidence\": number, \"feedback\": string}.";

/// Self-validator backed by an LLM reviewer.
pub struct ModelSelfValidator {
    model: Arc<dyn ModelGenerator>,
}

impl ModelSelfValidator {
    /// Create a validator over a model generator.
    #[must_use]
    pub fn new(model: Arc<dyn ModelGenerator>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl SelfValidator for ModelSelfValidator {
    async fn validate(&self, request: &str, answer: &str) -> Result<ValidationVerdict, CollabError> {
        let response = self
            .model
            .generate(ModelRequest {
                messages: vec![ChatMessage::user(format!(
                    "Request:\n{request}\n\nAnswer:\n{answer}"
                ))],
                system_prompt: Some(REVIEW_PROMPT.to_string()),
                tools: None,
            })
            .await?;

        // An unusable verdict must never block an answer: the reviewer is an
        // optional safety net, so parse failures degrade to a pass.
        match serde_json::from_str::<ValidationVerdict>(response.content.trim()) {
            Ok(verdict) => Ok(verdict),
            Err(error) => {
                debug!(%error, "unparseable validation verdict; passing");
                Ok(ValidationVerdict::pass())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::CannedModel;

    #[tokio::test]
    async fn parses_structured_verdict() {
        let validator = ModelSelfValidator::new(Arc::new(CannedModel {
            content: r#"{"isComplete": false, "confidence": 0.3, "feedback": "no tests listed"}"#
                .into(),
        }));
        let verdict = validator.validate("list tests", "there are files").await.unwrap();
        assert!(!verdict.is_complete);
        assert!((verdict.confidence - 0.3).abs() < f64::EPSILON);
        assert_eq!(verdict.feedback, "no tests listed");
    }

    #[tokio::test]
    async fn unparseable_verdict_degrades_to_pass() {
        let validator = ModelSelfValidator::new(Arc::new(CannedModel {
            content: "looks fine to me!".into(),
        }));
        let verdict = validator.validate("req", "ans").await.unwrap();
        assert!(verdict.is_complete);
    }
}
