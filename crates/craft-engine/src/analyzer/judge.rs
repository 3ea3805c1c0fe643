//! LLM-gated sub-tests for the Scene Analyzer rubric (§4.5).
//!
//! The Observer, Thematic Function, and Fusion sub-tests (and their
//! analogues for the other categories) are delegated to an LLM with a
//! strict JSON-schema response. This module isolates that call behind a
//! small trait so the scoring composition in [`super::scorer`] can be
//! tested without a live Transport.

use crate::transport::{CompletionParams, Message, Transport, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Strict JSON schema the judge model must return for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryJudgeResponse {
    pub awarded: f64,
    pub rationale: String,
    pub sub_test_notes: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("judge model response failed schema validation: {0}")]
    SchemaViolation(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One LLM-gated rubric category judgment.
#[async_trait]
pub trait SceneJudge: Send + Sync {
    async fn judge_category(
        &self,
        category: &str,
        max_points: f64,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<CategoryJudgeResponse, JudgeError>;
}

fn build_prompt(category: &str, max_points: f64, gold_standard: &str, text: &str) -> String {
    format!(
        "You are scoring prose for the \"{category}\" rubric category, worth {max_points} points.\n\
         Gold-standard voice reference:\n{gold_standard}\n\n\
         Text under review:\n{text}\n\n\
         Respond with strict JSON matching {{\"awarded\": number, \"rationale\": string, \"sub_test_notes\": [string]}}. \
         awarded must be between 0 and {max_points}. No prose outside the JSON object."
    )
}

/// Production judge: calls a configured model through [`Transport`] and
/// parses its response against the strict schema.
pub struct TransportJudge {
    pub transport: std::sync::Arc<Transport>,
    pub model_id: String,
}

#[async_trait]
impl SceneJudge for TransportJudge {
    async fn judge_category(
        &self,
        category: &str,
        max_points: f64,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<CategoryJudgeResponse, JudgeError> {
        let messages = vec![
            Message::system("You are a precise prose-quality judge. Output JSON only."),
            Message::user(prompt.to_string()),
        ];
        let response = self
            .transport
            .complete(&self.model_id, &messages, &CompletionParams::default(), cancel)
            .await?;

        let parsed: CategoryJudgeResponse = serde_json::from_str(response.text.trim())
            .map_err(|e| JudgeError::SchemaViolation(e.to_string()))?;

        if parsed.awarded < 0.0 || parsed.awarded > max_points {
            return Err(JudgeError::SchemaViolation(format!(
                "{category}: awarded {} outside [0, {max_points}]",
                parsed.awarded
            )));
        }
        Ok(parsed)
    }
}

pub fn category_prompt(category: &str, max_points: f64, gold_standard: &str, text: &str) -> String {
    build_prompt(category, max_points, gold_standard, text)
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A scripted judge for composition tests: returns queued responses
    /// in order, or a schema-violation error when the script calls for one.
    pub struct ScriptedJudge {
        pub responses: Mutex<Vec<Result<CategoryJudgeResponse, JudgeError>>>,
    }

    impl ScriptedJudge {
        pub fn new(responses: Vec<Result<CategoryJudgeResponse, JudgeError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl SceneJudge for ScriptedJudge {
        async fn judge_category(
            &self,
            _category: &str,
            _max_points: f64,
            _prompt: &str,
            _cancel: &CancellationToken,
        ) -> Result<CategoryJudgeResponse, JudgeError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(JudgeError::SchemaViolation("no more scripted responses".into()));
            }
            responses.remove(0)
        }
    }
}
