//! LLM-gated prose transforms for the Enhancement Engine (§4.8): the
//! Action-Prompt per-fix rewrite and each Six-Pass concern. Isolated
//! behind a trait mirroring [`crate::analyzer::SceneJudge`] so the
//! engine's mode logic can be tested without a live [`Transport`].

use crate::transport::{CompletionParams, Message, Transport, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One instruction-constrained rewrite of `text`, applied by one pass
/// or one Action-Prompt fix.
#[async_trait]
pub trait EnhancementTransform: Send + Sync {
    async fn transform(
        &self,
        instruction: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, TransformError>;
}

/// Production transform: calls a configured model through [`Transport`].
pub struct TransportTransform {
    pub transport: Arc<Transport>,
    pub model_id: String,
}

#[async_trait]
impl EnhancementTransform for TransportTransform {
    async fn transform(
        &self,
        instruction: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, TransformError> {
        let messages = vec![
            Message::system("You are a precise prose editor. Output only the revised text, no commentary, no markdown fences."),
            Message::user(format!("{instruction}\n\nTEXT:\n{text}")),
        ];
        let response = self
            .transport
            .complete(&self.model_id, &messages, &CompletionParams::default(), cancel)
            .await?;
        Ok(response.text)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A scripted transform for engine-logic tests: returns queued
    /// responses in order, echoing the input text unchanged once the
    /// script is exhausted.
    pub struct ScriptedTransform {
        pub responses: Mutex<Vec<Result<String, TransformError>>>,
    }

    impl ScriptedTransform {
        pub fn new(responses: Vec<Result<String, TransformError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl EnhancementTransform for ScriptedTransform {
        async fn transform(
            &self,
            _instruction: &str,
            text: &str,
            _cancel: &CancellationToken,
        ) -> Result<String, TransformError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(text.to_string());
            }
            responses.remove(0)
        }
    }
}
