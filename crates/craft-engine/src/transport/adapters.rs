//! Per-provider adapters (§4.4): local OpenAI-compatible inference, and
//! OpenAI, Anthropic, and Gemini cloud providers, all via `rig-core`'s
//! per-provider clients. Isolates provider-specific quirks (endpoint URL,
//! auth header shape) behind the uniform [`Provider`] trait.

use super::error::TransportError;
use super::provider::Provider;
use super::types::{CompletionDelta, CompletionParams, CompletionResponse, Message, Role};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use rig::client::CompletionClient;
use rig::completion::{Chat, Message as RigMessage, Prompt};

/// Split a uniform message list into (system preamble, history, final
/// user turn) the way rig's `Chat`/`Prompt` traits expect it.
fn split_messages(messages: &[Message]) -> (Option<String>, Vec<RigMessage>, String) {
    let mut system = None;
    let mut history = Vec::new();
    let mut last_user = String::new();

    for message in messages {
        match message.role {
            Role::System => system = Some(message.content.clone()),
            Role::User => {
                if !last_user.is_empty() {
                    history.push(RigMessage::user(std::mem::take(&mut last_user)));
                }
                last_user = message.content.clone();
            }
            Role::Assistant => history.push(RigMessage::assistant(message.content.clone())),
        }
    }

    (system, history, last_user)
}

fn estimate_tokens(text: &str) -> u32 {
    ((text.len() as f64) / 4.0).ceil() as u32
}

/// Local OpenAI-compatible inference endpoint (vLLM/llama.cpp-style),
/// reached through `rig::providers::openai::CompletionsClient` pointed at
/// a local base URL — the lineage's own pattern for treating local
/// inference as an OpenAI-compatible provider.
pub struct LocalAdapter {
    base_url: String,
    api_key: String,
}

impl LocalAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn client(&self) -> Result<rig::providers::openai::CompletionsClient, TransportError> {
        rig::providers::openai::CompletionsClient::builder()
            .api_key(&self.api_key)
            .base_url(&self.base_url)
            .build()
            .map_err(|e| TransportError::Permanent(format!("failed to build local client: {e}")))
    }
}

macro_rules! impl_chat_provider {
    ($adapter:ty, $client_ctor:expr) => {
        #[async_trait]
        impl Provider for $adapter {
            async fn complete(
                &self,
                model: &str,
                messages: &[Message],
                params: &CompletionParams,
            ) -> Result<CompletionResponse, TransportError> {
                let client = $client_ctor(self)?;
                let (preamble, history, prompt) = split_messages(messages);
                let mut builder = client.agent(model).temperature(params.temperature);
                if let Some(preamble) = preamble {
                    builder = builder.preamble(&preamble);
                }
                let agent = builder.build();

                let response = if history.is_empty() {
                    agent.prompt(prompt.as_str()).await
                } else {
                    agent.chat(prompt.as_str(), history).await
                }
                .map_err(|e| TransportError::Transient(e.to_string()))?;

                Ok(CompletionResponse {
                    input_tokens: estimate_tokens(&prompt),
                    output_tokens: estimate_tokens(&response),
                    text: response,
                })
            }

            async fn complete_stream(
                &self,
                model: &str,
                messages: &[Message],
                params: &CompletionParams,
            ) -> Result<BoxStream<'static, Result<CompletionDelta, TransportError>>, TransportError> {
                // rig's streaming surface varies per provider; the uniform
                // fallback is a single completed delta, preserving the
                // "incremental deltas in order, terminated by finished"
                // contract for callers that don't special-case providers.
                let response = self.complete(model, messages, params).await?;
                let delta = CompletionDelta {
                    text: response.text,
                    finished: true,
                };
                Ok(stream::once(async move { Ok(delta) }).boxed())
            }

            async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, TransportError> {
                let client = $client_ctor(self)?;
                let embedding_model = client.embedding_model(model);
                let mut vectors = Vec::with_capacity(texts.len());
                for text in texts {
                    let embedding = embedding_model
                        .embed_text(text)
                        .await
                        .map_err(|e| TransportError::Transient(e.to_string()))?;
                    vectors.push(embedding.vec.iter().map(|v| *v as f32).collect());
                }
                Ok(vectors)
            }
        }
    };
}

impl_chat_provider!(LocalAdapter, |a: &LocalAdapter| a.client());

/// Cloud OpenAI adapter, authenticated from the environment.
pub struct OpenAiAdapter {
    api_key: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into() }
    }

    fn client(&self) -> Result<rig::providers::openai::Client, TransportError> {
        Ok(rig::providers::openai::Client::new(&self.api_key))
    }
}

impl_chat_provider!(OpenAiAdapter, |a: &OpenAiAdapter| a.client());

/// Cloud Anthropic adapter.
pub struct AnthropicAdapter {
    api_key: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into() }
    }

    fn client(&self) -> Result<rig::providers::anthropic::Client, TransportError> {
        Ok(rig::providers::anthropic::Client::new(&self.api_key))
    }
}

impl_chat_provider!(AnthropicAdapter, |a: &AnthropicAdapter| a.client());

/// Cloud Gemini adapter.
pub struct GeminiAdapter {
    api_key: String,
}

impl GeminiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into() }
    }

    fn client(&self) -> Result<rig::providers::gemini::Client, TransportError> {
        Ok(rig::providers::gemini::Client::new(&self.api_key))
    }
}

impl_chat_provider!(GeminiAdapter, |a: &GeminiAdapter| a.client());
