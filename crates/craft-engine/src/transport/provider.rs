//! The `Provider` trait: one implementation per backend, selected by
//! `model_id` prefix at `Transport` construction (§4.4).

use super::error::TransportError;
use super::types::{CompletionDelta, CompletionParams, CompletionResponse, Message};
use async_trait::async_trait;
use futures::stream::BoxStream;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Non-streaming completion.
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<CompletionResponse, TransportError>;

    /// Streaming completion; the returned stream yields deltas in order
    /// and terminates with a final delta where `finished` is `true`.
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<BoxStream<'static, Result<CompletionDelta, TransportError>>, TransportError>;

    /// Embed a batch of texts, preserving input order.
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, TransportError>;
}
