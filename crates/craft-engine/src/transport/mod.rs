//! LLT Transport (§4.4): uniform `complete`/`complete_stream`/`embed`
//! across heterogeneous providers, with retry, per-call and
//! per-token-stall timeouts, and cooperative cancellation.

mod adapters;
mod error;
mod provider;
mod retry;
mod types;

pub use adapters::{AnthropicAdapter, GeminiAdapter, LocalAdapter, OpenAiAdapter};
pub use error::TransportError;
pub use provider::Provider;
pub use retry::RetryPolicy;
pub use types::{CompletionDelta, CompletionParams, CompletionResponse, Message, Role};

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-call and per-token-stall timeout configuration (§4.4, §5).
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    pub call: Duration,
    pub token_stall: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            call: Duration::from_secs(120),
            token_stall: Duration::from_secs(30),
        }
    }
}

/// Routes calls to the adapter registered for a `model_id`'s prefix
/// (`local:`, `openai:`, `anthropic:`, `gemini:`), applying retry and
/// timeout policy uniformly.
pub struct Transport {
    adapters: HashMap<&'static str, Arc<dyn Provider>>,
    retry: RetryPolicy,
    timeouts: TimeoutPolicy,
}

impl Transport {
    pub fn new(retry: RetryPolicy, timeouts: TimeoutPolicy) -> Self {
        Self {
            adapters: HashMap::new(),
            retry,
            timeouts,
        }
    }

    pub fn register(&mut self, prefix: &'static str, provider: Arc<dyn Provider>) {
        self.adapters.insert(prefix, provider);
    }

    fn resolve(&self, model_id: &str) -> Result<(Arc<dyn Provider>, &str), TransportError> {
        let (prefix, model) = model_id
            .split_once(':')
            .ok_or_else(|| TransportError::UnknownModel(model_id.to_string()))?;
        let provider = self
            .adapters
            .get(prefix)
            .cloned()
            .ok_or_else(|| TransportError::UnknownModel(model_id.to_string()))?;
        Ok((provider, model))
    }

    /// Non-streaming completion against `model_id`, retried per policy
    /// and bounded by the per-call timeout. Cancellable via `cancel`.
    pub async fn complete(
        &self,
        model_id: &str,
        messages: &[Message],
        params: &CompletionParams,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, TransportError> {
        let (provider, model) = self.resolve(model_id)?;
        let call_timeout = self.timeouts.call;

        self.retry
            .run(|| async {
                tokio::select! {
                    _ = cancel.cancelled() => Err(TransportError::Cancelled),
                    result = tokio::time::timeout(call_timeout, provider.complete(model, messages, params)) => {
                        match result {
                            Ok(inner) => inner,
                            Err(_) => Err(TransportError::CallTimeout(call_timeout.as_secs())),
                        }
                    }
                }
            })
            .await
    }

    /// Streaming completion. Cancelling `cancel` mid-stream aborts
    /// delivery of further deltas and frees the provider slot; a gap
    /// between deltas longer than the token-stall timeout ends the
    /// stream with [`TransportError::TokenStall`].
    pub async fn complete_stream(
        &self,
        model_id: &str,
        messages: &[Message],
        params: &CompletionParams,
        cancel: CancellationToken,
    ) -> Result<futures::stream::BoxStream<'static, Result<CompletionDelta, TransportError>>, TransportError> {
        let (provider, model) = self.resolve(model_id)?;
        let inner = provider.complete_stream(model, messages, params).await?;
        let stall = self.timeouts.token_stall;

        struct State {
            inner: futures::stream::BoxStream<'static, Result<CompletionDelta, TransportError>>,
            cancel: CancellationToken,
            stall: Duration,
            done: bool,
        }

        let state = State {
            inner,
            cancel,
            stall,
            done: false,
        };

        let guarded = futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            tokio::select! {
                _ = state.cancel.cancelled() => {
                    state.done = true;
                    Some((Err(TransportError::Cancelled), state))
                }
                next = tokio::time::timeout(state.stall, state.inner.next()) => {
                    match next {
                        Err(_) => {
                            state.done = true;
                            Some((Err(TransportError::TokenStall(state.stall.as_secs())), state))
                        }
                        Ok(None) => None,
                        Ok(Some(item)) => {
                            let finished = matches!(&item, Ok(d) if d.finished) || item.is_err();
                            state.done = finished;
                            Some((item, state))
                        }
                    }
                }
            }
        });

        Ok(guarded.boxed())
    }

    /// Embed a batch of texts against `model_id`, retried per policy.
    pub async fn embed(&self, model_id: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, TransportError> {
        let (provider, model) = self.resolve(model_id)?;
        self.retry.run(|| provider.embed(model, texts)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::{self, StreamExt as _};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        failures_before_success: AtomicU32,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        async fn complete(
            &self,
            _model: &str,
            _messages: &[Message],
            _params: &CompletionParams,
        ) -> Result<CompletionResponse, TransportError> {
            if self.failures_before_success.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(TransportError::Transient("flaky".into()));
            }
            Ok(CompletionResponse {
                text: "ok".into(),
                input_tokens: 1,
                output_tokens: 1,
            })
        }

        async fn complete_stream(
            &self,
            _model: &str,
            _messages: &[Message],
            _params: &CompletionParams,
        ) -> Result<futures::stream::BoxStream<'static, Result<CompletionDelta, TransportError>>, TransportError>
        {
            Ok(stream::iter(vec![
                Ok(CompletionDelta { text: "a".into(), finished: false }),
                Ok(CompletionDelta { text: "b".into(), finished: true }),
            ])
            .boxed())
        }

        async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, TransportError> {
            Ok(texts.iter().map(|_| vec![0.0, 1.0]).collect())
        }
    }

    fn transport_with(provider: FlakyProvider) -> Transport {
        let mut transport = Transport::new(
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
            },
            TimeoutPolicy {
                call: Duration::from_secs(5),
                token_stall: Duration::from_secs(5),
            },
        );
        transport.register("local", Arc::new(provider));
        transport
    }

    #[tokio::test]
    async fn unknown_prefix_is_rejected() {
        let transport = transport_with(FlakyProvider {
            failures_before_success: AtomicU32::new(0),
        });
        let err = transport
            .complete(
                "ghost:model",
                &[Message::user("hi")],
                &CompletionParams::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownModel(_)));
    }

    #[tokio::test]
    async fn retries_through_transient_failures_and_succeeds() {
        let transport = transport_with(FlakyProvider {
            failures_before_success: AtomicU32::new(2),
        });
        let response = transport
            .complete(
                "local:llama",
                &[Message::user("hi")],
                &CompletionParams::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.text, "ok");
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_call() {
        let transport = transport_with(FlakyProvider {
            failures_before_success: AtomicU32::new(0),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = transport
            .complete("local:llama", &[Message::user("hi")], &CompletionParams::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }

    #[tokio::test]
    async fn stream_preserves_order_and_terminates_on_finished() {
        let transport = transport_with(FlakyProvider {
            failures_before_success: AtomicU32::new(0),
        });
        let mut stream = transport
            .complete_stream(
                "local:llama",
                &[Message::user("hi")],
                &CompletionParams::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.text, "a");
        assert_eq!(second.text, "b");
        assert!(second.finished);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn embed_preserves_input_order() {
        let transport = transport_with(FlakyProvider {
            failures_before_success: AtomicU32::new(0),
        });
        let vectors = transport
            .embed("local:embed-model", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
    }
}
