//! Transport failure taxonomy, normalized across providers (§4.4, §7).

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("model '{0}' is not served by any registered adapter")]
    UnknownModel(String),
    #[error("provider rejected the request permanently: {0}")]
    Permanent(String),
    #[error("provider call failed transiently: {0}")]
    Transient(String),
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("call exceeded its {0}s timeout")]
    CallTimeout(u64),
    #[error("token stream stalled for more than {0}s")]
    TokenStall(u64),
    #[error("call cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Transient(_) | TransportError::RateLimited { .. } | TransportError::CallTimeout(_)
        )
    }
}
