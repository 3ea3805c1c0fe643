//! Error taxonomy and the RPC error envelope (§7).
//!
//! Every module-level error type converges here at the RPC boundary via
//! [`ErrorKind::from`] impls, so external callers always see the closed
//! taxonomy from §7 rather than a module's internal error shape.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed error taxonomy from §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSetting,
    VoiceBundleInvalid,
    PatternCompileError,
    ModelUnavailable,
    ProviderTransient,
    ProviderPermanent,
    RateLimited,
    SchemaViolation,
    BudgetExceeded,
    Cancelled,
    Timeout,
}

impl ErrorKind {
    /// Per §7: whether this kind is retryable by default. Timeout is
    /// treated as ProviderTransient for retry policy, per §7's note.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderTransient | ErrorKind::RateLimited | ErrorKind::Timeout
        )
    }
}

/// One structured error, never leaking a stack trace, always carrying a
/// one-line actionable message (§7 "User-visible behavior").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CraftError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

impl CraftError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = kind.retryable();
        Self {
            kind,
            message: message.into(),
            retryable,
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl std::fmt::Display for CraftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CraftError {}

impl From<crate::transport::TransportError> for CraftError {
    fn from(err: crate::transport::TransportError) -> Self {
        use crate::transport::TransportError as T;
        let kind = match &err {
            T::UnknownModel(_) | T::Permanent(_) => ErrorKind::ProviderPermanent,
            T::Transient(_) | T::CallTimeout(_) | T::TokenStall(_) => ErrorKind::ProviderTransient,
            T::RateLimited { .. } => ErrorKind::RateLimited,
            T::Cancelled => ErrorKind::Cancelled,
        };
        CraftError::new(kind, err.to_string())
    }
}

impl From<crate::model::VoiceBundleError> for CraftError {
    fn from(err: crate::model::VoiceBundleError) -> Self {
        CraftError::new(ErrorKind::VoiceBundleInvalid, err.to_string())
    }
}

impl From<crate::model::ScaffoldInvariantError> for CraftError {
    fn from(err: crate::model::ScaffoldInvariantError) -> Self {
        CraftError::new(ErrorKind::VoiceBundleInvalid, err.to_string())
    }
}

impl From<crate::patterns::PatternError> for CraftError {
    fn from(err: crate::patterns::PatternError) -> Self {
        CraftError::new(ErrorKind::PatternCompileError, err.to_string())
    }
}

impl From<crate::registry::RegistryError> for CraftError {
    fn from(err: crate::registry::RegistryError) -> Self {
        use crate::registry::RegistryError as R;
        let kind = match &err {
            R::NoCandidates(_) => ErrorKind::ModelUnavailable,
            R::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            R::UnknownReservation(_) => ErrorKind::ModelUnavailable,
        };
        CraftError::new(kind, err.to_string())
    }
}

impl From<crate::analyzer::AnalyzerError> for CraftError {
    fn from(err: crate::analyzer::AnalyzerError) -> Self {
        use crate::analyzer::AnalyzerError as A;
        let kind = match &err {
            A::UnknownPhase(_) => ErrorKind::VoiceBundleInvalid,
            A::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            A::PatternsUncompiled(_) => ErrorKind::PatternCompileError,
            A::PatternCompile(_) => ErrorKind::PatternCompileError,
            A::Settings(_) => ErrorKind::InvalidSetting,
        };
        CraftError::new(kind, err.to_string())
    }
}

impl From<crate::scaffold::ScaffoldError> for CraftError {
    fn from(err: crate::scaffold::ScaffoldError) -> Self {
        use crate::scaffold::ScaffoldError as S;
        let kind = match &err {
            S::Invariant(_) => ErrorKind::VoiceBundleInvalid,
            S::Enrich(_) => ErrorKind::SchemaViolation,
            S::Settings(_) => ErrorKind::InvalidSetting,
        };
        CraftError::new(kind, err.to_string())
    }
}

impl From<crate::enhancement::EnhancementError> for CraftError {
    fn from(err: crate::enhancement::EnhancementError) -> Self {
        use crate::enhancement::EnhancementError as E;
        match err {
            E::Analyzer(inner) => inner.into(),
            E::Settings(inner) => CraftError::new(ErrorKind::InvalidSetting, inner.to_string()),
            E::ModelUnavailable => CraftError::new(ErrorKind::ModelUnavailable, "no model available for enhancement transforms"),
        }
    }
}

/// Result alias used throughout `craft-engine`.
pub type CraftResult<T> = Result<T, CraftError>;

/// The `{ok: true, value} | {ok: false, error}` envelope every RPC wraps
/// its result in (§6). A plain struct rather than a tagged enum: `ok` is a
/// literal JSON boolean, which serde's enum tagging cannot discriminate on
/// directly, so the invariant (exactly one of `value`/`error` present,
/// matching `ok`) is enforced in the constructors instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<CraftError>,
}

impl<T> Envelope<T> {
    pub fn from_result(result: CraftResult<T>) -> Self {
        match result {
            Ok(value) => Envelope {
                ok: true,
                value: Some(value),
                error: None,
            },
            Err(error) => Envelope {
                ok: false,
                value: None,
                error: Some(error),
            },
        }
    }

    /// Reconstruct the `CraftResult` this envelope represents. An envelope
    /// with `ok: true` but no value (malformed transport payload) maps to
    /// a `SchemaViolation`, never a panic.
    pub fn into_result(self) -> CraftResult<T> {
        if self.ok {
            self.value.ok_or_else(|| {
                CraftError::new(ErrorKind::SchemaViolation, "envelope marked ok with no value")
            })
        } else {
            Err(self.error.unwrap_or_else(|| {
                CraftError::new(ErrorKind::SchemaViolation, "envelope marked error with no error body")
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_rate_limited_and_timeout_are_retryable() {
        assert!(ErrorKind::ProviderTransient.retryable());
        assert!(ErrorKind::RateLimited.retryable());
        assert!(ErrorKind::Timeout.retryable());
        assert!(!ErrorKind::ProviderPermanent.retryable());
        assert!(!ErrorKind::InvalidSetting.retryable());
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let err: Envelope<u32> =
            Envelope::from_result(Err(CraftError::new(ErrorKind::BudgetExceeded, "cap hit")));
        let json = serde_json::to_string(&err).unwrap();
        let back: Envelope<u32> = serde_json::from_str(&json).unwrap();
        match back.into_result() {
            Err(e) => assert_eq!(e.kind, ErrorKind::BudgetExceeded),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn envelope_ok_round_trips() {
        let ok: Envelope<u32> = Envelope::from_result(Ok(7));
        let json = serde_json::to_string(&ok).unwrap();
        let back: Envelope<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_result().unwrap(), 7);
    }
}
