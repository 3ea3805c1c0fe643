//! Per-model circuit breaker with adaptive rate-limit backoff (§4.3,
//! SPEC_FULL.md supplement).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Tracks consecutive failures and rate-limit cooldowns per model_id.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    consecutive_failures: HashMap<String, u32>,
    last_failure_secs: HashMap<String, u64>,
    rate_limit_hits: HashMap<String, u32>,
    rate_limit_until: HashMap<String, u64>,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            consecutive_failures: HashMap::new(),
            last_failure_secs: HashMap::new(),
            rate_limit_hits: HashMap::new(),
            rate_limit_until: HashMap::new(),
            failure_threshold,
            cooldown_secs,
        }
    }

    pub fn record_success(&mut self, model_id: &str) {
        self.consecutive_failures.remove(model_id);
        self.last_failure_secs.remove(model_id);
        self.rate_limit_hits.remove(model_id);
        self.rate_limit_until.remove(model_id);
    }

    pub fn record_failure(&mut self, model_id: &str) {
        *self.consecutive_failures.entry(model_id.to_string()).or_insert(0) += 1;
        self.last_failure_secs.insert(model_id.to_string(), unix_now());
    }

    /// Exponential backoff on 429s: 2s, 4s, 8s, ... capped at 120s.
    pub fn record_rate_limit(&mut self, model_id: &str) {
        let hits = self.rate_limit_hits.entry(model_id.to_string()).or_insert(0);
        *hits += 1;
        let cooldown = 2u64.saturating_mul(2u64.saturating_pow((*hits).saturating_sub(1))).min(120);
        self.rate_limit_until.insert(model_id.to_string(), unix_now() + cooldown);
        self.record_failure(model_id);
    }

    pub fn rate_limit_cooldown(&self, model_id: &str) -> Option<u64> {
        let &until = self.rate_limit_until.get(model_id)?;
        let now = unix_now();
        if now < until {
            Some(until - now)
        } else {
            None
        }
    }

    pub fn state(&self, model_id: &str) -> CircuitState {
        if self.rate_limit_cooldown(model_id).is_some() {
            return CircuitState::Open;
        }
        let failures = self.consecutive_failures.get(model_id).copied().unwrap_or(0);
        if failures < self.failure_threshold {
            return CircuitState::Closed;
        }
        let last = self.last_failure_secs.get(model_id).copied().unwrap_or(0);
        if unix_now().saturating_sub(last) >= self.cooldown_secs {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn is_available(&self, model_id: &str) -> bool {
        !matches!(self.state(model_id), CircuitState::Open)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, 60)
    }
}
