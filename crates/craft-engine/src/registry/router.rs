//! Model Registry & Router (§4.3): capability matrix, Quality Tier
//! policy, availability filtering, cost estimation, and budget
//! enforcement via a reserve/commit/release scheme.

use super::circuit_breaker::CircuitBreaker;
use crate::events::{CraftEvent, SharedEventBus};
use crate::model::{ModelCapabilityRecord, QualityTier, TaskType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no candidate model is available for task type {0:?}")]
    NoCandidates(TaskType),
    #[error("reserving ${estimated:.4} would exceed the monthly cap of ${cap:.2} (remaining ${remaining:.4})")]
    BudgetExceeded {
        estimated: f64,
        cap: f64,
        remaining: f64,
    },
    #[error("unknown budget reservation {0}")]
    UnknownReservation(Uuid),
}

/// Per-project running-cost tracking. `spent` only ever increases via
/// `commit`; `reserved` is the sum of outstanding, uncommitted
/// reservations, checked against the cap on every new reservation so
/// concurrent callers cannot jointly overshoot the cap between their
/// check and their act (§5 "reservation scheme").
struct ProjectBudget {
    monthly_cap_usd: f64,
    spent_micros: AtomicU64,
    reservations: Mutex<HashMap<Uuid, f64>>,
}

impl ProjectBudget {
    fn new(monthly_cap_usd: f64) -> Self {
        Self {
            monthly_cap_usd,
            spent_micros: AtomicU64::new(0),
            reservations: Mutex::new(HashMap::new()),
        }
    }

    fn spent(&self) -> f64 {
        self.spent_micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }

    fn reserved(&self) -> f64 {
        self.reservations.lock().unwrap().values().sum()
    }

    fn remaining(&self) -> f64 {
        self.monthly_cap_usd - self.spent() - self.reserved()
    }
}

/// Capability matrix plus router policy and budget/circuit state.
pub struct ModelRegistry {
    capabilities: Vec<ModelCapabilityRecord>,
    breaker: RwLock<CircuitBreaker>,
    budgets: RwLock<HashMap<String, ProjectBudget>>,
    event_bus: Option<SharedEventBus>,
}

impl ModelRegistry {
    pub fn new(capabilities: Vec<ModelCapabilityRecord>, failure_threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            capabilities,
            breaker: RwLock::new(CircuitBreaker::new(failure_threshold, cooldown_secs)),
            budgets: RwLock::new(HashMap::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn env_var_present(record: &ModelCapabilityRecord) -> bool {
        if !record.requires_api_key {
            return true;
        }
        match &record.env_var_name {
            Some(var) => std::env::var(var).is_ok(),
            None => false,
        }
    }

    fn minimum_quality_for(task_type: TaskType) -> u8 {
        match task_type {
            TaskType::Coordinator | TaskType::HealthCheck => 0,
            TaskType::SceneGeneration | TaskType::Enhancement => 40,
            TaskType::Analysis | TaskType::Embedding => 50,
            TaskType::StrategicReasoning => 70,
        }
    }

    fn cost_per_quality(record: &ModelCapabilityRecord) -> f64 {
        let avg_cost = (record.input_cost_per_mtoken + record.output_cost_per_mtoken) / 2.0;
        if record.quality_score == 0 {
            f64::INFINITY
        } else {
            avg_cost / record.quality_score as f64
        }
    }

    /// Ordered candidate list for `task_type` under `tier`, per §4.3's
    /// per-tier policy. Unavailable models (missing API key, open
    /// circuit) are filtered out before ordering.
    pub fn candidates(&self, task_type: TaskType, tier: QualityTier) -> Vec<&ModelCapabilityRecord> {
        let min_quality = Self::minimum_quality_for(task_type);
        let breaker = self.breaker.read().unwrap();

        let mut pool: Vec<&ModelCapabilityRecord> = self
            .capabilities
            .iter()
            .filter(|r| Self::env_var_present(r))
            .filter(|r| breaker.is_available(&r.model_id))
            .filter(|r| r.quality_score >= min_quality)
            .collect();

        match tier {
            QualityTier::Budget => {
                let local: Vec<&ModelCapabilityRecord> =
                    pool.iter().copied().filter(|r| r.input_cost_per_mtoken == 0.0).collect();
                if !local.is_empty() {
                    pool = local;
                    pool.sort_by(|a, b| a.quality_score.cmp(&b.quality_score));
                } else {
                    pool.sort_by(|a, b| {
                        Self::cost_per_quality(a)
                            .partial_cmp(&Self::cost_per_quality(b))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                }
            }
            QualityTier::Balanced => {
                let prefer_local = matches!(task_type, TaskType::Coordinator | TaskType::HealthCheck);
                if prefer_local {
                    pool.sort_by(|a, b| {
                        b.input_cost_per_mtoken
                            .eq(&0.0)
                            .cmp(&a.input_cost_per_mtoken.eq(&0.0))
                            .then(a.quality_score.cmp(&b.quality_score).reverse())
                    });
                } else {
                    pool.sort_by(|a, b| {
                        Self::cost_per_quality(a)
                            .partial_cmp(&Self::cost_per_quality(b))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                }
            }
            QualityTier::Premium => {
                pool.sort_by(|a, b| b.quality_score.cmp(&a.quality_score));
            }
        }

        pool
    }

    /// Record a successful call against `model_id`.
    pub fn record_success(&self, model_id: &str) {
        self.breaker.write().unwrap().record_success(model_id);
    }

    /// Record a failed call, possibly tripping the circuit.
    pub fn record_failure(&self, model_id: &str) {
        self.breaker.write().unwrap().record_failure(model_id);
    }

    /// Record a 429, applying exponential cooldown.
    pub fn record_rate_limit(&self, model_id: &str) {
        self.breaker.write().unwrap().record_rate_limit(model_id);
    }

    /// Additive cost estimate for one call (§4.3).
    pub fn estimate_cost(record: &ModelCapabilityRecord, input_tokens: u32, output_tokens: u32) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * record.input_cost_per_mtoken;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * record.output_cost_per_mtoken;
        input_cost + output_cost
    }

    fn ensure_budget(&self, project_id: &str, monthly_cap_usd: f64) {
        let needs_insert = !self.budgets.read().unwrap().contains_key(project_id);
        if needs_insert {
            self.budgets
                .write()
                .unwrap()
                .entry(project_id.to_string())
                .or_insert_with(|| ProjectBudget::new(monthly_cap_usd));
        }
    }

    /// Reserve `estimated_cost` against `project_id`'s monthly cap,
    /// failing with `BudgetExceeded` if the reservation would overshoot
    /// it (§4.3, §5's check-then-act reservation scheme).
    pub fn reserve(
        &self,
        project_id: &str,
        monthly_cap_usd: f64,
        estimated_cost: f64,
    ) -> Result<Uuid, RegistryError> {
        self.ensure_budget(project_id, monthly_cap_usd);
        let budgets = self.budgets.read().unwrap();
        let budget = budgets.get(project_id).expect("ensured above");

        let mut reservations = budget.reservations.lock().unwrap();
        let reserved_total: f64 = reservations.values().sum();
        let remaining = budget.monthly_cap_usd - budget.spent() - reserved_total;

        if estimated_cost > remaining {
            if let Some(bus) = &self.event_bus {
                let _ = bus.publish(CraftEvent::BudgetRefused {
                    project_id: project_id.to_string(),
                    estimated_cost,
                    remaining_budget: remaining,
                    timestamp: crate::model::now(),
                });
            }
            return Err(RegistryError::BudgetExceeded {
                estimated: estimated_cost,
                cap: budget.monthly_cap_usd,
                remaining,
            });
        }

        let id = Uuid::new_v4();
        reservations.insert(id, estimated_cost);
        Ok(id)
    }

    /// Commit a reservation at its realized cost (may differ from the
    /// estimate) and release the hold.
    pub fn commit(&self, project_id: &str, reservation_id: Uuid, realized_cost: f64) -> Result<(), RegistryError> {
        let budgets = self.budgets.read().unwrap();
        let budget = budgets
            .get(project_id)
            .ok_or(RegistryError::UnknownReservation(reservation_id))?;
        let mut reservations = budget.reservations.lock().unwrap();
        reservations
            .remove(&reservation_id)
            .ok_or(RegistryError::UnknownReservation(reservation_id))?;
        let micros = (realized_cost.max(0.0) * 1_000_000.0).round() as u64;
        budget.spent_micros.fetch_add(micros, Ordering::SeqCst);
        Ok(())
    }

    /// Release a reservation without recording any spend (call failed
    /// before completion).
    pub fn release(&self, project_id: &str, reservation_id: Uuid) -> Result<(), RegistryError> {
        let budgets = self.budgets.read().unwrap();
        let budget = budgets
            .get(project_id)
            .ok_or(RegistryError::UnknownReservation(reservation_id))?;
        budget
            .reservations
            .lock()
            .unwrap()
            .remove(&reservation_id)
            .ok_or(RegistryError::UnknownReservation(reservation_id))?;
        Ok(())
    }

    pub fn remaining_budget(&self, project_id: &str) -> Option<f64> {
        self.budgets.read().unwrap().get(project_id).map(|b| b.remaining())
    }

    /// Look up one registered model's capability record by id, for
    /// callers (the §6 `orchestrator.estimate_cost` RPC) that need a
    /// cost estimate outside the `candidates` selection path.
    pub fn capability_for(&self, model_id: &str) -> Option<&ModelCapabilityRecord> {
        self.capabilities.iter().find(|r| r.model_id == model_id)
    }

    /// Cost estimate for one prospective call against `model_id`, or
    /// `None` if the model isn't registered.
    pub fn estimate_cost_for(&self, model_id: &str, input_tokens: u32, output_tokens: u32) -> Option<f64> {
        self.capability_for(model_id)
            .map(|record| Self::estimate_cost(record, input_tokens, output_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PromptTier;

    fn local_model() -> ModelCapabilityRecord {
        ModelCapabilityRecord {
            model_id: "local:llama".into(),
            provider: "local".into(),
            context_window: 32_000,
            input_cost_per_mtoken: 0.0,
            output_cost_per_mtoken: 0.0,
            quality_score: 40,
            strengths: vec!["fast".into()],
            prompt_tier: PromptTier::Minimal,
            supports_embeddings: false,
            supports_streaming: true,
            requires_api_key: false,
            env_var_name: None,
        }
    }

    fn cloud_model(name: &str, quality: u8, cost: f64) -> ModelCapabilityRecord {
        ModelCapabilityRecord {
            model_id: name.into(),
            provider: "anthropic".into(),
            context_window: 200_000,
            input_cost_per_mtoken: cost,
            output_cost_per_mtoken: cost * 2.0,
            quality_score: quality,
            strengths: vec!["reasoning".into()],
            prompt_tier: PromptTier::Full,
            supports_embeddings: false,
            supports_streaming: true,
            requires_api_key: false,
            env_var_name: None,
        }
    }

    #[test]
    fn budget_tier_prefers_local_for_qualifying_task() {
        let registry = ModelRegistry::new(vec![local_model(), cloud_model("anthropic:opus", 90, 10.0)], 3, 60);
        let candidates = registry.candidates(TaskType::Enhancement, QualityTier::Budget);
        assert_eq!(candidates[0].model_id, "local:llama");
    }

    #[test]
    fn premium_tier_orders_by_quality_descending() {
        let registry = ModelRegistry::new(
            vec![cloud_model("anthropic:haiku", 50, 1.0), cloud_model("anthropic:opus", 95, 10.0)],
            3,
            60,
        );
        let candidates = registry.candidates(TaskType::StrategicReasoning, QualityTier::Premium);
        assert_eq!(candidates[0].model_id, "anthropic:opus");
    }

    #[test]
    fn open_circuit_filters_model_out_of_candidates() {
        let registry = ModelRegistry::new(vec![local_model(), cloud_model("anthropic:opus", 90, 10.0)], 1, 9999);
        registry.record_failure("local:llama");
        let candidates = registry.candidates(TaskType::Enhancement, QualityTier::Budget);
        assert!(candidates.iter().all(|c| c.model_id != "local:llama"));
    }

    #[test]
    fn missing_api_key_env_var_filters_model_out() {
        let mut model = cloud_model("anthropic:opus", 95, 10.0);
        model.requires_api_key = true;
        model.env_var_name = Some("CRAFT_TEST_NONEXISTENT_KEY_XYZ".into());
        let registry = ModelRegistry::new(vec![model], 3, 60);
        let candidates = registry.candidates(TaskType::StrategicReasoning, QualityTier::Premium);
        assert!(candidates.is_empty());
    }

    #[test]
    fn reservation_within_cap_succeeds_and_commit_increases_spend() {
        let registry = ModelRegistry::new(vec![], 3, 60);
        let id = registry.reserve("proj1", 100.0, 10.0).unwrap();
        assert_eq!(registry.remaining_budget("proj1").unwrap(), 90.0);
        registry.commit("proj1", id, 8.0).unwrap();
        assert_eq!(registry.remaining_budget("proj1").unwrap(), 92.0);
    }

    #[test]
    fn reservation_exceeding_cap_is_refused() {
        let registry = ModelRegistry::new(vec![], 3, 60);
        let err = registry.reserve("proj1", 5.0, 10.0).unwrap_err();
        assert!(matches!(err, RegistryError::BudgetExceeded { .. }));
    }

    #[test]
    fn concurrent_reservations_cannot_jointly_overshoot_cap() {
        let registry = ModelRegistry::new(vec![], 3, 60);
        let _r1 = registry.reserve("proj1", 10.0, 6.0).unwrap();
        let err = registry.reserve("proj1", 10.0, 6.0).unwrap_err();
        assert!(matches!(err, RegistryError::BudgetExceeded { .. }));
    }

    #[test]
    fn release_frees_the_reservation_without_recording_spend() {
        let registry = ModelRegistry::new(vec![], 3, 60);
        let id = registry.reserve("proj1", 10.0, 6.0).unwrap();
        registry.release("proj1", id).unwrap();
        assert_eq!(registry.remaining_budget("proj1").unwrap(), 10.0);
    }

    #[test]
    fn estimate_cost_is_additive_over_input_and_output() {
        let model = cloud_model("anthropic:opus", 90, 3.0);
        let cost = ModelRegistry::estimate_cost(&model, 1_000_000, 500_000);
        assert_eq!(cost, 3.0 + 3.0);
    }
}
