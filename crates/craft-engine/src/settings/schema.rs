//! Typed settings schema — the "path-to-field mapping generated at build
//! time" called for in Design Notes §9, replacing the source's untyped
//! string-keyed lookups while keeping the dotted-string surface at the
//! RPC boundary for UI compatibility.

use serde_json::Value;
use std::collections::HashMap;

/// The type a setting value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Number,
    String,
    StringList,
}

/// Declarative specification for one dotted settings path.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub path: &'static str,
    pub field_type: FieldType,
    pub default: Value,
    /// Closed set of allowed string values, if this field is a choice.
    pub choices: Option<&'static [&'static str]>,
    /// Inclusive numeric bounds, if this field is range-constrained.
    pub range: Option<(f64, f64)>,
}

impl FieldSpec {
    const fn bool(path: &'static str, default: bool) -> Self {
        Self {
            path,
            field_type: FieldType::Bool,
            default: Value::Bool(default),
            choices: None,
            range: None,
        }
    }

    fn number(path: &'static str, default: f64, range: Option<(f64, f64)>) -> Self {
        Self {
            path,
            field_type: FieldType::Number,
            default: serde_json::json!(default),
            choices: None,
            range,
        }
    }

    fn string(path: &'static str, default: &'static str, choices: Option<&'static [&'static str]>) -> Self {
        Self {
            path,
            field_type: FieldType::String,
            default: Value::String(default.to_string()),
            choices,
            range: None,
        }
    }

    fn string_list(path: &'static str) -> Self {
        Self {
            path,
            field_type: FieldType::StringList,
            default: Value::Array(Vec::new()),
            choices: None,
            range: None,
        }
    }
}

/// The compiled schema: every dotted path the Craft Quality Engine
/// understands, with its type, default, and validation rules.
pub struct SettingsSchema {
    fields: HashMap<&'static str, FieldSpec>,
}

impl SettingsSchema {
    /// Build the schema once at construction time. Every path referenced
    /// anywhere in the engine (scoring weights, thresholds, router
    /// policy, transport retry limits) must be declared here — the
    /// Resolver refuses to `get`/`set` undeclared paths.
    pub fn build() -> Self {
        let specs = vec![
            // Scene Analyzer category weights (§4.5)
            FieldSpec::number("scoring.voice_authenticity_weight", 30.0, Some((0.0, 100.0))),
            FieldSpec::number("scoring.character_consistency_weight", 20.0, Some((0.0, 100.0))),
            FieldSpec::number("scoring.metaphor_discipline_weight", 20.0, Some((0.0, 100.0))),
            FieldSpec::number("scoring.anti_pattern_weight", 15.0, Some((0.0, 100.0))),
            FieldSpec::number("scoring.phase_appropriateness_weight", 15.0, Some((0.0, 100.0))),
            FieldSpec::number("scoring.anti_pattern.zero_tolerance_deduction", 2.0, Some((0.0, 100.0))),
            FieldSpec::number("scoring.anti_pattern.formulaic_deduction", 1.0, Some((0.0, 100.0))),
            // Open Question #1 (§9): the formulaic-pattern cap, made explicit.
            FieldSpec::number("scoring.anti_pattern.formulaic_cap", 5.0, Some((0.0, 100.0))),
            // Tier thresholds
            FieldSpec::number("scoring.tier.a_threshold", 92.0, Some((0.0, 100.0))),
            FieldSpec::number("scoring.tier.a_minus_threshold", 85.0, Some((0.0, 100.0))),
            FieldSpec::number("scoring.tier.b_plus_threshold", 80.0, Some((0.0, 100.0))),
            FieldSpec::number("scoring.tier.b_threshold", 70.0, Some((0.0, 100.0))),
            // Enhancement Engine (§4.8)
            FieldSpec::number("enhancement.action_prompt_threshold", 85.0, Some((0.0, 100.0))),
            FieldSpec::number("enhancement.six_pass_floor", 70.0, Some((0.0, 100.0))),
            FieldSpec::number("enhancement.regression_tolerance", 1.0, Some((0.0, 20.0))),
            FieldSpec::number("enhancement.six_pass_fast_exit_threshold", 85.0, Some((0.0, 100.0))),
            // Pattern Library
            FieldSpec::number("patterns.simile_density_suppress_threshold", 0.02, Some((0.0, 1.0))),
            FieldSpec::bool("patterns.case_insensitive", true),
            // Model Router (§4.3)
            FieldSpec::string(
                "router.quality_tier",
                "balanced",
                Some(&["budget", "balanced", "premium"]),
            ),
            FieldSpec::number("router.monthly_budget_cap_usd", 500.0, Some((0.0, 1_000_000.0))),
            FieldSpec::number("router.circuit_breaker.failure_threshold", 3.0, Some((1.0, 100.0))),
            FieldSpec::number("router.circuit_breaker.cooldown_secs", 60.0, Some((1.0, 3600.0))),
            // LLM Transport (§4.4)
            FieldSpec::number("transport.retry.max_attempts", 3.0, Some((0.0, 10.0))),
            FieldSpec::number("transport.retry.base_delay_ms", 500.0, Some((1.0, 60_000.0))),
            FieldSpec::number("transport.timeout.call_secs", 120.0, Some((1.0, 3600.0))),
            FieldSpec::number("transport.timeout.token_stall_secs", 30.0, Some((1.0, 600.0))),
            // Scaffold Generator (§4.6)
            FieldSpec::bool("scaffold.enrichment_enabled", true),
            FieldSpec::number("scaffold.enrichment_timeout_secs", 20.0, Some((1.0, 300.0))),
            // Tournament (§4.7)
            FieldSpec::bool("tournament.structure_variants_enabled", true),
            FieldSpec::number("tournament.structure_variant_count", 3.0, Some((1.0, 10.0))),
            FieldSpec::number("tournament.per_provider_concurrency", 4.0, Some((1.0, 64.0))),
            FieldSpec::number("tournament.generation_timeout_secs", 180.0, Some((1.0, 3600.0))),
            FieldSpec::string_list("tournament.default_strategies"),
        ];
        let mut fields = HashMap::new();
        for spec in specs {
            fields.insert(spec.path, spec);
        }
        Self { fields }
    }

    pub fn get(&self, path: &str) -> Option<&FieldSpec> {
        self.fields.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.keys().copied()
    }
}

impl Default for SettingsSchema {
    fn default() -> Self {
        Self::build()
    }
}
