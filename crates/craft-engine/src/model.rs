//! Shared data model for the Craft Quality Engine.
//!
//! These types are the nouns every component speaks: the Voice Bundle
//! (project style contract), the Scene Score (Analyzer output), the
//! Scaffold (non-prose scene plan), and the Enhancement Outcome. None of
//! these types carry project-specific craft rules — those live exclusively
//! in Voice Bundle YAML documents loaded at runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Point of view declared for a project's prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pov {
    FirstPerson,
    SecondPerson,
    ThirdLimited,
    ThirdOmniscient,
}

/// Narrative tense declared for a project's prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tense {
    Past,
    Present,
}

/// Simile tolerance policy for a Voice Bundle.
///
/// `Forbid` and `Allow` serialize as bare lowercase strings; `Limit`
/// serializes as a single-key mapping (`limit: 2`) since it carries data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilePolicy {
    Forbid,
    Limit(u32),
    Allow,
}

/// Severity of a detected anti-pattern or violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Advisory,
    Formulaic,
    ZeroTolerance,
}

/// One anti-pattern entry from a Voice Bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiPattern {
    pub pattern: String,
    pub description: String,
    pub severity: Severity,
}

/// One metaphor-domain lexicon entry from a Voice Bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaphorDomain {
    pub name: String,
    pub keywords: Vec<String>,
    pub max_percentage: f64,
}

/// A writer-declared narrative phase with its own register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseProfile {
    pub phase_name: String,
    pub allowed_technical_vocab: Vec<String>,
    pub forbidden_constructs: Vec<String>,
}

/// The project's complete style contract, consumed by the Analyzer and
/// Enhancement Engine. Produced externally by voice calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceBundle {
    pub gold_standard: String,
    pub anti_patterns: Vec<AntiPattern>,
    pub metaphor_domains: Vec<MetaphorDomain>,
    pub simile_policy: SimilePolicy,
    pub pov: Pov,
    pub tense: Tense,
    pub phase_profiles: Vec<PhaseProfile>,
}

/// Errors that make a Voice Bundle unusable.
#[derive(Debug, thiserror::Error)]
pub enum VoiceBundleError {
    #[error("voice bundle YAML is malformed: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("metaphor domain '{domain}' has max_percentage {value} outside (0,1]")]
    InvalidDomainCap { domain: String, value: f64 },

    #[error("phase profiles must be non-empty and uniquely named; duplicate '{0}'")]
    DuplicatePhase(String),

    #[error("anti-pattern regex for '{description}' does not compile: {source}")]
    BadAntiPatternRegex {
        description: String,
        #[source]
        source: regex::Error,
    },
}

impl VoiceBundle {
    /// Parse a Voice Bundle from its YAML wire format, validating the
    /// invariants from the data model (§3): metaphor caps in (0,1],
    /// individually compilable anti-pattern regexes, totally ordered
    /// (uniquely named) phases.
    pub fn from_yaml(yaml: &str) -> Result<Self, VoiceBundleError> {
        let bundle: VoiceBundle = serde_yaml::from_str(yaml)?;
        bundle.validate()?;
        Ok(bundle)
    }

    fn validate(&self) -> Result<(), VoiceBundleError> {
        for domain in &self.metaphor_domains {
            if !(domain.max_percentage > 0.0 && domain.max_percentage <= 1.0) {
                return Err(VoiceBundleError::InvalidDomainCap {
                    domain: domain.name.clone(),
                    value: domain.max_percentage,
                });
            }
        }
        for anti_pattern in &self.anti_patterns {
            regex::Regex::new(&anti_pattern.pattern).map_err(|source| {
                VoiceBundleError::BadAntiPatternRegex {
                    description: anti_pattern.description.clone(),
                    source,
                }
            })?;
        }
        let mut seen = std::collections::HashSet::new();
        for phase in &self.phase_profiles {
            if !seen.insert(&phase.phase_name) {
                return Err(VoiceBundleError::DuplicatePhase(phase.phase_name.clone()));
            }
        }
        Ok(())
    }

    /// Look up a phase by name, in declared (total) order.
    pub fn phase(&self, name: &str) -> Option<&PhaseProfile> {
        self.phase_profiles.iter().find(|p| p.phase_name == name)
    }
}

/// Coarse quality band derived from a Scene Score's overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    A,
    AMinus,
    BPlus,
    B,
    NeedsRework,
}

impl Tier {
    /// Classify an overall score per the thresholds in §4.5 / GLOSSARY.
    pub fn classify(overall: f64) -> Self {
        Self::classify_with(overall, 92.0, 85.0, 80.0, 70.0)
    }

    /// Classify against project-configurable thresholds (`scoring.tier.*`
    /// in the Settings Resolver), rather than the compiled-in defaults.
    pub fn classify_with(overall: f64, a: f64, a_minus: f64, b_plus: f64, b: f64) -> Self {
        if overall >= a {
            Tier::A
        } else if overall >= a_minus {
            Tier::AMinus
        } else if overall >= b_plus {
            Tier::BPlus
        } else if overall >= b {
            Tier::B
        } else {
            Tier::NeedsRework
        }
    }
}

/// A single category's awarded/max score within a Scene Score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScore {
    pub awarded: f64,
    pub max: f64,
    pub notes: Vec<String>,
    /// Set when one or more of this category's sub-tests could not be
    /// evaluated (LLM schema failure after retry) — see §4.5 failure
    /// semantics.
    pub indeterminate: bool,
}

impl CategoryScore {
    pub fn full(max: f64) -> Self {
        Self {
            awarded: max,
            max,
            notes: Vec::new(),
            indeterminate: false,
        }
    }
}

/// A single rubric violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub line_index: usize,
    pub severity: Severity,
    pub pattern_id: String,
    pub excerpt: String,
    pub suggested_fix: Option<String>,
}

/// Metaphor saturation analysis for a single analyzed text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaphorReport {
    pub total_count: usize,
    pub per_domain_counts: HashMap<String, usize>,
    pub per_domain_percentages: HashMap<String, f64>,
    pub saturated_domains: Vec<String>,
}

/// Output of a single Analyzer run. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneScore {
    pub overall: f64,
    pub category_scores: HashMap<String, CategoryScore>,
    pub violations: Vec<Violation>,
    pub metaphor_report: MetaphorReport,
    pub tier: Tier,
    pub phase_flags: Vec<String>,
    pub model_used: Option<String>,
    pub wall_time_ms: u64,
    /// Set when any LLM-gated sub-test degraded to `indeterminate` after a
    /// failed re-prompt (§4.5).
    pub low_confidence: bool,
}

impl SceneScore {
    /// Violations sorted by (severity desc, line asc), per §4.5.
    pub fn sorted_violations(&self) -> Vec<&Violation> {
        let mut v: Vec<&Violation> = self.violations.iter().collect();
        v.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.line_index.cmp(&b.line_index))
        });
        v
    }
}

/// Deterministic elements plus LLM-assembled strategic context for one
/// scene, produced by the Scaffold Generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaffold {
    pub chapter_id: String,
    pub scene_index: u32,
    pub title: String,
    pub phase: String,
    pub pov: Pov,
    pub word_target: u32,
    pub beats: Vec<String>,
    pub strategic_context: StrategicContext,
    pub success_criteria: Vec<String>,
    pub continuity_checklist: Vec<String>,
    pub source_enrichment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicContext {
    pub goals: Vec<String>,
    pub stakes: String,
    pub conflict: String,
}

/// Errors raised when a Scaffold fails its structural invariants (§3).
#[derive(Debug, thiserror::Error)]
pub enum ScaffoldInvariantError {
    #[error("word_target must be > 0")]
    ZeroWordTarget,
    #[error("beats must be non-empty")]
    EmptyBeats,
    #[error("phase '{0}' is not defined in the active voice bundle")]
    UnknownPhase(String),
}

impl Scaffold {
    /// Validate the Scaffold invariants from §3 against the active Voice
    /// Bundle (phase must be declared).
    pub fn validate(&self, voice_bundle: &VoiceBundle) -> Result<(), ScaffoldInvariantError> {
        if self.word_target == 0 {
            return Err(ScaffoldInvariantError::ZeroWordTarget);
        }
        if self.beats.is_empty() {
            return Err(ScaffoldInvariantError::EmptyBeats);
        }
        if voice_bundle.phase(&self.phase).is_none() {
            return Err(ScaffoldInvariantError::UnknownPhase(self.phase.clone()));
        }
        Ok(())
    }
}

/// Enhancement Engine operating mode, keyed on the input Scene Score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementMode {
    ActionPrompt,
    SixPass,
    Reject,
}

/// A single completed enhancement pass (Six-Pass mode) or fix application
/// (Action-Prompt mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassRecord {
    pub pass_name: String,
    pub before: f64,
    pub after: f64,
    pub diff_summary: String,
}

/// Result of running the Enhancement Engine against one input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancementOutcome {
    pub input_text: String,
    pub input_score: SceneScore,
    pub mode: EnhancementMode,
    pub passes: Vec<PassRecord>,
    pub output_text: String,
    pub output_score: SceneScore,
    pub improvement_delta: f64,
}

/// Model prompt capacity tier, used by the Router to pick prompt shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTier {
    Full,
    Medium,
    Minimal,
}

/// Static capability metadata for one registered model. Loaded once from
/// configuration; immutable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilityRecord {
    pub model_id: String,
    pub provider: String,
    pub context_window: u32,
    pub input_cost_per_mtoken: f64,
    pub output_cost_per_mtoken: f64,
    pub quality_score: u8,
    pub strengths: Vec<String>,
    pub prompt_tier: PromptTier,
    pub supports_embeddings: bool,
    pub supports_streaming: bool,
    pub requires_api_key: bool,
    pub env_var_name: Option<String>,
}

/// Closed set of task types the Router classifies requests into (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Coordinator,
    StrategicReasoning,
    SceneGeneration,
    Analysis,
    Enhancement,
    HealthCheck,
    Embedding,
}

/// Quality Tier governing Model Router policy (§4.3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Budget,
    Balanced,
    Premium,
}

/// Timestamp helper shared by modules that stamp records with `Utc::now()`.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
