//! The Scene Analyzer (§4.5): scores prose against the active Voice
//! Bundle's 100-point rubric, composing deterministic Pattern Library
//! results with LLM-judged sub-tests. Stateless per call — every input
//! (text, scene context, Voice Bundle) fully determines the output.

mod judge;
mod scorer;

pub use judge::{category_prompt, CategoryJudgeResponse, JudgeError, SceneJudge, TransportJudge};
#[cfg(any(test, feature = "test-support"))]
pub use judge::test_support;
pub use scorer::{
    compose_overall, score_anti_pattern_compliance, score_character_consistency,
    score_metaphor_discipline, score_phase_appropriateness, score_voice_authenticity,
};

use crate::events::{CraftEvent, SharedEventBus};
use crate::model::{
    CategoryScore, MetaphorReport, QualityTier, Severity, TaskType, Tier, Violation, VoiceBundle,
};
use crate::patterns::PatternLibrary;
use crate::registry::ModelRegistry;
use crate::settings::SettingsResolver;
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Minimal scene context an `analyze` call needs beyond the raw text:
/// which project's settings/patterns apply and which declared phase
/// this scene belongs to (§3 Scaffold's `phase`, §4.5 "Phase
/// Appropriateness").
#[derive(Debug, Clone)]
pub struct SceneContext {
    pub project_id: String,
    pub phase: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("phase '{0}' is not declared in the active voice bundle")]
    UnknownPhase(String),
    #[error("no model is available to judge task type {0:?}")]
    ModelUnavailable(TaskType),
    #[error("pattern library has no compiled matcher set for project '{0}'")]
    PatternsUncompiled(String),
    #[error("pattern compile error: {0}")]
    PatternCompile(#[from] crate::patterns::PatternError),
    #[error("settings error: {0}")]
    Settings(#[from] crate::settings::InvalidSetting),
}

/// Source of LLM judgment calls: either a fixed injected judge (tests,
/// or a caller that already picked a model) or live routing through the
/// Model Registry and Transport (§4.3, §4.4).
enum JudgeSource {
    Fixed(Arc<dyn SceneJudge>),
    Routed {
        registry: Arc<ModelRegistry>,
        transport: Arc<Transport>,
    },
}

/// The Scene Analyzer service.
pub struct SceneAnalyzer {
    patterns: Arc<PatternLibrary>,
    resolver: Arc<SettingsResolver>,
    judge_source: JudgeSource,
    event_bus: Option<SharedEventBus>,
}

struct Weights {
    zero_tolerance_deduction: f64,
    formulaic_deduction: f64,
    formulaic_cap: f64,
    simile_density_threshold: f64,
    tier_a: f64,
    tier_a_minus: f64,
    tier_b_plus: f64,
    tier_b: f64,
}

impl SceneAnalyzer {
    /// Construct an Analyzer that routes judge calls live through the
    /// Model Registry and Transport.
    pub fn routed(
        patterns: Arc<PatternLibrary>,
        resolver: Arc<SettingsResolver>,
        registry: Arc<ModelRegistry>,
        transport: Arc<Transport>,
    ) -> Self {
        Self {
            patterns,
            resolver,
            judge_source: JudgeSource::Routed { registry, transport },
            event_bus: None,
        }
    }

    /// Construct an Analyzer with a fixed, pre-selected judge — the seam
    /// used by tests and by callers (e.g. the Tournament) that have
    /// already picked a model for this call.
    pub fn with_judge(patterns: Arc<PatternLibrary>, resolver: Arc<SettingsResolver>, judge: Arc<dyn SceneJudge>) -> Self {
        Self {
            patterns,
            resolver,
            judge_source: JudgeSource::Fixed(judge),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn weights(&self, project_id: &str) -> Result<Weights, AnalyzerError> {
        let pid = Some(project_id);
        Ok(Weights {
            zero_tolerance_deduction: self.resolver.get_number("scoring.anti_pattern.zero_tolerance_deduction", pid)?,
            formulaic_deduction: self.resolver.get_number("scoring.anti_pattern.formulaic_deduction", pid)?,
            formulaic_cap: self.resolver.get_number("scoring.anti_pattern.formulaic_cap", pid)?,
            simile_density_threshold: self.resolver.get_number("patterns.simile_density_suppress_threshold", pid)?,
            tier_a: self.resolver.get_number("scoring.tier.a_threshold", pid)?,
            tier_a_minus: self.resolver.get_number("scoring.tier.a_minus_threshold", pid)?,
            tier_b_plus: self.resolver.get_number("scoring.tier.b_plus_threshold", pid)?,
            tier_b: self.resolver.get_number("scoring.tier.b_threshold", pid)?,
        })
    }

    /// Resolve (or build) the judge to use for this call. A live-routed
    /// Analyzer with no available candidate for `TaskType::Analysis`
    /// raises `ModelUnavailable` rather than silently scoring every
    /// LLM-gated category as indeterminate — an Analyzer with no working
    /// model is a configuration problem the caller needs to see, not a
    /// scene-quality result.
    fn resolve_judge(&self, project_id: &str) -> Result<(Arc<dyn SceneJudge>, Option<String>), AnalyzerError> {
        match &self.judge_source {
            JudgeSource::Fixed(judge) => Ok((judge.clone(), None)),
            JudgeSource::Routed { registry, transport } => {
                let tier_str = self.resolver.get_string("router.quality_tier", Some(project_id))?;
                let tier = match tier_str.as_str() {
                    "budget" => QualityTier::Budget,
                    "premium" => QualityTier::Premium,
                    _ => QualityTier::Balanced,
                };
                let candidates = registry.candidates(TaskType::Analysis, tier);
                match candidates.first() {
                    Some(record) => {
                        let model_id = record.model_id.clone();
                        let judge: Arc<dyn SceneJudge> = Arc::new(TransportJudge {
                            transport: transport.clone(),
                            model_id: model_id.clone(),
                        });
                        Ok((judge, Some(model_id)))
                    }
                    None => {
                        if let Some(bus) = &self.event_bus {
                            let _ = bus.publish(CraftEvent::ModelDegraded {
                                task_type: "analysis".to_string(),
                                requested: None,
                                substituted: "none_available".to_string(),
                                timestamp: crate::model::now(),
                            });
                        }
                        Err(AnalyzerError::ModelUnavailable(TaskType::Analysis))
                    }
                }
            }
        }
    }

    /// Run one category's LLM judgment with the §4.5 failure semantics:
    /// on schema failure, retry once with a stricter re-prompt; a second
    /// failure degrades to `None` rather than failing the whole call.
    async fn judge_with_retry(
        judge: &dyn SceneJudge,
        category: &str,
        max_points: f64,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Option<f64> {
        match judge.judge_category(category, max_points, prompt, cancel).await {
            Ok(response) => return Some(response.awarded),
            Err(_) => {}
        }
        let stricter = format!(
            "{prompt}\n\nSTRICT: your previous response failed validation. Return ONLY a single valid JSON \
             object matching the schema, no markdown fences, no commentary before or after."
        );
        match judge.judge_category(category, max_points, &stricter, cancel).await {
            Ok(response) => Some(response.awarded),
            Err(_) => None,
        }
    }

    /// Score `text` against `voice_bundle` within `ctx` (§4.5).
    pub async fn analyze(
        &self,
        text: &str,
        ctx: &SceneContext,
        voice_bundle: &VoiceBundle,
        cancel: &CancellationToken,
    ) -> Result<crate::model::SceneScore, AnalyzerError> {
        let start = Instant::now();
        let weights = self.weights(&ctx.project_id)?;

        let phase = voice_bundle
            .phase(&ctx.phase)
            .ok_or_else(|| AnalyzerError::UnknownPhase(ctx.phase.clone()))?
            .clone();

        self.patterns.recompile(&ctx.project_id, voice_bundle, weights.simile_density_threshold)?;
        let matches = self
            .patterns
            .scan(&ctx.project_id, text)
            .ok_or_else(|| AnalyzerError::PatternsUncompiled(ctx.project_id.clone()))?;
        let metaphor_report = self
            .patterns
            .analyze_metaphors(&ctx.project_id, text)
            .ok_or_else(|| AnalyzerError::PatternsUncompiled(ctx.project_id.clone()))?;
        let simile_report = self
            .patterns
            .simile_report(&ctx.project_id, text)
            .ok_or_else(|| AnalyzerError::PatternsUncompiled(ctx.project_id.clone()))?;

        let (anti_pattern_score, mut violations) = score_anti_pattern_compliance(
            &matches,
            weights.zero_tolerance_deduction,
            weights.formulaic_deduction,
            weights.formulaic_cap,
        );

        for domain in &metaphor_report.saturated_domains {
            violations.push(Violation {
                line_index: 0,
                severity: Severity::Advisory,
                pattern_id: format!("metaphor_saturation:{domain}"),
                excerpt: format!(
                    "{domain} at {:.1}%",
                    metaphor_report.per_domain_percentages.get(domain).copied().unwrap_or(0.0) * 100.0
                ),
                suggested_fix: None,
            });
        }

        let (judge, model_used) = self.resolve_judge(&ctx.project_id)?;

        let voice_prompt = category_prompt("Voice Authenticity", 30.0, &voice_bundle.gold_standard, text);
        let voice_judged = Self::judge_with_retry(judge.as_ref(), "Voice Authenticity", 30.0, &voice_prompt, cancel).await;

        let character_prompt = category_prompt("Character Consistency", 20.0, &voice_bundle.gold_standard, text);
        let character_judged =
            Self::judge_with_retry(judge.as_ref(), "Character Consistency", 20.0, &character_prompt, cancel).await;

        let transform_prompt =
            category_prompt("Metaphor Discipline: Direct Transformation Ratio", 6.0, &voice_bundle.gold_standard, text);
        let direct_transform_judged = Self::judge_with_retry(
            judge.as_ref(),
            "Metaphor Discipline: Direct Transformation Ratio",
            6.0,
            &transform_prompt,
            cancel,
        )
        .await;

        let vocab_prompt = category_prompt(
            &format!("Phase Appropriateness: Vocabulary Earned-ness ({})", phase.phase_name),
            8.0,
            &voice_bundle.gold_standard,
            text,
        );
        let vocab_judged = Self::judge_with_retry(
            judge.as_ref(),
            "Phase Appropriateness: Vocabulary Earned-ness",
            8.0,
            &vocab_prompt,
            cancel,
        )
        .await;

        if let JudgeSource::Routed { registry, .. } = &self.judge_source {
            if let Some(model_id) = &model_used {
                let any_ok = [voice_judged, character_judged, direct_transform_judged, vocab_judged]
                    .iter()
                    .any(|v| v.is_some());
                if any_ok {
                    registry.record_success(model_id);
                } else {
                    registry.record_failure(model_id);
                }
            }
        }

        let (metaphor_score, saturation_from_scorer) =
            score_metaphor_discipline(&metaphor_report, &simile_report, &voice_bundle.simile_policy, direct_transform_judged);
        let _ = saturation_from_scorer; // already folded into `violations` above from the report directly.

        let phase_score = score_phase_appropriateness(&phase, text, vocab_judged);
        let voice_score = score_voice_authenticity(voice_judged);
        let character_score = score_character_consistency(character_judged);

        let mut category_scores: HashMap<String, CategoryScore> = HashMap::new();
        category_scores.insert("voice_authenticity".to_string(), voice_score);
        category_scores.insert("character_consistency".to_string(), character_score);
        category_scores.insert("metaphor_discipline".to_string(), metaphor_score);
        category_scores.insert("anti_pattern_compliance".to_string(), anti_pattern_score);
        category_scores.insert("phase_appropriateness".to_string(), phase_score);

        let overall = compose_overall(&category_scores);
        let low_confidence = category_scores.values().any(|c| c.indeterminate);
        let tier = Tier::classify_with(overall, weights.tier_a, weights.tier_a_minus, weights.tier_b_plus, weights.tier_b);

        violations.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.line_index.cmp(&b.line_index)));

        let phase_flags: Vec<String> = category_scores
            .get("phase_appropriateness")
            .map(|c| c.notes.clone())
            .unwrap_or_default();

        Ok(crate::model::SceneScore {
            overall,
            category_scores,
            violations,
            metaphor_report,
            tier,
            phase_flags,
            model_used,
            wall_time_ms: start.elapsed().as_millis() as u64,
            low_confidence,
        })
    }

    /// Deterministic-only convenience wrapper for `detect_patterns`
    /// (§6): synchronous, always succeeds once the bundle is compiled.
    pub fn detect_patterns(
        &self,
        project_id: &str,
        text: &str,
        voice_bundle: &VoiceBundle,
        simile_density_threshold: f64,
    ) -> Result<Vec<crate::patterns::PatternMatch>, AnalyzerError> {
        self.patterns.recompile(project_id, voice_bundle, simile_density_threshold)?;
        self.patterns
            .scan(project_id, text)
            .ok_or_else(|| AnalyzerError::PatternsUncompiled(project_id.to_string()))
    }

    /// Deterministic-only convenience wrapper for `analyze_metaphors`
    /// (§6).
    pub fn analyze_metaphors(
        &self,
        project_id: &str,
        text: &str,
        voice_bundle: &VoiceBundle,
        simile_density_threshold: f64,
    ) -> Result<MetaphorReport, AnalyzerError> {
        self.patterns.recompile(project_id, voice_bundle, simile_density_threshold)?;
        self.patterns
            .analyze_metaphors(project_id, text)
            .ok_or_else(|| AnalyzerError::PatternsUncompiled(project_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AntiPattern, MetaphorDomain, Pov, SimilePolicy, Tense};
    use crate::patterns::PatternLibrary;
    use crate::settings::{InMemorySettingsStore, SettingsResolver, SettingsStore};
    use std::sync::Arc;

    fn bundle() -> VoiceBundle {
        VoiceBundle {
            gold_standard: "The engine hummed steady under her palm.".into(),
            anti_patterns: vec![AntiPattern {
                pattern: r"with\s+surgical\s+precision".into(),
                description: "surgical precision cliche".into(),
                severity: Severity::ZeroTolerance,
            }],
            metaphor_domains: vec![MetaphorDomain {
                name: "gambling".into(),
                keywords: vec!["bet".into(), "odds".into(), "wager".into()],
                max_percentage: 0.3,
            }],
            simile_policy: SimilePolicy::Limit(2),
            pov: Pov::ThirdLimited,
            tense: Tense::Past,
            phase_profiles: vec![crate::model::PhaseProfile {
                phase_name: "setup".into(),
                allowed_technical_vocab: vec![],
                forbidden_constructs: vec![],
            }],
        }
    }

    fn resolver() -> Arc<SettingsResolver> {
        let global: Arc<dyn SettingsStore> = Arc::new(InMemorySettingsStore::new());
        Arc::new(
            SettingsResolver::new(global, |_| Arc::new(InMemorySettingsStore::new()) as Arc<dyn SettingsStore>)
                .unwrap(),
        )
    }

    fn scripted_ok(awarded: f64) -> Result<CategoryJudgeResponse, JudgeError> {
        Ok(CategoryJudgeResponse {
            awarded,
            rationale: "fine".into(),
            sub_test_notes: vec![],
        })
    }

    #[tokio::test]
    async fn clean_text_with_full_judge_scores_reach_a_tier() {
        let judge = Arc::new(judge::test_support::ScriptedJudge::new(vec![
            scripted_ok(30.0),
            scripted_ok(20.0),
            scripted_ok(6.0),
            scripted_ok(8.0),
        ]));
        let analyzer = SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver(), judge);
        let ctx = SceneContext {
            project_id: "p1".to_string(),
            phase: "setup".to_string(),
        };
        let score = analyzer
            .analyze("The engine hummed steady under her palm.", &ctx, &bundle(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(score.overall, 100.0);
        assert_eq!(score.tier, Tier::A);
        assert!(!score.low_confidence);
        assert!(score.violations.is_empty());
    }

    #[tokio::test]
    async fn zero_tolerance_hit_reduces_anti_pattern_score_and_adds_violation() {
        let judge = Arc::new(judge::test_support::ScriptedJudge::new(vec![
            scripted_ok(30.0),
            scripted_ok(20.0),
            scripted_ok(6.0),
            scripted_ok(8.0),
        ]));
        let analyzer = SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver(), judge);
        let ctx = SceneContext {
            project_id: "p2".to_string(),
            phase: "setup".to_string(),
        };
        let score = analyzer
            .analyze("He moved with surgical precision.", &ctx, &bundle(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(score.category_scores["anti_pattern_compliance"].awarded, 13.0);
        assert!(score
            .violations
            .iter()
            .any(|v| v.severity == Severity::ZeroTolerance));
    }

    #[tokio::test]
    async fn unavailable_judge_degrades_llm_categories_to_indeterminate() {
        let judge = Arc::new(judge::test_support::ScriptedJudge::new(vec![]));
        let analyzer = SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver(), judge);
        let ctx = SceneContext {
            project_id: "p3".to_string(),
            phase: "setup".to_string(),
        };
        let score = analyzer
            .analyze("Plain text with no issues at all.", &ctx, &bundle(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(score.low_confidence);
        assert!(score.category_scores["voice_authenticity"].indeterminate);
    }

    #[tokio::test]
    async fn unknown_phase_is_rejected_before_any_scoring() {
        let judge = Arc::new(judge::test_support::ScriptedJudge::new(vec![]));
        let analyzer = SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver(), judge);
        let ctx = SceneContext {
            project_id: "p4".to_string(),
            phase: "climax".to_string(),
        };
        let err = analyzer
            .analyze("anything", &ctx, &bundle(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::UnknownPhase(_)));
    }

    #[tokio::test]
    async fn metaphor_saturation_flags_violation_without_any_anti_pattern_hit() {
        let judge = Arc::new(judge::test_support::ScriptedJudge::new(vec![
            scripted_ok(30.0),
            scripted_ok(20.0),
            scripted_ok(6.0),
            scripted_ok(8.0),
        ]));
        let analyzer = SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver(), judge);
        let ctx = SceneContext {
            project_id: "p5".to_string(),
            phase: "setup".to_string(),
        };
        let text = "bet odds wager bet odds wager bet plain words with nothing else to say about it";
        let score = analyzer.analyze(text, &ctx, &bundle(), &CancellationToken::new()).await.unwrap();
        assert!(score
            .violations
            .iter()
            .any(|v| v.pattern_id == "metaphor_saturation:gambling"));
    }
}
