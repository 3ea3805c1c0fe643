//! The Enhancement Engine (§4.8): a threshold-driven state machine
//! routing scored prose through Action-Prompt surgical fixes, the
//! Six-Pass rewrite ritual, or outright rejection. Thresholds,
//! regression tolerance, and the fast-exit floor are all Settings
//! Resolver paths rather than constants.

mod action_prompt;
mod six_pass;
mod transform;

pub use action_prompt::{apply_action_prompt, fixable_violations, Fix};
pub use six_pass::{pass_instruction, PASS_NAMES};
pub use transform::{EnhancementTransform, TransformError, TransportTransform};
#[cfg(any(test, feature = "test-support"))]
pub use transform::test_support;

use crate::analyzer::{AnalyzerError, SceneAnalyzer, SceneContext};
use crate::events::{CraftEvent, SharedEventBus};
use crate::model::{EnhancementMode, EnhancementOutcome, PassRecord, QualityTier, SceneScore, TaskType, VoiceBundle};
use crate::registry::ModelRegistry;
use crate::settings::SettingsResolver;
use crate::transport::Transport;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum EnhancementError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error("settings error: {0}")]
    Settings(#[from] crate::settings::InvalidSetting),
    #[error("no model is available for enhancement transforms")]
    ModelUnavailable,
}

/// Source of LLM transform calls: a fixed injected transform (tests, or
/// a caller that already picked a model) or live routing through the
/// Model Registry and Transport — mirrors [`crate::analyzer`]'s
/// `JudgeSource` split.
enum TransformSource {
    Fixed(Arc<dyn EnhancementTransform>),
    Routed {
        registry: Arc<ModelRegistry>,
        transport: Arc<Transport>,
    },
}

struct Thresholds {
    action_prompt_threshold: f64,
    six_pass_floor: f64,
    regression_tolerance: f64,
    fast_exit_threshold: f64,
}

/// The Enhancement Engine service.
pub struct EnhancementEngine {
    analyzer: Arc<SceneAnalyzer>,
    resolver: Arc<SettingsResolver>,
    transform_source: TransformSource,
    event_bus: Option<SharedEventBus>,
}

impl EnhancementEngine {
    /// Construct an engine that routes transform calls live through the
    /// Model Registry and Transport.
    pub fn routed(
        analyzer: Arc<SceneAnalyzer>,
        resolver: Arc<SettingsResolver>,
        registry: Arc<ModelRegistry>,
        transport: Arc<Transport>,
    ) -> Self {
        Self {
            analyzer,
            resolver,
            transform_source: TransformSource::Routed { registry, transport },
            event_bus: None,
        }
    }

    /// Construct an engine with a fixed, pre-selected transform — the
    /// seam used by tests and by callers that have already picked a
    /// model for this call.
    pub fn with_transform(
        analyzer: Arc<SceneAnalyzer>,
        resolver: Arc<SettingsResolver>,
        transform: Arc<dyn EnhancementTransform>,
    ) -> Self {
        Self {
            analyzer,
            resolver,
            transform_source: TransformSource::Fixed(transform),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn thresholds(&self, project_id: &str) -> Result<Thresholds, EnhancementError> {
        let pid = Some(project_id);
        Ok(Thresholds {
            action_prompt_threshold: self.resolver.get_number("enhancement.action_prompt_threshold", pid)?,
            six_pass_floor: self.resolver.get_number("enhancement.six_pass_floor", pid)?,
            regression_tolerance: self.resolver.get_number("enhancement.regression_tolerance", pid)?,
            fast_exit_threshold: self.resolver.get_number("enhancement.six_pass_fast_exit_threshold", pid)?,
        })
    }

    fn resolve_transform(&self, project_id: &str) -> Result<Arc<dyn EnhancementTransform>, EnhancementError> {
        match &self.transform_source {
            TransformSource::Fixed(transform) => Ok(transform.clone()),
            TransformSource::Routed { registry, transport } => {
                let tier_str = self.resolver.get_string("router.quality_tier", Some(project_id))?;
                let tier = match tier_str.as_str() {
                    "budget" => QualityTier::Budget,
                    "premium" => QualityTier::Premium,
                    _ => QualityTier::Balanced,
                };
                let candidates = registry.candidates(TaskType::Enhancement, tier);
                match candidates.first() {
                    Some(record) => Ok(Arc::new(TransportTransform {
                        transport: transport.clone(),
                        model_id: record.model_id.clone(),
                    })),
                    None => {
                        if let Some(bus) = &self.event_bus {
                            let _ = bus.publish(CraftEvent::ModelDegraded {
                                task_type: "enhancement".to_string(),
                                requested: None,
                                substituted: "none_available".to_string(),
                                timestamp: crate::model::now(),
                            });
                        }
                        Err(EnhancementError::ModelUnavailable)
                    }
                }
            }
        }
    }

    fn publish_pass_completed(&self, pass_name: &str, before: f64, after: f64, reverted: bool) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(CraftEvent::EnhancementPassCompleted {
                pass_name: pass_name.to_string(),
                before,
                after,
                reverted,
                timestamp: crate::model::now(),
            });
        }
    }

    /// Run the Enhancement Engine's state machine against `text` (§4.8,
    /// §6 `enhance`).
    pub async fn enhance(
        &self,
        text: &str,
        ctx: &SceneContext,
        voice_bundle: &VoiceBundle,
        cancel: &CancellationToken,
    ) -> Result<EnhancementOutcome, EnhancementError> {
        let input_score = self.analyzer.analyze(text, ctx, voice_bundle, cancel).await?;
        let thresholds = self.thresholds(&ctx.project_id)?;

        if input_score.overall >= thresholds.action_prompt_threshold {
            return self.run_action_prompt(text, input_score, ctx, voice_bundle, cancel).await;
        }
        if input_score.overall >= thresholds.six_pass_floor {
            return self
                .run_six_pass(text, input_score, ctx, voice_bundle, &thresholds, cancel)
                .await;
        }

        Ok(EnhancementOutcome {
            input_text: text.to_string(),
            input_score: input_score.clone(),
            mode: EnhancementMode::Reject,
            passes: Vec::new(),
            output_text: text.to_string(),
            output_score: input_score,
            improvement_delta: 0.0,
        })
    }

    async fn run_action_prompt(
        &self,
        text: &str,
        input_score: SceneScore,
        ctx: &SceneContext,
        voice_bundle: &VoiceBundle,
        cancel: &CancellationToken,
    ) -> Result<EnhancementOutcome, EnhancementError> {
        let fixable = fixable_violations(&input_score.violations);
        if fixable.is_empty() {
            return Ok(EnhancementOutcome {
                input_text: text.to_string(),
                input_score: input_score.clone(),
                mode: EnhancementMode::ActionPrompt,
                passes: Vec::new(),
                output_text: text.to_string(),
                output_score: input_score,
                improvement_delta: 0.0,
            });
        }

        let transform = self.resolve_transform(&ctx.project_id)?;
        let lines: Vec<&str> = text.lines().collect();
        let mut fixes = Vec::with_capacity(fixable.len());
        for violation in &fixable {
            let Some(line) = lines.get(violation.line_index) else {
                continue;
            };
            let suggestion = violation
                .suggested_fix
                .as_ref()
                .map(|fix| format!(" Suggested direction: {fix}."))
                .unwrap_or_default();
            let instruction = format!(
                "Rewrite only the narrow span needed to fix this flagged issue ({}), originally matched as \
                 '{}'.{} Keep the rest of the line intact and return the full corrected line only, no commentary.",
                violation.pattern_id, violation.excerpt, suggestion
            );
            let new_line = transform
                .transform(&instruction, line, cancel)
                .await
                .map_err(|_| EnhancementError::ModelUnavailable)?;
            fixes.push(Fix {
                line_index: violation.line_index,
                old: (*line).to_string(),
                new: new_line,
            });
        }

        let candidate_text = {
            let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
            let mut ordered = fixes.clone();
            ordered.sort_by(|a, b| b.line_index.cmp(&a.line_index));
            for fix in &ordered {
                if let Some(line) = lines.get_mut(fix.line_index) {
                    *line = fix.new.clone();
                }
            }
            lines.join("\n")
        };

        let candidate_score = self.analyzer.analyze(&candidate_text, ctx, voice_bundle, cancel).await?;

        // §4.8: "if overall dropped, the change set is rolled back."
        let reverted = candidate_score.overall < input_score.overall;
        let (output_text, output_score, diff_summary) = if reverted {
            (
                text.to_string(),
                input_score.clone(),
                format!(
                    "reverted {} fix(es): overall would have dropped from {:.1} to {:.1}",
                    fixes.len(),
                    input_score.overall,
                    candidate_score.overall
                ),
            )
        } else {
            (candidate_text, candidate_score, format!("applied {} fix(es)", fixes.len()))
        };

        self.publish_pass_completed("action_prompt", input_score.overall, output_score.overall, reverted);

        let improvement_delta = output_score.overall - input_score.overall;
        Ok(EnhancementOutcome {
            input_text: text.to_string(),
            input_score: input_score.clone(),
            mode: EnhancementMode::ActionPrompt,
            passes: vec![PassRecord {
                pass_name: "action_prompt".to_string(),
                before: input_score.overall,
                after: output_score.overall,
                diff_summary,
            }],
            output_text,
            output_score,
            improvement_delta,
        })
    }

    async fn run_six_pass(
        &self,
        text: &str,
        input_score: SceneScore,
        ctx: &SceneContext,
        voice_bundle: &VoiceBundle,
        thresholds: &Thresholds,
        cancel: &CancellationToken,
    ) -> Result<EnhancementOutcome, EnhancementError> {
        let transform = self.resolve_transform(&ctx.project_id)?;
        let mut current_text = text.to_string();
        let mut current_score = input_score.clone();
        let mut passes = Vec::with_capacity(PASS_NAMES.len());

        for pass_name in PASS_NAMES {
            let instruction = pass_instruction(pass_name, voice_bundle);
            let candidate_text = transform
                .transform(&instruction, &current_text, cancel)
                .await
                .map_err(|_| EnhancementError::ModelUnavailable)?;
            let candidate_score = self.analyzer.analyze(&candidate_text, ctx, voice_bundle, cancel).await?;

            let before = current_score.overall;
            let regressed = candidate_score.overall < before - thresholds.regression_tolerance;

            let (after, diff_summary) = if regressed {
                (
                    before,
                    format!(
                        "reverted: {pass_name} would have dropped overall from {before:.1} to {:.1}",
                        candidate_score.overall
                    ),
                )
            } else {
                let after = candidate_score.overall;
                current_text = candidate_text;
                current_score = candidate_score;
                (after, format!("{pass_name}: overall moved from {before:.1} to {after:.1}"))
            };

            self.publish_pass_completed(pass_name, before, after, regressed);
            passes.push(PassRecord {
                pass_name: pass_name.to_string(),
                before,
                after,
                diff_summary,
            });

            if current_score.overall >= thresholds.fast_exit_threshold {
                break;
            }
        }

        let improvement_delta = current_score.overall - input_score.overall;
        Ok(EnhancementOutcome {
            input_text: text.to_string(),
            input_score,
            mode: EnhancementMode::SixPass,
            passes,
            output_text: current_text,
            output_score: current_score,
            improvement_delta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::test_support::ScriptedJudge;
    use crate::analyzer::{CategoryJudgeResponse, JudgeError};
    use crate::enhancement::transform::test_support::ScriptedTransform;
    use crate::model::{AntiPattern, MetaphorDomain, PhaseProfile, Pov, Severity, SimilePolicy, Tense};
    use crate::patterns::PatternLibrary;
    use crate::settings::{InMemorySettingsStore, SettingsResolver, SettingsStore};

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
                keywords: vec!["bet".into()],
                max_percentage: 0.5,
            }],
            simile_policy: SimilePolicy::Allow,
            pov: Pov::ThirdLimited,
            tense: Tense::Past,
            phase_profiles: vec![PhaseProfile {
                phase_name: "setup".into(),
                allowed_technical_vocab: vec![],
                forbidden_constructs: vec![],
            }],
        }
    }

    fn resolver() -> Arc<SettingsResolver> {
        let global: Arc<dyn SettingsStore> = Arc::new(InMemorySettingsStore::new());
        Arc::new(
            SettingsResolver::new(global, |_| Arc::new(InMemorySettingsStore::new()) as Arc<dyn SettingsStore>).unwrap(),
        )
    }

    fn scripted_ok(awarded: f64) -> Result<CategoryJudgeResponse, JudgeError> {
        Ok(CategoryJudgeResponse {
            awarded,
            rationale: "fine".into(),
            sub_test_notes: vec![],
        })
    }

    fn full_marks_judge() -> Arc<ScriptedJudge> {
        Arc::new(ScriptedJudge::new(vec![
            scripted_ok(30.0),
            scripted_ok(20.0),
            scripted_ok(6.0),
            scripted_ok(8.0),
        ]))
    }

    fn ctx(project_id: &str) -> SceneContext {
        SceneContext {
            project_id: project_id.to_string(),
            phase: "setup".to_string(),
        }
    }

    #[tokio::test]
    async fn clean_a_tier_text_is_a_no_op_under_action_prompt() {
        let resolver = resolver();
        let analyzer = Arc::new(SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver.clone(), full_marks_judge()));
        let transform: Arc<dyn EnhancementTransform> = Arc::new(ScriptedTransform::new(vec![]));
        let engine = EnhancementEngine::with_transform(analyzer, resolver, transform);

        let text = "The engine hummed steady under her palm.";
        let outcome = engine.enhance(text, &ctx("p1"), &bundle(), &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.mode, EnhancementMode::ActionPrompt);
        assert!(outcome.passes.is_empty());
        assert_eq!(outcome.output_text, text);
        assert_eq!(outcome.improvement_delta, 0.0);
    }

    #[tokio::test]
    async fn action_prompt_applies_fix_for_zero_tolerance_violation() {
        let resolver = resolver();
        // Base judge scores are high enough that fixing the one
        // zero-tolerance hit lands in Action-Prompt territory both
        // before and after the fix.
        let judge = Arc::new(ScriptedJudge::new(vec![
            scripted_ok(30.0),
            scripted_ok(20.0),
            scripted_ok(6.0),
            scripted_ok(8.0),
            scripted_ok(30.0),
            scripted_ok(20.0),
            scripted_ok(6.0),
            scripted_ok(8.0),
        ]));
        let analyzer = Arc::new(SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver.clone(), judge));
        let transform: Arc<dyn EnhancementTransform> =
            Arc::new(ScriptedTransform::new(vec![Ok("He moved with practiced care.".to_string())]));
        let engine = EnhancementEngine::with_transform(analyzer, resolver, transform);

        let text = "He moved with surgical precision.";
        let outcome = engine.enhance(text, &ctx("p2"), &bundle(), &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.mode, EnhancementMode::ActionPrompt);
        assert_eq!(outcome.passes.len(), 1);
        assert_eq!(outcome.output_text, "He moved with practiced care.");
        assert!(outcome.output_score.overall >= outcome.input_score.overall);
    }

    #[tokio::test]
    async fn action_prompt_reverts_a_fix_that_drops_the_score() {
        let resolver = resolver();
        let judge = Arc::new(ScriptedJudge::new(vec![
            scripted_ok(30.0),
            scripted_ok(20.0),
            scripted_ok(6.0),
            scripted_ok(8.0),
            scripted_ok(5.0), // candidate voice score collapses after the bad "fix"
            scripted_ok(20.0),
            scripted_ok(6.0),
            scripted_ok(8.0),
        ]));
        let analyzer = Arc::new(SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver.clone(), judge));
        // The "fix" reintroduces the same anti-pattern differently worded, and the
        // judge scores the rewritten voice far worse.
        let transform: Arc<dyn EnhancementTransform> =
            Arc::new(ScriptedTransform::new(vec![Ok("He moved with surgical exactness, utterly lifeless.".to_string())]));
        let engine = EnhancementEngine::with_transform(analyzer, resolver, transform);

        let text = "He moved with surgical precision.";
        let outcome = engine.enhance(text, &ctx("p3"), &bundle(), &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.output_text, text);
        assert_eq!(outcome.output_score.overall, outcome.input_score.overall);
        assert!(outcome.passes[0].diff_summary.contains("reverted"));
    }

    #[tokio::test]
    async fn six_pass_mode_runs_for_mid_tier_score_and_fast_exits_on_a_minus() {
        let resolver = resolver();
        // Input score: voice 18/30 -> overall well under 85, in [70, 85) band.
        let judge = Arc::new(ScriptedJudge::new(vec![
            scripted_ok(18.0),
            scripted_ok(16.0),
            scripted_ok(5.0),
            scripted_ok(6.0),
            // After pass 1, score jumps to an A- level, triggering fast exit.
            scripted_ok(28.0),
            scripted_ok(20.0),
            scripted_ok(6.0),
            scripted_ok(8.0),
        ]));
        let analyzer = Arc::new(SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver.clone(), judge));
        let transform: Arc<dyn EnhancementTransform> =
            Arc::new(ScriptedTransform::new(vec![Ok("Revised opening line.".to_string())]));
        let engine = EnhancementEngine::with_transform(analyzer, resolver, transform);

        let text = "A plain line with nothing much going on.";
        let outcome = engine.enhance(text, &ctx("p4"), &bundle(), &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.mode, EnhancementMode::SixPass);
        assert_eq!(outcome.passes.len(), 1, "fast exit after first pass reaches A-");
        assert_eq!(outcome.passes[0].pass_name, "sensory_anchoring");
        assert!(outcome.improvement_delta > 0.0);
    }

    #[tokio::test]
    async fn low_score_text_is_rejected_without_any_passes() {
        let resolver = resolver();
        let judge = Arc::new(ScriptedJudge::new(vec![
            scripted_ok(5.0),
            scripted_ok(5.0),
            scripted_ok(1.0),
            scripted_ok(2.0),
        ]));
        let analyzer = Arc::new(SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver.clone(), judge));
        let transform: Arc<dyn EnhancementTransform> = Arc::new(ScriptedTransform::new(vec![]));
        let engine = EnhancementEngine::with_transform(analyzer, resolver, transform);

        let text = "Weak scene, barely there.";
        let outcome = engine.enhance(text, &ctx("p5"), &bundle(), &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.mode, EnhancementMode::Reject);
        assert!(outcome.passes.is_empty());
        assert_eq!(outcome.output_text, text);
    }
}
