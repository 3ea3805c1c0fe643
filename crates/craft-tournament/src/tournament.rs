//! Tournament orchestration (§4.7): structure variants, parallel
//! generation, scoring, and ranking, composed under one cancellation
//! scope per call (§5, §9 "concurrency discipline" — mirrors the
//! lineage's per-call-scoped mode runner).

use crate::generation::{generate_variants, GenerationTask};
use crate::ranking::rank;
use crate::structure::write_structure_variants;
use crate::types::{Strategy, TournamentResult};
use craft_engine::analyzer::{SceneAnalyzer, SceneContext};
use craft_engine::events::{CraftEvent, SharedEventBus};
use craft_engine::model::{Scaffold, VoiceBundle};
use craft_engine::registry::ModelRegistry;
use craft_engine::settings::SettingsResolver;
use craft_engine::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum TournamentError {
    #[error("settings error: {0}")]
    Settings(#[from] craft_engine::settings::InvalidSetting),
    #[error(transparent)]
    Structure(#[from] crate::structure::StructureError),
}

pub struct TournamentOrchestrator {
    transport: Arc<Transport>,
    analyzer: Arc<SceneAnalyzer>,
    resolver: Arc<SettingsResolver>,
    registry: Option<Arc<ModelRegistry>>,
    event_bus: Option<SharedEventBus>,
}

impl TournamentOrchestrator {
    pub fn new(transport: Arc<Transport>, analyzer: Arc<SceneAnalyzer>, resolver: Arc<SettingsResolver>) -> Self {
        Self {
            transport,
            analyzer,
            resolver,
            registry: None,
            event_bus: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn tournament_settings(&self, project_id: &str) -> Result<TournamentSettings, TournamentError> {
        let pid = Some(project_id);
        Ok(TournamentSettings {
            structure_variants_enabled: self.resolver.get_bool("tournament.structure_variants_enabled", pid)?,
            structure_variant_count: self.resolver.get_number("tournament.structure_variant_count", pid)? as u32,
            per_provider_concurrency: self.resolver.get_number("tournament.per_provider_concurrency", pid)? as usize,
            generation_timeout: Duration::from_secs_f64(self.resolver.get_number("tournament.generation_timeout_secs", pid)?),
        })
    }

    /// Run a full tournament for `scaffold` against `models` × `strategies`
    /// (§4.7, §6 `run_tournament`). Cancelling `cancel` mid-run stops
    /// in-flight generations and still returns the ranked partial results
    /// completed so far.
    pub async fn run_tournament(
        &self,
        scaffold: Scaffold,
        voice_bundle: Arc<VoiceBundle>,
        project_id: &str,
        phase: &str,
        models: &[String],
        strategies: &[Strategy],
        structure_model_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<TournamentResult, TournamentError> {
        let settings = self.tournament_settings(project_id)?;
        let scaffold = Arc::new(scaffold);

        // Step 1: structure variants (optional, default on). Outlines are
        // informational only here — the RPC layer surfaces them to the
        // caller ahead of committing to full generation.
        if settings.structure_variants_enabled {
            if let Some(model_id) = structure_model_id.or_else(|| models.first().map(String::as_str)) {
                let _outlines =
                    write_structure_variants(&self.transport, &scaffold, model_id, settings.structure_variant_count, &cancel)
                        .await?;
            }
        }

        // Step 2 + 3: parallel generation and scoring.
        let tasks: Vec<GenerationTask> = models
            .iter()
            .flat_map(|model_id| {
                strategies.iter().map(move |strategy| GenerationTask {
                    model_id: model_id.clone(),
                    strategy: *strategy,
                })
            })
            .collect();

        let ctx = SceneContext {
            project_id: project_id.to_string(),
            phase: phase.to_string(),
        };

        let variants = generate_variants(
            self.transport.clone(),
            self.analyzer.clone(),
            scaffold.clone(),
            voice_bundle,
            ctx,
            tasks,
            settings.per_provider_concurrency,
            settings.generation_timeout,
            cancel,
            self.event_bus.clone(),
        )
        .await;

        // Step 4: ranking.
        let ranked = rank(variants);
        let winner_id = ranked.first().and_then(|v| v.score.as_ref().map(|_| v.variant_id.clone()));
        // Split each variant's token_count in half as a rough input/output
        // approximation (exact split isn't carried past the transport call)
        // and price it against the Registry's capability matrix, when one
        // is configured; unregistered models and a missing Registry both
        // contribute 0.0 rather than failing the tournament.
        let cost_estimate: f64 = ranked
            .iter()
            .map(|v| {
                let input_tokens = v.token_count / 2;
                let output_tokens = v.token_count - input_tokens;
                self.registry
                    .as_ref()
                    .and_then(|registry| registry.estimate_cost_for(&v.model_id, input_tokens, output_tokens))
                    .unwrap_or(0.0)
            })
            .sum();

        let result = TournamentResult {
            scaffold_id: scaffold.chapter_id.clone(),
            variants: ranked,
            winner_id,
            hybrid_recipe: None,
            cost_estimate,
            completed_at: craft_engine::model::now(),
        };

        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(CraftEvent::TournamentCompleted {
                scaffold_id: result.scaffold_id.clone(),
                winner_id: result.winner_id.clone(),
                timestamp: craft_engine::model::now(),
            });
        }

        Ok(result)
    }
}

struct TournamentSettings {
    structure_variants_enabled: bool,
    structure_variant_count: u32,
    per_provider_concurrency: usize,
    generation_timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use craft_engine::analyzer::test_support::ScriptedJudge;
    use craft_engine::analyzer::CategoryJudgeResponse;
    use craft_engine::model::{MetaphorDomain, PhaseProfile, Pov, SimilePolicy, StrategicContext, Tense};
    use craft_engine::patterns::PatternLibrary;
    use craft_engine::settings::{InMemorySettingsStore, SettingsResolver, SettingsStore};
    use craft_engine::transport::{CompletionResponse, Message, Provider, RetryPolicy, TimeoutPolicy, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLocalProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Provider for CountingLocalProvider {
        async fn complete(
            &self,
            _model: &str,
            _messages: &[Message],
            _params: &craft_engine::transport::CompletionParams,
        ) -> Result<CompletionResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                text: "Generated scene prose.".to_string(),
                input_tokens: 50,
                output_tokens: 80,
            })
        }

        async fn complete_stream(
            &self,
            _model: &str,
            _messages: &[Message],
            _params: &craft_engine::transport::CompletionParams,
        ) -> Result<futures::stream::BoxStream<'static, Result<craft_engine::transport::CompletionDelta, TransportError>>, TransportError>
        {
            unimplemented!("not exercised by tournament tests")
        }

        async fn embed(&self, _model: &str, _texts: &[String]) -> Result<Vec<Vec<f32>>, TransportError> {
            unimplemented!("not exercised by tournament tests")
        }
    }

    fn resolver() -> Arc<SettingsResolver> {
        let global: Arc<dyn SettingsStore> = Arc::new(InMemorySettingsStore::new());
        Arc::new(SettingsResolver::new(global, |_| Arc::new(InMemorySettingsStore::new()) as Arc<dyn SettingsStore>).unwrap())
    }

    fn scripted_ok(awarded: f64) -> Result<CategoryJudgeResponse, craft_engine::analyzer::JudgeError> {
        Ok(CategoryJudgeResponse { awarded, rationale: "ok".into(), sub_test_notes: vec![] })
    }

    fn voice_bundle() -> Arc<VoiceBundle> {
        Arc::new(VoiceBundle {
            gold_standard: "The hull groaned, steady under strain.".into(),
            anti_patterns: vec![],
            metaphor_domains: vec![MetaphorDomain { name: "gambling".into(), keywords: vec!["bet".into()], max_percentage: 0.5 }],
            simile_policy: SimilePolicy::Allow,
            pov: Pov::ThirdLimited,
            tense: Tense::Past,
            phase_profiles: vec![PhaseProfile {
                phase_name: "setup".into(),
                allowed_technical_vocab: vec![],
                forbidden_constructs: vec![],
            }],
        })
    }

    fn scaffold() -> Scaffold {
        Scaffold {
            chapter_id: "ch1".into(),
            scene_index: 0,
            title: "The Breach".into(),
            phase: "setup".into(),
            pov: Pov::ThirdLimited,
            word_target: 1000,
            beats: vec!["alarm sounds".into()],
            strategic_context: StrategicContext { goals: vec![], stakes: "crew".into(), conflict: "vacuum".into() },
            success_criteria: vec![],
            continuity_checklist: vec![],
            source_enrichment: None,
        }
    }

    #[tokio::test]
    async fn run_tournament_ranks_variants_across_models_and_strategies() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transport = Transport::new(RetryPolicy::default(), TimeoutPolicy::default());
        transport.register("local", Arc::new(CountingLocalProvider { calls: calls.clone() }));
        let transport = Arc::new(transport);

        let judge = Arc::new(ScriptedJudge::new(vec![
            scripted_ok(28.0),
            scripted_ok(18.0),
            scripted_ok(5.0),
            scripted_ok(7.0),
            scripted_ok(25.0),
            scripted_ok(16.0),
            scripted_ok(4.0),
            scripted_ok(6.0),
        ]));
        let resolver = resolver();
        let analyzer = Arc::new(SceneAnalyzer::with_judge(Arc::new(PatternLibrary::new()), resolver.clone(), judge));
        let orchestrator = TournamentOrchestrator::new(transport, analyzer, resolver);

        let models = vec!["local:model-a".to_string()];
        let strategies = vec![Strategy::Action, Strategy::Character];

        let result = orchestrator
            .run_tournament(
                scaffold(),
                voice_bundle(),
                "p1",
                "setup",
                &models,
                &strategies,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.variants.len(), 2);
        assert!(result.winner_id.is_some());
        assert!(result.variants[0].score.as_ref().unwrap().overall >= result.variants[1].score.as_ref().unwrap().overall);
        assert!(calls.load(Ordering::SeqCst) >= 2, "structure variants + generation both call the provider");
    }

    #[tokio::test]
    async fn cancelling_before_generation_still_returns_a_ranked_result() {
        let mut transport = Transport::new(RetryPolicy::default(), TimeoutPolicy::default());
        transport.register("local", Arc::new(CountingLocalProvider { calls: Arc::new(AtomicUsize::new(0)) }));
        let transport = Arc::new(transport);
        let resolver = resolver();
        let analyzer = Arc::new(SceneAnalyzer::with_judge(
            Arc::new(PatternLibrary::new()),
            resolver.clone(),
            Arc::new(ScriptedJudge::new(vec![])),
        ));
        let orchestrator = TournamentOrchestrator::new(transport, analyzer, resolver);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator
            .run_tournament(
                scaffold(),
                voice_bundle(),
                "p1",
                "setup",
                &["local:model-a".to_string()],
                &[Strategy::Balanced],
                None,
                cancel,
            )
            .await
            .unwrap();

        assert_eq!(result.variants.len(), 1);
        assert!(result.variants[0].timed_out);
        assert!(result.winner_id.is_none());
    }

    #[tokio::test]
    async fn cost_estimate_is_zero_without_a_registry() {
        let mut transport = Transport::new(RetryPolicy::default(), TimeoutPolicy::default());
        transport.register("local", Arc::new(CountingLocalProvider { calls: Arc::new(AtomicUsize::new(0)) }));
        let transport = Arc::new(transport);
        let resolver = resolver();
        let analyzer = Arc::new(SceneAnalyzer::with_judge(
            Arc::new(PatternLibrary::new()),
            resolver.clone(),
            Arc::new(ScriptedJudge::new(vec![scripted_ok(28.0), scripted_ok(18.0), scripted_ok(5.0), scripted_ok(7.0)])),
        ));
        let orchestrator = TournamentOrchestrator::new(transport, analyzer, resolver);

        let result = orchestrator
            .run_tournament(
                scaffold(),
                voice_bundle(),
                "p1",
                "setup",
                &["local:model-a".to_string()],
                &[Strategy::Balanced],
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.cost_estimate, 0.0);
    }

    #[tokio::test]
    async fn cost_estimate_prices_variants_when_a_registry_is_wired() {
        use craft_engine::model::{ModelCapabilityRecord, PromptTier};

        let mut transport = Transport::new(RetryPolicy::default(), TimeoutPolicy::default());
        transport.register("local", Arc::new(CountingLocalProvider { calls: Arc::new(AtomicUsize::new(0)) }));
        let transport = Arc::new(transport);
        let resolver = resolver();
        let analyzer = Arc::new(SceneAnalyzer::with_judge(
            Arc::new(PatternLibrary::new()),
            resolver.clone(),
            Arc::new(ScriptedJudge::new(vec![scripted_ok(28.0), scripted_ok(18.0), scripted_ok(5.0), scripted_ok(7.0)])),
        ));

        let registry = Arc::new(ModelRegistry::new(
            vec![ModelCapabilityRecord {
                model_id: "local:model-a".into(),
                provider: "local".into(),
                context_window: 32_000,
                input_cost_per_mtoken: 1.0,
                output_cost_per_mtoken: 2.0,
                quality_score: 7,
                strengths: vec![],
                prompt_tier: PromptTier::Full,
                supports_embeddings: false,
                supports_streaming: false,
                requires_api_key: false,
                env_var_name: None,
            }],
            3,
            30,
        ));

        let orchestrator = TournamentOrchestrator::new(transport, analyzer, resolver).with_registry(registry);

        let result = orchestrator
            .run_tournament(
                scaffold(),
                voice_bundle(),
                "p1",
                "setup",
                &["local:model-a".to_string()],
                &[Strategy::Balanced],
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.cost_estimate > 0.0, "a wired registry should price the generated variant");
    }
}
