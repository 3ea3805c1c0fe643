//! The §6 external RPC contract: one async function per named operation,
//! each wrapping a `craft_engine` or local tournament call and converging
//! on the `{ok, value} | {ok, error}` envelope. A single [`RpcContext`]
//! bundles the services one running instance needs; [`dispatch`] maps a
//! newline-delimited JSON request onto the right function by `op` name,
//! for the `craft-tournament-rpc` binary to drive over stdio.

use crate::hybrid::{create_hybrid, HybridError};
use crate::structure::{write_structure_variants, StructureError};
use crate::tournament::{TournamentError, TournamentOrchestrator};
use crate::types::{HybridSpan, Strategy, TournamentResult, Variant};
use craft_engine::analyzer::{SceneAnalyzer, SceneContext};
use craft_engine::enhancement::{apply_action_prompt, EnhancementEngine, Fix, TransportTransform};
use craft_engine::error::{CraftError, CraftResult, Envelope, ErrorKind};
use craft_engine::model::{EnhancementOutcome, MetaphorReport, Scaffold, SceneScore, VoiceBundle};
use craft_engine::patterns::PatternMatch;
use craft_engine::registry::ModelRegistry;
use craft_engine::scaffold::{DraftRequest, ScaffoldGenerator};
use craft_engine::settings::{SettingsResolver, SettingsScope};
use craft_engine::transport::Transport;
use craft_engine::work_order::WorkOrderStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn tournament_error(err: TournamentError) -> CraftError {
    match err {
        TournamentError::Settings(inner) => inner.into(),
        TournamentError::Structure(inner) => structure_error(inner),
    }
}

fn structure_error(err: StructureError) -> CraftError {
    match err {
        StructureError::Transport(inner) => inner.into(),
    }
}

fn hybrid_error(err: HybridError) -> CraftError {
    match err {
        HybridError::UnknownVariant(id) => {
            CraftError::new(ErrorKind::SchemaViolation, format!("recipe references unknown variant '{id}'"))
        }
        HybridError::Transform(inner) => craft_engine::enhancement::TransformError::from(inner).into(),
        HybridError::Analyzer(inner) => inner.into(),
    }
}

impl From<craft_engine::enhancement::TransformError> for CraftError {
    fn from(err: craft_engine::enhancement::TransformError) -> Self {
        match err {
            craft_engine::enhancement::TransformError::Transport(inner) => inner.into(),
        }
    }
}

/// The full set of services one `craft-tournament-rpc` process wires
/// together. Constructed once by the binary's `main`, then shared across
/// every request it handles.
pub struct RpcContext {
    pub analyzer: Arc<SceneAnalyzer>,
    pub enhancement: Arc<EnhancementEngine>,
    pub scaffold: Arc<ScaffoldGenerator>,
    pub tournament: Arc<TournamentOrchestrator>,
    pub registry: Arc<ModelRegistry>,
    pub resolver: Arc<SettingsResolver>,
    pub transport: Arc<Transport>,
    /// Optional work-order store (§6): when set, every `analyze` and
    /// `enhance` call records its result keyed by `scene_id`. Absent by
    /// default since the core does not own this persistence (§1 scope).
    pub work_orders: Option<Arc<dyn WorkOrderStore>>,
}

/// One request read from stdin: `op` selects the handler, `params`
/// carries its JSON-decoded argument struct.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub op: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    text: String,
    project_id: String,
    phase: String,
    voice_bundle: VoiceBundle,
    #[serde(default)]
    scene_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetectPatternsParams {
    project_id: String,
    text: String,
    voice_bundle: VoiceBundle,
    simile_density_threshold: f64,
}

#[derive(Debug, Deserialize)]
struct CompareParams {
    texts: Vec<String>,
    project_id: String,
    phase: String,
    voice_bundle: VoiceBundle,
}

#[derive(Debug, Deserialize)]
struct ScaffoldDraftParams {
    request: DraftRequest,
    voice_bundle: VoiceBundle,
}

#[derive(Debug, Deserialize)]
struct ScaffoldEnrichParams {
    scaffold: Scaffold,
    source_material: String,
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct ScaffoldGenerateParams {
    request: DraftRequest,
    voice_bundle: VoiceBundle,
    source_material: String,
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct WriteStructureVariantsParams {
    scaffold: Scaffold,
    model_id: String,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct RunTournamentParams {
    scaffold: Scaffold,
    voice_bundle: VoiceBundle,
    project_id: String,
    phase: String,
    models: Vec<String>,
    strategies: Vec<Strategy>,
    #[serde(default)]
    structure_model_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateHybridParams {
    tournament_result: TournamentResult,
    recipe: Vec<HybridSpan>,
    transform_model_id: String,
    project_id: String,
    phase: String,
    voice_bundle: VoiceBundle,
}

#[derive(Debug, Deserialize)]
struct EnhanceParams {
    text: String,
    project_id: String,
    phase: String,
    voice_bundle: VoiceBundle,
    #[serde(default)]
    scene_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApplyActionPromptParams {
    text: String,
    fixes: Vec<Fix>,
}

#[derive(Debug, Deserialize)]
struct SettingsGetParams {
    path: String,
    #[serde(default)]
    project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SettingsSetParams {
    path: String,
    value: serde_json::Value,
    scope: SettingsScope,
    #[serde(default)]
    project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CostTask {
    model_id: String,
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct CostEstimate {
    model_id: String,
    estimated_cost_usd: f64,
}

fn bad_params(op: &str, err: serde_json::Error) -> CraftError {
    CraftError::new(ErrorKind::SchemaViolation, format!("{op}: malformed params: {err}"))
}

impl RpcContext {
    pub async fn analyze(&self, text: &str, ctx: &SceneContext, voice_bundle: &VoiceBundle, cancel: &CancellationToken) -> CraftResult<SceneScore> {
        self.analyze_recording(text, ctx, voice_bundle, None, cancel).await
    }

    /// As [`Self::analyze`], additionally recording the result to the
    /// work-order store (if configured) when `scene_id` is given.
    pub async fn analyze_recording(
        &self,
        text: &str,
        ctx: &SceneContext,
        voice_bundle: &VoiceBundle,
        scene_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> CraftResult<SceneScore> {
        let score = self.analyzer.analyze(text, ctx, voice_bundle, cancel).await?;
        if let Some(scene_id) = scene_id {
            craft_engine::work_order::record_score(self.work_orders.as_deref(), scene_id, &score);
        }
        Ok(score)
    }

    pub fn detect_patterns(
        &self,
        project_id: &str,
        text: &str,
        voice_bundle: &VoiceBundle,
        simile_density_threshold: f64,
    ) -> CraftResult<Vec<PatternMatch>> {
        Ok(self.analyzer.detect_patterns(project_id, text, voice_bundle, simile_density_threshold)?)
    }

    pub fn analyze_metaphors(
        &self,
        project_id: &str,
        text: &str,
        voice_bundle: &VoiceBundle,
        simile_density_threshold: f64,
    ) -> CraftResult<MetaphorReport> {
        Ok(self.analyzer.analyze_metaphors(project_id, text, voice_bundle, simile_density_threshold)?)
    }

    /// Convenience wrapper (§6 `compare`): score every text under the
    /// same context and return the Scene Scores ordered by `overall`
    /// descending.
    pub async fn compare(
        &self,
        texts: &[String],
        ctx: &SceneContext,
        voice_bundle: &VoiceBundle,
        cancel: &CancellationToken,
    ) -> CraftResult<Vec<SceneScore>> {
        let mut scores = Vec::with_capacity(texts.len());
        for text in texts {
            scores.push(self.analyzer.analyze(text, ctx, voice_bundle, cancel).await?);
        }
        scores.sort_by(|a, b| b.overall.partial_cmp(&a.overall).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scores)
    }

    pub fn scaffold_draft(&self, request: DraftRequest, voice_bundle: &VoiceBundle) -> CraftResult<Scaffold> {
        Ok(self.scaffold.draft(request, voice_bundle)?)
    }

    pub async fn scaffold_enrich(
        &self,
        scaffold: Scaffold,
        source_material: &str,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> CraftResult<Scaffold> {
        Ok(self.scaffold.enrich(scaffold, source_material, project_id, cancel).await?)
    }

    pub async fn scaffold_generate(
        &self,
        request: DraftRequest,
        voice_bundle: &VoiceBundle,
        source_material: &str,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> CraftResult<Scaffold> {
        Ok(self
            .scaffold
            .generate(request, voice_bundle, source_material, project_id, cancel)
            .await?)
    }

    pub async fn write_structure_variants(
        &self,
        scaffold: &Scaffold,
        model_id: &str,
        count: u32,
        cancel: &CancellationToken,
    ) -> CraftResult<Vec<String>> {
        write_structure_variants(&self.transport, scaffold, model_id, count, cancel)
            .await
            .map_err(structure_error)
    }

    #[allow(clippy::too_many_arguments)]
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
    ) -> CraftResult<TournamentResult> {
        self.tournament
            .run_tournament(scaffold, voice_bundle, project_id, phase, models, strategies, structure_model_id, cancel)
            .await
            .map_err(tournament_error)
    }

    pub async fn create_hybrid(
        &self,
        result: &TournamentResult,
        recipe: Vec<HybridSpan>,
        transform_model_id: &str,
        ctx: &SceneContext,
        voice_bundle: &VoiceBundle,
        cancel: &CancellationToken,
    ) -> CraftResult<Variant> {
        let transform = Arc::new(TransportTransform {
            transport: self.transport.clone(),
            model_id: transform_model_id.to_string(),
        });
        create_hybrid(result, recipe, transform, self.analyzer.clone(), ctx, voice_bundle, cancel)
            .await
            .map_err(hybrid_error)
    }

    pub async fn enhance(&self, text: &str, ctx: &SceneContext, voice_bundle: &VoiceBundle, cancel: &CancellationToken) -> CraftResult<EnhancementOutcome> {
        self.enhance_recording(text, ctx, voice_bundle, None, cancel).await
    }

    /// As [`Self::enhance`], additionally recording the result to the
    /// work-order store (if configured) when `scene_id` is given.
    pub async fn enhance_recording(
        &self,
        text: &str,
        ctx: &SceneContext,
        voice_bundle: &VoiceBundle,
        scene_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> CraftResult<EnhancementOutcome> {
        let outcome = self.enhancement.enhance(text, ctx, voice_bundle, cancel).await?;
        if let Some(scene_id) = scene_id {
            craft_engine::work_order::record_enhancement(self.work_orders.as_deref(), scene_id, &outcome);
        }
        Ok(outcome)
    }

    pub fn apply_action_prompt(&self, text: &str, fixes: &[Fix]) -> CraftResult<String> {
        Ok(apply_action_prompt(text, fixes))
    }

    pub fn settings_get(&self, path: &str, project_id: Option<&str>) -> CraftResult<serde_json::Value> {
        Ok(self.resolver.get(path, project_id)?)
    }

    pub fn settings_set(&self, path: &str, value: serde_json::Value, scope: SettingsScope, project_id: Option<&str>) -> CraftResult<()> {
        Ok(self.resolver.set(path, value, scope, project_id)?)
    }

    /// `orchestrator.estimate_cost` (§6): a cost breakdown for a batch of
    /// prospective calls, looked up against the Registry's capability
    /// matrix without reserving any budget.
    pub fn estimate_cost(&self, tasks: &[CostTask]) -> CraftResult<Vec<CostEstimate>> {
        tasks
            .iter()
            .map(|task| {
                self.registry
                    .estimate_cost_for(&task.model_id, task.input_tokens, task.output_tokens)
                    .map(|estimated_cost_usd| CostEstimate {
                        model_id: task.model_id.clone(),
                        estimated_cost_usd,
                    })
                    .ok_or_else(|| {
                        CraftError::new(ErrorKind::ModelUnavailable, format!("model '{}' is not registered", task.model_id))
                    })
            })
            .collect()
    }

    /// Dispatch one decoded [`Request`] to its handler and return its
    /// result already wrapped in the §6 error envelope, serialized to
    /// JSON. `cancel` scopes this one call (§5): the binary's main loop
    /// creates a fresh token per request so one hung call can be
    /// cancelled without tearing down the process.
    pub async fn dispatch(&self, request: Request, cancel: CancellationToken) -> serde_json::Value {
        let envelope = self.route(&request.op, request.params, cancel).await;
        envelope
    }

    async fn route(&self, op: &str, params: serde_json::Value, cancel: CancellationToken) -> serde_json::Value {
        macro_rules! parse {
            ($ty:ty) => {
                match serde_json::from_value::<$ty>(params) {
                    Ok(p) => p,
                    Err(e) => return to_envelope::<()>(Err(bad_params(op, e))),
                }
            };
        }

        match op {
            "analyze" => {
                let p = parse!(AnalyzeParams);
                let ctx = SceneContext { project_id: p.project_id, phase: p.phase };
                to_envelope(
                    self.analyze_recording(&p.text, &ctx, &p.voice_bundle, p.scene_id.as_deref(), &cancel)
                        .await,
                )
            }
            "detect_patterns" => {
                let p = parse!(DetectPatternsParams);
                to_envelope(self.detect_patterns(&p.project_id, &p.text, &p.voice_bundle, p.simile_density_threshold))
            }
            "analyze_metaphors" => {
                let p = parse!(DetectPatternsParams);
                to_envelope(self.analyze_metaphors(&p.project_id, &p.text, &p.voice_bundle, p.simile_density_threshold))
            }
            "compare" => {
                let p = parse!(CompareParams);
                let ctx = SceneContext { project_id: p.project_id, phase: p.phase };
                to_envelope(self.compare(&p.texts, &ctx, &p.voice_bundle, &cancel).await)
            }
            "scaffold_draft" => {
                let p = parse!(ScaffoldDraftParams);
                to_envelope(self.scaffold_draft(p.request, &p.voice_bundle))
            }
            "scaffold_enrich" => {
                let p = parse!(ScaffoldEnrichParams);
                to_envelope(self.scaffold_enrich(p.scaffold, &p.source_material, &p.project_id, &cancel).await)
            }
            "scaffold_generate" => {
                let p = parse!(ScaffoldGenerateParams);
                to_envelope(
                    self.scaffold_generate(p.request, &p.voice_bundle, &p.source_material, &p.project_id, &cancel)
                        .await,
                )
            }
            "write_structure_variants" => {
                let p = parse!(WriteStructureVariantsParams);
                to_envelope(self.write_structure_variants(&p.scaffold, &p.model_id, p.count, &cancel).await)
            }
            "run_tournament" => {
                let p = parse!(RunTournamentParams);
                to_envelope(
                    self.run_tournament(
                        p.scaffold,
                        Arc::new(p.voice_bundle),
                        &p.project_id,
                        &p.phase,
                        &p.models,
                        &p.strategies,
                        p.structure_model_id.as_deref(),
                        cancel,
                    )
                    .await,
                )
            }
            "create_hybrid" => {
                let p = parse!(CreateHybridParams);
                let ctx = SceneContext { project_id: p.project_id, phase: p.phase };
                to_envelope(
                    self.create_hybrid(&p.tournament_result, p.recipe, &p.transform_model_id, &ctx, &p.voice_bundle, &cancel)
                        .await,
                )
            }
            "enhance" => {
                let p = parse!(EnhanceParams);
                let ctx = SceneContext { project_id: p.project_id, phase: p.phase };
                to_envelope(
                    self.enhance_recording(&p.text, &ctx, &p.voice_bundle, p.scene_id.as_deref(), &cancel)
                        .await,
                )
            }
            "apply_action_prompt" => {
                let p = parse!(ApplyActionPromptParams);
                to_envelope(self.apply_action_prompt(&p.text, &p.fixes))
            }
            "settings.get" => {
                let p = parse!(SettingsGetParams);
                to_envelope(self.settings_get(&p.path, p.project_id.as_deref()))
            }
            "settings.set" => {
                let p = parse!(SettingsSetParams);
                to_envelope(self.settings_set(&p.path, p.value, p.scope, p.project_id.as_deref()))
            }
            "orchestrator.estimate_cost" => {
                #[derive(Deserialize)]
                struct Params {
                    tasks: Vec<CostTask>,
                }
                let p = parse!(Params);
                to_envelope(self.estimate_cost(&p.tasks))
            }
            other => to_envelope::<()>(Err(CraftError::new(
                ErrorKind::SchemaViolation,
                format!("unknown operation '{other}'"),
            ))),
        }
    }
}

fn to_envelope<T: Serialize>(result: CraftResult<T>) -> serde_json::Value {
    serde_json::to_value(Envelope::from_result(result)).expect("envelope of serializable value always serializes")
}
