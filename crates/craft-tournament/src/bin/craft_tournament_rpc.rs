//! `craft-tournament-rpc`: a transport-agnostic stand-in for the HTTP
//! adapter the editor UI owns (out of core scope per spec §1). Reads
//! newline-delimited JSON [`Request`]s from stdin, dispatches each
//! through [`RpcContext`], and writes one envelope response per line to
//! stdout.
//!
//! ```bash
//! craft-tournament-rpc --capabilities models.yaml --global-settings global.yaml \
//!     --project-settings-dir ./projects --quality-tier balanced
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use craft_engine::analyzer::{SceneAnalyzer, TransportJudge};
use craft_engine::enhancement::{EnhancementEngine, TransportTransform};
use craft_engine::events::EventBus;
use craft_engine::model::{ModelCapabilityRecord, QualityTier, TaskType};
use craft_engine::patterns::PatternLibrary;
use craft_engine::registry::ModelRegistry;
use craft_engine::scaffold::ScaffoldGenerator;
use craft_engine::settings::{SettingsResolver, YamlFileSettingsStore};
use craft_engine::transport::{AnthropicAdapter, GeminiAdapter, LocalAdapter, OpenAiAdapter, RetryPolicy, Transport, TimeoutPolicy};
use craft_tournament::rpc::{Request, RpcContext};
use craft_tournament::tournament::TournamentOrchestrator;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI surface for one `craft-tournament-rpc` process. Mirrors the
/// lineage's `SwarmConfig`-style "flag overrides env var overrides
/// default" precedence for every path and cost knob.
#[derive(Parser, Debug)]
#[command(author, version, about = "Craft Quality Engine RPC server (stdio, newline-delimited JSON)")]
struct Args {
    /// YAML file listing the Model Capability Matrix (§3, §4.3).
    #[arg(long, env = "CRAFT_CAPABILITIES_PATH")]
    capabilities: PathBuf,

    /// Global-scope settings YAML (tier 2 of the three-tier resolver).
    #[arg(long, env = "CRAFT_GLOBAL_SETTINGS_PATH")]
    global_settings: PathBuf,

    /// Directory holding one `<project_id>.yaml` settings file per
    /// project (tier 1 of the three-tier resolver).
    #[arg(long, env = "CRAFT_PROJECT_SETTINGS_DIR")]
    project_settings_dir: PathBuf,

    /// Quality Tier governing Model Router policy (§4.3).
    #[arg(long, value_enum, default_value = "balanced")]
    quality_tier: CliQualityTier,

    /// Consecutive-failure threshold before the circuit breaker opens
    /// for a model (grounded in `coordination/src/router/circuit_breaker.rs`).
    #[arg(long, default_value_t = 3)]
    breaker_failure_threshold: u32,

    /// Circuit breaker cooldown, seconds, before a half-open retry.
    #[arg(long, default_value_t = 30)]
    breaker_cooldown_secs: u64,

    /// Directory to append work-order records (Scene Scores and
    /// Enhancement Outcomes, §6) to, as JSONL. Omit to skip recording —
    /// the core does not own this persistence (§1 scope).
    #[arg(long, env = "CRAFT_WORK_ORDER_DIR")]
    work_order_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliQualityTier {
    Budget,
    Balanced,
    Premium,
}

impl From<CliQualityTier> for QualityTier {
    fn from(value: CliQualityTier) -> Self {
        match value {
            CliQualityTier::Budget => QualityTier::Budget,
            CliQualityTier::Balanced => QualityTier::Balanced,
            CliQualityTier::Premium => QualityTier::Premium,
        }
    }
}

fn env_key_for(record: &ModelCapabilityRecord) -> String {
    record
        .env_var_name
        .clone()
        .unwrap_or_else(|| format!("{}_API_KEY", record.provider.to_uppercase()))
}

/// Registers one [`Transport`] adapter per provider prefix actually
/// present in the capability matrix, reading each provider's API key
/// from the env var the record names (Design Notes §9: "register by
/// prefix or explicit table" rather than conditional branches).
fn build_transport(capabilities: &[ModelCapabilityRecord]) -> Transport {
    let mut transport = Transport::new(RetryPolicy::default(), TimeoutPolicy::default());
    let mut seen_prefixes: HashMap<&'static str, ()> = HashMap::new();

    for record in capabilities {
        let prefix: &'static str = match record.provider.as_str() {
            "local" => "local:",
            "openai" => "openai:",
            "anthropic" => "anthropic:",
            "gemini" => "gemini:",
            other => {
                warn!(provider = other, model_id = %record.model_id, "no transport adapter registered for provider");
                continue;
            }
        };
        if seen_prefixes.contains_key(prefix) {
            continue;
        }
        seen_prefixes.insert(prefix, ());

        let api_key = std::env::var(env_key_for(record)).unwrap_or_default();
        match prefix {
            "local:" => {
                let base_url = std::env::var("CRAFT_LOCAL_BASE_URL").unwrap_or_else(|_| "http://localhost:8000/v1".into());
                transport.register(prefix, Arc::new(LocalAdapter::new(base_url, api_key)));
            }
            "openai:" => transport.register(prefix, Arc::new(OpenAiAdapter::new(api_key))),
            "anthropic:" => transport.register(prefix, Arc::new(AnthropicAdapter::new(api_key))),
            "gemini:" => transport.register(prefix, Arc::new(GeminiAdapter::new(api_key))),
            _ => unreachable!(),
        }
    }

    transport
}

/// Picks one concrete model for a leaf task type from the Router's
/// candidate ordering at the configured tier, falling back to the first
/// registered capability so a misconfigured matrix still boots (Design
/// Notes: empty candidate lists degrade to the nearest substitute).
fn pick_model(registry: &ModelRegistry, capabilities: &[ModelCapabilityRecord], task: TaskType, tier: QualityTier) -> String {
    registry
        .candidates(task, tier)
        .first()
        .map(|record| record.model_id.clone())
        .or_else(|| capabilities.first().map(|record| record.model_id.clone()))
        .unwrap_or_else(|| "local:default".to_string())
}

async fn load_capabilities(path: &PathBuf) -> Result<Vec<ModelCapabilityRecord>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading capability matrix {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing capability matrix {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "craft_tournament_rpc=info,craft_tournament=info,craft_engine=info".into()))
        .init();

    let args = Args::parse();
    info!(capabilities = %args.capabilities.display(), quality_tier = ?args.quality_tier, "starting craft-tournament-rpc");

    let capabilities = load_capabilities(&args.capabilities).await?;
    let tier: QualityTier = args.quality_tier.into();

    let event_bus = EventBus::shared();

    let transport = Arc::new(build_transport(&capabilities));

    let registry = Arc::new(
        ModelRegistry::new(capabilities.clone(), args.breaker_failure_threshold, args.breaker_cooldown_secs)
            .with_event_bus(event_bus.clone()),
    );

    let global_store: Arc<dyn craft_engine::settings::SettingsStore> = Arc::new(YamlFileSettingsStore::new(&args.global_settings));
    let project_dir = args.project_settings_dir.clone();
    let resolver = Arc::new(
        SettingsResolver::new(global_store, move |project_id: &str| {
            let path = project_dir.join(format!("{project_id}.yaml"));
            Arc::new(YamlFileSettingsStore::new(path)) as Arc<dyn craft_engine::settings::SettingsStore>
        })
        .context("loading global settings")?
        .with_event_bus(event_bus.clone()),
    );

    let analysis_model = pick_model(&registry, &capabilities, TaskType::Analysis, tier);
    let enhancement_model = pick_model(&registry, &capabilities, TaskType::Enhancement, tier);
    info!(%analysis_model, %enhancement_model, "routed leaf-task models");

    let judge = Arc::new(TransportJudge {
        transport: transport.clone(),
        model_id: analysis_model,
    });
    let patterns = Arc::new(PatternLibrary::new());
    let analyzer = Arc::new(SceneAnalyzer::with_judge(patterns, resolver.clone(), judge));

    let transform = Arc::new(TransportTransform {
        transport: transport.clone(),
        model_id: enhancement_model,
    });
    let enhancement = Arc::new(EnhancementEngine::with_transform(analyzer.clone(), resolver.clone(), transform));

    let scaffold = Arc::new(ScaffoldGenerator::new(resolver.clone(), None));
    let tournament = Arc::new(
        TournamentOrchestrator::new(transport.clone(), analyzer.clone(), resolver.clone())
            .with_registry(registry.clone())
            .with_event_bus(event_bus.clone()),
    );

    let work_orders: Option<Arc<dyn craft_engine::work_order::WorkOrderStore>> = args.work_order_dir.map(|dir| {
        Arc::new(craft_engine::work_order::JsonlWorkOrderStore::new(
            dir.join("scene_scores.jsonl"),
            dir.join("enhancement_outcomes.jsonl"),
        )) as Arc<dyn craft_engine::work_order::WorkOrderStore>
    });

    let ctx = Arc::new(RpcContext {
        analyzer,
        enhancement,
        scaffold,
        tournament,
        registry,
        resolver,
        transport,
        work_orders,
    });

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("reading request line from stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let envelope = serde_json::json!({"ok": false, "error": {"kind": "schema_violation", "message": format!("malformed request: {err}"), "retryable": false}});
                stdout.write_all(envelope.to_string().as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                continue;
            }
        };

        let op = request.op.clone();
        let cancel = CancellationToken::new();
        let response = ctx.dispatch(request, cancel).await;
        info!(%op, ok = %response["ok"], "handled rpc request");
        stdout.write_all(response.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}
