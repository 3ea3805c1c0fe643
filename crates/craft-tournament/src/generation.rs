//! Parallel generation fan-out (§4.7 step 2): one LLM call per
//! `(model_id, strategy)` pair, concurrency-bounded per provider, scored
//! immediately on return (§4.7 step 3). Variants that miss the
//! generation timeout are recorded `timed_out` with no score, never
//! dropped — ranking and partial-result handling decide what to do with
//! them.

use crate::types::{Strategy, Variant};
use craft_engine::analyzer::{SceneAnalyzer, SceneContext};
use craft_engine::events::{CraftEvent, SharedEventBus};
use craft_engine::model::{Scaffold, VoiceBundle};
use craft_engine::transport::{CompletionParams, Message, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One `(model_id, strategy)` pair requested for this tournament.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    pub model_id: String,
    pub strategy: Strategy,
}

fn provider_prefix(model_id: &str) -> &str {
    model_id.split_once(':').map(|(prefix, _)| prefix).unwrap_or(model_id)
}

/// Top-K anti-patterns plus the gold-standard excerpt and metaphor caps,
/// assembled into the compact digest a generation prompt carries instead
/// of the full Voice Bundle (§4.7 step 2).
fn voice_bundle_digest(voice_bundle: &VoiceBundle, phase: &str, top_k: usize) -> String {
    let gold_excerpt: String = voice_bundle.gold_standard.chars().take(400).collect();
    let anti_patterns = voice_bundle
        .anti_patterns
        .iter()
        .take(top_k)
        .map(|p| format!("- avoid: {} ({})", p.description, p.pattern))
        .collect::<Vec<_>>()
        .join("\n");
    let caps = voice_bundle
        .metaphor_domains
        .iter()
        .map(|d| format!("- {}: max {:.0}%", d.name, d.max_percentage * 100.0))
        .collect::<Vec<_>>()
        .join("\n");
    let phase_guidance = voice_bundle
        .phase(phase)
        .map(|p| {
            format!(
                "Allowed technical vocabulary: {}. Forbidden constructs: {}.",
                p.allowed_technical_vocab.join(", "),
                p.forbidden_constructs.join(", ")
            )
        })
        .unwrap_or_default();

    format!(
        "Gold-standard voice excerpt:\n{gold_excerpt}\n\nAnti-patterns to avoid:\n{anti_patterns}\n\nMetaphor domain caps:\n{caps}\n\n{phase_guidance}"
    )
}

fn generation_prompt(scaffold: &Scaffold, voice_bundle: &VoiceBundle, strategy: Strategy) -> String {
    format!(
        "Write the full prose for this scene.\n\n\
         Title: {}\n\
         Word target: {}\n\
         Beats:\n{}\n\n\
         Strategic goals: {}\n\
         Stakes: {}\n\
         Conflict: {}\n\n\
         {}\n\n\
         Strategy directive: {}",
        scaffold.title,
        scaffold.word_target,
        scaffold.beats.iter().map(|b| format!("- {b}")).collect::<Vec<_>>().join("\n"),
        scaffold.strategic_context.goals.join(", "),
        scaffold.strategic_context.stakes,
        scaffold.strategic_context.conflict,
        voice_bundle_digest(voice_bundle, &scaffold.phase, 5),
        strategy.directive(),
    )
}

fn estimate_tokens(text: &str) -> u32 {
    ((text.len() as f64) / 4.0).ceil() as u32
}

/// Run one generation task to completion (or timeout/cancellation),
/// producing a scored (or `timed_out`) Variant.
async fn run_one(
    transport: Arc<Transport>,
    analyzer: Arc<SceneAnalyzer>,
    scaffold: Arc<Scaffold>,
    voice_bundle: Arc<VoiceBundle>,
    ctx: SceneContext,
    task: GenerationTask,
    semaphore: Arc<Semaphore>,
    generation_timeout: Duration,
    cancel: CancellationToken,
    event_bus: Option<SharedEventBus>,
) -> Variant {
    // Acquired here, inside the polled future, rather than by the caller
    // before this future is ever spawned/polled — an unpolled future
    // holding a permit can't make progress to release it, which would
    // deadlock the acquire loop once any provider prefix queues more
    // tasks than its concurrency cap (§5 "bounded semaphores keyed by
    // provider_id").
    let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
    let variant_id = Uuid::new_v4().to_string();
    let started = Instant::now();
    let prompt = generation_prompt(&scaffold, &voice_bundle, task.strategy);
    let messages = vec![
        Message::system("You are a novelist drafting one scene. Output only the scene's prose."),
        Message::user(prompt),
    ];

    let generation = async {
        let response = transport
            .complete(&task.model_id, &messages, &CompletionParams::default(), &cancel)
            .await?;
        let score = analyzer.analyze(&response.text, &ctx, &voice_bundle, &cancel).await;
        Ok::<_, craft_engine::transport::TransportError>((response, score))
    };

    let outcome = tokio::select! {
        _ = cancel.cancelled() => None,
        result = tokio::time::timeout(generation_timeout, generation) => result.ok(),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Some(Ok((response, Ok(score)))) => {
            if let Some(bus) = &event_bus {
                let _ = bus.publish(CraftEvent::VariantScored {
                    scaffold_id: scaffold.chapter_id.clone(),
                    variant_id: variant_id.clone(),
                    overall: score.overall,
                    timestamp: craft_engine::model::now(),
                });
            }
            Variant {
                variant_id,
                model_id: task.model_id,
                strategy: task.strategy,
                token_count: estimate_tokens(&response.text),
                text: response.text,
                elapsed_ms,
                score: Some(score),
                parent_scaffold_id: scaffold.chapter_id.clone(),
                timed_out: false,
            }
        }
        // Generation returned text but scoring failed (e.g. no analysis
        // model available): still a completed draft, just unscored.
        Some(Ok((response, Err(_)))) => Variant {
            variant_id,
            model_id: task.model_id,
            strategy: task.strategy,
            token_count: estimate_tokens(&response.text),
            text: response.text,
            elapsed_ms,
            score: None,
            parent_scaffold_id: scaffold.chapter_id.clone(),
            timed_out: false,
        },
        // Transport failure, timeout, or cancellation: recorded timed_out
        // with no text and no score (§4.7 step 3).
        _ => Variant {
            variant_id,
            model_id: task.model_id,
            strategy: task.strategy,
            token_count: 0,
            text: String::new(),
            elapsed_ms,
            score: None,
            parent_scaffold_id: scaffold.chapter_id.clone(),
            timed_out: true,
        },
    }
}

/// Fan out `tasks` concurrently, bounded by `per_provider_concurrency`
/// semaphores keyed by provider prefix (§4.7 step 2, §5 "bounded
/// semaphores keyed by provider_id").
pub async fn generate_variants(
    transport: Arc<Transport>,
    analyzer: Arc<SceneAnalyzer>,
    scaffold: Arc<Scaffold>,
    voice_bundle: Arc<VoiceBundle>,
    ctx: SceneContext,
    tasks: Vec<GenerationTask>,
    per_provider_concurrency: usize,
    generation_timeout: Duration,
    cancel: CancellationToken,
    event_bus: Option<SharedEventBus>,
) -> Vec<Variant> {
    let mut semaphores: HashMap<String, Arc<Semaphore>> = HashMap::new();
    for task in &tasks {
        semaphores
            .entry(provider_prefix(&task.model_id).to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(per_provider_concurrency)));
    }

    let mut futures = Vec::with_capacity(tasks.len());
    for task in tasks {
        let semaphore = semaphores[provider_prefix(&task.model_id)].clone();
        futures.push(run_one(
            transport.clone(),
            analyzer.clone(),
            scaffold.clone(),
            voice_bundle.clone(),
            ctx.clone(),
            task,
            semaphore,
            generation_timeout,
            cancel.clone(),
            event_bus.clone(),
        ));
    }

    futures::future::join_all(futures).await
}
