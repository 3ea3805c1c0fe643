//! Hybrid composition (§4.7 step 5): stitch writer-selected spans from
//! multiple ranked Variants into one coherent draft with a final LLM
//! pass, then re-score it. Reuses the Enhancement Engine's transform
//! seam (`EnhancementTransform`) rather than inventing a second
//! instruction-constrained-rewrite abstraction.

use crate::types::{HybridSpan, Strategy, TournamentResult, Variant};
use craft_engine::analyzer::{SceneAnalyzer, SceneContext};
use craft_engine::enhancement::EnhancementTransform;
use craft_engine::model::VoiceBundle;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum HybridError {
    #[error("recipe references unknown variant id '{0}'")]
    UnknownVariant(String),
    #[error("stitching transform failed: {0}")]
    Transform(#[from] craft_engine::enhancement::TransformError),
    #[error(transparent)]
    Analyzer(#[from] craft_engine::analyzer::AnalyzerError),
}

fn stitch_instruction(recipe: &[HybridSpan]) -> String {
    let spans = recipe
        .iter()
        .enumerate()
        .map(|(i, span)| format!("Span {}: {}", i + 1, span.span))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Stitch the following winning spans, in order, into one coherent scene draft. Smooth transitions between \
         spans without altering their content or order. Output only the stitched prose.\n\n{spans}"
    )
}

/// Build a hybrid Variant from `recipe`'s winning spans, stitched by
/// `transform` and re-scored against `voice_bundle` (§4.7 step 5).
pub async fn create_hybrid(
    result: &TournamentResult,
    recipe: Vec<HybridSpan>,
    transform: Arc<dyn EnhancementTransform>,
    analyzer: Arc<SceneAnalyzer>,
    ctx: &SceneContext,
    voice_bundle: &VoiceBundle,
    cancel: &CancellationToken,
) -> Result<Variant, HybridError> {
    for span in &recipe {
        if !result.variants.iter().any(|v| v.variant_id == span.source_variant_id) {
            return Err(HybridError::UnknownVariant(span.source_variant_id.clone()));
        }
    }

    let instruction = stitch_instruction(&recipe);
    let combined_spans: String = recipe.iter().map(|s| s.span.as_str()).collect::<Vec<_>>().join("\n\n");
    let stitched_text = transform.transform(&instruction, &combined_spans, cancel).await?;
    let score = analyzer.analyze(&stitched_text, ctx, voice_bundle, cancel).await?;

    Ok(Variant {
        variant_id: Uuid::new_v4().to_string(),
        model_id: "hybrid:stitched".to_string(),
        strategy: Strategy::Balanced,
        token_count: ((stitched_text.len() as f64) / 4.0).ceil() as u32,
        text: stitched_text,
        elapsed_ms: 0,
        score: Some(score),
        parent_scaffold_id: result.scaffold_id.clone(),
        timed_out: false,
    })
}
