//! Structure variants (§4.7 step 1): N distinct scene-structure outlines
//! from one model, produced ahead of any prose, so a writer can pick a
//! shape before paying for full generation. Optional; on by default via
//! `tournament.structure_variants_enabled`.

use craft_engine::model::Scaffold;
use craft_engine::transport::{CompletionParams, Message, Transport, TransportError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

fn outline_prompt(scaffold: &Scaffold, variant_index: u32) -> String {
    format!(
        "Propose scene-structure outline #{variant_index} for this scaffold. Output only an ordered list of \
         beat-level structural notes (no prose), one per line, distinct from any other outline you'd propose for \
         the same scaffold.\n\n\
         Title: {}\n\
         Phase: {}\n\
         Word target: {}\n\
         Beats:\n{}\n\
         Stakes: {}\n\
         Conflict: {}",
        scaffold.title,
        scaffold.phase,
        scaffold.word_target,
        scaffold.beats.iter().map(|b| format!("- {b}")).collect::<Vec<_>>().join("\n"),
        scaffold.strategic_context.stakes,
        scaffold.strategic_context.conflict,
    )
}

/// Produce `count` distinct structural outlines for `scaffold` from
/// `model_id` (§6 `write_structure_variants`). Each outline is requested
/// independently so one model's sampling variance, not a single
/// enumerated prompt, is what drives the variants apart.
pub async fn write_structure_variants(
    transport: &Transport,
    scaffold: &Scaffold,
    model_id: &str,
    count: u32,
    cancel: &CancellationToken,
) -> Result<Vec<String>, StructureError> {
    let mut outlines = Vec::with_capacity(count as usize);
    for index in 0..count {
        let messages = vec![
            Message::system(
                "You are a structural story editor. Output only the requested outline, no commentary.",
            ),
            Message::user(outline_prompt(scaffold, index + 1)),
        ];
        let response = transport
            .complete(model_id, &messages, &CompletionParams::default(), cancel)
            .await?;
        outlines.push(response.text);
    }
    Ok(outlines)
}
