//! The Scaffold Generator (§4.6): a two-stage pipeline producing a
//! deterministic, structurally-validated scene plan ahead of any prose.
//! Stage 1 (Draft Summary) assembles the Scaffold's mechanical fields
//! directly from caller-supplied outline data; Stage 2 (Enrichment) is an
//! optional LLM pass that fills in strategic context from source
//! material, skippable via `scaffold.enrichment_enabled`.

mod enricher;

pub use enricher::{EnrichError, EnrichmentResponse, ScaffoldEnricher, TransportEnricher};
#[cfg(any(test, feature = "test-support"))]
pub use enricher::test_support;

use crate::model::{Pov, Scaffold, ScaffoldInvariantError, StrategicContext, VoiceBundle};
use crate::settings::SettingsResolver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Caller-supplied outline data for Stage 1 (Draft Summary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRequest {
    pub chapter_id: String,
    pub scene_index: u32,
    pub title: String,
    pub phase: String,
    pub pov: Pov,
    pub word_target: u32,
    pub beats: Vec<String>,
    pub success_criteria: Vec<String>,
    pub continuity_checklist: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScaffoldError {
    #[error(transparent)]
    Invariant(#[from] ScaffoldInvariantError),
    #[error("enrichment failed: {0}")]
    Enrich(#[from] EnrichError),
    #[error("settings error: {0}")]
    Settings(#[from] crate::settings::InvalidSetting),
}

pub struct ScaffoldGenerator {
    resolver: Arc<SettingsResolver>,
    enricher: Option<Arc<dyn ScaffoldEnricher>>,
}

impl ScaffoldGenerator {
    pub fn new(resolver: Arc<SettingsResolver>, enricher: Option<Arc<dyn ScaffoldEnricher>>) -> Self {
        Self { resolver, enricher }
    }

    /// Stage 1: assemble the deterministic Scaffold fields and validate
    /// them against the active Voice Bundle's invariants (§3). No LLM
    /// call is made here; `source_enrichment` and `strategic_context`
    /// are left empty pending Stage 2.
    pub fn draft(&self, request: DraftRequest, voice_bundle: &VoiceBundle) -> Result<Scaffold, ScaffoldError> {
        let scaffold = Scaffold {
            chapter_id: request.chapter_id,
            scene_index: request.scene_index,
            title: request.title,
            phase: request.phase,
            pov: request.pov,
            word_target: request.word_target,
            beats: request.beats,
            strategic_context: StrategicContext {
                goals: Vec::new(),
                stakes: String::new(),
                conflict: String::new(),
            },
            success_criteria: request.success_criteria,
            continuity_checklist: request.continuity_checklist,
            source_enrichment: None,
        };
        scaffold.validate(voice_bundle)?;
        Ok(scaffold)
    }

    /// Stage 2: enrich a drafted Scaffold with strategic context drawn
    /// from `source_material`. Skipped entirely (returning the Scaffold
    /// unchanged) when `scaffold.enrichment_enabled` is false for this
    /// project or no enricher was configured.
    pub async fn enrich(
        &self,
        mut scaffold: Scaffold,
        source_material: &str,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Scaffold, ScaffoldError> {
        let enabled = self.resolver.get_bool("scaffold.enrichment_enabled", Some(project_id))?;
        let Some(enricher) = (if enabled { self.enricher.as_ref() } else { None }) else {
            return Ok(scaffold);
        };

        let response = enricher
            .enrich(&scaffold.title, &scaffold.beats, source_material, cancel)
            .await?;
        scaffold.source_enrichment = Some(response.source_enrichment.clone());
        scaffold.strategic_context = response.into();
        Ok(scaffold)
    }

    /// Convenience wrapper used by the §6 `scaffold.generate` RPC: drafts
    /// then, if enabled, enriches in one call.
    pub async fn generate(
        &self,
        request: DraftRequest,
        voice_bundle: &VoiceBundle,
        source_material: &str,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Scaffold, ScaffoldError> {
        let draft = self.draft(request, voice_bundle)?;
        self.enrich(draft, source_material, project_id, cancel).await
    }
}
