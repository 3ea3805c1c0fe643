//! LLM-gated Stage 2 of the Scaffold Generator (§4.6): turns caller-supplied
//! source material into the `StrategicContext` (goals, stakes, conflict)
//! a drafted Scaffold doesn't get from deterministic assembly alone.

use crate::model::StrategicContext;
use crate::transport::{CompletionParams, Message, Transport, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResponse {
    pub goals: Vec<String>,
    pub stakes: String,
    pub conflict: String,
    pub source_enrichment: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("enrichment response failed schema validation: {0}")]
    SchemaViolation(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[async_trait]
pub trait ScaffoldEnricher: Send + Sync {
    async fn enrich(
        &self,
        title: &str,
        beats: &[String],
        source_material: &str,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentResponse, EnrichError>;
}

fn build_prompt(title: &str, beats: &[String], source_material: &str) -> String {
    let beat_list = beats
        .iter()
        .enumerate()
        .map(|(i, b)| format!("{}. {b}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Scene: \"{title}\"\nBeats:\n{beat_list}\n\nSource material to draw from:\n{source_material}\n\n\
         Respond with strict JSON matching {{\"goals\": [string], \"stakes\": string, \"conflict\": string, \
         \"source_enrichment\": string}}. No prose outside the JSON object."
    )
}

pub struct TransportEnricher {
    pub transport: std::sync::Arc<Transport>,
    pub model_id: String,
}

#[async_trait]
impl ScaffoldEnricher for TransportEnricher {
    async fn enrich(
        &self,
        title: &str,
        beats: &[String],
        source_material: &str,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentResponse, EnrichError> {
        let prompt = build_prompt(title, beats, source_material);
        let messages = vec![
            Message::system("You draft strategic scene context from source material. Output JSON only."),
            Message::user(prompt),
        ];
        let response = self
            .transport
            .complete(&self.model_id, &messages, &CompletionParams::default(), cancel)
            .await?;
        serde_json::from_str(response.text.trim()).map_err(|e| EnrichError::SchemaViolation(e.to_string()))
    }
}

impl From<EnrichmentResponse> for StrategicContext {
    fn from(r: EnrichmentResponse) -> Self {
        StrategicContext {
            goals: r.goals,
            stakes: r.stakes,
            conflict: r.conflict,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    pub struct ScriptedEnricher {
        pub responses: Mutex<Vec<Result<EnrichmentResponse, EnrichError>>>,
    }

    impl ScriptedEnricher {
        pub fn new(responses: Vec<Result<EnrichmentResponse, EnrichError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl ScaffoldEnricher for ScriptedEnricher {
        async fn enrich(
            &self,
            _title: &str,
            _beats: &[String],
            _source_material: &str,
            _cancel: &CancellationToken,
        ) -> Result<EnrichmentResponse, EnrichError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(EnrichError::SchemaViolation("no more scripted responses".into()));
            }
            responses.remove(0)
        }
    }
}
