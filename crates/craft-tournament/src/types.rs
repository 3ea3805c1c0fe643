//! Data types for the Multi-Model Tournament Orchestrator: the writer
//! strategy directive, one generated Variant, and the final Tournament
//! Result (§3, §4.7).

use craft_engine::model::SceneScore;
use serde::{Deserialize, Serialize};

/// Writer strategy directive for one generation pass (§3 Variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Action,
    Character,
    Dialogue,
    Atmospheric,
    Balanced,
}

impl Strategy {
    /// The prose directive appended to a generation prompt for this
    /// strategy — the only place strategy-specific instruction text
    /// lives.
    pub fn directive(self) -> &'static str {
        match self {
            Strategy::Action => "Prioritize kinetic motion and stakes; keep interiority brief.",
            Strategy::Character => "Prioritize interior psychology and decision-making over external event.",
            Strategy::Dialogue => "Carry the scene primarily through dialogue exchange, with minimal narration.",
            Strategy::Atmospheric => "Prioritize sensory setting and mood; let plot move at a slower register.",
            Strategy::Balanced => "Balance action, interiority, and dialogue evenly across the scene.",
        }
    }
}

/// One generated draft, scored after generation (§3 Variant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: String,
    pub model_id: String,
    pub strategy: Strategy,
    pub text: String,
    pub token_count: u32,
    pub elapsed_ms: u64,
    pub score: Option<SceneScore>,
    pub parent_scaffold_id: String,
    /// Set when generation did not complete within
    /// `tournament.generation_timeout_secs` (§4.7 step 3).
    pub timed_out: bool,
}

/// One winning span contributed to a hybrid draft (§3 Tournament Result).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridSpan {
    pub source_variant_id: String,
    pub span: String,
}

/// Final outcome of a Tournament run (§3 Tournament Result).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentResult {
    pub scaffold_id: String,
    /// Ordered by Scene Score `overall` desc, per [`crate::ranking::rank`].
    pub variants: Vec<Variant>,
    pub winner_id: Option<String>,
    pub hybrid_recipe: Option<Vec<HybridSpan>>,
    pub cost_estimate: f64,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}
