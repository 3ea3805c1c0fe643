//! Pre-routing complexity classification (SPEC_FULL.md supplement,
//! grounded in the lineage's pre-routing risk analysis): a cheap,
//! deterministic pass over the request that the Router consults before
//! walking its Quality Tier policy, so "balanced" can tell a simple
//! coordinator ping from a strategic-reasoning call without invoking a
//! model.

use crate::model::TaskType;

/// Coarse complexity bucket assigned to one routing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityTier {
    Simple,
    Moderate,
    Complex,
}

/// Result of pre-routing classification for one request.
#[derive(Debug, Clone)]
pub struct PreRoutingAnalysis {
    pub task_type: TaskType,
    pub complexity: ComplexityTier,
    pub estimated_input_tokens: u32,
    pub estimated_output_tokens: u32,
}

/// Rough token estimate: ~4 bytes per token, matching the conservative
/// heuristic used for budget pre-checks across the stack.
fn estimate_tokens(text: &str) -> u32 {
    ((text.len() as f64) / 4.0).ceil() as u32
}

/// Classify a routing request before it reaches the capability matrix.
pub fn classify(task_type: TaskType, input_text: &str, expected_output_tokens: u32) -> PreRoutingAnalysis {
    let estimated_input_tokens = estimate_tokens(input_text);

    let complexity = match task_type {
        TaskType::Coordinator | TaskType::HealthCheck | TaskType::Embedding => ComplexityTier::Simple,
        TaskType::SceneGeneration | TaskType::Enhancement => {
            if estimated_input_tokens > 4_000 {
                ComplexityTier::Complex
            } else {
                ComplexityTier::Moderate
            }
        }
        TaskType::StrategicReasoning | TaskType::Analysis => ComplexityTier::Complex,
    };

    PreRoutingAnalysis {
        task_type,
        complexity,
        estimated_input_tokens,
        estimated_output_tokens: expected_output_tokens,
    }
}
