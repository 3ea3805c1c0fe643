//! Ranking (§4.7 step 4): sort by Scene Score `overall` desc; tie-break
//! on Voice Authenticity, then fewer zero-tolerance violations, then
//! shorter wall time. Unscored (`timed_out`) variants sort last,
//! ordered among themselves by elapsed time, so partial-result callers
//! still get a deterministic list.

use crate::types::Variant;
use craft_engine::model::Severity;

fn voice_authenticity(variant: &Variant) -> f64 {
    variant
        .score
        .as_ref()
        .and_then(|s| s.category_scores.get("voice_authenticity"))
        .map(|c| c.awarded)
        .unwrap_or(0.0)
}

fn zero_tolerance_count(variant: &Variant) -> usize {
    variant
        .score
        .as_ref()
        .map(|s| s.violations.iter().filter(|v| v.severity == Severity::ZeroTolerance).count())
        .unwrap_or(usize::MAX)
}

/// Total ordering per §4.7 step 4. Ties broken deterministically so
/// ranking never depends on completion order.
pub fn rank(mut variants: Vec<Variant>) -> Vec<Variant> {
    variants.sort_by(|a, b| {
        let overall_a = a.score.as_ref().map(|s| s.overall);
        let overall_b = b.score.as_ref().map(|s| s.overall);
        overall_b
            .partial_cmp(&overall_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| voice_authenticity(b).partial_cmp(&voice_authenticity(a)).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| zero_tolerance_count(a).cmp(&zero_tolerance_count(b)))
            .then_with(|| a.elapsed_ms.cmp(&b.elapsed_ms))
    });
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Strategy;
    use craft_engine::model::{CategoryScore, MetaphorReport, SceneScore, Tier, Violation};
    use std::collections::HashMap;

    fn variant(id: &str, overall: f64, voice: f64, zero_tolerance_hits: usize, elapsed_ms: u64) -> Variant {
        let mut category_scores = HashMap::new();
        category_scores.insert(
            "voice_authenticity".to_string(),
            CategoryScore {
                awarded: voice,
                max: 30.0,
                notes: vec![],
                indeterminate: false,
            },
        );
        let violations = (0..zero_tolerance_hits)
            .map(|i| Violation {
                line_index: i,
                severity: Severity::ZeroTolerance,
                pattern_id: "p".into(),
                excerpt: "x".into(),
                suggested_fix: None,
            })
            .collect();
        Variant {
            variant_id: id.into(),
            model_id: "local:test".into(),
            strategy: Strategy::Balanced,
            text: "text".into(),
            token_count: 10,
            elapsed_ms,
            score: Some(SceneScore {
                overall,
                category_scores,
                violations,
                metaphor_report: MetaphorReport::default(),
                tier: Tier::classify(overall),
                phase_flags: vec![],
                model_used: None,
                wall_time_ms: elapsed_ms,
                low_confidence: false,
            }),
            parent_scaffold_id: "s1".into(),
            timed_out: false,
        }
    }

    #[test]
    fn ranks_by_overall_descending() {
        let variants = vec![variant("a", 70.0, 20.0, 0, 100), variant("b", 90.0, 20.0, 0, 100)];
        let ranked = rank(variants);
        assert_eq!(ranked[0].variant_id, "b");
    }

    #[test]
    fn ties_break_on_voice_authenticity_then_zero_tolerance_then_elapsed() {
        let variants = vec![
            variant("low_voice", 80.0, 15.0, 0, 100),
            variant("high_voice", 80.0, 25.0, 0, 100),
        ];
        let ranked = rank(variants);
        assert_eq!(ranked[0].variant_id, "high_voice");

        let variants = vec![
            variant("more_hits", 80.0, 20.0, 2, 100),
            variant("fewer_hits", 80.0, 20.0, 0, 100),
        ];
        let ranked = rank(variants);
        assert_eq!(ranked[0].variant_id, "fewer_hits");

        let variants = vec![
            variant("slower", 80.0, 20.0, 0, 500),
            variant("faster", 80.0, 20.0, 0, 100),
        ];
        let ranked = rank(variants);
        assert_eq!(ranked[0].variant_id, "faster");
    }

    #[test]
    fn timed_out_variants_sort_last() {
        let mut timed_out = variant("timed_out", 0.0, 0.0, 0, 999_999);
        timed_out.score = None;
        timed_out.timed_out = true;
        let scored = variant("scored", 10.0, 1.0, 5, 100);
        let ranked = rank(vec![timed_out, scored]);
        assert_eq!(ranked[0].variant_id, "scored");
    }
}
