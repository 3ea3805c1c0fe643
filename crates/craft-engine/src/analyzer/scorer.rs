//! Rubric composition (§4.5): combines deterministic Pattern Library
//! results with LLM judge output into per-category scores, with
//! deterministic results always overriding conflicting LLM judgments.

use crate::model::{CategoryScore, MetaphorReport, PhaseProfile, SimilePolicy, Violation, Severity};
use crate::patterns::{PatternMatch, SimileReport};
use std::collections::HashMap;

/// Point split within "Anti-Pattern Compliance" (15 max, fully
/// deterministic — §4.5's table lists no LLM sub-test for this category).
pub fn score_anti_pattern_compliance(
    matches: &[PatternMatch],
    zero_tolerance_deduction: f64,
    formulaic_deduction: f64,
    formulaic_cap: f64,
) -> (CategoryScore, Vec<Violation>) {
    const MAX: f64 = 15.0;
    let mut zero_tolerance_hits = 0.0;
    let mut formulaic_hits = 0.0;
    let mut violations = Vec::new();

    for m in matches {
        if m.pattern_id == "simile" {
            continue;
        }
        match m.severity {
            Severity::ZeroTolerance => zero_tolerance_hits += 1.0,
            Severity::Formulaic => formulaic_hits += 1.0,
            Severity::Advisory => {}
        }
        violations.push(Violation {
            line_index: m.line_index,
            severity: m.severity,
            pattern_id: m.pattern_id.clone(),
            excerpt: m.excerpt.clone(),
            suggested_fix: None,
        });
    }

    let zero_tolerance_deduction_total = zero_tolerance_hits * zero_tolerance_deduction;
    let formulaic_deduction_total = (formulaic_hits * formulaic_deduction).min(formulaic_cap);
    let awarded = (MAX - zero_tolerance_deduction_total - formulaic_deduction_total).max(0.0);

    let mut notes = Vec::new();
    if zero_tolerance_hits > 0.0 {
        notes.push(format!("{zero_tolerance_hits} zero-tolerance hit(s)"));
    }
    if formulaic_hits > 0.0 {
        notes.push(format!("{formulaic_hits} formulaic hit(s)"));
    }

    (
        CategoryScore {
            awarded,
            max: MAX,
            notes,
            indeterminate: false,
        },
        violations,
    )
}

/// "Metaphor Discipline" (20 max): domain rotation and simile-policy
/// compliance are deterministic (7 points each); direct-transformation
/// ratio is LLM-judged (6 points), passed in pre-scored and clamped to
/// its own budget by the caller.
pub fn score_metaphor_discipline(
    metaphor_report: &MetaphorReport,
    simile_report: &SimileReport,
    simile_policy: &SimilePolicy,
    direct_transformation_awarded: Option<f64>,
) -> (CategoryScore, Vec<String>) {
    const DOMAIN_ROTATION_MAX: f64 = 7.0;
    const SIMILE_MAX: f64 = 7.0;
    const DIRECT_TRANSFORM_MAX: f64 = 6.0;

    let mut notes = Vec::new();
    let mut saturation_violations = Vec::new();

    let domain_rotation = if metaphor_report.saturated_domains.is_empty() {
        DOMAIN_ROTATION_MAX
    } else {
        for domain in &metaphor_report.saturated_domains {
            notes.push(format!("domain '{domain}' exceeded its saturation cap"));
            saturation_violations.push(domain.clone());
        }
        let per_domain_penalty = DOMAIN_ROTATION_MAX / metaphor_report.per_domain_counts.len().max(1) as f64;
        (DOMAIN_ROTATION_MAX - per_domain_penalty * metaphor_report.saturated_domains.len() as f64).max(0.0)
    };

    let non_idiomatic_count = simile_report.matches.iter().filter(|m| !m.is_idiomatic).count();
    let simile_score = match simile_policy {
        SimilePolicy::Forbid => {
            if non_idiomatic_count == 0 {
                SIMILE_MAX
            } else {
                notes.push(format!("{non_idiomatic_count} simile(s) found under a forbid policy"));
                0.0
            }
        }
        SimilePolicy::Limit(n) => {
            if non_idiomatic_count as u32 <= *n {
                SIMILE_MAX
            } else {
                let over = non_idiomatic_count as u32 - n;
                notes.push(format!("{over} simile(s) over the configured limit of {n}"));
                (SIMILE_MAX - over as f64).max(0.0)
            }
        }
        SimilePolicy::Allow => SIMILE_MAX,
    };

    // When the LLM sub-test can't be judged (schema failure after retry),
    // its budget is dropped from both awarded and max rather than given
    // away free or charged against the scene (§4.5 "category maxima
    // reduced accordingly").
    let (direct_transform, direct_transform_max) = match direct_transformation_awarded {
        Some(awarded) => (awarded.clamp(0.0, DIRECT_TRANSFORM_MAX), DIRECT_TRANSFORM_MAX),
        None => (0.0, 0.0),
    };
    let indeterminate = direct_transformation_awarded.is_none();

    let awarded = domain_rotation + simile_score + direct_transform;

    (
        CategoryScore {
            awarded,
            max: DOMAIN_ROTATION_MAX + SIMILE_MAX + direct_transform_max,
            notes,
            indeterminate,
        },
        saturation_violations,
    )
}

/// "Phase Appropriateness" (15 max): absence of forbidden constructs is
/// deterministic (7 points); technical-vocabulary earned-ness is
/// LLM-judged (8 points).
pub fn score_phase_appropriateness(
    phase: &PhaseProfile,
    text: &str,
    vocab_earned_awarded: Option<f64>,
) -> CategoryScore {
    const FORBIDDEN_MAX: f64 = 7.0;
    const VOCAB_MAX: f64 = 8.0;

    let lower = text.to_lowercase();
    let forbidden_hits: Vec<&String> = phase
        .forbidden_constructs
        .iter()
        .filter(|construct| lower.contains(&construct.to_lowercase()))
        .collect();

    let forbidden_score = if forbidden_hits.is_empty() {
        FORBIDDEN_MAX
    } else {
        let penalty = FORBIDDEN_MAX / phase.forbidden_constructs.len().max(1) as f64;
        (FORBIDDEN_MAX - penalty * forbidden_hits.len() as f64).max(0.0)
    };

    let mut notes = Vec::new();
    for hit in &forbidden_hits {
        notes.push(format!("forbidden construct '{hit}' present in phase '{}'", phase.phase_name));
    }

    let (vocab_score, vocab_max) = match vocab_earned_awarded {
        Some(awarded) => (awarded.clamp(0.0, VOCAB_MAX), VOCAB_MAX),
        None => (0.0, 0.0),
    };
    let indeterminate = vocab_earned_awarded.is_none();

    CategoryScore {
        awarded: forbidden_score + vocab_score,
        max: FORBIDDEN_MAX + vocab_max,
        notes,
        indeterminate,
    }
}

/// "Voice Authenticity" (30 max): Observer, Thematic Function, and Fusion
/// sub-tests are all LLM-judged (§4.5's table has no mechanical
/// component for this category). `None` means the judge never produced
/// a schema-valid response after the one allowed re-prompt (§4.5 failure
/// semantics); the category degrades to indeterminate with a zero max
/// rather than silently granting or denying the points.
pub fn score_voice_authenticity(judged: Option<f64>) -> CategoryScore {
    const MAX: f64 = 30.0;
    match judged {
        Some(awarded) => CategoryScore {
            awarded: awarded.clamp(0.0, MAX),
            max: MAX,
            notes: Vec::new(),
            indeterminate: false,
        },
        None => CategoryScore {
            awarded: 0.0,
            max: 0.0,
            notes: vec!["voice authenticity judge indeterminate after retry".into()],
            indeterminate: true,
        },
    }
}

/// "Character Consistency" (20 max): Psychology alignment, Capability
/// plausibility, and Relationship dynamics are all LLM-judged.
pub fn score_character_consistency(judged: Option<f64>) -> CategoryScore {
    const MAX: f64 = 20.0;
    match judged {
        Some(awarded) => CategoryScore {
            awarded: awarded.clamp(0.0, MAX),
            max: MAX,
            notes: Vec::new(),
            indeterminate: false,
        },
        None => CategoryScore {
            awarded: 0.0,
            max: 0.0,
            notes: vec!["character consistency judge indeterminate after retry".into()],
            indeterminate: true,
        },
    }
}

/// Sum category scores into the overall, capped at 100 (§4.5: "summed
/// and capped").
pub fn compose_overall(categories: &HashMap<String, CategoryScore>) -> f64 {
    categories.values().map(|c| c.awarded).sum::<f64>().min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anti_pattern_deducts_two_per_zero_tolerance_hit_floored_at_zero() {
        let matches = vec![
            PatternMatch {
                pattern_id: "anti_pattern.0".into(),
                description: "x".into(),
                severity: Severity::ZeroTolerance,
                line_index: 0,
                column: 0,
                excerpt: "x".into(),
            };
            10
        ];
        let (score, _) = score_anti_pattern_compliance(&matches, 2.0, 1.0, 5.0);
        assert_eq!(score.awarded, 0.0);
    }

    #[test]
    fn formulaic_deductions_respect_configured_cap() {
        let matches = vec![
            PatternMatch {
                pattern_id: "anti_pattern.1".into(),
                description: "x".into(),
                severity: Severity::Formulaic,
                line_index: 0,
                column: 0,
                excerpt: "x".into(),
            };
            10
        ];
        let (score, _) = score_anti_pattern_compliance(&matches, 2.0, 1.0, 5.0);
        assert_eq!(score.awarded, 10.0);
    }

    #[test]
    fn metaphor_discipline_marks_indeterminate_without_llm_component() {
        let report = MetaphorReport::default();
        let simile_report = SimileReport::default();
        let (score, _) = score_metaphor_discipline(&report, &simile_report, &SimilePolicy::Allow, None);
        assert!(score.indeterminate);
        assert_eq!(score.awarded, 7.0 + 7.0 + 6.0);
    }

    #[test]
    fn forbid_policy_zeroes_simile_points_on_any_non_idiomatic_hit() {
        let report = MetaphorReport::default();
        let simile_report = SimileReport {
            matches: vec![crate::patterns::SimileMatch {
                line_index: 0,
                column: 0,
                marker: "like".into(),
                excerpt: "x".into(),
                is_idiomatic: false,
            }],
            density: 0.1,
            suppressed: false,
        };
        let (score, _) = score_metaphor_discipline(&report, &simile_report, &SimilePolicy::Forbid, Some(6.0));
        assert_eq!(score.awarded, 7.0 + 0.0 + 6.0);
    }

    #[test]
    fn saturated_domain_flags_violation_even_without_regex_hit() {
        let mut report = MetaphorReport::default();
        report.saturated_domains.push("gambling".to_string());
        report.per_domain_counts.insert("gambling".to_string(), 5);
        let simile_report = SimileReport::default();
        let (_, saturation) = score_metaphor_discipline(&report, &simile_report, &SimilePolicy::Allow, Some(6.0));
        assert_eq!(saturation, vec!["gambling".to_string()]);
    }

    #[test]
    fn phase_appropriateness_penalizes_forbidden_construct_presence() {
        let phase = PhaseProfile {
            phase_name: "setup".into(),
            allowed_technical_vocab: vec![],
            forbidden_constructs: vec!["plasma conduit".into()],
        };
        let score = score_phase_appropriateness(&phase, "She repaired the plasma conduit calmly.", Some(8.0));
        assert!(score.awarded < 15.0);
    }

    #[test]
    fn overall_is_capped_at_one_hundred() {
        let mut categories = HashMap::new();
        categories.insert("a".to_string(), CategoryScore { awarded: 60.0, max: 60.0, notes: vec![], indeterminate: false });
        categories.insert("b".to_string(), CategoryScore { awarded: 60.0, max: 60.0, notes: vec![], indeterminate: false });
        assert_eq!(compose_overall(&categories), 100.0);
    }

    #[test]
    fn voice_authenticity_degrades_to_indeterminate_with_zero_max() {
        let score = score_voice_authenticity(None);
        assert!(score.indeterminate);
        assert_eq!(score.max, 0.0);
        assert_eq!(score.awarded, 0.0);
    }

    #[test]
    fn voice_authenticity_clamps_judged_value_to_its_max() {
        let score = score_voice_authenticity(Some(45.0));
        assert_eq!(score.awarded, 30.0);
        assert!(!score.indeterminate);
    }

    #[test]
    fn character_consistency_passes_through_a_valid_judgment() {
        let score = score_character_consistency(Some(18.0));
        assert_eq!(score.awarded, 18.0);
        assert_eq!(score.max, 20.0);
    }
}
