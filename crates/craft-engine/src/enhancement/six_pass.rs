//! Six-Pass mode (§4.8, `enhancement.six_pass_floor <= overall <
//! enhancement.action_prompt_threshold`): six sequential, single-concern
//! LLM passes, with fast-exit once `enhancement.six_pass_fast_exit_threshold`
//! is reached. Order is fixed, per the Open Question decision in
//! SPEC_FULL.md §9 (no global voice pre-pass).

use crate::model::VoiceBundle;

/// The six passes, in the fixed order §4.8 documents.
pub const PASS_NAMES: [&str; 6] = [
    "sensory_anchoring",
    "verb_promotion",
    "metaphor_rotation",
    "voice_embedding",
    "emphasis_gating",
    "authenticity_recheck",
];

/// The single-concern instruction for one named pass. Carries no
/// project-specific craft rules itself — domain content (metaphor
/// domain names, gold-standard excerpt) comes from the active
/// [`VoiceBundle`].
pub fn pass_instruction(pass_name: &str, voice_bundle: &VoiceBundle) -> String {
    match pass_name {
        "sensory_anchoring" => {
            "Ground abstract narration in concrete sensory detail (sight, sound, touch, smell, taste) \
             without adding new plot beats."
                .to_string()
        }
        "verb_promotion" => {
            "Replace copular and stative constructions (was, seemed, felt like) with direct active verbs \
             wherever doing so strengthens the prose."
                .to_string()
        }
        "metaphor_rotation" => {
            let domains: Vec<&str> = voice_bundle.metaphor_domains.iter().map(|d| d.name.as_str()).collect();
            format!(
                "Rebalance figurative language so no single metaphor domain dominates the passage. \
                 Declared domains: {}.",
                if domains.is_empty() { "none declared".to_string() } else { domains.join(", ") }
            )
        }
        "voice_embedding" => format!(
            "Align cadence and diction with this gold-standard voice reference, without copying its content:\n{}",
            voice_bundle.gold_standard
        ),
        "emphasis_gating" => {
            "Remove italics or emphasis markup not warranted by the project's emphasis policy; do not add \
             new emphasis."
                .to_string()
        }
        "authenticity_recheck" => {
            "Final pass: confirm narration stays embedded in the scene rather than describing it from \
             outside, and that technical and emotional registers remain fused."
                .to_string()
        }
        other => format!("Apply the '{other}' revision concern."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetaphorDomain, Pov, SimilePolicy, Tense};

    fn bundle() -> VoiceBundle {
        VoiceBundle {
            gold_standard: "The engine hummed.".into(),
            anti_patterns: vec![],
            metaphor_domains: vec![MetaphorDomain {
                name: "gambling".into(),
                keywords: vec!["bet".into()],
                max_percentage: 0.3,
            }],
            simile_policy: SimilePolicy::Allow,
            pov: Pov::ThirdLimited,
            tense: Tense::Past,
            phase_profiles: vec![],
        }
    }

    #[test]
    fn six_passes_are_in_fixed_documented_order() {
        assert_eq!(
            PASS_NAMES,
            [
                "sensory_anchoring",
                "verb_promotion",
                "metaphor_rotation",
                "voice_embedding",
                "emphasis_gating",
                "authenticity_recheck",
            ]
        );
    }

    #[test]
    fn metaphor_rotation_instruction_names_declared_domains() {
        let instruction = pass_instruction("metaphor_rotation", &bundle());
        assert!(instruction.contains("gambling"));
    }

    #[test]
    fn voice_embedding_instruction_carries_gold_standard() {
        let instruction = pass_instruction("voice_embedding", &bundle());
        assert!(instruction.contains("The engine hummed."));
    }
}
