//! Action-Prompt mode (§4.8, `overall >= enhancement.action_prompt_threshold`):
//! surgical OLD->NEW line fixes derived from the violations list and
//! applied in reverse line order so earlier replacements never shift the
//! indexing of fixes still pending (§4.8).

use crate::model::{Severity, Violation};
use serde::{Deserialize, Serialize};

/// One surgical line replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    pub line_index: usize,
    pub old: String,
    pub new: String,
}

/// Apply `fixes` to `text`, in reverse line order (§6 `apply_action_prompt`).
/// Deterministic: the same `(text, fixes)` always produces the same
/// output, independent of the order `fixes` is passed in.
pub fn apply_action_prompt(text: &str, fixes: &[Fix]) -> String {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let mut ordered: Vec<&Fix> = fixes.iter().collect();
    ordered.sort_by(|a, b| b.line_index.cmp(&a.line_index));
    for fix in ordered {
        if let Some(line) = lines.get_mut(fix.line_index) {
            *line = line.replace(&fix.old, &fix.new);
        }
    }
    lines.join("\n")
}

/// Violations this mode can surgically act on: real, line-scoped hits.
/// Synthetic whole-text violations (metaphor saturation, reported at the
/// `line_index == 0` sentinel with `Severity::Advisory`) have no single
/// line to rewrite and are left to the Six-Pass metaphor-rotation
/// concern instead.
pub fn fixable_violations(violations: &[Violation]) -> Vec<&Violation> {
    violations.iter().filter(|v| v.severity != Severity::Advisory).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_fixes_in_reverse_line_order_preserving_indices() {
        let text = "line zero\nline one\nline two";
        let fixes = vec![
            Fix { line_index: 0, old: "zero".into(), new: "ZERO".into() },
            Fix { line_index: 2, old: "two".into(), new: "TWO".into() },
        ];
        let out = apply_action_prompt(text, &fixes);
        assert_eq!(out, "line ZERO\nline one\nline TWO");
    }

    #[test]
    fn out_of_range_fix_is_ignored_not_a_panic() {
        let text = "only one line";
        let fixes = vec![Fix { line_index: 5, old: "x".into(), new: "y".into() }];
        assert_eq!(apply_action_prompt(text, &fixes), text);
    }

    #[test]
    fn fixable_violations_excludes_advisory_saturation_entries() {
        let violations = vec![
            Violation {
                line_index: 0,
                severity: Severity::ZeroTolerance,
                pattern_id: "anti_pattern.0".into(),
                excerpt: "x".into(),
                suggested_fix: None,
            },
            Violation {
                line_index: 0,
                severity: Severity::Advisory,
                pattern_id: "metaphor_saturation:gambling".into(),
                excerpt: "gambling at 45%".into(),
                suggested_fix: None,
            },
        ];
        let fixable = fixable_violations(&violations);
        assert_eq!(fixable.len(), 1);
        assert_eq!(fixable[0].pattern_id, "anti_pattern.0");
    }
}
