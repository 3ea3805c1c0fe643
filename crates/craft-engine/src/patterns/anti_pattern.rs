//! Anti-pattern matching: case-insensitive, word-boundary regex scans
//! compiled once per Voice Bundle and cached until `SettingsChanged`
//! (§4.2).

use crate::model::{AntiPattern, Severity};
use regex::{Regex, RegexSet};

/// A single anti-pattern hit within a scanned text.
#[derive(Debug, Clone, PartialEq)]
pub struct AntiPatternMatch {
    pub pattern_id: String,
    pub description: String,
    pub severity: Severity,
    pub line_index: usize,
    pub column: usize,
    pub excerpt: String,
}

/// Errors raised compiling a bundle's anti-pattern set.
#[derive(Debug, thiserror::Error)]
pub enum AntiPatternCompileError {
    #[error("anti-pattern regex '{pattern}' failed to compile: {source}")]
    BadRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to build combined regex set: {0}")]
    SetBuild(#[from] regex::Error),
}

/// Compiled matcher set for one Voice Bundle's anti-patterns. A
/// `RegexSet` gives a fast first-pass "did anything match" check; the
/// per-entry `Regex` vector re-runs only over lines the set flagged, to
/// recover match spans for excerpting (§4.2).
pub struct AntiPatternMatcher {
    entries: Vec<CompiledEntry>,
    set: RegexSet,
}

struct CompiledEntry {
    pattern_id: String,
    description: String,
    severity: Severity,
    regex: Regex,
}

/// Wrap a bundle-authored pattern with case-insensitivity and word
/// boundaries, unless the author already supplied boundary anchors.
fn normalize_pattern(raw: &str) -> String {
    let has_boundary = raw.starts_with("\\b") || raw.contains("(?i)");
    if has_boundary {
        raw.to_string()
    } else {
        format!("(?i)\\b(?:{raw})\\b")
    }
}

impl AntiPatternMatcher {
    pub fn compile(anti_patterns: &[AntiPattern]) -> Result<Self, AntiPatternCompileError> {
        let mut entries = Vec::with_capacity(anti_patterns.len());
        let mut patterns = Vec::with_capacity(anti_patterns.len());

        for (index, ap) in anti_patterns.iter().enumerate() {
            let normalized = normalize_pattern(&ap.pattern);
            let regex = Regex::new(&normalized).map_err(|source| AntiPatternCompileError::BadRegex {
                pattern: ap.pattern.clone(),
                source,
            })?;
            patterns.push(normalized);
            entries.push(CompiledEntry {
                pattern_id: format!("anti_pattern.{index}"),
                description: ap.description.clone(),
                severity: ap.severity,
                regex,
            });
        }

        let set = RegexSet::new(&patterns)?;
        Ok(Self { entries, set })
    }

    /// Scan `text` line by line, returning matches in document order.
    /// Line/column indexing is stable: zero-based line index, zero-based
    /// byte column within the line, independent of match order.
    pub fn scan(&self, text: &str) -> Vec<AntiPatternMatch> {
        let mut matches = Vec::new();
        for (line_index, line) in text.lines().enumerate() {
            if !self.set.is_match(line) {
                continue;
            }
            for hit_index in self.set.matches(line).into_iter() {
                let entry = &self.entries[hit_index];
                for m in entry.regex.find_iter(line) {
                    matches.push(AntiPatternMatch {
                        pattern_id: entry.pattern_id.clone(),
                        description: entry.description.clone(),
                        severity: entry.severity,
                        line_index,
                        column: m.start(),
                        excerpt: m.as_str().to_string(),
                    });
                }
            }
        }
        matches
    }
}
