//! Simile detection: scans for comparison markers with contextual
//! windowing to exclude fixed idioms (§4.2). Deliberately conservative —
//! every candidate is counted; a density threshold suppresses noise only
//! above a configurable per-text fraction, never per-hit.

use unicode_segmentation::UnicodeSegmentation;

const MARKERS: &[&str] = &["like", "as if", "resembled"];

/// Small built-in idiom-exclusion list. Project-specific idioms belong in
/// the Voice Bundle; this is only the minimal set needed to keep the
/// detector from flagging universally fixed expressions.
const BUILT_IN_IDIOMS: &[&str] = &[
    "feel like",
    "look like",
    "sound like",
    "act like",
    "as if to say",
];

const WINDOW_TOKENS: usize = 4;

/// One simile candidate found in the text.
#[derive(Debug, Clone, PartialEq)]
pub struct SimileMatch {
    pub line_index: usize,
    pub column: usize,
    pub marker: String,
    pub excerpt: String,
    pub is_idiomatic: bool,
}

/// Result of scanning one text for similes.
#[derive(Debug, Clone, Default)]
pub struct SimileReport {
    pub matches: Vec<SimileMatch>,
    /// Non-idiomatic hits per total word count.
    pub density: f64,
    /// Set once density exceeds the caller-supplied suppression threshold.
    pub suppressed: bool,
}

pub struct SimileDetector {
    idiom_exclusions: Vec<String>,
}

impl Default for SimileDetector {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl SimileDetector {
    /// `extra_idioms` lets a Voice Bundle extend the built-in exclusion
    /// list with project-specific fixed expressions.
    pub fn new(extra_idioms: &[String]) -> Self {
        let mut idiom_exclusions: Vec<String> =
            BUILT_IN_IDIOMS.iter().map(|s| s.to_lowercase()).collect();
        idiom_exclusions.extend(extra_idioms.iter().map(|s| s.to_lowercase()));
        Self { idiom_exclusions }
    }

    fn windowed_context(line: &str, marker_start: usize, marker_len: usize) -> String {
        let before = &line[..marker_start];
        let after = &line[marker_start + marker_len..];
        let before_words: Vec<&str> = before.unicode_words().collect();
        let after_words: Vec<&str> = after.unicode_words().collect();
        let take_before = before_words.len().saturating_sub(WINDOW_TOKENS);
        let before_window = before_words[take_before..].join(" ");
        let after_window: Vec<&str> = after_words.into_iter().take(WINDOW_TOKENS).collect();
        format!("{before_window} {} {}", &line[marker_start..marker_start + marker_len], after_window.join(" "))
            .trim()
            .to_string()
    }

    fn is_idiomatic(&self, context: &str) -> bool {
        let folded = context.to_lowercase();
        self.idiom_exclusions.iter().any(|idiom| folded.contains(idiom.as_str()))
    }

    /// Scan `text`, returning every candidate with stable line/column
    /// indexing. `suppress_above_density` gates the report's `suppressed`
    /// flag (callers decide whether to act on it); matches are never
    /// dropped from the list.
    pub fn scan(&self, text: &str, suppress_above_density: f64) -> SimileReport {
        let mut matches = Vec::new();
        let mut total_words = 0usize;

        for (line_index, line) in text.lines().enumerate() {
            total_words += line.unicode_words().count();
            let lower_line = line.to_lowercase();
            for marker in MARKERS {
                let mut search_from = 0usize;
                while let Some(rel) = lower_line[search_from..].find(marker) {
                    let start = search_from + rel;
                    let context = Self::windowed_context(line, start, marker.len());
                    let is_idiomatic = self.is_idiomatic(&context);
                    matches.push(SimileMatch {
                        line_index,
                        column: start,
                        marker: marker.to_string(),
                        excerpt: context,
                        is_idiomatic,
                    });
                    search_from = start + marker.len();
                }
            }
        }

        let non_idiomatic = matches.iter().filter(|m| !m.is_idiomatic).count();
        let density = if total_words == 0 {
            0.0
        } else {
            non_idiomatic as f64 / total_words as f64
        };
        let suppressed = density > suppress_above_density;

        SimileReport {
            matches,
            density,
            suppressed,
        }
    }
}
