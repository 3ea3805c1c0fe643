//! The Pattern Library itself (§4.2): compiles and caches the three
//! matcher sets per project, recompiling on `SettingsChanged`, and
//! exposes the unified `scan` entrypoint with stable ordering.

use super::anti_pattern::{AntiPatternCompileError, AntiPatternMatch, AntiPatternMatcher};
use super::metaphor::MetaphorLexicon;
use super::simile::SimileDetector;
use crate::events::{CraftEvent, SharedEventBus};
use crate::model::{MetaphorReport, Severity, VoiceBundle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// One ordered match produced by `scan`, uniting anti-pattern hits and
/// non-idiomatic simile candidates into a single reportable stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub description: String,
    pub severity: Severity,
    pub line_index: usize,
    pub column: usize,
    pub excerpt: String,
}

impl From<AntiPatternMatch> for PatternMatch {
    fn from(m: AntiPatternMatch) -> Self {
        Self {
            pattern_id: m.pattern_id,
            description: m.description,
            severity: m.severity,
            line_index: m.line_index,
            column: m.column,
            excerpt: m.excerpt,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error(transparent)]
    AntiPatternCompile(#[from] AntiPatternCompileError),
}

struct CompiledSet {
    anti_patterns: AntiPatternMatcher,
    metaphors: MetaphorLexicon,
    similes: SimileDetector,
    simile_density_threshold: f64,
}

/// Caches one [`CompiledSet`] per project, recompiling on demand.
pub struct PatternLibrary {
    cache: RwLock<HashMap<String, CompiledSet>>,
    event_bus: Option<SharedEventBus>,
}

impl PatternLibrary {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Compile (or recompile) the matcher set for `project_id` from its
    /// active Voice Bundle. Called on load and in response to
    /// `SettingsChanged` events scoped to that project.
    pub fn recompile(
        &self,
        project_id: &str,
        bundle: &VoiceBundle,
        simile_density_threshold: f64,
    ) -> Result<(), PatternError> {
        let anti_patterns = AntiPatternMatcher::compile(&bundle.anti_patterns)?;
        let metaphors = MetaphorLexicon::compile(&bundle.metaphor_domains);
        let similes = SimileDetector::default();

        let count = bundle.anti_patterns.len();
        self.cache.write().unwrap().insert(
            project_id.to_string(),
            CompiledSet {
                anti_patterns,
                metaphors,
                similes,
                simile_density_threshold,
            },
        );

        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(CraftEvent::PatternsRecompiled {
                project_id: project_id.to_string(),
                anti_pattern_count: count,
                timestamp: crate::model::now(),
            });
        }

        Ok(())
    }

    fn with_compiled<R>(&self, project_id: &str, f: impl FnOnce(&CompiledSet) -> R) -> Option<R> {
        let cache = self.cache.read().unwrap();
        cache.get(project_id).map(f)
    }

    /// Ordered anti-pattern + non-idiomatic-simile matches for `text`,
    /// with stable line/column indexing (§4.2). Returns `None` if the
    /// project has no compiled matcher set yet.
    pub fn scan(&self, project_id: &str, text: &str) -> Option<Vec<PatternMatch>> {
        self.with_compiled(project_id, |set| {
            let mut matches: Vec<PatternMatch> = set
                .anti_patterns
                .scan(text)
                .into_iter()
                .map(PatternMatch::from)
                .collect();

            let simile_report = set.similes.scan(text, set.simile_density_threshold);
            for hit in simile_report.matches.iter().filter(|m| !m.is_idiomatic) {
                matches.push(PatternMatch {
                    pattern_id: "simile".to_string(),
                    description: format!("simile candidate ('{}')", hit.marker),
                    severity: Severity::Advisory,
                    line_index: hit.line_index,
                    column: hit.column,
                    excerpt: hit.excerpt.clone(),
                });
            }

            matches.sort_by(|a, b| a.line_index.cmp(&b.line_index).then(a.column.cmp(&b.column)));
            matches
        })
    }

    /// Metaphor saturation analysis for `text` (§4.2, §4.5).
    pub fn analyze_metaphors(&self, project_id: &str, text: &str) -> Option<MetaphorReport> {
        self.with_compiled(project_id, |set| set.metaphors.analyze(text))
    }

    /// Raw simile report (candidates, density, suppression flag) for
    /// `text`, used by the Analyzer's Metaphor Discipline scoring, which
    /// needs the policy-independent candidate list rather than `scan`'s
    /// already-filtered advisory matches.
    pub fn simile_report(&self, project_id: &str, text: &str) -> Option<super::simile::SimileReport> {
        self.with_compiled(project_id, |set| set.similes.scan(text, set.simile_density_threshold))
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AntiPattern, MetaphorDomain, Pov, SimilePolicy, Tense};

    fn bundle() -> VoiceBundle {
        VoiceBundle {
            gold_standard: "x".into(),
            anti_patterns: vec![AntiPattern {
                pattern: r"surgical\s+precision".into(),
                description: "cliche".into(),
                severity: Severity::ZeroTolerance,
            }],
            metaphor_domains: vec![MetaphorDomain {
                name: "gambling".into(),
                keywords: vec!["bet".into()],
                max_percentage: 0.05,
            }],
            simile_policy: SimilePolicy::Limit(2),
            pov: Pov::ThirdLimited,
            tense: Tense::Past,
            phase_profiles: vec![],
        }
    }

    #[test]
    fn scan_returns_none_before_recompile() {
        let lib = PatternLibrary::new();
        assert!(lib.scan("p1", "anything").is_none());
    }

    #[test]
    fn scan_combines_anti_patterns_and_similes_in_order() {
        let lib = PatternLibrary::new();
        lib.recompile("p1", &bundle(), 1.0).unwrap();
        let text = "She moved as if wounded, working with surgical precision regardless.";
        let matches = lib.scan("p1", text).unwrap();
        assert!(matches.iter().any(|m| m.pattern_id == "simile"));
        assert!(matches.iter().any(|m| m.pattern_id.starts_with("anti_pattern")));
        for pair in matches.windows(2) {
            assert!(
                pair[0].line_index < pair[1].line_index
                    || (pair[0].line_index == pair[1].line_index && pair[0].column <= pair[1].column)
            );
        }
    }

    #[test]
    fn analyze_metaphors_reflects_recompiled_bundle() {
        let lib = PatternLibrary::new();
        lib.recompile("p1", &bundle(), 1.0).unwrap();
        let report = lib.analyze_metaphors("p1", "I took the bet.").unwrap();
        assert_eq!(report.per_domain_counts["gambling"], 1);
    }

    #[test]
    fn recompile_publishes_patterns_recompiled_event() {
        let bus = crate::events::EventBus::shared();
        let mut rx = bus.subscribe();
        let lib = PatternLibrary::new().with_event_bus(bus);
        lib.recompile("p1", &bundle(), 1.0).unwrap();
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, CraftEvent::PatternsRecompiled { .. }));
    }
}
