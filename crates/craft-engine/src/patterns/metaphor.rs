//! Metaphor-domain lexicon tokenization with fractional multi-domain
//! attribution (§4.2, Open Question #2: resolved in favor of fractional
//! 1/N attribution per SPEC_FULL.md §9).

use crate::model::{MetaphorDomain, MetaphorReport};
use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

/// Compiled keyword lexicon for one Voice Bundle's metaphor domains.
pub struct MetaphorLexicon {
    domains: Vec<CompiledDomain>,
}

struct CompiledDomain {
    name: String,
    keywords: std::collections::HashSet<String>,
    max_percentage: f64,
}

impl MetaphorLexicon {
    pub fn compile(domains: &[MetaphorDomain]) -> Self {
        let compiled = domains
            .iter()
            .map(|d| CompiledDomain {
                name: d.name.clone(),
                keywords: d.keywords.iter().map(|k| k.to_lowercase()).collect(),
                max_percentage: d.max_percentage,
            })
            .collect();
        Self { domains: compiled }
    }

    /// Tokenize `text` on Unicode word boundaries, lowercase-fold, and
    /// attribute each domain-keyword token to every domain whose lexicon
    /// contains it, each receiving 1/N of a count where N is the number
    /// of matched domains for that token. Tokens matching no domain
    /// contribute nothing.
    pub fn analyze(&self, text: &str) -> MetaphorReport {
        if self.domains.is_empty() {
            return MetaphorReport::default();
        }

        let mut per_domain_counts: HashMap<String, f64> = HashMap::new();
        let mut total_tokens = 0usize;
        let mut total_count = 0.0f64;

        for word in text.unicode_words() {
            total_tokens += 1;
            let folded = word.to_lowercase();
            let matched: Vec<&CompiledDomain> = self
                .domains
                .iter()
                .filter(|d| d.keywords.contains(&folded))
                .collect();
            if matched.is_empty() {
                continue;
            }
            let share = 1.0 / matched.len() as f64;
            for domain in matched {
                *per_domain_counts.entry(domain.name.clone()).or_insert(0.0) += share;
            }
            total_count += share;
        }

        let denom = total_tokens.max(1) as f64;
        let mut per_domain_percentages = HashMap::new();
        let mut saturated_domains = Vec::new();
        let mut int_counts = HashMap::new();

        for domain in &self.domains {
            let count = per_domain_counts.get(&domain.name).copied().unwrap_or(0.0);
            let percentage = count / denom;
            per_domain_percentages.insert(domain.name.clone(), percentage);
            int_counts.insert(domain.name.clone(), count.round() as usize);
            if percentage > domain.max_percentage {
                saturated_domains.push(domain.name.clone());
            }
        }
        saturated_domains.sort();

        MetaphorReport {
            total_count: total_count.round() as usize,
            per_domain_counts: int_counts,
            per_domain_percentages,
            saturated_domains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains() -> Vec<MetaphorDomain> {
        vec![
            MetaphorDomain {
                name: "gambling".into(),
                keywords: vec!["bet".into(), "odds".into(), "wager".into(), "stake".into()],
                max_percentage: 0.05,
            },
            MetaphorDomain {
                name: "war".into(),
                keywords: vec!["battle".into(), "stake".into(), "front".into()],
                max_percentage: 0.05,
            },
        ]
    }

    #[test]
    fn attributes_unambiguous_token_fully_to_its_domain() {
        let lexicon = MetaphorLexicon::compile(&domains());
        let report = lexicon.analyze("She took the bet without hesitation.");
        assert_eq!(report.per_domain_counts["gambling"], 1);
        assert_eq!(report.per_domain_counts.get("war").copied().unwrap_or(0), 0);
    }

    #[test]
    fn attributes_ambiguous_token_fractionally_across_domains() {
        let lexicon = MetaphorLexicon::compile(&domains());
        // "stake" belongs to both domains.
        let report = lexicon.analyze("stake");
        assert_eq!(report.per_domain_percentages["gambling"], 0.5);
        assert_eq!(report.per_domain_percentages["war"], 0.5);
    }

    #[test]
    fn flags_saturated_domain_even_without_any_anti_pattern_hit() {
        let lexicon = MetaphorLexicon::compile(&domains());
        let text = "bet bet bet bet odds wager stake plain words about nothing else at all here";
        let report = lexicon.analyze(text);
        assert!(report.saturated_domains.contains(&"gambling".to_string()));
    }

    #[test]
    fn case_insensitive_and_unicode_word_tokenized() {
        let lexicon = MetaphorLexicon::compile(&domains());
        let report = lexicon.analyze("BET. Odds, wager; plain text with no punctuation issues.");
        assert_eq!(report.per_domain_counts["gambling"], 3);
    }

    #[test]
    fn empty_lexicon_produces_default_report() {
        let lexicon = MetaphorLexicon::compile(&[]);
        let report = lexicon.analyze("any text at all");
        assert_eq!(report.total_count, 0);
        assert!(report.saturated_domains.is_empty());
    }
}
