use crate::catalog::{normalize_text, CatalogSnapshot};
use crate::domain::product::{Candidate, CatalogEntry};
use crate::domain::session::Resolution;

/// Tunables for catalog matching. Defaults come from replaying recorded
/// conversations against the stationery catalog.
#[derive(Clone, Copy, Debug)]
pub struct ResolverConfig {
    /// Minimum combined score for a candidate to count as a match at all.
    pub score_threshold: f64,
    /// A single winner must beat the runner-up by at least this much;
    /// otherwise the request is ambiguous.
    pub ambiguity_margin: f64,
    /// Maximum candidates surfaced in disambiguation and suggestion lists.
    pub max_candidates: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { score_threshold: 0.55, ambiguity_margin: 0.15, max_candidates: 3 }
    }
}

/// Outcome of resolving one requested name against a catalog snapshot.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolutionOutcome {
    Match(Candidate),
    Ambiguous(Vec<Candidate>),
    NotFound(Vec<Candidate>),
}

impl ResolutionOutcome {
    pub fn into_resolution(self) -> Resolution {
        match self {
            Self::Match(candidate) => Resolution::Resolved {
                product_id: candidate.product_id,
                name: candidate.name,
                sku: candidate.sku,
                unit_price: candidate.unit_price,
            },
            Self::Ambiguous(candidates) => Resolution::Ambiguous { candidates },
            Self::NotFound(suggestions) => Resolution::NotFound { suggestions },
        }
    }
}

/// Deterministic catalog matcher. Pure over its inputs: the same request
/// against the same snapshot always yields the same outcome, which keeps
/// replayed messages stable.
#[derive(Clone, Debug, Default)]
pub struct ProductResolver {
    config: ResolverConfig,
}

impl ProductResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, requested: &str, snapshot: &CatalogSnapshot) -> ResolutionOutcome {
        let needle = normalize_text(requested);
        if needle.is_empty() || snapshot.is_empty() {
            return ResolutionOutcome::NotFound(Vec::new());
        }

        // Exact name or SKU match short-circuits scoring.
        if let Some(entry) = snapshot.by_sku(&needle) {
            return ResolutionOutcome::Match(Candidate::from_entry(entry, 1.0));
        }
        for entry in snapshot.entries() {
            if normalize_text(&entry.name) == needle {
                return ResolutionOutcome::Match(Candidate::from_entry(entry, 1.0));
            }
        }
        for entry in snapshot.entries() {
            if entry.synonyms.iter().any(|synonym| normalize_text(synonym) == needle) {
                return ResolutionOutcome::Match(Candidate::from_entry(entry, 1.0));
            }
        }

        let mut scored: Vec<Candidate> = snapshot
            .entries()
            .iter()
            .map(|entry| Candidate::from_entry(entry, score_entry(&needle, entry)))
            .filter(|candidate| candidate.score >= self.config.score_threshold)
            .collect();

        // Stable ordering: score descending, then name, then id.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.product_id.cmp(&b.product_id))
        });

        match scored.len() {
            0 => ResolutionOutcome::NotFound(self.suggestions(&needle, snapshot)),
            1 => ResolutionOutcome::Match(scored.remove(0)),
            _ => {
                if scored[0].score - scored[1].score >= self.config.ambiguity_margin {
                    ResolutionOutcome::Match(scored.remove(0))
                } else {
                    scored.truncate(self.config.max_candidates);
                    ResolutionOutcome::Ambiguous(scored)
                }
            }
        }
    }

    /// Below-threshold candidates offered as "did you mean" hints. May be
    /// empty when nothing in the catalog comes close.
    fn suggestions(&self, needle: &str, snapshot: &CatalogSnapshot) -> Vec<Candidate> {
        let floor = self.config.score_threshold / 2.0;
        let mut scored: Vec<Candidate> = snapshot
            .entries()
            .iter()
            .map(|entry| Candidate::from_entry(entry, score_entry(needle, entry)))
            .filter(|candidate| candidate.score >= floor)
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        scored.truncate(self.config.max_candidates);
        scored
    }
}

/// Best score across the entry name and its synonyms.
fn score_entry(needle: &str, entry: &CatalogEntry) -> f64 {
    let mut best = score_pair(needle, &normalize_text(&entry.name));
    for synonym in &entry.synonyms {
        let score = score_pair(needle, &normalize_text(synonym));
        if score > best {
            best = score;
        }
    }
    best
}

/// Blend of token overlap and edit distance. Token overlap rewards partial
/// mentions ("calculadora casio" vs the full name); edit distance catches
/// single-word typos.
fn score_pair(needle: &str, haystack: &str) -> f64 {
    if needle == haystack {
        return 1.0;
    }
    0.55 * token_overlap(needle, haystack) + 0.45 * edit_similarity(needle, haystack)
}

fn token_overlap(needle: &str, haystack: &str) -> f64 {
    let needle_tokens: Vec<&str> = needle.split(' ').filter(|t| !t.is_empty()).collect();
    if needle_tokens.is_empty() {
        return 0.0;
    }
    let haystack_tokens: Vec<&str> = haystack.split(' ').filter(|t| !t.is_empty()).collect();

    let matched = needle_tokens
        .iter()
        .filter(|token| {
            haystack_tokens
                .iter()
                .any(|candidate| candidate == *token || candidate.starts_with(*token))
        })
        .count();

    matched as f64 / needle_tokens.len() as f64
}

fn edit_similarity(needle: &str, haystack: &str) -> f64 {
    let longest = needle.chars().count().max(haystack.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(needle, haystack) as f64 / longest as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::catalog::CatalogSnapshot;
    use crate::domain::product::{CatalogEntry, ProductId};

    use super::{levenshtein, ProductResolver, ResolutionOutcome};

    fn entry(id: &str, name: &str, sku: &str, synonyms: &[&str]) -> CatalogEntry {
        CatalogEntry {
            id: ProductId(id.to_owned()),
            name: name.to_owned(),
            sku: sku.to_owned(),
            unit_price: Decimal::new(1999, 2),
            stock_quantity: 25,
            synonyms: synonyms.iter().map(|s| (*s).to_owned()).collect(),
            active: true,
        }
    }

    fn stationery() -> CatalogSnapshot {
        CatalogSnapshot::new(vec![
            entry("p1", "papel bond carta 500 hojas", "PAP-001", &["hojas blancas carta"]),
            entry("p2", "papel bond oficio 500 hojas", "PAP-002", &[]),
            entry("p3", "calculadora casio fx-991", "CAL-001", &["calculadora cientifica"]),
            entry("p4", "lápiz mongol no. 2", "LAP-001", &["lapices"]),
        ])
    }

    #[test]
    fn exact_name_match_wins_with_full_score() {
        let resolver = ProductResolver::default();
        let outcome = resolver.resolve("Calculadora Casio FX-991", &stationery());

        match outcome {
            ResolutionOutcome::Match(candidate) => {
                assert_eq!(candidate.product_id, ProductId("p3".to_owned()));
                assert_eq!(candidate.score, 1.0);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn sku_match_short_circuits() {
        let resolver = ProductResolver::default();
        let outcome = resolver.resolve("lap-001", &stationery());
        assert!(matches!(outcome, ResolutionOutcome::Match(c) if c.product_id.0 == "p4"));
    }

    #[test]
    fn synonym_match_resolves_directly() {
        let resolver = ProductResolver::default();
        let outcome = resolver.resolve("calculadora científica", &stationery());
        assert!(matches!(outcome, ResolutionOutcome::Match(c) if c.product_id.0 == "p3"));
    }

    #[test]
    fn close_variants_report_ambiguity() {
        let resolver = ProductResolver::default();
        let outcome = resolver.resolve("papel bond", &stationery());

        match outcome {
            ResolutionOutcome::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
                // Ordering is deterministic: equal scores fall back to name.
                assert_eq!(candidates[0].product_id, ProductId("p1".to_owned()));
                assert_eq!(candidates[1].product_id, ProductId("p2".to_owned()));
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn unknown_product_yields_not_found_with_bounded_suggestions() {
        let resolver = ProductResolver::default();
        let outcome = resolver.resolve("impresora laser hp", &stationery());

        match outcome {
            ResolutionOutcome::NotFound(suggestions) => {
                assert!(suggestions.len() <= 3);
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn resolution_is_deterministic_across_calls() {
        let resolver = ProductResolver::default();
        let snapshot = stationery();

        let first = resolver.resolve("papel bond", &snapshot);
        let second = resolver.resolve("papel bond", &snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_request_is_not_found() {
        let resolver = ProductResolver::default();
        let outcome = resolver.resolve("   ", &stationery());
        assert!(matches!(outcome, ResolutionOutcome::NotFound(s) if s.is_empty()));
    }

    #[test]
    fn levenshtein_handles_typos() {
        assert_eq!(levenshtein("calculadora", "calculadora"), 0);
        assert_eq!(levenshtein("calcualdora", "calculadora"), 2);
        assert_eq!(levenshtein("", "abc"), 3);
    }
}
