//! Temporal sensitivity of queries and recency of gathered sources.

use regex::Regex;
use std::sync::LazyLock;

use crate::research::trace::TemporalDistribution;
use crate::types::Source;

const STRONG_RECENCY_TERMS: &[&str] = &[
    "latest",
    "recent",
    "current",
    "today",
    "this year",
    "updated",
    "new developments",
    "as of",
];

const TREND_TERMS: &[&str] = &["trend", "trends", "forecast", "outlook", "emerging", "evolving"];

const PRESENT_QUALIFIERS: &[&str] = &["now", "currently", "ongoing", "present", "this"];

/// Dated sources required before a recency penalty can apply.
const MIN_DATED_FOR_PENALTY: usize = 3;
const MAX_RECENCY_PENALTY: f64 = 0.05;

static YEAR_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").ok());

fn has_word(haystack: &str, term: &str) -> bool {
    if term.contains(' ') {
        return haystack.contains(term);
    }
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == term)
}

/// Whether a query asks about the present state of things.
pub fn is_temporally_sensitive(query: &str, reference_year: i32) -> bool {
    let lower = query.to_lowercase();

    if STRONG_RECENCY_TERMS.iter().any(|t| has_word(&lower, t)) {
        return true;
    }

    let recent_year = YEAR_PATTERN.as_ref().is_some_and(|pattern| {
        pattern
            .find_iter(&lower)
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .any(|y| y >= reference_year - 1)
    });
    if recent_year {
        return true;
    }

    TREND_TERMS.iter().any(|t| has_word(&lower, t))
        && PRESENT_QUALIFIERS.iter().any(|q| has_word(&lower, q))
}

/// Publication-year spread of `sources` relative to `reference_year`.
pub fn distribution<'a>(
    sources: impl IntoIterator<Item = &'a Source>,
    reference_year: i32,
    window_years: i32,
) -> TemporalDistribution {
    let mut dist = TemporalDistribution::default();
    for source in sources {
        match source.publication_year() {
            Some(year) => {
                dist.dated += 1;
                *dist.by_year.entry(year).or_default() += 1;
                if reference_year - year > window_years {
                    dist.older += 1;
                } else {
                    dist.recent += 1;
                }
            }
            None => dist.undated += 1,
        }
    }
    dist
}

/// Global confidence penalty for stale evidence on a time-sensitive query.
///
/// Applies only with enough dated sources to judge: at least three, and at
/// least half of all sources. The penalty scales with the stale share once
/// more than half of the dated sources fall outside the window.
pub fn recency_penalty(dist: &TemporalDistribution) -> f64 {
    let total = dist.dated + dist.undated;
    if dist.dated < MIN_DATED_FOR_PENALTY || total == 0 {
        return 0.0;
    }
    if (dist.dated as f64) / (total as f64) < 0.5 {
        return 0.0;
    }
    let old_ratio = dist.older as f64 / dist.dated as f64;
    if old_ratio <= 0.5 {
        return 0.0;
    }
    (old_ratio * MAX_RECENCY_PENALTY).min(MAX_RECENCY_PENALTY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DomainType;

    fn dated(year: Option<i32>) -> Source {
        Source {
            url: format!("https://x.org/{year:?}"),
            title: "t".into(),
            summary: String::new(),
            publication_date: year.map(|y| format!("{y}-06-01")),
            domain_type: DomainType::Other,
            author_present: false,
            opinion_score: 0.2,
            retrieved_for: None,
        }
    }

    #[test]
    fn test_strong_recency_terms() {
        assert!(is_temporally_sensitive("Latest battery chemistry results", 2026));
        assert!(is_temporally_sensitive("state of fusion as of this spring", 2026));
        assert!(!is_temporally_sensitive("history of the printing press", 2026));
    }

    #[test]
    fn test_recent_year_mentions() {
        assert!(is_temporally_sensitive("EV sales 2025", 2026));
        assert!(!is_temporally_sensitive("EV sales 2019", 2026));
    }

    #[test]
    fn test_trend_needs_present_qualifier() {
        assert!(!is_temporally_sensitive("trends in medieval trade", 2026));
        assert!(is_temporally_sensitive("ai chip trends now", 2026));
    }

    #[test]
    fn test_word_boundaries() {
        // Recency terms match whole words only.
        assert!(!is_temporally_sensitive("undercurrents in poetry", 2026));
    }

    #[test]
    fn test_distribution_counts() {
        let sources = [dated(Some(2025)), dated(Some(2012)), dated(None)];
        let dist = distribution(sources.iter(), 2026, 5);
        assert_eq!(dist.dated, 2);
        assert_eq!(dist.undated, 1);
        assert_eq!(dist.recent, 1);
        assert_eq!(dist.older, 1);
        assert_eq!(dist.by_year.get(&2012), Some(&1));
    }

    #[test]
    fn test_recency_penalty_gates() {
        let two_old = [dated(Some(2000)), dated(Some(2001))];
        assert_eq!(recency_penalty(&distribution(two_old.iter(), 2026, 5)), 0.0);

        let mostly_undated = [
            dated(Some(2000)),
            dated(Some(2001)),
            dated(Some(2002)),
            dated(None),
            dated(None),
            dated(None),
            dated(None),
        ];
        assert_eq!(
            recency_penalty(&distribution(mostly_undated.iter(), 2026, 5)),
            0.0
        );

        let stale = [dated(Some(2000)), dated(Some(2001)), dated(Some(2025))];
        let p = recency_penalty(&distribution(stale.iter(), 2026, 5));
        assert!((p - (2.0 / 3.0) * 0.05).abs() < 1e-9);

        let all_old = [dated(Some(2000)), dated(Some(2001)), dated(Some(2002))];
        assert!((recency_penalty(&distribution(all_old.iter(), 2026, 5)) - 0.05).abs() < 1e-9);
    }
}
