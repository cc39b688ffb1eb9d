//! Keyword extraction and overlap measures shared by coverage mapping and
//! near-duplicate subtopic detection.

use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "shall", "should", "may", "might", "must", "can",
    "could", "of", "in", "to", "for", "with", "on", "at", "from", "by", "about", "as", "into",
    "through", "during", "before", "after", "above", "below", "between", "this", "that",
    "these", "those", "it", "its", "and", "but", "or", "what", "which", "how", "why", "who",
];

/// Lowercased content words longer than two characters, stop words removed.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(String::from)
        .collect()
}

/// Jaccard similarity of two keyword sets.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Fraction of `needle`'s keywords present in `haystack`.
pub fn containment(needle: &BTreeSet<String>, haystack: &BTreeSet<String>) -> f64 {
    if needle.is_empty() {
        return 0.0;
    }
    needle.intersection(haystack).count() as f64 / needle.len() as f64
}

/// Canonical form of a subtopic name: its keywords joined by single spaces.
pub fn canonical_name(name: &str) -> String {
    keywords(name).into_iter().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_drop_stop_words_and_short_tokens() {
        let kw = keywords("What is the cost of Solar panels in 2024?");
        let expected: BTreeSet<String> = ["cost", "solar", "panels", "2024"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(kw, expected);
    }

    #[test]
    fn test_jaccard() {
        let a = keywords("battery storage costs");
        let b = keywords("costs of battery storage");
        assert!((jaccard(&a, &b) - 1.0).abs() < f64::EPSILON);
        let c = keywords("grid regulation");
        assert_eq!(jaccard(&a, &c), 0.0);
        assert_eq!(jaccard(&a, &BTreeSet::new()), 0.0);
    }

    #[test]
    fn test_containment_is_asymmetric() {
        let q = keywords("installation cost");
        let s = keywords("average installation cost fell sharply last year");
        assert!((containment(&q, &s) - 1.0).abs() < f64::EPSILON);
        assert!(containment(&s, &q) < 0.5);
    }

    #[test]
    fn test_canonical_name_ignores_order_and_case() {
        assert_eq!(
            canonical_name("Storage, Battery"),
            canonical_name("battery storage")
        );
    }
}
