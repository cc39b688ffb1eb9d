//! Sentence-level insight extraction from source summaries.
//!
//! Used for factual winner queries when the analyzer returns no insights for
//! a subtopic. Only sentences reporting a completed result are kept.

use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;
use tracing::debug;

use crate::research::events::has_winner_verb;
use crate::research::intent::years;
use crate::types::{Insight, Source};

const FALLBACK_CONFIDENCE: f64 = 0.80;
const MIN_SENTENCE_LEN: usize = 15;

static SENTENCE_END: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[.!?]+").ok());

static FUTURE_PHRASE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\bwill\s+(?:be|win|host|take)\b|\bexpected\s+to\s+win\b|\bupcoming\b|\bscheduled\b")
        .ok()
});

static CLAUSE_BREAK: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i);|\bbut\b|\bwhile\b|\bwhereas\b|\balthough\b|\bhowever\b|\bmeanwhile\b").ok()
});

static CAPITALIZED_RUN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-zA-Z'\-]*(?:\s+[A-Z][a-zA-Z'\-]*)*").ok());

const NON_ENTITY: &[&str] = &[
    "The", "This", "That", "In", "On", "At", "For", "With", "From", "After", "Before", "During",
    "Between", "World", "Cup", "Prize", "League", "Championship", "Tournament", "Final",
    "Olympic", "Olympics", "Super", "Bowl", "Academy", "Award", "Awards",
];

fn split<'t>(re: &LazyLock<Option<Regex>>, text: &'t str) -> Vec<&'t str> {
    match re.as_ref() {
        Some(re) => re.split(text).collect(),
        None => vec![text],
    }
}

/// The first run of capitalized words that is not made only of generic event words.
pub fn leading_entity(sentence: &str) -> Option<String> {
    CAPITALIZED_RUN
        .as_ref()?
        .find_iter(sentence)
        .map(|m| m.as_str().trim())
        .find(|run| !run.split_whitespace().all(|w| NON_ENTITY.contains(&w)))
        .map(str::to_string)
}

/// Whether the winner verb is tied to a past year within its own clause or
/// the clause just before it. A sentence with no year at all passes.
fn verb_bound_to_past(sentence: &str, current_year: i32) -> bool {
    if years(sentence).next().is_none() {
        return true;
    }
    let past = |clause: &str| years(clause).any(|y| y <= current_year);
    let clauses = split(&CLAUSE_BREAK, sentence);
    clauses.iter().enumerate().any(|(i, &clause)| {
        has_winner_verb(clause) && (past(clause) || (i > 0 && past(clauses[i - 1])))
    })
}

fn is_completed_sentence(sentence: &str, current_year: i32) -> bool {
    if sentence.len() < MIN_SENTENCE_LEN || !has_winner_verb(sentence) {
        return false;
    }
    if FUTURE_PHRASE.as_ref().is_some_and(|re| re.is_match(sentence)) {
        return false;
    }
    let mentioned: Vec<i32> = years(sentence).collect();
    if !mentioned.is_empty() && mentioned.iter().all(|&y| y > current_year) {
        return false;
    }
    verb_bound_to_past(sentence, current_year)
}

/// Build insights for `subtopic` from completed-result sentences in `sources`.
pub fn extract_insights(sources: &[Source], subtopic: &str, current_year: i32) -> Vec<Insight> {
    let mut seen = HashSet::new();
    let mut insights = Vec::new();
    for source in sources {
        for sentence in split(&SENTENCE_END, &source.summary) {
            let sentence = sentence.trim();
            if !is_completed_sentence(sentence, current_year) {
                continue;
            }
            if !seen.insert(sentence.to_lowercase()) {
                continue;
            }
            debug!(
                subtopic,
                entity = leading_entity(sentence).as_deref().unwrap_or(""),
                "Fallback insight extracted"
            );
            insights.push(Insight {
                subtopic: subtopic.to_string(),
                statement: sentence.to_string(),
                confidence: FALLBACK_CONFIDENCE,
                supporting_sources: BTreeSet::from([source.url.clone()]),
            });
        }
    }
    insights
}
