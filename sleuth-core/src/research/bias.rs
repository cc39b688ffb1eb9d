//! Heuristic opinion scoring for source summaries.
//!
//! Used when a retrieval result carries no opinion score of its own. The
//! score is a fixed weighted blend of lexical signals, bounded to [0, 1]
//! where 0 is factual and 1 is highly opinionated.

const EMOTIONAL_TERMS: &[&str] = &[
    "amazing", "terrible", "shocking", "alarming", "exciting", "horrifying", "incredible",
    "devastating", "wonderful", "tragic", "outrageous", "brilliant", "disastrous",
    "magnificent", "appalling", "stunning", "awful", "fantastic", "dreadful", "marvelous",
    "concerning", "disturbing", "inspiring", "disgraceful", "phenomenal",
];

const STRONG_CLAIM_TERMS: &[&str] = &[
    "clearly", "obviously", "undeniably", "certainly", "definitely", "without question",
    "proven", "undoubtedly", "always", "never", "absolutely", "inevitably", "unquestionably",
    "indisputably", "the fact is", "it is clear", "there is no doubt",
];

const MODAL_VERBS: &[&str] = &[
    "should", "would", "could", "might", "may", "must", "shall", "ought", "need to", "have to",
];

const ADJECTIVE_SUFFIXES: &[&str] = &[
    "ous", "ive", "ful", "less", "able", "ible", "ical", "ial", "ent", "ant", "ing",
];

const W_ADJECTIVE: f64 = 0.20;
const W_EMOTIONAL: f64 = 0.30;
const W_MODAL: f64 = 0.20;
const W_CITATION: f64 = 0.15;
const W_STRONG: f64 = 0.15;

/// Estimate how opinionated `text` reads.
///
/// `has_citations` should be true when the source names an author or
/// otherwise attributes its claims.
pub fn opinion_score(text: &str, has_citations: bool) -> f64 {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let word_count = words.len().max(1) as f64;
    let padded = format!(" {lower} ");

    let adjectives = words
        .iter()
        .filter(|w| ADJECTIVE_SUFFIXES.iter().any(|s| w.ends_with(s)))
        .count() as f64;
    let adjective_density = (adjectives / word_count * 5.0).min(1.0);

    let emotional_hits = EMOTIONAL_TERMS.iter().filter(|t| lower.contains(*t)).count() as f64;
    let emotional = (emotional_hits / 3.0).min(1.0);

    let modal_hits = MODAL_VERBS
        .iter()
        .filter(|m| padded.contains(&format!(" {m} ")))
        .count() as f64;
    let modal_density = (modal_hits / (word_count / 20.0).max(1.0)).min(1.0);

    let citation_penalty = if has_citations { 0.0 } else { 1.0 };

    let strong_hits = STRONG_CLAIM_TERMS.iter().filter(|t| lower.contains(*t)).count() as f64;
    let strong = (strong_hits / 2.0).min(1.0);

    let score = adjective_density * W_ADJECTIVE
        + emotional * W_EMOTIONAL
        + modal_density * W_MODAL
        + citation_penalty * W_CITATION
        + strong * W_STRONG;
    (score.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
}
