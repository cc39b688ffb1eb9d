//! Completed-event checks for factual winner queries.
//!
//! Insights about events that have not happened yet are noise for a "who
//! won" question. The filter is permissive: a statement anchored to any past
//! year, or carrying a winner verb, is kept.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::research::intent::years;
use crate::types::Insight;

const FUTURE_INDICATORS: &[&str] = &[
    "upcoming",
    "will be held",
    "scheduled for",
    "preview",
    "qualification stage",
    "to be played",
    "is expected to win",
    "will take place",
    "set to begin",
    "preparations for",
    "bid to host",
    "expected to win",
    "projected to win",
    "will compete",
    "qualifying round",
    "draw ceremony",
];

pub(crate) static WINNER_VERB: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        &[
            r"(?i)\bwon\b",
            r"\bdefeated\b",
            r"\bclaimed\b",
            r"\bsecured\b",
            r"\bcaptured\b",
            r"\blifted\b",
            r"\btriumphed\b",
            r"\bcrowned\b",
            r"\bawarded\b",
            r"\belected\b",
            r"\bbeat\b",
            r"\bconquered\b",
            r"\bprevailed\b",
            r"\bvictorious\b",
            r"\bchampion\b",
            r"\bwinning\b",
            r"\bvictory\b",
            r"\btook\s+home\b",
            r"\bclinched\b",
            r"\bearned\b",
            r"\bhoisted\b",
            r"\bdominated\b",
        ]
        .join("|"),
    )
    .ok()
});

pub(crate) fn has_winner_verb(text: &str) -> bool {
    WINNER_VERB.as_ref().is_some_and(|re| re.is_match(text))
}

const DRIFT_STRONG: f64 = 0.15;
const DRIFT_MILD: f64 = 0.03;
const DRIFT_MODERATE: f64 = 0.08;

/// Whether `statement` is clearly about an event after `current_year`.
///
/// Every year in the statement being in the future decides it. Any past
/// year keeps it. Without years, a future indicator with no winner verb
/// marks it as future.
pub fn is_primarily_future(statement: &str, current_year: i32) -> bool {
    let (past, future): (Vec<i32>, Vec<i32>) =
        years(statement).partition(|&y| y <= current_year);
    if !past.is_empty() {
        return false;
    }
    if !future.is_empty() {
        return true;
    }
    let lower = statement.to_lowercase();
    FUTURE_INDICATORS.iter().any(|i| lower.contains(i)) && !has_winner_verb(statement)
}

/// Drop future-event insights. Returns the kept insights and how many were dropped.
///
/// When every insight would be dropped, all are kept instead.
pub fn filter_future_insights(insights: Vec<Insight>, current_year: i32) -> (Vec<Insight>, usize) {
    let total = insights.len();
    let (future, kept): (Vec<Insight>, Vec<Insight>) = insights
        .into_iter()
        .partition(|i| is_primarily_future(&i.statement, current_year));
    if kept.is_empty() && total > 0 {
        warn!(total, "Event filter would drop every insight, keeping all");
        let mut all = future;
        all.extend(kept);
        return (all, 0);
    }
    for insight in &future {
        debug!(statement = %insight.statement, "Dropped future-event insight");
    }
    (kept, future.len())
}

fn is_completed_result(statement: &str, current_year: i32) -> bool {
    years(statement).any(|y| y <= current_year)
        && has_winner_verb(statement)
        && !is_primarily_future(statement, current_year)
}

/// Whether any insight reports a completed result: a past year, a winner verb,
/// and not primarily about the future.
pub fn contains_completed_result<'a>(
    insights: impl IntoIterator<Item = &'a Insight>,
    current_year: i32,
) -> bool {
    insights
        .into_iter()
        .any(|i| is_completed_result(&i.statement, current_year))
}

/// Distinct sources behind completed-result insights.
pub fn agreeing_sources<'a>(
    insights: impl IntoIterator<Item = &'a Insight>,
    current_year: i32,
) -> usize {
    let mut urls = std::collections::BTreeSet::new();
    for insight in insights {
        if is_completed_result(&insight.statement, current_year) {
            urls.extend(insight.supporting_sources.iter().map(String::as_str));
        }
    }
    urls.len()
}

/// Confidence penalty for evidence drifting toward future events.
pub fn future_drift_penalty(insights: &[Insight], current_year: i32) -> f64 {
    if insights.is_empty() {
        return 0.0;
    }
    let future = insights
        .iter()
        .filter(|i| is_primarily_future(&i.statement, current_year))
        .count();
    let ratio = future as f64 / insights.len() as f64;
    let completed = contains_completed_result(insights, current_year);
    match (ratio >= 0.5, completed) {
        (true, false) => DRIFT_STRONG,
        (true, true) => DRIFT_MILD,
        (false, false) if future > 0 => DRIFT_MODERATE,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insight(statement: &str, sources: &[&str]) -> Insight {
        Insight {
            subtopic: "winner".into(),
            statement: statement.into(),
            confidence: 0.8,
            supporting_sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_future_detection() {
        assert!(is_primarily_future("The 2030 World Cup will be held in Spain", 2026));
        assert!(is_primarily_future("The upcoming tournament draw ceremony", 2026));
        assert!(!is_primarily_future(
            "Argentina won in 2022; the 2030 edition will be held in Spain",
            2026
        ));
        assert!(!is_primarily_future("Argentina won the upcoming rematch", 2026));
        assert!(!is_primarily_future("Installed costs fell", 2026));
    }

    #[test]
    fn test_filter_keeps_past_results() {
        let insights = vec![
            insight("Argentina won the 2022 World Cup", &["https://a.com"]),
            insight("The 2030 World Cup will be held in Spain", &[]),
        ];
        let (kept, dropped) = filter_future_insights(insights, 2026);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].statement.starts_with("Argentina"));
    }

    #[test]
    fn test_filter_never_drops_everything() {
        let insights = vec![insight("The 2030 edition is scheduled for Spain", &[])];
        let (kept, dropped) = filter_future_insights(insights, 2026);
        assert_eq!((kept.len(), dropped), (1, 0));
    }

    #[test]
    fn test_completed_result_and_agreement() {
        let insights = vec![
            insight("Argentina won the 2022 final", &["https://a.com", "https://b.com"]),
            insight("Argentina were victorious in 2022", &["https://b.com", "https://c.com"]),
            insight("France lost", &["https://d.com"]),
        ];
        assert!(contains_completed_result(&insights, 2026));
        assert_eq!(agreeing_sources(&insights, 2026), 3);
        assert!(!contains_completed_result(&insights[2..], 2026));
    }

    #[test]
    fn test_drift_penalty_tiers() {
        let past = insight("Argentina won the 2022 final", &[]);
        let future = insight("The 2030 final will be held in Madrid", &[]);
        let neutral = insight("Viewership was high", &[]);

        assert_eq!(future_drift_penalty(&[], 2026), 0.0);
        assert_eq!(future_drift_penalty(&[future.clone()], 2026), DRIFT_STRONG);
        assert_eq!(future_drift_penalty(&[future.clone(), past.clone()], 2026), DRIFT_MILD);
        assert_eq!(
            future_drift_penalty(&[future, neutral.clone(), neutral.clone()], 2026),
            DRIFT_MODERATE
        );
        assert_eq!(future_drift_penalty(&[past, neutral], 2026), 0.0);
    }
}
