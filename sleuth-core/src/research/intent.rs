//! Rule-based query intent classification.
//!
//! Pattern matching only. Recognizes questions asking who won a recurring
//! event (tournaments, awards, elections) and present-tense trend questions,
//! and rewrites "who won the latest X" queries toward completed results.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// "Who won X": resolved by a completed past result.
    FactualEventWinner,
    /// A trend term with a present-tense qualifier.
    TrendAnalysis,
    #[default]
    Other,
}

impl QueryIntent {
    pub fn is_factual_event(self) -> bool {
        self == QueryIntent::FactualEventWinner
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryIntent::FactualEventWinner => "factual_event_winner",
            QueryIntent::TrendAnalysis => "trend_analysis",
            QueryIntent::Other => "other",
        })
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(&format!("(?i){pattern}")).ok()
}

fn any_of(terms: &[&str]) -> Option<Regex> {
    compile(&terms.join("|"))
}

fn matches(pattern: &LazyLock<Option<Regex>>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

static WINNER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    any_of(&[
        r"\bwho\s+won\b",
        r"\bwinners?\b",
        r"\bchampions?\b",
        r"\bwho\s+claimed\b",
        r"\bwho\s+secured\b",
        r"\bwho\s+defeated\b",
        r"\bmedal(?:ist|lists?)?\b",
        r"\bgold\s+medal\b",
    ])
});

static RECENCY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    any_of(&[
        r"\blast\b",
        r"\blatest\b",
        r"\bmost\s+recent\b",
        r"\bcurrent\b",
        r"\breigning\b",
        r"\bdefending\b",
    ])
});

static TREND: LazyLock<Option<Regex>> = LazyLock::new(|| {
    any_of(&[
        r"\btrend(?:s|ing)?\b",
        r"\bgrowth\s+rate\b",
        r"\bmarket\s+size\b",
        r"\bregulation\s+changes?\b",
        r"\bemerging\b",
        r"\bviewership\b",
        r"\bpopularity\b",
        r"\bstatistics?\b",
        r"\banalysis\b",
        r"\bimpact\b",
        r"\bhistory\s+of\b",
        r"\bevolution\s+of\b",
    ])
});

static PRESENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    any_of(&[
        r"\bcurrent\b",
        r"\brecent\b",
        r"\blatest\b",
        r"\btoday\b",
        r"\bnow\b",
        r"\bthis\s+year\b",
    ])
});

static ELECTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    any_of(&[
        r"\belection\b",
        r"\bpresidential\b",
        r"\bprime\s+minister\b",
        r"\bvot(?:e|ing|ed)\b",
    ])
});

static JURISDICTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    any_of(&[
        r"\bu\.s\.",
        r"\bu\.k\.",
        r"\bus\b",
        r"\bunited\s+states\b",
        r"\bamerican\b",
        r"\buk\b",
        r"\bbritish\b",
        r"\bindian?\b",
        r"\bfrench\b",
        r"\bfrance\b",
        r"\bgerman(?:y)?\b",
        r"\bbrazil(?:ian)?\b",
        r"\bcanad(?:a|ian)\b",
        r"\baustrali(?:a|an)\b",
        r"\bmexic(?:o|an)\b",
        r"\bnigerian?\b",
        r"\bjapan(?:ese)?\b",
        r"\bsouth\s+korean?\b",
        r"\bcongressional\b",
        r"\bparliamentary\b",
        r"\bmidterm\b",
        r"\bstate\b",
        r"\bfederal\b",
    ])
});

pub(crate) static YEAR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").ok());

/// Recurring events, most specific first.
const EVENTS: &[(&str, &str)] = &[
    (r"\bfifa\s+world\s+cup\b", "FIFA World Cup"),
    (r"\bcricket\s+world\s+cup\b", "Cricket World Cup"),
    (r"\bt20\s+world\s+cup\b", "T20 World Cup"),
    (r"\bworld\s+cup\b", "World Cup"),
    (r"\bchampions\s+league\b", "Champions League"),
    (r"\beuropean\s+championship\b", "European Championship"),
    (r"\beuros?\s+\d{4}\b", "European Championship"),
    (r"\bcopa\s+america\b", "Copa America"),
    (r"\bpremier\s+league\b", "Premier League"),
    (r"\bla\s+liga\b", "La Liga"),
    (r"\bbundesliga\b", "Bundesliga"),
    (r"\bserie\s+a\b", "Serie A"),
    (r"\bwinter\s+olympics\b", "Winter Olympics"),
    (r"\bsummer\s+olympics\b", "Summer Olympics"),
    (r"\bparalympic(?:s|games)?\b", "Paralympics"),
    (r"\bolympic(?:s|games)?\b", "Olympics"),
    (r"\bsuper\s+bowl\b", "Super Bowl"),
    (r"\bnba\s+finals?\b", "NBA Finals"),
    (r"\bnba\s+championship\b", "NBA Championship"),
    (r"\bworld\s+series\b", "World Series"),
    (r"\bstanley\s+cup\b", "Stanley Cup"),
    (r"\bmarch\s+madness\b", "March Madness"),
    (r"\bwimbledon\b", "Wimbledon"),
    (r"\bus\s+open\b", "US Open"),
    (r"\bfrench\s+open\b", "French Open"),
    (r"\baustralian\s+open\b", "Australian Open"),
    (r"\brolland?\s+garros\b", "French Open"),
    (r"\bgrand\s+slam\b", "Grand Slam"),
    (r"\bgrand\s+prix\b", "Grand Prix"),
    (r"\bformula\s+(?:1|one)\b", "Formula 1"),
    (r"\bf1\s+championship\b", "Formula 1"),
    (r"\bindy\s*500\b", "Indy 500"),
    (r"\ble\s+mans\b", "Le Mans"),
    (r"\bipl\b", "IPL"),
    (r"\bashes\b", "The Ashes"),
    (r"\bnobel\b", "Nobel Prize"),
    (r"\boscars?\b", "Oscars"),
    (r"\bacademy\s+awards?\b", "Academy Awards"),
    (r"\bgolden\s+globes?\b", "Golden Globes"),
    (r"\bgrammy(?:s|\s+awards?)?\b", "Grammy Awards"),
    (r"\bemmy(?:s|\s+awards?)?\b", "Emmy Awards"),
    (r"\bballon\s+d.?or\b", "Ballon d'Or"),
    (r"\bpulitzer\b", "Pulitzer Prize"),
    (r"\bbooker\s+prize\b", "Booker Prize"),
    (r"\bfields\s+medal\b", "Fields Medal"),
    (r"\bturing\s+award\b", "Turing Award"),
    (r"\bpresidential\s+election\b", "Presidential Election"),
    (r"\bgeneral\s+election\b", "General Election"),
    (r"\belection\b", "Election"),
    (r"\bprime\s+minister\b", "Election"),
    (r"\bchampionship\b", "Championship"),
];

static EVENT_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    EVENTS
        .iter()
        .filter_map(|(pattern, name)| compile(pattern).map(|re| (re, *name)))
        .collect()
});

/// Classify `query`. Trend questions win over winner questions.
pub fn detect(query: &str) -> QueryIntent {
    let query = query.trim();
    if matches(&TREND, query) && (matches(&PRESENT, query) || matches(&RECENCY, query)) {
        return QueryIntent::TrendAnalysis;
    }
    if matches(&WINNER, query) {
        return QueryIntent::FactualEventWinner;
    }
    QueryIntent::Other
}

/// Canonical name of the first recurring event mentioned in `query`.
pub fn event_name(query: &str) -> Option<&'static str> {
    EVENT_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(query))
        .map(|(_, name)| *name)
}

/// First four-digit year in `text`.
pub fn event_year(text: &str) -> Option<i32> {
    years(text).next()
}

pub(crate) fn years(text: &str) -> impl Iterator<Item = i32> + '_ {
    YEAR.as_ref()
        .into_iter()
        .flat_map(move |re| re.captures_iter(text))
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse().ok()))
}

pub fn has_recency_modifier(query: &str) -> bool {
    matches(&RECENCY, query)
}

pub fn is_election_query(query: &str) -> bool {
    matches(&ELECTION, query)
}

/// The first country or level-of-government hint in `query`.
pub fn jurisdiction(query: &str) -> Option<String> {
    JURISDICTION
        .as_ref()
        .and_then(|re| re.find(query))
        .map(|m| m.as_str().to_string())
}

/// Rewrite a "who won the latest X" query toward the most recent completed result.
///
/// Only factual winner queries with a recency modifier, no explicit year and
/// a recognized event are rewritten.
pub fn reformulate(query: &str, intent: QueryIntent) -> Option<String> {
    if !intent.is_factual_event() || event_year(query).is_some() || !has_recency_modifier(query) {
        return None;
    }
    let event = event_name(query)?;
    if is_election_query(query) {
        return Some(match jurisdiction(query) {
            Some(j) => format!("most recent completed {j} {event} winner result"),
            None => format!("most recent completed {event} winner result"),
        });
    }
    Some(format!("{event} most recent winner result completed"))
}

/// Search query steering the next iteration toward a completed result.
pub fn refinement_query(query: &str) -> String {
    let event = event_name(query);
    if is_election_query(query) {
        return match (jurisdiction(query), event) {
            (Some(j), Some(e)) => format!("most recent completed {j} {e} winner result"),
            (None, Some(e)) => format!("most recent completed {e} winner result"),
            _ => "most recent completed election winner result".into(),
        };
    }
    match event {
        Some(e) => format!("{e} most recent completed winner final result"),
        None => "most recent completed event winner result".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_winner_queries() {
        assert_eq!(detect("Who won the last FIFA World Cup?"), QueryIntent::FactualEventWinner);
        assert_eq!(detect("2022 Wimbledon champion"), QueryIntent::FactualEventWinner);
        // A winner signal alone still counts.
        assert_eq!(detect("who won?"), QueryIntent::FactualEventWinner);
    }

    #[test]
    fn test_trend_takes_priority() {
        assert_eq!(
            detect("latest trends in FIFA World Cup viewership"),
            QueryIntent::TrendAnalysis
        );
        assert_eq!(detect("history of rooftop solar"), QueryIntent::Other);
        assert_eq!(detect("rooftop solar economics"), QueryIntent::Other);
    }

    #[test]
    fn test_event_name_is_word_bounded() {
        assert_eq!(event_name("who won the FIFA World Cup"), Some("FIFA World Cup"));
        assert_eq!(event_name("best open source databases"), None);
        assert_eq!(event_name("US Open 2023 results"), Some("US Open"));
    }

    #[test]
    fn test_event_year() {
        assert_eq!(event_year("Who won the 2018 World Cup"), Some(2018));
        assert_eq!(event_year("who won the last world cup"), None);
    }

    #[test]
    fn test_reformulate_only_with_recency_and_no_year() {
        let q = "Who won the last FIFA World Cup?";
        assert_eq!(
            reformulate(q, detect(q)).as_deref(),
            Some("FIFA World Cup most recent winner result completed")
        );
        let dated = "Who won the 2018 FIFA World Cup?";
        assert_eq!(reformulate(dated, detect(dated)), None);
        let plain = "Who won the FIFA World Cup?";
        assert_eq!(reformulate(plain, detect(plain)), None);
        assert_eq!(reformulate(q, QueryIntent::Other), None);
    }

    #[test]
    fn test_election_reformulation_keeps_jurisdiction() {
        let q = "who won the latest US presidential election";
        assert_eq!(
            reformulate(q, detect(q)).as_deref(),
            Some("most recent completed US Presidential Election winner result")
        );
        assert_eq!(
            refinement_query("who won the election"),
            "most recent completed Election winner result"
        );
        assert_eq!(
            refinement_query("who won"),
            "most recent completed event winner result"
        );
    }
}
