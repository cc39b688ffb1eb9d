//! Append-only research memory.
//!
//! Sources are deduplicated by normalized URL with first-seen wins. Insights,
//! statistics, and contradictions are appended unconditionally, so each
//! iteration's evidence is a superset of the previous one. Every merge writes
//! exactly one [`MergeNote`] to the change log.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::research::trace::{ResearchTraceEntry, TraceLog, TraceOrderError};
use crate::types::{Contradiction, Insight, Plan, Source, Statistic};

const TRACKING_PREFIXES: &[&str] = &["utm_", "fbclid", "gclid"];

/// Canonical form of a URL used as the source dedup key.
///
/// Lowercases scheme and host, strips a leading `www.`, drops the fragment,
/// default port, tracking parameters, and trailing slash, and sorts the
/// remaining query pairs. Unparseable input falls back to trimmed lowercase.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = url::Url::parse(trimmed) else {
        return trimmed.to_lowercase();
    };
    let Some(host) = parsed.host_str() else {
        return trimmed.to_lowercase();
    };

    let host = host.strip_prefix("www.").unwrap_or(host);
    let mut out = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        out.push_str(&format!(":{port}"));
    }
    let path = parsed.path().trim_end_matches('/');
    out.push_str(path);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PREFIXES.iter().any(|p| k.starts_with(p)))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if !pairs.is_empty() {
        let query = pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        out.push('?');
        out.push_str(&query);
    }
    out
}

/// An aspect a collaborator reported as missing for a subtopic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedGap {
    pub iteration: u32,
    pub subtopic: String,
    pub aspect: String,
}

/// Everything one iteration contributes to memory.
#[derive(Debug, Clone, Default)]
pub struct EvidenceBatch {
    pub sources: Vec<Source>,
    pub insights: Vec<Insight>,
    pub statistics: Vec<Statistic>,
    pub contradictions: Vec<Contradiction>,
    pub gaps: Vec<ReportedGap>,
    /// Items rejected before reaching memory, with the reason.
    pub dropped: Vec<String>,
}

/// Audit note written by each merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeNote {
    pub iteration: u32,
    pub sources_offered: usize,
    pub sources_added: usize,
    pub duplicates_absorbed: usize,
    pub insights_added: usize,
    pub statistics_added: usize,
    pub contradictions_added: usize,
    pub dropped: Vec<String>,
    /// Normalized URLs of the sources this merge added.
    pub added_urls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResearchMemory {
    sources: Vec<Source>,
    by_url: HashMap<String, usize>,
    insights: Vec<Insight>,
    statistics: Vec<Statistic>,
    contradictions: Vec<Contradiction>,
    gaps: Vec<ReportedGap>,
    change_log: Vec<MergeNote>,
    trace: TraceLog,
}

impl ResearchMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one iteration's evidence and return the audit note it produced.
    pub fn merge(&mut self, iteration: u32, batch: EvidenceBatch) -> MergeNote {
        let mut note = MergeNote {
            iteration,
            sources_offered: batch.sources.len(),
            insights_added: batch.insights.len(),
            statistics_added: batch.statistics.len(),
            contradictions_added: batch.contradictions.len(),
            dropped: batch.dropped,
            ..MergeNote::default()
        };

        for mut source in batch.sources {
            let key = normalize_url(&source.url);
            if self.by_url.contains_key(&key) {
                note.duplicates_absorbed += 1;
                continue;
            }
            source.url = key.clone();
            self.by_url.insert(key.clone(), self.sources.len());
            self.sources.push(source);
            note.added_urls.push(key);
            note.sources_added += 1;
        }

        self.insights
            .extend(batch.insights.into_iter().map(|mut insight| {
                insight.supporting_sources = insight
                    .supporting_sources
                    .iter()
                    .map(|u| normalize_url(u))
                    .collect();
                insight
            }));
        self.statistics
            .extend(batch.statistics.into_iter().map(|mut stat| {
                stat.source_url = normalize_url(&stat.source_url);
                stat
            }));
        self.contradictions
            .extend(batch.contradictions.into_iter().map(|mut c| {
                c.source_a = normalize_url(&c.source_a);
                c.source_b = normalize_url(&c.source_b);
                c
            }));
        self.gaps.extend(batch.gaps);

        debug!(
            iteration,
            sources_added = note.sources_added,
            duplicates = note.duplicates_absorbed,
            insights = note.insights_added,
            dropped = note.dropped.len(),
            "Merged evidence into memory"
        );
        self.change_log.push(note.clone());
        note
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn source(&self, url: &str) -> Option<&Source> {
        self.by_url
            .get(&normalize_url(url))
            .and_then(|&i| self.sources.get(i))
    }

    pub fn insights(&self) -> &[Insight] {
        &self.insights
    }

    pub fn statistics(&self) -> &[Statistic] {
        &self.statistics
    }

    pub fn contradictions(&self) -> &[Contradiction] {
        &self.contradictions
    }

    pub fn gaps(&self) -> &[ReportedGap] {
        &self.gaps
    }

    pub fn insights_for<'a>(&'a self, subtopic: &'a str) -> impl Iterator<Item = &'a Insight> {
        self.insights.iter().filter(move |i| i.subtopic == subtopic)
    }

    pub fn statistics_for<'a>(
        &'a self,
        subtopic: &'a str,
    ) -> impl Iterator<Item = &'a Statistic> {
        self.statistics.iter().filter(move |s| s.subtopic == subtopic)
    }

    pub fn contradictions_for<'a>(
        &'a self,
        subtopic: &'a str,
    ) -> impl Iterator<Item = &'a Contradiction> {
        self.contradictions
            .iter()
            .filter(move |c| c.subtopic == subtopic)
    }

    /// Sources cited by the subtopic's insights or retrieved for it, in store order.
    pub fn sources_by_subtopic(&self, subtopic: &str) -> Vec<&Source> {
        let cited: BTreeSet<&str> = self
            .insights_for(subtopic)
            .flat_map(|i| i.supporting_sources.iter().map(String::as_str))
            .collect();
        self.sources
            .iter()
            .filter(|s| {
                cited.contains(s.url.as_str()) || s.retrieved_for.as_deref() == Some(subtopic)
            })
            .collect()
    }

    /// Which plan subtopics have at least one insight.
    pub fn coverage_map(&self, plan: &Plan) -> BTreeMap<String, bool> {
        plan.subtopics
            .iter()
            .map(|s| (s.name.clone(), self.insights_for(&s.name).next().is_some()))
            .collect()
    }

    /// Fraction of plan subtopics with at least one insight.
    pub fn coverage_fraction(&self, plan: &Plan) -> f64 {
        if plan.is_empty() {
            return 0.0;
        }
        let map = self.coverage_map(plan);
        map.values().filter(|&&covered| covered).count() as f64 / map.len() as f64
    }

    /// Every stored source URL, sorted.
    pub fn references(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.sources.iter().map(|s| s.url.as_str()).collect();
        set.into_iter().map(String::from).collect()
    }

    pub fn change_log(&self) -> &[MergeNote] {
        &self.change_log
    }

    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    pub fn append_trace(&mut self, entry: ResearchTraceEntry) -> Result<(), TraceOrderError> {
        self.trace.append(entry)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{insight, source};
    use super::*;
    use crate::types::{DomainType, Subtopic};

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("HTTPS://www.Example.com/Path/?b=2&a=1&utm_source=x#frag"),
            "https://example.com/Path?a=1&b=2"
        );
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
        assert_eq!(
            normalize_url("http://example.com:8080/x"),
            "http://example.com:8080/x"
        );
        assert_eq!(normalize_url("http://example.com:80/x"), "http://example.com/x");
        assert_eq!(normalize_url("  Not A URL "), "not a url");
    }

    #[test]
    fn test_merge_dedups_sources_first_seen_wins() {
        let mut memory = ResearchMemory::new();
        let mut first = source("https://example.com/a", DomainType::Edu);
        first.title = "original".into();
        let mut dup = source("https://www.example.com/a/", DomainType::Blog);
        dup.title = "later".into();

        let note = memory.merge(
            1,
            EvidenceBatch {
                sources: vec![first, dup],
                ..Default::default()
            },
        );
        assert_eq!(note.sources_added, 1);
        assert_eq!(note.duplicates_absorbed, 1);
        assert_eq!(memory.sources().len(), 1);
        assert_eq!(memory.sources()[0].title, "original");
        assert_eq!(memory.sources()[0].domain_type, DomainType::Edu);
    }

    #[test]
    fn test_evidence_is_append_only() {
        let mut memory = ResearchMemory::new();
        let ins = insight("costs", "Costs fell", &["https://a.edu/x"]);
        memory.merge(
            1,
            EvidenceBatch {
                insights: vec![ins.clone()],
                ..Default::default()
            },
        );
        memory.merge(
            2,
            EvidenceBatch {
                insights: vec![ins],
                ..Default::default()
            },
        );
        assert_eq!(memory.insights().len(), 2);
        assert_eq!(memory.change_log().len(), 2);
        assert_eq!(memory.change_log()[1].iteration, 2);
    }

    #[test]
    fn test_every_merge_writes_one_note() {
        let mut memory = ResearchMemory::new();
        memory.merge(1, EvidenceBatch::default());
        assert_eq!(memory.change_log().len(), 1);
        assert_eq!(memory.change_log()[0], MergeNote {
            iteration: 1,
            ..MergeNote::default()
        });
    }

    #[test]
    fn test_insight_urls_are_normalized() {
        let mut memory = ResearchMemory::new();
        memory.merge(
            1,
            EvidenceBatch {
                sources: vec![source("https://a.edu/x", DomainType::Edu)],
                insights: vec![insight("costs", "c", &["https://WWW.a.edu/x/"])],
                ..Default::default()
            },
        );
        let found = memory.sources_by_subtopic("costs");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://a.edu/x");
    }

    #[test]
    fn test_sources_by_subtopic_includes_retrieved_for() {
        let mut memory = ResearchMemory::new();
        let mut s = source("https://b.gov/y", DomainType::Gov);
        s.retrieved_for = Some("policy".into());
        memory.merge(
            1,
            EvidenceBatch {
                sources: vec![s],
                ..Default::default()
            },
        );
        assert_eq!(memory.sources_by_subtopic("policy").len(), 1);
        assert!(memory.sources_by_subtopic("costs").is_empty());
    }

    #[test]
    fn test_coverage_map() {
        let mut memory = ResearchMemory::new();
        memory.merge(
            1,
            EvidenceBatch {
                insights: vec![insight("a", "x", &[])],
                ..Default::default()
            },
        );
        let plan = Plan {
            objective: "o".into(),
            subtopics: vec![Subtopic::new("a"), Subtopic::new("b")],
        };
        let map = memory.coverage_map(&plan);
        assert_eq!(map.get("a"), Some(&true));
        assert_eq!(map.get("b"), Some(&false));
        assert!((memory.coverage_fraction(&plan) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_references_sorted_and_unique() {
        let mut memory = ResearchMemory::new();
        memory.merge(
            1,
            EvidenceBatch {
                sources: vec![
                    source("https://z.com/1", DomainType::News),
                    source("https://a.com/1", DomainType::News),
                    source("https://a.com/1#x", DomainType::News),
                ],
                ..Default::default()
            },
        );
        assert_eq!(
            memory.references(),
            vec!["https://a.com/1".to_string(), "https://z.com/1".to_string()]
        );
    }
}
