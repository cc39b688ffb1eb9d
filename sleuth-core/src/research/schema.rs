//! Strict parse boundary for collaborator payloads.
//!
//! Each item is validated on its own. A malformed item becomes a
//! [`ParseError`] and is dropped; its valid siblings are kept.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::ParseError;
use crate::research::bias;
use crate::research::report::ComposedReport;
use crate::types::{
    Contradiction, DomainType, Insight, Plan, Priority, StatValue, Statistic, Source, Subtopic,
};

/// Items parsed from one payload plus the rejects.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub items: Vec<T>,
    pub rejected: Vec<ParseError>,
}

impl<T> Default for Parsed<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// Everything parsed from one analysis payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAnalysis {
    pub insights: Vec<Insight>,
    pub statistics: Vec<Statistic>,
    pub contradictions: Vec<Contradiction>,
    pub gaps: Vec<String>,
    pub rejected: Vec<ParseError>,
}

fn unit_interval(item: &str, field: &str, value: f64) -> Result<f64, ParseError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ParseError::new(item, format!("{field} {value} is outside [0, 1]")))
    }
}

fn non_blank(item: &str, field: &str, value: String) -> Result<String, ParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ParseError::new(item, format!("{field} is empty")))
    } else {
        Ok(trimmed.to_string())
    }
}

/// A list payload, either a bare array or an object holding `key`.
fn list<'a>(payload: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    match payload {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get(key).and_then(Value::as_array),
        _ => None,
    }
}

fn typed<T: for<'de> Deserialize<'de>>(item: &str, value: &Value) -> Result<T, ParseError> {
    T::deserialize(value).map_err(|e| ParseError::new(item, e.to_string()))
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSubtopic {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        priority: Option<u8>,
        #[serde(default)]
        key_questions: Vec<String>,
        #[serde(default)]
        metrics_required: Vec<String>,
        #[serde(default)]
        anchors_objective: bool,
    },
}

/// Parse a planner payload into a plan. Falls back to `query` as the objective.
pub fn parse_plan(payload: &Value, query: &str) -> Result<(Plan, Vec<ParseError>), ParseError> {
    let Some(raw_subtopics) = list(payload, "subtopics") else {
        return Err(ParseError::new("plan", "expected a list of subtopics"));
    };
    let objective = payload
        .get("objective")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(query)
        .to_string();

    let mut subtopics = Vec::new();
    let mut rejected = Vec::new();
    for (i, value) in raw_subtopics.iter().enumerate() {
        let item = format!("subtopics[{i}]");
        let parsed = typed::<RawSubtopic>(&item, value).and_then(|raw| match raw {
            RawSubtopic::Name(name) => Ok(Subtopic::new(non_blank(&item, "name", name)?)),
            RawSubtopic::Full {
                name,
                priority,
                key_questions,
                metrics_required,
                anchors_objective,
            } => {
                let priority = match priority {
                    Some(p) => Priority::try_from(p).map_err(|e| ParseError::new(&item, e))?,
                    None => Priority::default(),
                };
                let mut subtopic = Subtopic::new(non_blank(&item, "name", name)?)
                    .with_priority(priority)
                    .with_key_questions(key_questions)
                    .with_metrics(metrics_required);
                subtopic.anchors_objective = anchors_objective;
                Ok(subtopic)
            }
        });
        match parsed {
            Ok(subtopic) => subtopics.push(subtopic),
            Err(e) => rejected.push(e),
        }
    }

    if subtopics.is_empty() {
        return Err(ParseError::new("plan", "no valid subtopics"));
    }
    Ok((
        Plan {
            objective,
            subtopics,
        },
        rejected,
    ))
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawSource {
    url: String,
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    domain_type: Option<DomainType>,
    #[serde(default)]
    author_present: bool,
    #[serde(default)]
    opinion_score: Option<f64>,
    #[serde(default)]
    citations: Vec<String>,
}

/// Domain type from a URL's top-level domain.
pub fn infer_domain_type(url: &url::Url) -> DomainType {
    let host = url.host_str().unwrap_or_default();
    if host.ends_with(".edu") || host.contains(".ac.") {
        DomainType::Edu
    } else if host.ends_with(".gov") || host.contains(".gov.") {
        DomainType::Gov
    } else {
        DomainType::Other
    }
}

fn source_from(item: &str, raw: RawSource, subtopic: &str) -> Result<Source, ParseError> {
    let url = non_blank(item, "url", raw.url)?;
    let parsed = url::Url::parse(&url).map_err(|e| ParseError::new(item, format!("url: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ParseError::new(
            item,
            format!("url scheme '{}' is not http(s)", parsed.scheme()),
        ));
    }
    let opinion_score = match raw.opinion_score {
        Some(score) => unit_interval(item, "opinion_score", score)?,
        None => bias::opinion_score(
            &format!("{} {}", raw.title, raw.summary),
            raw.author_present || !raw.citations.is_empty(),
        ),
    };
    let publication_date = raw
        .publication_date
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    Ok(Source {
        domain_type: raw.domain_type.unwrap_or_else(|| infer_domain_type(&parsed)),
        url,
        title: raw.title.trim().to_string(),
        summary: raw.summary,
        publication_date,
        author_present: raw.author_present,
        opinion_score,
        retrieved_for: Some(subtopic.to_string()),
    })
}

/// Parse a retrieval payload, tagging each source with the subtopic it was retrieved for.
pub fn parse_sources(payload: &Value, subtopic: &str) -> Parsed<Source> {
    let Some(values) = list(payload, "sources") else {
        return Parsed {
            items: Vec::new(),
            rejected: vec![ParseError::new(
                format!("{subtopic}/sources"),
                "expected a list of sources",
            )],
        };
    };

    let mut out = Parsed::default();
    for (i, value) in values.iter().enumerate() {
        let item = format!("{subtopic}/sources[{i}]");
        match typed::<RawSource>(&item, value).and_then(|raw| source_from(&item, raw, subtopic)) {
            Ok(source) => out.items.push(source),
            Err(e) => out.rejected.push(e),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawInsight {
    statement: String,
    #[serde(default = "default_insight_confidence")]
    confidence: f64,
    #[serde(default)]
    supporting_sources: BTreeSet<String>,
}

fn default_insight_confidence() -> f64 {
    0.5
}

#[derive(Deserialize)]
struct RawStatistic {
    value: StatValue,
    #[serde(default)]
    context: String,
    source_url: String,
}

#[derive(Deserialize)]
struct RawContradiction {
    claim_a: String,
    source_a: String,
    claim_b: String,
    source_b: String,
    severity: f64,
    #[serde(default)]
    resolved: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawGap {
    Text(String),
    Aspect { aspect: String },
}

fn each<'a>(payload: &'a Value, key: &str) -> impl Iterator<Item = (usize, &'a Value)> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
}

/// Parse an analysis payload for `subtopic`. Every item is attributed to it.
pub fn parse_analysis(payload: &Value, subtopic: &str) -> ParsedAnalysis {
    let mut out = ParsedAnalysis::default();
    if !payload.is_object() {
        out.rejected.push(ParseError::new(
            format!("{subtopic}/analysis"),
            "expected an object",
        ));
        return out;
    }
    for key in ["insights", "statistics", "contradictions", "gaps"] {
        if let Some(value) = payload.get(key)
            && !value.is_array()
        {
            out.rejected.push(ParseError::new(
                format!("{subtopic}/{key}"),
                "expected a list",
            ));
        }
    }

    for (i, value) in each(payload, "insights") {
        let item = format!("{subtopic}/insights[{i}]");
        let parsed = typed::<RawInsight>(&item, value).and_then(|raw| {
            Ok(Insight {
                subtopic: subtopic.to_string(),
                statement: non_blank(&item, "statement", raw.statement)?,
                confidence: unit_interval(&item, "confidence", raw.confidence)?,
                supporting_sources: raw
                    .supporting_sources
                    .into_iter()
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty())
                    .collect(),
            })
        });
        match parsed {
            Ok(insight) => out.insights.push(insight),
            Err(e) => out.rejected.push(e),
        }
    }

    for (i, value) in each(payload, "statistics") {
        let item = format!("{subtopic}/statistics[{i}]");
        let parsed = typed::<RawStatistic>(&item, value).and_then(|raw| {
            if let StatValue::Number(n) = raw.value
                && !n.is_finite()
            {
                return Err(ParseError::new(&item, "value is not finite"));
            }
            Ok(Statistic {
                subtopic: subtopic.to_string(),
                value: raw.value,
                context: raw.context.trim().to_string(),
                source_url: non_blank(&item, "source_url", raw.source_url)?,
            })
        });
        match parsed {
            Ok(stat) => out.statistics.push(stat),
            Err(e) => out.rejected.push(e),
        }
    }

    for (i, value) in each(payload, "contradictions") {
        let item = format!("{subtopic}/contradictions[{i}]");
        let parsed = typed::<RawContradiction>(&item, value).and_then(|raw| {
            Ok(Contradiction {
                subtopic: subtopic.to_string(),
                claim_a: non_blank(&item, "claim_a", raw.claim_a)?,
                source_a: non_blank(&item, "source_a", raw.source_a)?,
                claim_b: non_blank(&item, "claim_b", raw.claim_b)?,
                source_b: non_blank(&item, "source_b", raw.source_b)?,
                severity: unit_interval(&item, "severity", raw.severity)?,
                resolved: raw.resolved,
            })
        });
        match parsed {
            Ok(c) => out.contradictions.push(c),
            Err(e) => out.rejected.push(e),
        }
    }

    for (i, value) in each(payload, "gaps") {
        let item = format!("{subtopic}/gaps[{i}]");
        let parsed = typed::<RawGap>(&item, value).and_then(|raw| {
            let text = match raw {
                RawGap::Text(t) => t,
                RawGap::Aspect { aspect } => aspect,
            };
            non_blank(&item, "aspect", text)
        });
        match parsed {
            Ok(gap) => out.gaps.push(gap),
            Err(e) => out.rejected.push(e),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Parse the composer's narrative. A blank executive summary is rejected.
pub fn parse_composed_report(payload: &Value) -> Result<ComposedReport, ParseError> {
    let report: ComposedReport = typed("report", payload)?;
    if report.executive_summary.trim().is_empty() {
        return Err(ParseError::new("report", "executive_summary is empty"));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_plan_mixed_forms() {
        let payload = json!({
            "objective": "Understand rooftop solar",
            "subtopics": [
                "costs",
                {"name": "policy", "priority": 1, "key_questions": ["Which incentives exist?"]},
                {"name": "  "},
                {"name": "grid", "priority": 7},
                42
            ]
        });
        let (plan, rejected) = parse_plan(&payload, "solar").unwrap();
        assert_eq!(plan.objective, "Understand rooftop solar");
        assert_eq!(plan.names(), vec!["costs", "policy"]);
        assert_eq!(plan.subtopics[1].priority, Priority::HIGH);
        assert_eq!(rejected.len(), 3);
        assert_eq!(rejected[0].item, "subtopics[2]");
    }

    #[test]
    fn test_parse_plan_requires_a_subtopic() {
        assert!(parse_plan(&json!({"subtopics": []}), "q").is_err());
        assert!(parse_plan(&json!("just text"), "q").is_err());
        let (plan, _) = parse_plan(&json!(["a topic"]), "the query").unwrap();
        assert_eq!(plan.objective, "the query");
    }

    #[test]
    fn test_parse_sources_keeps_valid_siblings() {
        let payload = json!({"sources": [
            {"url": "https://energy.gov/report", "title": "Report", "opinion_score": 0.1},
            {"url": "ftp://files.example.com/x", "title": "FTP"},
            {"url": "https://blog.example.com/p", "title": "Post", "domain_type": "blog",
             "summary": "Clearly the most amazing change", "publication_date": "2025-03-01"},
            {"title": "no url"},
            {"url": "https://x.com", "title": "Bad score", "opinion_score": 3.0}
        ]});
        let parsed = parse_sources(&payload, "costs");
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.rejected.len(), 3);
        assert_eq!(parsed.items[0].domain_type, DomainType::Gov);
        assert_eq!(parsed.items[0].retrieved_for.as_deref(), Some("costs"));
        assert_eq!(parsed.items[1].publication_year(), Some(2025));
        assert!(parsed.items[1].opinion_score > 0.0);
        assert!(parsed.rejected[0].reason.contains("scheme"));
    }

    #[test]
    fn test_empty_parse_needs_no_item_default() {
        let sources: Parsed<Source> = Parsed::default();
        let insights: Parsed<Insight> = Parsed::default();
        assert!(sources.items.is_empty() && sources.rejected.is_empty());
        assert!(insights.items.is_empty());

        let parsed = parse_sources(&json!([]), "costs");
        assert_eq!(parsed, Parsed::default());
    }

    #[test]
    fn test_parse_sources_non_list_payload() {
        let parsed = parse_sources(&json!({"results": 3}), "costs");
        assert!(parsed.items.is_empty());
        assert_eq!(parsed.rejected.len(), 1);
    }

    #[test]
    fn test_parse_analysis_items() {
        let payload = json!({
            "insights": [
                {"statement": "Costs fell 40%", "confidence": 0.8,
                 "supporting_sources": ["https://a.edu/1", " "]},
                {"statement": "", "confidence": 0.5},
                {"statement": "Overconfident", "confidence": 1.4}
            ],
            "statistics": [
                {"value": 40, "context": "percent drop", "source_url": "https://a.edu/1"},
                {"value": "42%", "context": "share", "source_url": "https://b.gov/1"},
                {"value": 1, "context": "no url"}
            ],
            "contradictions": [
                {"claim_a": "fell", "source_a": "https://a.edu/1", "claim_b": "rose",
                 "source_b": "https://b.gov/1", "severity": 0.4}
            ],
            "gaps": ["maintenance costs", {"aspect": "insurance"}, ""]
        });
        let parsed = parse_analysis(&payload, "costs");
        assert_eq!(parsed.insights.len(), 1);
        assert_eq!(parsed.insights[0].supporting_sources.len(), 1);
        assert_eq!(parsed.statistics.len(), 2);
        assert_eq!(parsed.statistics[1].value, StatValue::Text("42%".into()));
        assert_eq!(parsed.contradictions.len(), 1);
        assert!(!parsed.contradictions[0].resolved);
        assert_eq!(parsed.gaps, vec!["maintenance costs", "insurance"]);
        assert_eq!(parsed.rejected.len(), 4);
    }

    #[test]
    fn test_parse_analysis_wrong_shapes() {
        let parsed = parse_analysis(&json!([1, 2]), "costs");
        assert_eq!(parsed.rejected.len(), 1);

        let parsed = parse_analysis(&json!({"insights": "many"}), "costs");
        assert!(parsed.insights.is_empty());
        assert_eq!(parsed.rejected[0].item, "costs/insights");
    }

    #[test]
    fn test_parse_composed_report() {
        let report = parse_composed_report(&json!({
            "executive_summary": "Solar is cheaper.",
            "structured_sections": [{"heading": "Costs", "content": "Down."}],
            "recommendations": ["Install"]
        }))
        .unwrap();
        assert_eq!(report.structured_sections[0].supporting_sources.len(), 0);
        assert!(parse_composed_report(&json!({"executive_summary": " "})).is_err());
        assert!(parse_composed_report(&json!({"sections": []})).is_err());
    }
}
