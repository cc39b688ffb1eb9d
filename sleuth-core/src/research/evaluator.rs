//! Deterministic confidence scoring.
//!
//! Scores each plan subtopic on five components and combines them into a
//! global confidence with penalties for weak subtopics, contradictions, and
//! stale evidence. The evaluator is a pure function of memory, plan, and
//! context: no randomness, no clock, no hidden state.
//!
//! Factual winner queries score differently: the recency penalty is replaced
//! by a future-drift penalty, and a confidence floor keeps a resolved answer
//! from being buried by structural metrics.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::EvaluatorConfig;
use crate::presets::{
    ContradictionSensitivity, EvidenceStrictness, MAX_CONTRADICTION_PENALTY,
};
use crate::research::events;
use crate::research::intent::QueryIntent;
use crate::research::keywords::{canonical_name, containment, keywords};
use crate::research::memory::ResearchMemory;
use crate::research::strictness::{self, StrictnessResult};
use crate::research::temporal;
use crate::types::{Plan, Source, Subtopic};

pub const W_COVERAGE: f64 = 0.25;
pub const W_CREDIBILITY: f64 = 0.25;
pub const W_DIVERSITY: f64 = 0.15;
pub const W_EVIDENCE: f64 = 0.20;
pub const W_CONSISTENCY: f64 = 0.15;

/// Share of an item's keywords an insight must contain to cover it.
const COVERAGE_MATCH: f64 = 0.5;
const SINGLE_SOURCE_PENALTY: f64 = 0.1;
const RECENCY_FACTOR_OLD: f64 = 0.8;
const RECENCY_FACTOR_UNDATED: f64 = 0.9;

const RESOLVED_FLOOR: f64 = 0.85;
const UNRESOLVED_FLOOR: f64 = 0.55;
const FACTUAL_MINIMUM: f64 = 0.20;

pub const RECENCY_GAP: &str = "Recent data or updated statistics missing";

/// Inputs that parameterize one scoring call.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    pub evaluator: EvaluatorConfig,
    pub contradiction_sensitivity: ContradictionSensitivity,
    pub evidence_strictness: EvidenceStrictness,
    pub confidence_threshold: f64,
    pub prune_floor: f64,
    /// Fixed once per run so recency is reproducible.
    pub reference_year: i32,
    pub temporally_sensitive: bool,
    /// Iteration being scored. Gaps reported in this iteration become missing aspects.
    pub iteration: u32,
    pub query_intent: QueryIntent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComponent {
    Coverage,
    Credibility,
    Diversity,
    EvidenceStrength,
    Consistency,
}

impl fmt::Display for ScoreComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScoreComponent::Coverage => "coverage",
            ScoreComponent::Credibility => "credibility",
            ScoreComponent::Diversity => "diversity",
            ScoreComponent::EvidenceStrength => "evidence_strength",
            ScoreComponent::Consistency => "consistency",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtopicScore {
    pub coverage: f64,
    pub credibility: f64,
    pub diversity: f64,
    pub evidence_strength: f64,
    pub consistency: f64,
    pub confidence: f64,
}

impl SubtopicScore {
    fn from_components(
        coverage: f64,
        credibility: f64,
        diversity: f64,
        evidence_strength: f64,
        consistency: f64,
    ) -> Self {
        let confidence = coverage * W_COVERAGE
            + credibility * W_CREDIBILITY
            + diversity * W_DIVERSITY
            + evidence_strength * W_EVIDENCE
            + consistency * W_CONSISTENCY;
        Self {
            coverage: round4(coverage),
            credibility: round4(credibility),
            diversity: round4(diversity),
            evidence_strength: round4(evidence_strength),
            consistency: round4(consistency),
            confidence: round4(confidence.clamp(0.0, 1.0)),
        }
    }

    /// The weakest component. Ties resolve in declaration order.
    pub fn lowest_component(&self) -> (ScoreComponent, f64) {
        [
            (ScoreComponent::Coverage, self.coverage),
            (ScoreComponent::Credibility, self.credibility),
            (ScoreComponent::Diversity, self.diversity),
            (ScoreComponent::EvidenceStrength, self.evidence_strength),
            (ScoreComponent::Consistency, self.consistency),
        ]
        .into_iter()
        .fold((ScoreComponent::Coverage, f64::INFINITY), |best, cur| {
            if cur.1 < best.1 { cur } else { best }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtopicDiagnostic {
    pub lowest_component: ScoreComponent,
    pub lowest_value: f64,
    pub weak: bool,
    /// Key questions and required metrics with no mapped evidence.
    pub uncovered: Vec<String>,
}

/// A missing aspect reported for the current iteration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MissingAspect {
    pub subtopic: String,
    pub aspect: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub per_subtopic: BTreeMap<String, SubtopicDiagnostic>,
    /// Weak subtopics in plan order.
    pub weak_subtopics: Vec<String>,
    pub missing_aspects: Vec<MissingAspect>,
    /// Addressed, non-anchor subtopics scoring below the prune floor.
    pub prune_candidates: Vec<String>,
    /// Subtopics at or above the applied threshold.
    pub complete_subtopics: Vec<String>,
    pub weak_penalty: f64,
    pub contradiction_penalty: f64,
    pub recency_penalty: f64,
    /// Set when the sensitivity preset escalates on any counted contradiction.
    pub force_refinement: bool,
    /// Subtopics carrying a counted unresolved contradiction, in plan order.
    #[serde(default)]
    pub contested_subtopics: Vec<String>,
    #[serde(default)]
    pub future_drift_penalty: f64,
    /// Floor that lifted the global confidence, if one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_floor: Option<f64>,
    /// For factual winner queries: whether a completed result is in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factual_resolved: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub subtopic_scores: BTreeMap<String, SubtopicScore>,
    pub global_confidence: f64,
    pub diagnostics: Diagnostics,
    pub strictness: StrictnessResult,
}

impl Evaluation {
    pub fn confidences(&self) -> BTreeMap<String, f64> {
        self.subtopic_scores
            .iter()
            .map(|(k, v)| (k.clone(), v.confidence))
            .collect()
    }
}

/// Seam between the orchestrator and the scoring formula.
pub trait Scoring: Send + Sync {
    fn score(&self, memory: &ResearchMemory, plan: &Plan, ctx: &EvaluationContext) -> Evaluation;
}

/// The fixed weighted-component scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Scoring for Evaluator {
    fn score(&self, memory: &ResearchMemory, plan: &Plan, ctx: &EvaluationContext) -> Evaluation {
        let mut scores = BTreeMap::new();
        let mut diagnostics = Diagnostics::default();

        for subtopic in &plan.subtopics {
            let (score, uncovered) = score_subtopic(memory, subtopic, ctx);
            let (lowest_component, lowest_value) = score.lowest_component();
            let weak = score.confidence < ctx.evaluator.weak_threshold;
            if weak {
                diagnostics.weak_subtopics.push(subtopic.name.clone());
            }
            if score.confidence >= ctx.confidence_threshold {
                diagnostics.complete_subtopics.push(subtopic.name.clone());
            }
            if subtopic.times_addressed > 0
                && !subtopic.anchors_objective
                && score.confidence < ctx.prune_floor
            {
                diagnostics.prune_candidates.push(subtopic.name.clone());
            }
            diagnostics.per_subtopic.insert(
                subtopic.name.clone(),
                SubtopicDiagnostic {
                    lowest_component,
                    lowest_value,
                    weak,
                    uncovered,
                },
            );
            scores.insert(subtopic.name.clone(), score);
        }

        diagnostics.missing_aspects = missing_aspects(memory, ctx.iteration);

        let preset = ctx.contradiction_sensitivity.preset();
        let counted: Vec<_> = memory
            .contradictions()
            .iter()
            .filter(|c| !c.resolved && plan.contains(&c.subtopic))
            .filter(|c| c.severity >= preset.min_severity)
            .collect();
        diagnostics.contested_subtopics = plan
            .subtopics
            .iter()
            .filter(|s| counted.iter().any(|c| c.subtopic == s.name))
            .map(|s| s.name.clone())
            .collect();
        let counted = counted.len();
        diagnostics.contradiction_penalty =
            round4((counted as f64 * preset.penalty_per_contradiction).min(MAX_CONTRADICTION_PENALTY));
        diagnostics.force_refinement = preset.force_refinement && counted > 0;

        let weak_count = diagnostics.weak_subtopics.len() as f64;
        diagnostics.weak_penalty =
            round4((weak_count * ctx.evaluator.weak_penalty).min(ctx.evaluator.max_weak_penalty));

        let factual = ctx.query_intent.is_factual_event();
        if factual {
            diagnostics.future_drift_penalty = round4(events::future_drift_penalty(
                memory.insights(),
                ctx.reference_year,
            ));
            diagnostics.factual_resolved = Some(events::contains_completed_result(
                memory.insights(),
                ctx.reference_year,
            ));
        } else if ctx.temporally_sensitive {
            let dist = temporal::distribution(
                memory.sources(),
                ctx.reference_year,
                ctx.evaluator.recency_window_years,
            );
            diagnostics.recency_penalty = round4(temporal::recency_penalty(&dist));
        }
        if diagnostics.recency_penalty > 0.0 {
            if let Some(gap) = recency_gap(memory, plan, ctx) {
                let key = canonical_name(&gap.aspect);
                if !diagnostics
                    .missing_aspects
                    .iter()
                    .any(|m| canonical_name(&m.aspect) == key)
                {
                    diagnostics.missing_aspects.push(gap);
                }
            }
        }

        let base = if scores.is_empty() {
            0.0
        } else {
            scores.values().map(|s| s.confidence).sum::<f64>() / scores.len() as f64
        };
        let global = base
            - diagnostics.weak_penalty
            - diagnostics.contradiction_penalty
            - diagnostics.recency_penalty
            - diagnostics.future_drift_penalty;
        let mut global = round4(global.clamp(0.0, 1.0));

        if factual && !memory.insights().is_empty() {
            let resolved = diagnostics.factual_resolved == Some(true);
            let floor = factual_floor(memory, resolved, counted > 0);
            if global < floor {
                global = floor;
                diagnostics.confidence_floor = Some(floor);
            }
        }

        Evaluation {
            subtopic_scores: scores,
            global_confidence: global,
            diagnostics,
            strictness: strictness::check(memory, plan, ctx.evidence_strictness.preset()),
        }
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Minimum global confidence for a factual winner query with insights.
fn factual_floor(memory: &ResearchMemory, resolved: bool, contested: bool) -> f64 {
    let cited = memory
        .insights()
        .iter()
        .any(|i| !i.supporting_sources.is_empty());
    match (resolved, contested) {
        (true, false) if cited => RESOLVED_FLOOR,
        (true, false) => FACTUAL_MINIMUM,
        _ => UNRESOLVED_FLOOR,
    }
}

/// The recency gap, attributed to the plan subtopic holding the most stale
/// dated sources, or to the first subtopic when none is attributable.
fn recency_gap(
    memory: &ResearchMemory,
    plan: &Plan,
    ctx: &EvaluationContext,
) -> Option<MissingAspect> {
    let stale = |name: &str| {
        memory
            .sources_by_subtopic(name)
            .iter()
            .filter_map(|s| s.publication_year())
            .filter(|&y| ctx.reference_year - y > ctx.evaluator.recency_window_years)
            .count()
    };
    let first = plan.subtopics.first()?;
    let subtopic = plan
        .subtopics
        .iter()
        .enumerate()
        .map(|(i, s)| (stale(s.name.as_str()), Reverse(i), s))
        .filter(|(n, ..)| *n > 0)
        .max_by_key(|(n, i, _)| (*n, *i))
        .map_or(first, |(.., s)| s);
    Some(MissingAspect {
        subtopic: subtopic.name.clone(),
        aspect: RECENCY_GAP.to_string(),
    })
}

fn score_subtopic(
    memory: &ResearchMemory,
    subtopic: &Subtopic,
    ctx: &EvaluationContext,
) -> (SubtopicScore, Vec<String>) {
    let sources = memory.sources_by_subtopic(&subtopic.name);
    let (coverage, uncovered) = coverage(memory, subtopic);
    let score = SubtopicScore::from_components(
        coverage,
        credibility(&sources, ctx),
        diversity(memory, &subtopic.name, &sources, &ctx.evaluator),
        evidence_strength(memory, &subtopic.name),
        consistency(memory, &subtopic.name, ctx.contradiction_sensitivity),
    );
    (score, uncovered)
}

/// Insight-count curve used when a subtopic declares nothing to cover.
fn coverage_curve(insights: usize) -> f64 {
    match insights {
        0 => 0.1,
        1 | 2 => 0.5 + 0.1 * insights as f64,
        n => (0.8 + 0.05 * (n - 3) as f64).min(1.0),
    }
}

fn coverage(memory: &ResearchMemory, subtopic: &Subtopic) -> (f64, Vec<String>) {
    let statements: Vec<BTreeSet<String>> = memory
        .insights_for(&subtopic.name)
        .map(|i| keywords(&i.statement))
        .collect();
    let items = subtopic.key_questions.len() + subtopic.metrics_required.len();
    if items == 0 {
        return (coverage_curve(statements.len()), Vec::new());
    }

    let stat_contexts: Vec<BTreeSet<String>> = memory
        .statistics_for(&subtopic.name)
        .map(|s| keywords(&s.context))
        .collect();

    let matches = |item: &str, pool: &[&BTreeSet<String>]| -> bool {
        let kw = keywords(item);
        if kw.is_empty() {
            return !pool.is_empty();
        }
        pool.iter().any(|text| containment(&kw, text) >= COVERAGE_MATCH)
    };

    let insight_pool: Vec<&BTreeSet<String>> = statements.iter().collect();
    let metric_pool: Vec<&BTreeSet<String>> =
        statements.iter().chain(stat_contexts.iter()).collect();

    let mut uncovered = Vec::new();
    for question in &subtopic.key_questions {
        if !matches(question, &insight_pool) {
            uncovered.push(question.clone());
        }
    }
    for metric in &subtopic.metrics_required {
        if !matches(metric, &metric_pool) {
            uncovered.push(metric.clone());
        }
    }
    let covered = items - uncovered.len();
    (covered as f64 / items as f64, uncovered)
}

fn credibility(sources: &[&Source], ctx: &EvaluationContext) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    let total: f64 = sources
        .iter()
        .map(|s| {
            let recency = match s.publication_year() {
                Some(year) if ctx.reference_year - year > ctx.evaluator.recency_window_years => {
                    RECENCY_FACTOR_OLD
                }
                Some(_) => 1.0,
                None => RECENCY_FACTOR_UNDATED,
            };
            ctx.evaluator.domain_weights.weight(s.domain_type) * recency
        })
        .sum();
    (total / sources.len() as f64).clamp(0.0, 1.0)
}

fn diversity(
    memory: &ResearchMemory,
    subtopic: &str,
    sources: &[&Source],
    config: &EvaluatorConfig,
) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    let n = sources.len() as f64;
    let mut score = 1.0;

    let mut by_domain: BTreeMap<_, usize> = BTreeMap::new();
    for s in sources {
        *by_domain.entry(s.domain_type).or_default() += 1;
    }
    let max_share = by_domain.values().copied().max().unwrap_or(0) as f64 / n;
    if max_share > config.dominant_domain_fraction {
        score -= max_share - config.dominant_domain_fraction;
    }

    let opinionated = sources
        .iter()
        .filter(|s| s.opinion_score > config.opinion_threshold)
        .count() as f64
        / n;
    if opinionated > config.opinionated_fraction {
        score -= 0.5 * (opinionated - config.opinionated_fraction);
    }

    if memory
        .insights_for(subtopic)
        .any(|i| i.supporting_sources.len() == 1)
    {
        score -= SINGLE_SOURCE_PENALTY;
    }

    f64::clamp(score, 0.0, 1.0)
}

fn evidence_strength(memory: &ResearchMemory, subtopic: &str) -> f64 {
    let stat_sources: BTreeSet<&str> = memory
        .statistics_for(subtopic)
        .map(|s| s.source_url.as_str())
        .collect();
    let per_insight: Vec<f64> = memory
        .insights_for(subtopic)
        .map(|i| {
            let mut strength = 0.5;
            if i.supporting_sources.len() >= 2 {
                strength += 0.3;
            }
            if i
                .supporting_sources
                .iter()
                .any(|u| stat_sources.contains(u.as_str()))
            {
                strength += 0.2;
            }
            strength
        })
        .collect();
    if per_insight.is_empty() {
        return 0.0;
    }
    per_insight.iter().sum::<f64>() / per_insight.len() as f64
}

fn consistency(memory: &ResearchMemory, subtopic: &str, mode: ContradictionSensitivity) -> f64 {
    let preset = mode.preset();
    let severities: Vec<f64> = memory
        .contradictions_for(subtopic)
        .filter(|c| !c.resolved)
        .map(|c| c.severity.clamp(0.0, 1.0))
        .collect();
    if severities.is_empty() {
        return 1.0;
    }
    if let Some(floor) = preset.zero_consistency_floor {
        if severities.iter().any(|&s| s > floor) {
            return 0.0;
        }
    }
    let weighted: f64 = severities
        .iter()
        .map(|&s| {
            if s >= preset.min_severity {
                s
            } else {
                s * preset.minor_discount
            }
        })
        .sum::<f64>()
        / severities.len() as f64;
    (1.0 - weighted).clamp(0.0, 1.0)
}

/// Gaps reported in `iteration`, deduplicated by canonical aspect name.
fn missing_aspects(memory: &ResearchMemory, iteration: u32) -> Vec<MissingAspect> {
    let mut seen = BTreeSet::new();
    let mut out: Vec<MissingAspect> = memory
        .gaps()
        .iter()
        .filter(|g| g.iteration == iteration)
        .filter(|g| !g.aspect.trim().is_empty())
        .map(|g| MissingAspect {
            subtopic: g.subtopic.clone(),
            aspect: g.aspect.trim().to_string(),
        })
        .collect();
    out.sort();
    out.retain(|m| seen.insert(canonical_name(&m.aspect)));
    out
}

#[cfg(test)]
pub(crate) fn test_context() -> EvaluationContext {
    EvaluationContext {
        evaluator: EvaluatorConfig::default(),
        contradiction_sensitivity: ContradictionSensitivity::IgnoreMinor,
        evidence_strictness: EvidenceStrictness::Moderate,
        confidence_threshold: 0.75,
        prune_floor: 0.3,
        reference_year: 2026,
        temporally_sensitive: false,
        iteration: 1,
        query_intent: QueryIntent::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::memory::fixtures::{insight, source};
    use crate::research::memory::{EvidenceBatch, ReportedGap};
    use crate::types::{Contradiction, DomainType, StatValue, Statistic};
    use pretty_assertions::assert_eq;

    fn plan(subtopics: Vec<Subtopic>) -> Plan {
        Plan {
            objective: "objective".into(),
            subtopics,
        }
    }

    fn contradiction(subtopic: &str, severity: f64) -> Contradiction {
        Contradiction {
            subtopic: subtopic.into(),
            claim_a: "a".into(),
            source_a: "https://a.edu/1".into(),
            claim_b: "b".into(),
            source_b: "https://b.com/1".into(),
            severity,
            resolved: false,
        }
    }

    fn rich_memory() -> ResearchMemory {
        let mut memory = ResearchMemory::new();
        memory.merge(
            1,
            EvidenceBatch {
                sources: vec![
                    source("https://a.edu/1", DomainType::Edu),
                    source("https://b.gov/1", DomainType::Gov),
                    source("https://c.com/1", DomainType::News),
                ],
                insights: vec![
                    insight(
                        "costs",
                        "Installation cost fell 40% since 2020",
                        &["https://a.edu/1", "https://b.gov/1"],
                    ),
                    insight(
                        "costs",
                        "Maintenance cost remains stable",
                        &["https://b.gov/1", "https://c.com/1"],
                    ),
                ],
                statistics: vec![Statistic {
                    subtopic: "costs".into(),
                    value: StatValue::Text("40%".into()),
                    context: "installation cost decline".into(),
                    source_url: "https://a.edu/1".into(),
                }],
                ..Default::default()
            },
        );
        memory
    }

    #[test]
    fn test_empty_memory_scores_low_but_bounded() {
        let memory = ResearchMemory::new();
        let eval = Evaluator.score(&memory, &plan(vec![Subtopic::new("costs")]), &test_context());
        let score = eval.subtopic_scores["costs"];
        assert_eq!(score.coverage, 0.1);
        assert_eq!(score.credibility, 0.0);
        assert_eq!(score.consistency, 1.0);
        assert!((0.0..=1.0).contains(&eval.global_confidence));
        assert_eq!(eval.diagnostics.weak_subtopics, vec!["costs".to_string()]);
        assert_eq!(
            eval.diagnostics.per_subtopic["costs"].lowest_component,
            ScoreComponent::Credibility
        );
    }

    #[test]
    fn test_rich_subtopic_components() {
        let memory = rich_memory();
        let subtopic = Subtopic::new("costs")
            .with_key_questions(vec!["How much did installation cost fall?".into()])
            .with_metrics(vec!["maintenance cost".into()]);
        let eval = Evaluator.score(&memory, &plan(vec![subtopic]), &test_context());
        let score = eval.subtopic_scores["costs"];

        assert_eq!(score.coverage, 1.0);
        // (1.0 + 1.0 + 0.7) / 3, all dated 2024.
        assert_eq!(score.credibility, 0.9);
        // Three domains, one each; no single-source insights.
        assert_eq!(score.diversity, 1.0);
        // First insight has a statistic from a.edu, second does not.
        assert_eq!(score.evidence_strength, 0.9);
        assert_eq!(score.consistency, 1.0);
        let expected = 1.0 * W_COVERAGE
            + 0.9 * W_CREDIBILITY
            + 1.0 * W_DIVERSITY
            + 0.9 * W_EVIDENCE
            + 1.0 * W_CONSISTENCY;
        assert!((score.confidence - expected).abs() < 1e-4);
        assert!(eval.diagnostics.weak_subtopics.is_empty());
        assert_eq!(eval.diagnostics.complete_subtopics, vec!["costs".to_string()]);
    }

    #[test]
    fn test_uncovered_items_are_reported() {
        let memory = rich_memory();
        let subtopic = Subtopic::new("costs")
            .with_key_questions(vec!["What do permits require?".into()]);
        let eval = Evaluator.score(&memory, &plan(vec![subtopic]), &test_context());
        assert_eq!(eval.subtopic_scores["costs"].coverage, 0.0);
        assert_eq!(
            eval.diagnostics.per_subtopic["costs"].uncovered,
            vec!["What do permits require?".to_string()]
        );
    }

    #[test]
    fn test_dominant_domain_penalizes_diversity() {
        let mut memory = ResearchMemory::new();
        memory.merge(
            1,
            EvidenceBatch {
                sources: vec![
                    source("https://a.com/1", DomainType::Blog),
                    source("https://a.com/2", DomainType::Blog),
                    source("https://a.com/3", DomainType::Blog),
                    source("https://a.edu/4", DomainType::Edu),
                ],
                insights: vec![insight(
                    "x",
                    "s",
                    &["https://a.com/1", "https://a.com/2", "https://a.com/3", "https://a.edu/4"],
                )],
                ..Default::default()
            },
        );
        let eval = Evaluator.score(&memory, &plan(vec![Subtopic::new("x")]), &test_context());
        // 0.75 share against a 0.4 allowance.
        assert_eq!(eval.subtopic_scores["x"].diversity, 0.65);
    }

    #[test]
    fn test_contradiction_modes() {
        let mut memory = rich_memory();
        memory.merge(
            2,
            EvidenceBatch {
                contradictions: vec![contradiction("costs", 0.4)],
                ..Default::default()
            },
        );
        let p = plan(vec![Subtopic::new("costs")]);

        let mut ctx = test_context();
        let minor = Evaluator.score(&memory, &p, &ctx);
        assert_eq!(minor.subtopic_scores["costs"].consistency, 0.9);
        assert_eq!(minor.diagnostics.contradiction_penalty, 0.0);

        ctx.contradiction_sensitivity = ContradictionSensitivity::FlagAll;
        let all = Evaluator.score(&memory, &p, &ctx);
        assert_eq!(all.subtopic_scores["costs"].consistency, 0.6);
        assert_eq!(all.diagnostics.contradiction_penalty, 0.03);

        ctx.contradiction_sensitivity = ContradictionSensitivity::EscalateOnAny;
        let escalate = Evaluator.score(&memory, &p, &ctx);
        assert_eq!(escalate.subtopic_scores["costs"].consistency, 0.0);
        assert!(escalate.diagnostics.force_refinement);
        assert_eq!(escalate.diagnostics.contested_subtopics, vec!["costs".to_string()]);
        assert!(minor.diagnostics.contested_subtopics.is_empty());
    }

    #[test]
    fn test_contradiction_penalty_is_capped() {
        let mut memory = rich_memory();
        memory.merge(
            2,
            EvidenceBatch {
                contradictions: (0..20).map(|_| contradiction("costs", 0.9)).collect(),
                ..Default::default()
            },
        );
        let mut ctx = test_context();
        ctx.contradiction_sensitivity = ContradictionSensitivity::EscalateOnAny;
        let eval = Evaluator.score(&memory, &plan(vec![Subtopic::new("costs")]), &ctx);
        assert_eq!(eval.diagnostics.contradiction_penalty, MAX_CONTRADICTION_PENALTY);
    }

    #[test]
    fn test_weak_penalty_applied_to_global() {
        let memory = rich_memory();
        let p = plan(vec![Subtopic::new("costs"), Subtopic::new("policy")]);
        let eval = Evaluator.score(&memory, &p, &test_context());
        assert_eq!(eval.diagnostics.weak_subtopics, vec!["policy".to_string()]);
        assert_eq!(eval.diagnostics.weak_penalty, 0.05);
        let mean = (eval.subtopic_scores["costs"].confidence
            + eval.subtopic_scores["policy"].confidence)
            / 2.0;
        assert!((eval.global_confidence - (mean - 0.05)).abs() < 1e-3);
    }

    #[test]
    fn test_prune_candidates_require_addressing() {
        let memory = ResearchMemory::new();
        let mut addressed = Subtopic::new("fringe");
        addressed.times_addressed = 1;
        let fresh = Subtopic::new("fresh");
        let mut anchor = Subtopic::new("core").anchoring();
        anchor.times_addressed = 1;
        let eval = Evaluator.score(
            &memory,
            &plan(vec![anchor, addressed, fresh]),
            &test_context(),
        );
        assert_eq!(eval.diagnostics.prune_candidates, vec!["fringe".to_string()]);
    }

    #[test]
    fn test_missing_aspects_only_from_current_iteration() {
        let mut memory = ResearchMemory::new();
        memory.merge(
            1,
            EvidenceBatch {
                gaps: vec![
                    ReportedGap {
                        iteration: 1,
                        subtopic: "costs".into(),
                        aspect: "Grid storage".into(),
                    },
                    ReportedGap {
                        iteration: 1,
                        subtopic: "policy".into(),
                        aspect: "storage grid".into(),
                    },
                    ReportedGap {
                        iteration: 0,
                        subtopic: "costs".into(),
                        aspect: "old gap".into(),
                    },
                ],
                ..Default::default()
            },
        );
        let eval = Evaluator.score(&memory, &plan(vec![Subtopic::new("costs")]), &test_context());
        assert_eq!(
            eval.diagnostics.missing_aspects,
            vec![MissingAspect {
                subtopic: "costs".into(),
                aspect: "Grid storage".into()
            }]
        );
    }

    #[test]
    fn test_recency_penalty_only_when_sensitive() {
        let mut memory = ResearchMemory::new();
        let old = |u: &str| {
            let mut s = source(u, DomainType::Edu);
            s.publication_date = Some("2001-01-01".into());
            s.retrieved_for = Some("x".into());
            s
        };
        memory.merge(
            1,
            EvidenceBatch {
                sources: vec![old("https://a.edu/1"), old("https://a.edu/2"), old("https://a.edu/3")],
                ..Default::default()
            },
        );
        let p = plan(vec![Subtopic::new("x")]);
        let mut ctx = test_context();
        let calm = Evaluator.score(&memory, &p, &ctx);
        ctx.temporally_sensitive = true;
        let urgent = Evaluator.score(&memory, &p, &ctx);
        assert_eq!(calm.diagnostics.recency_penalty, 0.0);
        assert_eq!(urgent.diagnostics.recency_penalty, 0.05);
        assert!(urgent.global_confidence < calm.global_confidence);
        assert!(calm.diagnostics.missing_aspects.is_empty());
        assert_eq!(
            urgent.diagnostics.missing_aspects,
            vec![MissingAspect {
                subtopic: "x".into(),
                aspect: RECENCY_GAP.into()
            }]
        );
    }

    #[test]
    fn test_recency_gap_goes_to_stalest_subtopic() {
        let mut memory = ResearchMemory::new();
        let old = |u: &str, subtopic: &str| {
            let mut s = source(u, DomainType::Edu);
            s.publication_date = Some("2003-05-01".into());
            s.retrieved_for = Some(subtopic.into());
            s
        };
        memory.merge(
            1,
            EvidenceBatch {
                sources: vec![
                    old("https://a.edu/1", "x"),
                    old("https://a.edu/2", "y"),
                    old("https://a.edu/3", "y"),
                    old("https://a.edu/4", "y"),
                ],
                ..Default::default()
            },
        );
        let mut ctx = test_context();
        ctx.temporally_sensitive = true;
        let eval = Evaluator.score(
            &memory,
            &plan(vec![Subtopic::new("x"), Subtopic::new("y")]),
            &ctx,
        );
        assert!(eval.diagnostics.recency_penalty > 0.0);
        assert_eq!(eval.diagnostics.missing_aspects[0].subtopic, "y");
    }

    fn factual_memory(statement: &str) -> ResearchMemory {
        let mut memory = ResearchMemory::new();
        memory.merge(
            1,
            EvidenceBatch {
                sources: vec![source("https://a.edu/1", DomainType::Edu)],
                insights: vec![insight("winner", statement, &["https://a.edu/1"])],
                ..Default::default()
            },
        );
        memory
    }

    #[test]
    fn test_factual_floor_lifts_resolved_answer() {
        let memory = factual_memory("Argentina won the 2022 World Cup final");
        let p = plan(vec![Subtopic::new("winner")]);
        let mut ctx = test_context();
        let plain = Evaluator.score(&memory, &p, &ctx);
        assert!(plain.global_confidence < RESOLVED_FLOOR);
        assert_eq!(plain.diagnostics.factual_resolved, None);

        ctx.query_intent = QueryIntent::FactualEventWinner;
        let eval = Evaluator.score(&memory, &p, &ctx);
        assert_eq!(eval.global_confidence, RESOLVED_FLOOR);
        assert_eq!(eval.diagnostics.confidence_floor, Some(RESOLVED_FLOOR));
        assert_eq!(eval.diagnostics.factual_resolved, Some(true));
        assert_eq!(eval.diagnostics.future_drift_penalty, 0.0);
    }

    #[test]
    fn test_future_drift_replaces_recency_for_factual_queries() {
        let mut memory = factual_memory("The 2030 final will be held in Madrid");
        memory.merge(
            1,
            EvidenceBatch {
                sources: (2..5)
                    .map(|n| {
                        let mut s = source(&format!("https://a.edu/{n}"), DomainType::Edu);
                        s.publication_date = Some("2001-01-01".into());
                        s
                    })
                    .collect(),
                ..Default::default()
            },
        );
        let mut ctx = test_context();
        ctx.query_intent = QueryIntent::FactualEventWinner;
        ctx.temporally_sensitive = true;
        let eval = Evaluator.score(&memory, &plan(vec![Subtopic::new("winner")]), &ctx);
        assert_eq!(eval.diagnostics.recency_penalty, 0.0);
        assert!(eval.diagnostics.missing_aspects.is_empty());
        assert_eq!(eval.diagnostics.future_drift_penalty, 0.15);
        assert_eq!(eval.diagnostics.factual_resolved, Some(false));
        assert_eq!(eval.global_confidence, UNRESOLVED_FLOOR);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let memory = rich_memory();
        let p = plan(vec![Subtopic::new("costs"), Subtopic::new("policy")]);
        let a = Evaluator.score(&memory, &p, &test_context());
        let b = Evaluator.score(&memory, &p, &test_context());
        assert_eq!(a, b);
    }
}
