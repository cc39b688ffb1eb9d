//! Final report assembly.
//!
//! The composer supplies the narrative parts. Everything deterministic
//! (references, confidence, trace, termination reason, warnings, gaps) is
//! stamped here from the terminal run state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::presets::{EvidenceStrictness, ReportMode};
use crate::research::evaluator::Evaluation;
use crate::research::memory::ResearchMemory;
use crate::research::trace::{ResearchTraceEntry, TerminationReason};
use crate::types::Plan;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub heading: String,
    pub content: String,
    #[serde(default)]
    pub supporting_sources: Vec<String>,
}

/// Narrative parts returned by the report composer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposedReport {
    pub executive_summary: String,
    #[serde(default)]
    pub structured_sections: Vec<ReportSection>,
    #[serde(default)]
    pub risk_assessment: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub executive_summary: String,
    pub structured_sections: Vec<ReportSection>,
    pub risk_assessment: Vec<String>,
    pub recommendations: Vec<String>,
    pub references: Vec<String>,
    pub confidence_score: f64,
    pub research_trace: Vec<ResearchTraceEntry>,
    pub report_mode: ReportMode,
    pub termination_reason: TerminationReason,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub knowledge_gaps: Vec<String>,
}

/// Terminal run state the deterministic report fields are derived from.
pub struct ReportContext<'a> {
    pub query: &'a str,
    pub memory: &'a ResearchMemory,
    pub plan: &'a Plan,
    pub evaluation: Option<&'a Evaluation>,
    pub termination_reason: TerminationReason,
    pub report_mode: ReportMode,
    pub confidence_threshold: f64,
    pub evidence_strictness: EvidenceStrictness,
    pub strictness_penalty: f64,
    /// Run-level warnings collected before finalization.
    pub warnings: Vec<String>,
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

impl ReportContext<'_> {
    /// Global confidence less the strictness penalty when strictness is unmet.
    pub fn confidence_score(&self) -> f64 {
        let Some(evaluation) = self.evaluation else {
            return 0.0;
        };
        let mut score = evaluation.global_confidence;
        if !evaluation.strictness.satisfied {
            score -= self.strictness_penalty;
        }
        round4(score.clamp(0.0, 1.0))
    }

    /// Weak subtopics, reported missing aspects, and unanswered questions.
    pub fn knowledge_gaps(&self) -> Vec<String> {
        let Some(evaluation) = self.evaluation else {
            return self
                .plan
                .subtopics
                .iter()
                .map(|s| format!("No evidence gathered for '{}'", s.name))
                .collect();
        };
        let diagnostics = &evaluation.diagnostics;
        let mut gaps = Vec::new();

        for name in &diagnostics.weak_subtopics {
            let confidence = evaluation
                .subtopic_scores
                .get(name)
                .map_or(0.0, |s| s.confidence);
            let lowest = diagnostics
                .per_subtopic
                .get(name)
                .map(|d| d.lowest_component.to_string())
                .unwrap_or_else(|| "unknown".into());
            gaps.push(format!(
                "Weak evidence for '{name}' (confidence {confidence:.2}, lowest component: {lowest})"
            ));
        }
        for (name, diag) in &diagnostics.per_subtopic {
            for item in &diag.uncovered {
                gaps.push(format!("Unanswered under '{name}': {item}"));
            }
        }
        for missing in &diagnostics.missing_aspects {
            gaps.push(format!(
                "Missing aspect '{}' reported under '{}'",
                missing.aspect, missing.subtopic
            ));
        }
        gaps
    }

    fn stamped_warnings(&self, confidence: f64, degraded: bool) -> Vec<String> {
        let mut warnings = self.warnings.clone();
        if confidence < self.confidence_threshold {
            warnings.push(format!(
                "Low confidence: {confidence:.2} is below the applied threshold {:.2}",
                self.confidence_threshold
            ));
        }
        if let Some(evaluation) = self.evaluation
            && !evaluation.strictness.satisfied
        {
            warnings.push(format!(
                "Evidence strictness '{}' not satisfied: {}",
                self.evidence_strictness,
                evaluation.strictness.failures.join("; ")
            ));
        }
        if self.termination_reason.is_abnormal() {
            warnings.push(format!(
                "Run stopped early: {}",
                self.termination_reason
            ));
        }
        if degraded {
            warnings.push("Report narrative is a degraded skeleton built from memory".into());
        }
        warnings
    }

    /// Combine composer output (or a skeleton when absent) with stamped fields.
    pub fn finalize(&self, composed: Option<ComposedReport>) -> FinalReport {
        let degraded =
            composed.is_none() || self.termination_reason == TerminationReason::ErrorAbort;
        let composed = composed.unwrap_or_else(|| skeleton(self.query, self.memory, self.plan));
        let confidence_score = self.confidence_score();
        let warnings = self.stamped_warnings(confidence_score, degraded);

        FinalReport {
            executive_summary: composed.executive_summary,
            structured_sections: composed.structured_sections,
            risk_assessment: composed.risk_assessment,
            recommendations: composed.recommendations,
            references: self.memory.references(),
            confidence_score,
            research_trace: self.memory.trace().entries().to_vec(),
            report_mode: self.report_mode,
            termination_reason: self.termination_reason,
            degraded,
            warnings,
            knowledge_gaps: self.knowledge_gaps(),
        }
    }
}

/// Narrative-free report listing each subtopic's recorded insights.
pub fn skeleton(query: &str, memory: &ResearchMemory, plan: &Plan) -> ComposedReport {
    let structured_sections = plan
        .subtopics
        .iter()
        .map(|subtopic| {
            let insights: Vec<_> = memory.insights_for(&subtopic.name).collect();
            let content = if insights.is_empty() {
                "No insights were recorded.".to_string()
            } else {
                insights
                    .iter()
                    .map(|i| format!("- {}", i.statement))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            let supporting_sources: BTreeSet<String> = insights
                .iter()
                .flat_map(|i| i.supporting_sources.iter().cloned())
                .collect();
            ReportSection {
                heading: subtopic.name.clone(),
                content,
                supporting_sources: supporting_sources.into_iter().collect(),
            }
        })
        .collect();

    let risk_assessment = memory
        .contradictions()
        .iter()
        .filter(|c| !c.resolved)
        .map(|c| {
            format!(
                "Unresolved contradiction under '{}': \"{}\" vs \"{}\"",
                c.subtopic, c.claim_a, c.claim_b
            )
        })
        .collect();

    ComposedReport {
        executive_summary: format!(
            "Research on '{query}' gathered {} sources and {} insights across {} subtopics.",
            memory.sources().len(),
            memory.insights().len(),
            plan.len()
        ),
        structured_sections,
        risk_assessment,
        recommendations: Vec::new(),
    }
}
