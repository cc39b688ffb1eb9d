//! Per-iteration audit records and the termination taxonomy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::presets::{ContradictionSensitivity, DepthMode, EvidenceStrictness};

/// Why a run stopped. Exactly one is stamped on every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ConfidenceThresholdReached,
    MaxIterationsReached,
    EvidenceStrictnessUnsatisfied,
    TokenBudgetExceeded,
    TimeoutExceeded,
    ManualInterrupt,
    ErrorAbort,
    #[default]
    Unknown,
}

impl TerminationReason {
    /// Whether the run stopped before its evidence-driven exit conditions.
    pub fn is_abnormal(self) -> bool {
        matches!(
            self,
            TerminationReason::TokenBudgetExceeded
                | TerminationReason::TimeoutExceeded
                | TerminationReason::ManualInterrupt
                | TerminationReason::ErrorAbort
                | TerminationReason::Unknown
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::ConfidenceThresholdReached => "confidence_threshold_reached",
            TerminationReason::MaxIterationsReached => "max_iterations_reached",
            TerminationReason::EvidenceStrictnessUnsatisfied => "evidence_strictness_unsatisfied",
            TerminationReason::TokenBudgetExceeded => "token_budget_exceeded",
            TerminationReason::TimeoutExceeded => "timeout_exceeded",
            TerminationReason::ManualInterrupt => "manual_interrupt",
            TerminationReason::ErrorAbort => "error_abort",
            TerminationReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Publication-year spread of the sources added in one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalDistribution {
    pub dated: usize,
    pub undated: usize,
    /// Dated sources inside the recency window.
    pub recent: usize,
    /// Dated sources older than the recency window.
    pub older: usize,
    pub by_year: BTreeMap<i32, usize>,
}

/// Immutable audit record of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchTraceEntry {
    pub iteration: u32,
    pub subtopic_confidences: BTreeMap<String, f64>,
    pub global_confidence: f64,
    pub weak_subtopics: Vec<String>,
    pub plan_updates: Vec<String>,
    pub new_sources_added: usize,
    pub subtopics_added: Vec<String>,
    pub subtopics_removed: Vec<String>,
    pub planning_note: String,
    pub is_temporally_sensitive: bool,
    pub temporal_distribution: TemporalDistribution,
    pub depth_mode: DepthMode,
    pub applied_confidence_threshold: f64,
    pub contradiction_sensitivity: ContradictionSensitivity,
    pub evidence_strictness: EvidenceStrictness,
    pub strictness_satisfied: bool,
    pub strictness_failures: Vec<String>,
    pub configured_max_iterations: u32,
    pub iteration_tokens: u64,
    pub run_tokens_cumulative: u64,
    /// Items dropped at the parse boundary and other non-fatal annotations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
}

/// Attempted to append an entry out of iteration order.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("trace entry for iteration {got} does not follow iteration {last}")]
pub struct TraceOrderError {
    pub last: u32,
    pub got: u32,
}

/// Append-only, iteration-ordered trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceLog {
    entries: Vec<ResearchTraceEntry>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next entry. Its iteration must be exactly one past the last.
    pub fn append(&mut self, entry: ResearchTraceEntry) -> Result<(), TraceOrderError> {
        let last = self.entries.last().map_or(0, |e| e.iteration);
        if entry.iteration != last + 1 {
            return Err(TraceOrderError {
                last,
                got: entry.iteration,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[ResearchTraceEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ResearchTraceEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn sample_entry(iteration: u32, confidence: f64) -> ResearchTraceEntry {
    ResearchTraceEntry {
        iteration,
        subtopic_confidences: BTreeMap::new(),
        global_confidence: confidence,
        weak_subtopics: Vec::new(),
        plan_updates: Vec::new(),
        new_sources_added: 0,
        subtopics_added: Vec::new(),
        subtopics_removed: Vec::new(),
        planning_note: String::new(),
        is_temporally_sensitive: false,
        temporal_distribution: TemporalDistribution::default(),
        depth_mode: DepthMode::Standard,
        applied_confidence_threshold: 0.75,
        contradiction_sensitivity: ContradictionSensitivity::IgnoreMinor,
        evidence_strictness: EvidenceStrictness::Moderate,
        strictness_satisfied: true,
        strictness_failures: Vec::new(),
        configured_max_iterations: 2,
        iteration_tokens: 0,
        run_tokens_cumulative: 0,
        annotations: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_is_ordered() {
        let mut log = TraceLog::new();
        log.append(sample_entry(1, 0.5)).unwrap();
        let err = log.append(sample_entry(3, 0.6)).unwrap_err();
        assert_eq!(err, TraceOrderError { last: 1, got: 3 });
        log.append(sample_entry(2, 0.6)).unwrap();
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_trace_must_start_at_one() {
        let mut log = TraceLog::new();
        assert!(log.append(sample_entry(0, 0.5)).is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn test_termination_reason_wire_names() {
        for reason in [
            TerminationReason::ConfidenceThresholdReached,
            TerminationReason::MaxIterationsReached,
            TerminationReason::EvidenceStrictnessUnsatisfied,
            TerminationReason::TokenBudgetExceeded,
            TerminationReason::TimeoutExceeded,
            TerminationReason::ManualInterrupt,
            TerminationReason::ErrorAbort,
            TerminationReason::Unknown,
        ] {
            let json = serde_json::to_value(reason).unwrap();
            assert_eq!(json, serde_json::Value::String(reason.to_string()));
        }
        assert!(TerminationReason::ErrorAbort.is_abnormal());
        assert!(!TerminationReason::MaxIterationsReached.is_abnormal());
    }

    #[test]
    fn test_entry_field_names() {
        let json = serde_json::to_value(sample_entry(1, 0.4)).unwrap();
        for field in [
            "iteration",
            "subtopic_confidences",
            "global_confidence",
            "weak_subtopics",
            "plan_updates",
            "new_sources_added",
            "subtopics_added",
            "subtopics_removed",
            "planning_note",
            "is_temporally_sensitive",
            "temporal_distribution",
            "depth_mode",
            "applied_confidence_threshold",
            "contradiction_sensitivity",
            "evidence_strictness",
            "strictness_satisfied",
            "strictness_failures",
            "configured_max_iterations",
            "iteration_tokens",
            "run_tokens_cumulative",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }
}
