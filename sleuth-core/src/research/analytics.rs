//! Structural health of a finished run, derived from its trace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::research::trace::ResearchTraceEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Subtopics added relative to the initial plan size.
    pub plan_expansion_ratio: f64,
    /// Subtopics removed relative to every subtopic the plan ever held.
    pub prune_ratio: f64,
    /// Mean change in global confidence between consecutive iterations.
    pub convergence_rate: f64,
    /// Structural changes per iteration.
    pub structural_volatility_score: f64,
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        return 0.0;
    }
    round4(num as f64 / den as f64)
}

pub fn health(initial_subtopics: usize, trace: &[ResearchTraceEntry]) -> HealthMetrics {
    let added: usize = trace.iter().map(|e| e.subtopics_added.len()).sum();
    let removed: usize = trace.iter().map(|e| e.subtopics_removed.len()).sum();

    let deltas: Vec<f64> = trace
        .windows(2)
        .map(|w| w[1].global_confidence - w[0].global_confidence)
        .collect();
    let convergence_rate = if deltas.is_empty() {
        0.0
    } else {
        round4(deltas.iter().sum::<f64>() / deltas.len() as f64)
    };

    HealthMetrics {
        plan_expansion_ratio: ratio(added, initial_subtopics),
        prune_ratio: ratio(removed, initial_subtopics + added),
        convergence_rate,
        structural_volatility_score: ratio(added + removed, trace.len()),
    }
}

/// Replay the trace's structural deltas over the initial plan.
pub fn final_subtopics(initial: &[String], trace: &[ResearchTraceEntry]) -> Vec<String> {
    let mut names: Vec<String> = initial.to_vec();
    for entry in trace {
        let removed: BTreeSet<&str> = entry.subtopics_removed.iter().map(String::as_str).collect();
        names.retain(|n| !removed.contains(n.as_str()));
        for added in &entry.subtopics_added {
            if !names.contains(added) {
                names.push(added.clone());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::trace::sample_entry;

    fn entry(iteration: u32, confidence: f64, added: &[&str], removed: &[&str]) -> ResearchTraceEntry {
        let mut e = sample_entry(iteration, confidence);
        e.subtopics_added = added.iter().map(|s| s.to_string()).collect();
        e.subtopics_removed = removed.iter().map(|s| s.to_string()).collect();
        e
    }

    #[test]
    fn test_health_metrics() {
        let trace = vec![
            entry(1, 0.5, &["grid"], &["permits"]),
            entry(2, 0.7, &["storage"], &[]),
            entry(3, 0.8, &[], &[]),
        ];
        let h = health(4, &trace);
        assert_eq!(h.plan_expansion_ratio, 0.5);
        assert_eq!(h.prune_ratio, round4(1.0 / 6.0));
        assert_eq!(h.convergence_rate, 0.15);
        assert_eq!(h.structural_volatility_score, 1.0);
    }

    #[test]
    fn test_empty_trace_is_quiet() {
        assert_eq!(health(0, &[]), HealthMetrics::default());
    }

    #[test]
    fn test_final_subtopics_replay() {
        let initial = vec!["costs".to_string(), "permits".to_string()];
        let trace = vec![
            entry(1, 0.5, &["grid"], &["permits"]),
            entry(2, 0.6, &["storage"], &["grid"]),
        ];
        assert_eq!(final_subtopics(&initial, &trace), vec!["costs", "storage"]);
    }
}
