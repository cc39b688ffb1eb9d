//! Minimum-evidence checks for the configured strictness level.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::presets::StrictnessPreset;
use crate::research::memory::ResearchMemory;
use crate::types::Plan;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrictnessResult {
    pub satisfied: bool,
    pub failures: Vec<String>,
}

/// Check every plan subtopic against the preset's minimums.
pub fn check(memory: &ResearchMemory, plan: &Plan, preset: StrictnessPreset) -> StrictnessResult {
    let mut failures = Vec::new();

    for subtopic in &plan.subtopics {
        let name = subtopic.name.as_str();

        let insights: Vec<_> = memory.insights_for(name).collect();
        let thin = insights
            .iter()
            .filter(|i| i.supporting_sources.len() < preset.min_sources_per_insight)
            .count();
        if thin > 0 {
            failures.push(format!(
                "{name}: {thin} of {} insights have fewer than {} supporting sources",
                insights.len(),
                preset.min_sources_per_insight
            ));
        }

        let stats = memory.statistics_for(name).count();
        if stats < preset.min_statistics_per_subtopic {
            failures.push(format!(
                "{name}: {stats} statistics, needs {}",
                preset.min_statistics_per_subtopic
            ));
        }

        let domains: BTreeSet<_> = memory
            .sources_by_subtopic(name)
            .iter()
            .map(|s| s.domain_type)
            .collect();
        if domains.len() < preset.min_domain_types {
            failures.push(format!(
                "{name}: {} domain types, needs {}",
                domains.len(),
                preset.min_domain_types
            ));
        }
    }

    StrictnessResult {
        satisfied: failures.is_empty(),
        failures,
    }
}
