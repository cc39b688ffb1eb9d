//! Named run presets: depth, contradiction sensitivity, evidence strictness,
//! and report presentation.
//!
//! Every preset is a fixed table lookup so that resolving a request is
//! deterministic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How deep a run investigates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    QuickScan,
    #[default]
    Standard,
    DeepInvestigation,
}

/// Knobs a depth mode fixes for a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthPreset {
    pub max_iterations: u32,
    pub confidence_threshold: f64,
    /// Results requested per subtopic in the first iteration.
    pub initial_source_count: usize,
    /// Results requested per subtopic in later iterations.
    pub refinement_source_count: usize,
    /// Whether the plan may spawn and prune subtopics.
    pub allow_plan_expansion: bool,
    /// Weak subtopics re-request the initial source count.
    pub escalate_weak: bool,
}

impl DepthMode {
    pub fn preset(self) -> DepthPreset {
        match self {
            DepthMode::QuickScan => DepthPreset {
                max_iterations: 1,
                confidence_threshold: 0.55,
                initial_source_count: 3,
                refinement_source_count: 2,
                allow_plan_expansion: false,
                escalate_weak: false,
            },
            DepthMode::Standard => DepthPreset {
                max_iterations: 2,
                confidence_threshold: 0.75,
                initial_source_count: 5,
                refinement_source_count: 4,
                allow_plan_expansion: true,
                escalate_weak: false,
            },
            DepthMode::DeepInvestigation => DepthPreset {
                max_iterations: 4,
                confidence_threshold: 0.85,
                initial_source_count: 7,
                refinement_source_count: 5,
                allow_plan_expansion: true,
                escalate_weak: true,
            },
        }
    }
}

/// How contradictions weigh on consistency and global confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionSensitivity {
    #[default]
    IgnoreMinor,
    FlagAll,
    EscalateOnAny,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContradictionPreset {
    /// Severity at or above which a contradiction counts at full weight.
    pub min_severity: f64,
    /// Weight applied to severities below `min_severity`.
    pub minor_discount: f64,
    /// Global confidence penalty per counted contradiction.
    pub penalty_per_contradiction: f64,
    /// Any severity above this floor zeroes consistency.
    pub zero_consistency_floor: Option<f64>,
    pub force_refinement: bool,
}

/// Upper bound on the summed contradiction penalty.
pub const MAX_CONTRADICTION_PENALTY: f64 = 0.15;

impl ContradictionSensitivity {
    pub fn preset(self) -> ContradictionPreset {
        match self {
            ContradictionSensitivity::IgnoreMinor => ContradictionPreset {
                min_severity: 0.7,
                minor_discount: 0.25,
                penalty_per_contradiction: 0.02,
                zero_consistency_floor: None,
                force_refinement: false,
            },
            ContradictionSensitivity::FlagAll => ContradictionPreset {
                min_severity: 0.0,
                minor_discount: 1.0,
                penalty_per_contradiction: 0.03,
                zero_consistency_floor: None,
                force_refinement: false,
            },
            ContradictionSensitivity::EscalateOnAny => ContradictionPreset {
                min_severity: 0.0,
                minor_discount: 1.0,
                penalty_per_contradiction: 0.04,
                zero_consistency_floor: Some(0.1),
                force_refinement: true,
            },
        }
    }
}

/// Minimum-evidence policy checked independently of confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStrictness {
    Relaxed,
    #[default]
    Moderate,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrictnessPreset {
    pub min_sources_per_insight: usize,
    pub min_statistics_per_subtopic: usize,
    pub min_domain_types: usize,
}

impl EvidenceStrictness {
    pub fn preset(self) -> StrictnessPreset {
        match self {
            EvidenceStrictness::Relaxed => StrictnessPreset {
                min_sources_per_insight: 1,
                min_statistics_per_subtopic: 0,
                min_domain_types: 1,
            },
            EvidenceStrictness::Moderate => StrictnessPreset {
                min_sources_per_insight: 2,
                min_statistics_per_subtopic: 1,
                min_domain_types: 2,
            },
            EvidenceStrictness::Strict => StrictnessPreset {
                min_sources_per_insight: 3,
                min_statistics_per_subtopic: 2,
                min_domain_types: 3,
            },
        }
    }
}

/// Presentation style of the final report. Has no effect on scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    ExecutiveSummary,
    #[default]
    TechnicalWhitepaper,
    RiskAssessment,
    AcademicStructured,
}

impl ReportMode {
    pub fn description(self) -> &'static str {
        match self {
            ReportMode::ExecutiveSummary => {
                "High-level findings with risk and recommendation focus"
            }
            ReportMode::TechnicalWhitepaper => {
                "Detailed insights with methodology and contradiction discussion"
            }
            ReportMode::RiskAssessment => {
                "Emphasis on uncertainties, contradictions, and scenario analysis"
            }
            ReportMode::AcademicStructured => {
                "Formal structure with explicit citations and methodology transparency"
            }
        }
    }

    /// Composition guidance handed to the report composer.
    pub fn instructions(self) -> &'static str {
        match self {
            ReportMode::ExecutiveSummary => {
                "Concise, decision-oriented summary. 3-4 high-level sections. \
                 2-4 strategic risks and 2-4 prioritized recommendations. \
                 Minimize methodology and trace exposure."
            }
            ReportMode::TechnicalWhitepaper => {
                "Thorough summary covering scope, methodology, findings, and limitations. \
                 4-6 sections including per-subtopic findings, contradiction analysis, \
                 and a confidence breakdown. 3-5 risks and 3-5 justified recommendations."
            }
            ReportMode::RiskAssessment => {
                "Lead with what is unknown or contested. Sections on knowledge gaps, \
                 conflicting evidence, scenarios, and per-subtopic confidence limits. \
                 4-6 risks ranked by impact and 2-4 mitigation recommendations."
            }
            ReportMode::AcademicStructured => {
                "Abstract-style summary. Sections for introduction, methodology, results \
                 by subtopic, discussion, and conclusion. Limitations as risks, \
                 implications as recommendations. Cite sources in every section."
            }
        }
    }
}

macro_rules! snake_display {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match serde_json::to_value(self) {
                    Ok(serde_json::Value::String(s)) => f.write_str(&s),
                    _ => write!(f, "{:?}", self),
                }
            }
        }
    };
}

snake_display!(DepthMode);
snake_display!(ContradictionSensitivity);
snake_display!(EvidenceStrictness);
snake_display!(ReportMode);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_presets() {
        let quick = DepthMode::QuickScan.preset();
        assert_eq!(quick.max_iterations, 1);
        assert!(!quick.allow_plan_expansion);

        let standard = DepthMode::Standard.preset();
        assert_eq!(standard.max_iterations, 2);
        assert!((standard.confidence_threshold - 0.75).abs() < f64::EPSILON);

        let deep = DepthMode::DeepInvestigation.preset();
        assert!(deep.escalate_weak);
        assert!(deep.initial_source_count > standard.initial_source_count);
    }

    #[test]
    fn test_strictness_presets_are_monotonic() {
        let r = EvidenceStrictness::Relaxed.preset();
        let m = EvidenceStrictness::Moderate.preset();
        let s = EvidenceStrictness::Strict.preset();
        assert!(r.min_sources_per_insight <= m.min_sources_per_insight);
        assert!(m.min_sources_per_insight <= s.min_sources_per_insight);
        assert!(r.min_domain_types <= m.min_domain_types);
        assert!(m.min_statistics_per_subtopic <= s.min_statistics_per_subtopic);
    }

    #[test]
    fn test_escalate_on_any_zeroes() {
        let p = ContradictionSensitivity::EscalateOnAny.preset();
        assert_eq!(p.zero_consistency_floor, Some(0.1));
        assert!(p.force_refinement);
        assert!(ContradictionSensitivity::IgnoreMinor
            .preset()
            .zero_consistency_floor
            .is_none());
    }

    #[test]
    fn test_display_is_snake_case() {
        assert_eq!(DepthMode::DeepInvestigation.to_string(), "deep_investigation");
        assert_eq!(ReportMode::default().to_string(), "technical_whitepaper");
        assert_eq!(ContradictionSensitivity::FlagAll.to_string(), "flag_all");
    }

    #[test]
    fn test_unknown_variant_rejected() {
        assert!(serde_json::from_str::<DepthMode>("\"bottomless\"").is_err());
        let mode: ReportMode = serde_json::from_str("\"risk_assessment\"").unwrap();
        assert_eq!(mode, ReportMode::RiskAssessment);
    }
}
