//! Run request and response contracts, and their resolution into settings.
//!
//! Field names on [`RunRequest`] and [`RunResponse`] are part of the external
//! compatibility surface and must not be renamed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::SleuthConfig;
use crate::error::ValidationError;
use crate::presets::{
    ContradictionSensitivity, DepthMode, DepthPreset, EvidenceStrictness, ReportMode,
};
use crate::research::report::FinalReport;

pub const MIN_QUERY_CHARS: usize = 3;
pub const THRESHOLD_FLOOR: f64 = 0.65;
pub const THRESHOLD_CEILING: f64 = 0.90;
pub const MAX_ITERATIONS_CAP: u32 = 5;
pub const MAX_CONCURRENT_TASKS_CAP: usize = 10;

/// A caller's request to start one research run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub query: String,
    #[serde(default)]
    pub depth_mode: Option<DepthMode>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub contradiction_sensitivity: ContradictionSensitivity,
    #[serde(default)]
    pub evidence_strictness: EvidenceStrictness,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub report_mode: Option<ReportMode>,
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
    #[serde(default)]
    pub max_tokens_per_iteration: Option<u64>,
    #[serde(default)]
    pub max_tokens_per_run: Option<u64>,
    /// Wall-clock limit in seconds.
    #[serde(default)]
    pub max_run_timeout: Option<u64>,
}

/// Where the applied confidence threshold came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    Override,
    DepthMode,
    SystemDefault,
}

/// A validated request with every precedence rule applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub query: String,
    pub depth_mode: DepthMode,
    pub depth: DepthPreset,
    pub confidence_threshold: f64,
    pub threshold_source: ThresholdSource,
    pub max_iterations: u32,
    pub contradiction_sensitivity: ContradictionSensitivity,
    pub evidence_strictness: EvidenceStrictness,
    pub report_mode: ReportMode,
    pub max_concurrent_tasks: usize,
    pub max_tokens_per_iteration: u64,
    pub max_tokens_per_run: u64,
    pub max_run_timeout_secs: u64,
    /// Adjustments made while resolving, such as clamped overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolution_notes: Vec<String>,
}

impl RunSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.max_run_timeout_secs)
    }
}

/// What a finished run returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: String,
    pub confidence_score: f64,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_json: Option<FinalReport>,
}

fn out_of_range(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn positive(field: &str, value: Option<u64>) -> Result<Option<u64>, ValidationError> {
    match value {
        Some(0) => Err(out_of_range(field, "must be greater than zero")),
        other => Ok(other),
    }
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Parse a request from JSON, mapping schema failures to validation errors.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(raw).map_err(|e| ValidationError::Malformed {
            message: e.to_string(),
        })
    }

    /// Validate the request and apply precedence against `config`.
    ///
    /// Threshold: explicit override (clamped to [0.65, 0.90]) beats the depth
    /// preset, which beats the system default. Max iterations: explicit
    /// override (clamped to [1, 5]) beats the preset.
    pub fn resolve(&self, config: &SleuthConfig) -> Result<RunSettings, ValidationError> {
        let query = self.query.trim().to_string();
        if query.chars().filter(|c| !c.is_whitespace()).count() < MIN_QUERY_CHARS {
            return Err(ValidationError::QueryTooShort {
                min: MIN_QUERY_CHARS,
            });
        }

        let defaults = &config.defaults;
        let depth_mode = self.depth_mode.unwrap_or_default();
        let depth = depth_mode.preset();
        let mut notes = Vec::new();

        let (confidence_threshold, threshold_source) = match self.confidence_threshold {
            Some(t) if !t.is_finite() || !(0.0..=1.0).contains(&t) => {
                return Err(out_of_range(
                    "confidence_threshold",
                    format!("{t} is not within [0, 1]"),
                ));
            }
            Some(t) => {
                let clamped = t.clamp(THRESHOLD_FLOOR, THRESHOLD_CEILING);
                if clamped != t {
                    notes.push(format!(
                        "confidence_threshold {t} clamped to {clamped}"
                    ));
                }
                (clamped, ThresholdSource::Override)
            }
            None if self.depth_mode.is_some() => {
                (depth.confidence_threshold, ThresholdSource::DepthMode)
            }
            None => (defaults.confidence_threshold, ThresholdSource::SystemDefault),
        };

        let max_iterations = match self.max_iterations {
            Some(n) => {
                let clamped = n.clamp(1, MAX_ITERATIONS_CAP);
                if clamped != n {
                    notes.push(format!("max_iterations {n} clamped to {clamped}"));
                }
                clamped
            }
            None if self.depth_mode.is_some() => depth.max_iterations,
            None => defaults.max_iterations.clamp(1, MAX_ITERATIONS_CAP),
        };

        let requested_tasks = self
            .max_concurrent_tasks
            .unwrap_or(defaults.max_concurrent_tasks);
        let max_concurrent_tasks = requested_tasks.clamp(1, MAX_CONCURRENT_TASKS_CAP);
        if max_concurrent_tasks != requested_tasks {
            notes.push(format!(
                "max_concurrent_tasks {requested_tasks} clamped to {max_concurrent_tasks}"
            ));
        }

        let max_tokens_per_iteration =
            positive("max_tokens_per_iteration", self.max_tokens_per_iteration)?
                .unwrap_or(defaults.max_tokens_per_iteration);
        let max_tokens_per_run = positive("max_tokens_per_run", self.max_tokens_per_run)?
            .unwrap_or(defaults.max_tokens_per_run);
        let max_run_timeout_secs = positive("max_run_timeout", self.max_run_timeout)?
            .unwrap_or(defaults.max_run_timeout_secs);

        Ok(RunSettings {
            query,
            depth_mode,
            depth,
            confidence_threshold,
            threshold_source,
            max_iterations,
            contradiction_sensitivity: self.contradiction_sensitivity,
            evidence_strictness: self.evidence_strictness,
            report_mode: self.report_mode.unwrap_or(defaults.report_mode),
            max_concurrent_tasks,
            max_tokens_per_iteration,
            max_tokens_per_run,
            max_run_timeout_secs,
            resolution_notes: notes,
        })
    }
}
