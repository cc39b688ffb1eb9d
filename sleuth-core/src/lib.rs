//! # Sleuth Core
//!
//! Core library for the Sleuth research controller.
//! Provides the iteration orchestrator, evidence memory, confidence
//! evaluator, plan governance, resource guards, and configuration.

pub mod config;
pub mod error;
pub mod guard;
pub mod persistence;
pub mod presets;
pub mod request;
pub mod research;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{SleuthConfig, load_config, load_validated};
pub use error::{Result, SleuthError};
pub use guard::{RateLimiter, ResponseCache, RetryPolicy, RunResources, SharedGuards, TokenBudget};
pub use persistence::{JsonFileRunStore, RunRecord, RunStore};
pub use presets::{ContradictionSensitivity, DepthMode, EvidenceStrictness, ReportMode};
pub use request::{RunRequest, RunResponse, RunSettings};
pub use research::{
    Collaborators, FinalReport, Orchestrator, ResearchTraceEntry, RunHandle, RunOutcome,
    TerminationReason,
};
pub use types::{Contradiction, Insight, Plan, Source, Statistic, Subtopic};
