//! Error types for the Sleuth research core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering request validation, resource guards, upstream collaborators,
//! structured-output parsing, configuration, and run persistence.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level error type for the Sleuth core library.
#[derive(Debug, thiserror::Error)]
pub enum SleuthError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Evidence strictness unsatisfied: {}", failures.join("; "))]
    StrictnessUnsatisfied { failures: Vec<String> },

    #[error("Run exceeded its wall-clock deadline of {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Malformed or out-of-range input, rejected before a run starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Query must contain at least {min} non-whitespace characters")]
    QueryTooShort { min: usize },

    #[error("Field '{field}' is out of range: {reason}")]
    OutOfRange { field: String, reason: String },

    #[error("Field '{field}' has unknown value '{value}'")]
    UnknownVariant { field: String, value: String },

    #[error("Malformed request: {message}")]
    Malformed { message: String },
}

/// Which token counter refused a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    Iteration,
    Run,
}

impl std::fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetScope::Iteration => write!(f, "iteration"),
            BudgetScope::Run => write!(f, "run"),
        }
    }
}

/// Errors from the token budget.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BudgetError {
    #[error(
        "Token budget exceeded for {scope}: {used} used + {requested} requested > {limit} limit"
    )]
    Exceeded {
        scope: BudgetScope,
        limit: u64,
        used: u64,
        requested: u64,
    },
}

impl BudgetError {
    pub fn scope(&self) -> BudgetScope {
        match self {
            BudgetError::Exceeded { scope, .. } => *scope,
        }
    }
}

/// Errors from external retrieval, analysis, and composition calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpstreamError {
    #[error("Rate limited by upstream provider")]
    RateLimited,

    #[error("Upstream returned HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Upstream call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Upstream connection failed: {message}")]
    Connection { message: String },

    #[error("Timed out waiting for a '{provider}' rate-limit token")]
    AcquireTimeout { provider: String },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<UpstreamError> },
}

impl UpstreamError {
    /// Whether the retry policy may try this failure again.
    ///
    /// HTTP 429, any 5xx, call timeouts, and connection failures are
    /// transient. Every other status is surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::RateLimited
            | UpstreamError::Timeout { .. }
            | UpstreamError::Connection { .. } => true,
            UpstreamError::Status { code, .. } => *code == 429 || (500..600).contains(code),
            UpstreamError::AcquireTimeout { .. } | UpstreamError::RetriesExhausted { .. } => false,
        }
    }
}

/// A collaborator's structured output failed schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("Invalid {item}: {reason}")]
pub struct ParseError {
    pub item: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            reason: reason.into(),
        }
    }
}

/// Failure modes a collaborator call can report.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration load failed: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Errors from the run record store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Run record not found: {run_id}")]
    NotFound { run_id: String },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A type alias for results using the top-level `SleuthError`.
pub type Result<T> = std::result::Result<T, SleuthError>;
