//! Configuration system for Sleuth.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/sleuth/config.toml` and/or `.sleuth/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::presets::ReportMode;
use crate::types::DomainType;

/// Top-level configuration for the Sleuth research controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleuthConfig {
    pub defaults: RunDefaults,
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub plan: PlanConfig,
    pub evaluator: EvaluatorConfig,
    pub orchestrator: OrchestratorConfig,
    pub storage: StorageConfig,
}

/// System defaults used when a run request leaves a field unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDefaults {
    /// Applied when the request names neither a threshold nor a depth mode.
    pub confidence_threshold: f64,
    /// Applied when the request names neither an iteration cap nor a depth mode.
    pub max_iterations: u32,
    pub max_concurrent_tasks: usize,
    pub max_tokens_per_iteration: u64,
    pub max_tokens_per_run: u64,
    pub max_run_timeout_secs: u64,
    pub report_mode: ReportMode,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            max_iterations: 2,
            max_concurrent_tasks: 3,
            max_tokens_per_iteration: 8_000,
            max_tokens_per_run: 30_000,
            max_run_timeout_secs: 600,
            report_mode: ReportMode::TechnicalWhitepaper,
        }
    }
}

/// Token-bucket settings for one external provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum burst, and the ceiling on concurrent in-flight calls.
    pub capacity: u32,
    /// Time to refill a full bucket.
    pub refill_period_secs: u64,
    /// How long `acquire` waits for a token before giving up.
    pub acquire_timeout_secs: u64,
}

impl BucketConfig {
    pub fn refill_period(&self) -> Duration {
        Duration::from_secs(self.refill_period_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub llm: BucketConfig,
    pub search: BucketConfig,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            llm: BucketConfig {
                capacity: 25,
                refill_period_secs: 60,
                acquire_timeout_secs: 30,
            },
            search: BucketConfig {
                capacity: 20,
                refill_period_secs: 60,
                acquire_timeout_secs: 30,
            },
        }
    }
}

/// Retry behavior for transient upstream failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Random spread applied to each delay, as a fraction of it.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 16_000,
            jitter: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub search_capacity: usize,
    pub llm_capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_capacity: 512,
            llm_capacity: 256,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Bounds on structural plan adaptation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub max_subtopics: usize,
    pub max_spawns_per_iteration: usize,
    /// Iterations a removed name stays blocked from re-entry.
    pub cooldown_iterations: u32,
    /// Subtopic confidence below which an addressed subtopic may be pruned.
    pub prune_floor: f64,
    /// Keyword Jaccard similarity at or above which two names are duplicates.
    pub near_duplicate_threshold: f64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_subtopics: 8,
            max_spawns_per_iteration: 2,
            cooldown_iterations: 5,
            prune_floor: 0.3,
            near_duplicate_threshold: 0.6,
        }
    }
}

/// Credibility weight per domain type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainWeights {
    pub edu: f64,
    pub gov: f64,
    pub news: f64,
    pub blog: f64,
    pub other: f64,
}

impl DomainWeights {
    pub fn weight(&self, domain: DomainType) -> f64 {
        match domain {
            DomainType::Edu => self.edu,
            DomainType::Gov => self.gov,
            DomainType::News => self.news,
            DomainType::Blog => self.blog,
            DomainType::Other => self.other,
        }
    }
}

impl Default for DomainWeights {
    fn default() -> Self {
        Self {
            edu: 1.0,
            gov: 1.0,
            news: 0.7,
            blog: 0.4,
            other: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub domain_weights: DomainWeights,
    /// Share of supporting sources one domain type may hold before diversity drops.
    pub dominant_domain_fraction: f64,
    /// A source above this opinion score counts as opinionated.
    pub opinion_threshold: f64,
    /// Share of opinionated sources tolerated before diversity drops.
    pub opinionated_fraction: f64,
    /// Subtopics below this confidence are weak.
    pub weak_threshold: f64,
    pub weak_penalty: f64,
    pub max_weak_penalty: f64,
    pub recency_window_years: i32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            domain_weights: DomainWeights::default(),
            dominant_domain_fraction: 0.4,
            opinion_threshold: 0.6,
            opinionated_fraction: 0.3,
            weak_threshold: 0.6,
            weak_penalty: 0.05,
            max_weak_penalty: 0.2,
            recency_window_years: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Treat unmet evidence strictness at the iteration cap as a distinct termination.
    pub strictness_fatal: bool,
    /// Subtracted from the report confidence when strictness is unmet at termination.
    pub strictness_confidence_penalty: f64,
    /// Upper bound on any single collaborator call.
    pub task_timeout_secs: u64,
    /// Minimum token estimate for one analysis call.
    pub analysis_token_floor: u64,
    /// Token estimate charged per retrieval call.
    pub retrieval_token_cost: u64,
}

impl OrchestratorConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            strictness_fatal: false,
            strictness_confidence_penalty: 0.05,
            task_timeout_secs: 120,
            analysis_token_floor: 200,
            retrieval_token_cost: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for persisted run records. Persistence is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs_dir: Option<PathBuf>,
}

impl SleuthConfig {
    /// Reject values that would make scoring or admission meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f64| -> Result<(), ConfigError> {
            if v.is_finite() && (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    message: format!("{name} must lie in [0, 1], got {v}"),
                })
            }
        };

        unit("defaults.confidence_threshold", self.defaults.confidence_threshold)?;
        unit("plan.prune_floor", self.plan.prune_floor)?;
        unit("plan.near_duplicate_threshold", self.plan.near_duplicate_threshold)?;
        unit(
            "evaluator.dominant_domain_fraction",
            self.evaluator.dominant_domain_fraction,
        )?;
        unit("evaluator.opinion_threshold", self.evaluator.opinion_threshold)?;
        unit(
            "evaluator.opinionated_fraction",
            self.evaluator.opinionated_fraction,
        )?;
        unit("evaluator.weak_threshold", self.evaluator.weak_threshold)?;
        unit("evaluator.weak_penalty", self.evaluator.weak_penalty)?;
        unit("evaluator.max_weak_penalty", self.evaluator.max_weak_penalty)?;
        unit("retry.jitter", self.retry.jitter)?;
        unit(
            "orchestrator.strictness_confidence_penalty",
            self.orchestrator.strictness_confidence_penalty,
        )?;
        for domain in DomainType::ALL {
            unit(
                &format!("evaluator.domain_weights.{domain}"),
                self.evaluator.domain_weights.weight(domain),
            )?;
        }

        if self.plan.max_subtopics == 0 {
            return Err(ConfigError::Invalid {
                message: "plan.max_subtopics must be at least 1".into(),
            });
        }
        if self.limits.llm.capacity == 0 || self.limits.search.capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "rate-limit bucket capacity must be at least 1".into(),
            });
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "retry.multiplier must be >= 1.0, got {}",
                    self.retry.multiplier
                ),
            });
        }
        if self.defaults.max_tokens_per_iteration == 0 || self.defaults.max_tokens_per_run == 0 {
            return Err(ConfigError::Invalid {
                message: "token ceilings must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SLEUTH_`)
/// 3. Workspace-local config (`.sleuth/config.toml`)
/// 4. User config (`~/.config/sleuth/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&SleuthConfig>,
) -> Result<SleuthConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(SleuthConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "sleuth", "sleuth") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".sleuth").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // SLEUTH_PLAN__MAX_SUBTOPICS, SLEUTH_RETRY__MAX_RETRIES, etc.
    figment = figment.merge(Env::prefixed("SLEUTH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load and validate in one step.
pub fn load_validated(
    workspace: Option<&Path>,
    overrides: Option<&SleuthConfig>,
) -> Result<SleuthConfig, ConfigError> {
    let config = load_config(workspace, overrides)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SleuthConfig::default();
        assert_eq!(config.defaults.max_tokens_per_iteration, 8_000);
        assert_eq!(config.defaults.max_tokens_per_run, 30_000);
        assert_eq!(config.cache.search_capacity, 512);
        assert_eq!(config.cache.llm_capacity, 256);
        assert_eq!(config.limits.llm.capacity, 25);
        assert_eq!(config.limits.search.capacity, 20);
        assert_eq!(config.retry.max_retries, 3);
        assert!((config.evaluator.dominant_domain_fraction - 0.4).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = SleuthConfig::default();
        let toml_str = config.to_toml().unwrap();
        let deserialized: SleuthConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = SleuthConfig::default();
        overrides.plan.max_subtopics = 4;
        overrides.retry.max_retries = 1;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.plan.max_subtopics, 4);
        assert_eq!(config.retry.max_retries, 1);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let sleuth_dir = dir.path().join(".sleuth");
        std::fs::create_dir_all(&sleuth_dir).unwrap();
        std::fs::write(
            sleuth_dir.join("config.toml"),
            r#"
[plan]
max_subtopics = 5
max_spawns_per_iteration = 1
cooldown_iterations = 2
prune_floor = 0.25
near_duplicate_threshold = 0.5

[evaluator.domain_weights]
edu = 0.9
gov = 0.9
news = 0.6
blog = 0.3
other = 0.4
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.plan.max_subtopics, 5);
        assert_eq!(config.plan.cooldown_iterations, 2);
        assert!((config.evaluator.domain_weights.blog - 0.3).abs() < f64::EPSILON);
        // Untouched sections keep their defaults.
        assert_eq!(config.cache.llm_capacity, 256);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = SleuthConfig::default();
        config.evaluator.opinion_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = SleuthConfig::default();
        config.defaults.confidence_threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = SleuthConfig::default();
        config.plan.max_subtopics = 0;
        assert!(config.validate().is_err());

        let mut config = SleuthConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_domain_weight_lookup() {
        let weights = DomainWeights::default();
        assert!(weights.weight(DomainType::Edu) > weights.weight(DomainType::News));
        assert!(weights.weight(DomainType::News) > weights.weight(DomainType::Blog));
    }
}
