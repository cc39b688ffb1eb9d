//! Resource guards: token budget, per-provider rate limiting, and response caches.
//!
//! Every run owns a [`RunResources`]. Limiters and caches may be shared
//! across runs against the same provider by building one [`SharedGuards`]
//! and passing it to each run; the token budget is always per run.

pub mod budget;
pub mod cache;
pub mod rate_limiter;

pub use budget::{Reservation, TokenBudget, estimate_tokens};
pub use cache::{CacheKeyBuilder, CacheStats, ResponseCache, normalize_text};
pub use rate_limiter::{RateLimiter, RatePermit, RetryPolicy, call_with_retry};

use std::sync::Arc;
use std::time::Duration;

use crate::config::SleuthConfig;
use crate::request::RunSettings;
use crate::research::collaborators::CollaboratorOutput;

pub const LLM_PROVIDER: &str = "llm";
pub const SEARCH_PROVIDER: &str = "search";

/// Limiters and caches that may outlive a single run.
#[derive(Clone)]
pub struct SharedGuards {
    pub llm_limiter: Arc<RateLimiter>,
    pub search_limiter: Arc<RateLimiter>,
    pub search_cache: Arc<ResponseCache<CollaboratorOutput>>,
    pub llm_cache: Arc<ResponseCache<CollaboratorOutput>>,
}

impl SharedGuards {
    pub fn from_config(config: &SleuthConfig) -> Self {
        let ttl = Duration::from_secs(config.cache.ttl_secs);
        Self {
            llm_limiter: Arc::new(RateLimiter::new(LLM_PROVIDER, &config.limits.llm)),
            search_limiter: Arc::new(RateLimiter::new(SEARCH_PROVIDER, &config.limits.search)),
            search_cache: Arc::new(ResponseCache::new(
                "search",
                config.cache.search_capacity,
                ttl,
                config.cache.enabled,
            )),
            llm_cache: Arc::new(ResponseCache::new(
                "llm",
                config.cache.llm_capacity,
                ttl,
                config.cache.enabled,
            )),
        }
    }
}

/// Everything a run's collaborator calls are admitted through.
#[derive(Clone)]
pub struct RunResources {
    pub budget: Arc<TokenBudget>,
    pub guards: SharedGuards,
    pub retry: RetryPolicy,
}

impl RunResources {
    /// Fresh limiters, caches, and budget for one run.
    pub fn new(config: &SleuthConfig, settings: &RunSettings) -> Self {
        Self::with_guards(config, settings, SharedGuards::from_config(config))
    }

    /// A fresh budget over limiters and caches supplied by the caller.
    pub fn with_guards(config: &SleuthConfig, settings: &RunSettings, guards: SharedGuards) -> Self {
        Self {
            budget: TokenBudget::with_final_reserve(
                settings.max_tokens_per_iteration,
                settings.max_tokens_per_run,
                config.orchestrator.analysis_token_floor,
            ),
            guards,
            retry: RetryPolicy::from_config(&config.retry, config.orchestrator.task_timeout()),
        }
    }
}
