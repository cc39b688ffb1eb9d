//! Per-provider admission control and retry policy.
//!
//! Each external provider gets its own token bucket. A bucket also caps
//! concurrent in-flight calls at its capacity through a semaphore, so bursts
//! never exceed what the provider allows. Transient failures are retried by
//! [`call_with_retry`] under an explicit [`RetryPolicy`].

use rand::Rng;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{BucketConfig, RetryConfig};
use crate::error::{CollaboratorError, UpstreamError};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket for one external provider.
#[derive(Debug)]
pub struct RateLimiter {
    provider: String,
    capacity: u32,
    /// Tokens regained per second.
    refill_rate: f64,
    acquire_timeout: Duration,
    state: Mutex<BucketState>,
    in_flight: Arc<Semaphore>,
}

/// Admission to make one call. Holding it counts against the in-flight cap.
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(provider: impl Into<String>, config: &BucketConfig) -> Self {
        let capacity = config.capacity.max(1);
        let period = config.refill_period().as_secs_f64().max(f64::EPSILON);
        Self {
            provider: provider.into(),
            capacity,
            refill_rate: f64::from(capacity) / period,
            acquire_timeout: config.acquire_timeout(),
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
            in_flight: Arc::new(Semaphore::new(capacity as usize)),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.capacity as usize - self.in_flight.available_permits()
    }

    /// Tokens currently in the bucket (after refill).
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(f64::from(self.capacity));
        state.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    /// Wait until both a bucket token and an in-flight slot are available.
    ///
    /// Fails with [`UpstreamError::AcquireTimeout`] once the configured
    /// acquire timeout elapses.
    pub async fn acquire(&self) -> Result<RatePermit, UpstreamError> {
        let deadline = Instant::now() + self.acquire_timeout;
        let permit =
            match tokio::time::timeout_at(deadline, Arc::clone(&self.in_flight).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                _ => return Err(self.timeout_error()),
            };

        loop {
            match self.try_take() {
                Ok(()) => return Ok(RatePermit { _permit: permit }),
                Err(wait) => {
                    if Instant::now() + wait > deadline {
                        return Err(self.timeout_error());
                    }
                    debug!(
                        provider = %self.provider,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limiter waiting for token"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn timeout_error(&self) -> UpstreamError {
        warn!(provider = %self.provider, "Rate limiter acquire timed out");
        UpstreamError::AcquireTimeout {
            provider: self.provider.clone(),
        }
    }
}

/// Exponential backoff with jitter, bounded attempts, and a per-attempt timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: f64,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, attempt_timeout: Duration) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
            attempt_timeout,
        }
    }

    /// Total calls the policy allows, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Un-jittered delay before retry number `attempt` (0-based), capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// The full un-jittered backoff schedule.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|a| self.backoff(a)).collect()
    }

    /// Backoff with a random spread of `±jitter` around the base delay.
    pub fn jittered_backoff<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.backoff(attempt).as_secs_f64();
        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(base);
        }
        let spread = rng.gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((base * (1.0 + spread)).max(0.0))
    }

    /// Whether a failure on attempt `attempt` (0-based) may be retried.
    pub fn should_retry(&self, error: &CollaboratorError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CollaboratorError::Upstream(e) => e.is_retryable(),
            CollaboratorError::Parse(_) => false,
        }
    }
}

/// Run `op` through the limiter, retrying transient failures under `policy`.
///
/// Every attempt acquires its own permit. Non-retryable failures (other
/// 4xx statuses, parse errors) return immediately. A transient failure on
/// the last allowed attempt becomes [`UpstreamError::RetriesExhausted`].
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    limiter: &RateLimiter,
    operation: &str,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut attempt = 0u32;
    loop {
        let permit = limiter.acquire().await?;
        let result = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Upstream(UpstreamError::Timeout {
                timeout_ms: policy.attempt_timeout.as_millis() as u64,
            })),
        };
        drop(permit);

        let error = match result {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_retryable() {
            return Err(error);
        }
        if !policy.should_retry(&error, attempt) {
            let last = match error {
                CollaboratorError::Upstream(e) => e,
                CollaboratorError::Parse(p) => return Err(CollaboratorError::Parse(p)),
            };
            warn!(
                operation,
                provider = limiter.provider(),
                attempts = attempt + 1,
                error = %last,
                "Retries exhausted"
            );
            return Err(CollaboratorError::Upstream(UpstreamError::RetriesExhausted {
                attempts: attempt + 1,
                last: Box::new(last),
            }));
        }

        let backoff = {
            let mut rng = rand::thread_rng();
            policy.jittered_backoff(attempt, &mut rng)
        };
        info!(
            operation,
            provider = limiter.provider(),
            attempt = attempt + 1,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Retrying after transient upstream error"
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}
