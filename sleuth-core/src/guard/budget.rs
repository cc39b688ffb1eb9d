//! Token budget with per-iteration and per-run ceilings.
//!
//! Reservations are taken before an external call is dispatched and settled
//! with the actual cost afterwards. Both counters are atomics so concurrent
//! tasks of one run can reserve without a lock.
//!
//! A slice of the run ceiling can be held back for the terminal report call.
//! Ordinary reservations are admitted against the ceiling less that slice;
//! [`TokenBudget::reserve_final`] draws on it and is never refused.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::{BudgetError, BudgetScope};

/// Rough token estimate for a piece of text (about four characters per token).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Shared token counters for one run.
#[derive(Debug)]
pub struct TokenBudget {
    iteration_limit: u64,
    run_limit: u64,
    final_reserve: u64,
    iteration_used: AtomicU64,
    run_used: AtomicU64,
    run_refused: AtomicBool,
}

impl TokenBudget {
    pub fn new(iteration_limit: u64, run_limit: u64) -> Arc<Self> {
        Self::with_final_reserve(iteration_limit, run_limit, 0)
    }

    /// A budget that keeps `final_reserve` tokens of the run ceiling for
    /// [`TokenBudget::reserve_final`].
    pub fn with_final_reserve(iteration_limit: u64, run_limit: u64, final_reserve: u64) -> Arc<Self> {
        Arc::new(Self {
            iteration_limit,
            run_limit,
            final_reserve: final_reserve.min(run_limit),
            iteration_used: AtomicU64::new(0),
            run_used: AtomicU64::new(0),
            run_refused: AtomicBool::new(false),
        })
    }

    /// Reserve `estimated` tokens against both ceilings.
    ///
    /// Refuses without side effects when either counter would pass its
    /// ceiling. A run-scope refusal is sticky and reported by
    /// [`TokenBudget::run_exhausted`].
    pub fn reserve(self: &Arc<Self>, estimated: u64) -> Result<Reservation, BudgetError> {
        let limit = self.admission_limit();
        if let Err(used) = try_add(&self.run_used, estimated, limit) {
            self.run_refused.store(true, Ordering::SeqCst);
            warn!(
                requested = estimated,
                used,
                limit,
                "Run token ceiling reached, refusing reservation"
            );
            return Err(BudgetError::Exceeded {
                scope: BudgetScope::Run,
                limit,
                used,
                requested: estimated,
            });
        }
        if let Err(used) = try_add(&self.iteration_used, estimated, self.iteration_limit) {
            self.run_used.fetch_sub(estimated, Ordering::SeqCst);
            debug!(
                requested = estimated,
                used,
                limit = self.iteration_limit,
                "Iteration token ceiling reached, refusing reservation"
            );
            return Err(BudgetError::Exceeded {
                scope: BudgetScope::Iteration,
                limit: self.iteration_limit,
                used,
                requested: estimated,
            });
        }
        Ok(Reservation {
            budget: Arc::clone(self),
            estimated,
            in_iteration: true,
            settled: false,
        })
    }

    /// Reserve for the terminal report call out of the held-back slice.
    ///
    /// Never refused. The claim is capped at what is left of the full run
    /// ceiling and does not count toward the iteration counter.
    pub fn reserve_final(self: &Arc<Self>, estimated: u64) -> Reservation {
        let granted = estimated.min(self.remaining_run());
        if granted < estimated {
            warn!(
                requested = estimated,
                granted,
                limit = self.run_limit,
                "Final reservation exceeds what is left of the run ceiling"
            );
        }
        self.run_used.fetch_add(granted, Ordering::SeqCst);
        Reservation {
            budget: Arc::clone(self),
            estimated: granted,
            in_iteration: false,
            settled: false,
        }
    }

    /// Reset the per-iteration counter, returning what the closing iteration used.
    pub fn begin_iteration(&self) -> u64 {
        self.iteration_used.swap(0, Ordering::SeqCst)
    }

    pub fn iteration_tokens(&self) -> u64 {
        self.iteration_used.load(Ordering::SeqCst)
    }

    pub fn run_tokens(&self) -> u64 {
        self.run_used.load(Ordering::SeqCst)
    }

    pub fn run_limit(&self) -> u64 {
        self.run_limit
    }

    pub fn iteration_limit(&self) -> u64 {
        self.iteration_limit
    }

    /// Run ceiling less the slice held back for the final reservation.
    pub fn admission_limit(&self) -> u64 {
        self.run_limit - self.final_reserve
    }

    pub fn remaining_run(&self) -> u64 {
        self.run_limit.saturating_sub(self.run_tokens())
    }

    /// Whether a run-scope reservation has been refused.
    pub fn run_exhausted(&self) -> bool {
        self.run_refused.load(Ordering::SeqCst)
    }

    fn adjust(&self, estimated: u64, actual: u64, in_iteration: bool) {
        if actual >= estimated {
            let extra = actual - estimated;
            self.run_used.fetch_add(extra, Ordering::SeqCst);
            if in_iteration {
                self.iteration_used.fetch_add(extra, Ordering::SeqCst);
            }
        } else {
            let refund = estimated - actual;
            self.run_used.fetch_sub(refund, Ordering::SeqCst);
            if !in_iteration {
                return;
            }
            self.iteration_used
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                    Some(v.saturating_sub(refund))
                })
                .ok();
        }
    }
}

/// Compare-and-swap add that refuses to pass `limit`. Returns the observed value on refusal.
fn try_add(counter: &AtomicU64, amount: u64, limit: u64) -> Result<u64, u64> {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            let next = current.checked_add(amount)?;
            (next <= limit).then_some(next)
        })
        .map(|prev| prev + amount)
}

/// An outstanding claim on the budget.
///
/// Settled exactly once by [`Reservation::commit`]. Dropping an unsettled
/// reservation returns its estimate to both counters.
#[derive(Debug)]
#[must_use = "a reservation must be committed or it is released on drop"]
pub struct Reservation {
    budget: Arc<TokenBudget>,
    estimated: u64,
    in_iteration: bool,
    settled: bool,
}

impl Reservation {
    pub fn estimated(&self) -> u64 {
        self.estimated
    }

    /// Replace the estimate with the actual cost of the call.
    pub fn commit(mut self, actual: u64) {
        self.budget.adjust(self.estimated, actual, self.in_iteration);
        self.settled = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.budget.adjust(self.estimated, 0, self.in_iteration);
        }
    }
}
