//! Retry policy for venue calls.
//!
//! Every call is wrapped in a per-call timeout. Transient failures are
//! retried with exponential backoff and jitter until either the attempt
//! budget or the elapsed-time budget runs out. Rate limit responses also
//! open a per-venue cooldown that later calls on the same venue respect.

use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{HedgeError, TransientKind, VenueError};
use crate::exchange::Venue;

/// Decides whether a venue error is worth another attempt.
pub type TransientPredicate = fn(&VenueError) -> bool;

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryError {
    /// The venue returned a non-retryable error.
    #[error("{0}")]
    Permanent(VenueError),

    /// Transient failures used up the attempt or time budget.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: VenueError },
}

impl RetryError {
    /// Surface as a hedge error for `venue`.
    pub fn into_hedge_error(self, venue: Venue, symbol: &str) -> HedgeError {
        match self {
            RetryError::Permanent(error) => HedgeError::from_venue(venue, symbol, error, 1),
            RetryError::Exhausted { attempts, last } => HedgeError::VenueUnavailable {
                venue,
                attempts,
                message: last.to_string(),
            },
        }
    }
}

/// A failed attempt that is about to be retried.
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    pub label: &'a str,
    /// 1-based number of the attempt that failed
    pub attempt: u32,
    /// Sleep before the next attempt
    pub delay: Duration,
    pub error: &'a VenueError,
}

/// Counters across every call made through one policy.
#[derive(Debug, Default)]
pub struct RetryStats {
    calls: AtomicU64,
    retries: AtomicU64,
    exhausted: AtomicU64,
    permanent: AtomicU64,
}

impl RetryStats {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    pub fn permanent(&self) -> u64 {
        self.permanent.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct RateLimitState {
    last_hit: Option<Instant>,
    consecutive_hits: u32,
}

/// Per-venue cooldown after rate limit responses.
///
/// The cooldown doubles with every consecutive hit (capped) and resets on
/// the first successful call.
#[derive(Debug)]
pub struct RateLimitTracker {
    state: Mutex<RateLimitState>,
    base: Duration,
    max: Duration,
}

impl RateLimitTracker {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            state: Mutex::new(RateLimitState::default()),
            base,
            max,
        }
    }

    pub fn record_hit(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.last_hit = Some(Instant::now());
            state.consecutive_hits = state.consecutive_hits.saturating_add(1);
        }
    }

    pub fn record_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.last_hit = None;
            state.consecutive_hits = 0;
        }
    }

    pub fn consecutive_hits(&self) -> u32 {
        self.state.lock().map(|s| s.consecutive_hits).unwrap_or(0)
    }

    /// Current cooldown length (base * 2^(hits-1), capped).
    pub fn cooldown(&self) -> Duration {
        let hits = self.consecutive_hits();
        if hits == 0 {
            return Duration::ZERO;
        }
        exponential(self.base, hits, self.max)
    }

    /// Time left before the venue should be called again.
    pub fn remaining(&self) -> Duration {
        let last_hit = match self.state.lock() {
            Ok(state) => state.last_hit,
            Err(_) => None,
        };
        match last_hit {
            Some(at) => self.cooldown().saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }
}

/// `base * 2^(attempt-1)`, capped at `max`.
fn exponential(base: Duration, attempt: u32, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    base.saturating_mul(factor).min(max)
}

/// Bounded retry with backoff for venue calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    max_elapsed: Duration,
    call_timeout: Duration,
    is_transient: TransientPredicate,
    rate_limits: Arc<RateLimitTracker>,
    stats: Arc<RetryStats>,
}

impl RetryPolicy {
    /// Create a policy from config. `call_timeout` bounds every single attempt.
    pub fn new(config: &RetryConfig, call_timeout: Duration) -> Self {
        let base_delay = Duration::from_millis(config.retry_base_delay_ms);
        let max_delay = Duration::from_millis(config.retry_max_delay_ms);

        Self {
            max_attempts: config.max_retry_attempts.max(1),
            base_delay,
            max_delay,
            max_elapsed: Duration::from_millis(config.retry_max_elapsed_ms),
            call_timeout,
            is_transient: VenueError::is_transient,
            rate_limits: Arc::new(RateLimitTracker::new(base_delay, max_delay)),
            stats: Arc::new(RetryStats::default()),
        }
    }

    /// Replace the transient classifier.
    pub fn with_predicate(mut self, predicate: TransientPredicate) -> Self {
        self.is_transient = predicate;
        self
    }

    /// Same settings with its own rate limit cooldown and counters.
    pub fn for_venue(&self) -> Self {
        Self {
            rate_limits: Arc::new(RateLimitTracker::new(self.base_delay, self.max_delay)),
            stats: Arc::new(RetryStats::default()),
            ..self.clone()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn stats(&self) -> &RetryStats {
        &self.stats
    }

    pub fn rate_limits(&self) -> &RateLimitTracker {
        &self.rate_limits
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    ///
    /// Jittered uniformly in `[ceiling / 2, ceiling]`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let ceiling = exponential(self.base_delay, attempt, self.max_delay);
        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms < 2 {
            return ceiling;
        }
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }

    /// Run `op` until it succeeds, fails permanently or the budget runs out.
    pub async fn execute<T, F, Fut>(&self, label: &str, op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        self.execute_observed(label, None, op, |_| {}).await
    }

    /// Run `op` under the policy, calling `observer` before every retry sleep.
    ///
    /// With a `deadline`, a retry whose backoff would end at or after it is
    /// not attempted and the call gives up as exhausted. The first attempt
    /// always runs unless a rate limit cooldown outlasts the deadline.
    pub async fn execute_observed<T, F, Fut, O>(
        &self,
        label: &str,
        deadline: Option<Instant>,
        mut op: F,
        mut observer: O,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
        O: FnMut(&RetryAttempt<'_>),
    {
        let started = Instant::now();
        let mut attempt = 0u32;
        self.stats.calls.fetch_add(1, Ordering::Relaxed);

        loop {
            attempt += 1;

            let cooldown = self.rate_limits.remaining();
            if !cooldown.is_zero() {
                if past(deadline, cooldown) {
                    self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        label,
                        cooldown_ms = cooldown.as_millis() as u64,
                        "Rate limit cooldown outlasts deadline"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt - 1,
                        last: VenueError::transient(
                            TransientKind::RateLimited {
                                retry_after: Some(cooldown),
                            },
                            format!("{} still cooling down", label),
                        ),
                    });
                }
                debug!(label, cooldown_ms = cooldown.as_millis() as u64, "Waiting out rate limit");
                sleep(cooldown).await;
            }

            let result = match timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(VenueError::transient(
                    TransientKind::Timeout,
                    format!("{} exceeded {}ms", label, self.call_timeout.as_millis()),
                )),
            };

            let error = match result {
                Ok(value) => {
                    self.rate_limits.record_success();
                    return Ok(value);
                }
                Err(error) => error,
            };

            if error.is_rate_limit() {
                self.rate_limits.record_hit();
            }

            if !(self.is_transient)(&error) {
                self.stats.permanent.fetch_add(1, Ordering::Relaxed);
                debug!(label, attempt, error = %error, "Permanent venue error");
                return Err(RetryError::Permanent(error));
            }

            let mut delay = self.backoff_delay(attempt);
            if let Some(hint) = error.retry_after() {
                delay = delay.max(hint);
            }

            let out_of_budget =
                attempt >= self.max_attempts || started.elapsed() + delay > self.max_elapsed;
            if out_of_budget || past(deadline, delay) {
                self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    label,
                    attempts = attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    deadline_hit = !out_of_budget,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            observer(&RetryAttempt {
                label,
                attempt,
                delay,
                error: &error,
            });
            warn!(
                label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient venue error, retrying"
            );
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            sleep(delay).await;
        }
    }
}

/// Waiting `wait` from now would reach `deadline`.
fn past(deadline: Option<Instant>, wait: Duration) -> bool {
    deadline.is_some_and(|deadline| Instant::now() + wait >= deadline)
}
