//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote API (e.g. `https://reports.example.org/api`).
    pub base_url: String,
    /// Upper bound for one request attempt.
    pub request_timeout: Duration,
    /// Retry policy for outbound calls.
    pub retry: RetryConfig,
    /// How a drain reacts to a failing item.
    pub drain_policy: DrainPolicy,
    /// Overwrite a queued status update for the same report instead of
    /// queuing another one.
    pub coalesce_updates: bool,
    /// Pause before re-subscribing to the push channel.
    pub resubscribe_delay: Duration,
    /// Buffered sync notices per subscriber.
    pub notice_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration for the given server.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
            drain_policy: DrainPolicy::default(),
            coalesce_updates: true,
            resubscribe_delay: Duration::from_millis(500),
            notice_capacity: 64,
        }
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the drain failure policy.
    #[must_use]
    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain_policy = policy;
        self
    }

    /// Enables or disables update coalescing.
    #[must_use]
    pub fn with_coalesce_updates(mut self, coalesce: bool) -> Self {
        self.coalesce_updates = coalesce;
        self
    }

    /// Sets the pause before re-subscribing to the push channel.
    #[must_use]
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Sets how many sync notices a slow subscriber may fall behind by.
    #[must_use]
    pub fn with_notice_capacity(mut self, capacity: usize) -> Self {
        self.notice_capacity = capacity.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// What a drain does when one queued action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// Leave the action queued and move on to actions for other reports.
    #[default]
    ContinueOnFailure,
    /// Stop the pass; the next trigger resumes from the failed action.
    HaltOnFailure,
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffSchedule {
    /// Retry at once. Suited to a single local hiccup.
    Immediate,
    /// Exponentially growing delays. Suited to slow external backends.
    Exponential {
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Cap on any single delay.
        max_delay: Duration,
        /// Growth factor per retry.
        multiplier: f64,
        /// Add up to 25% random jitter.
        jitter: bool,
    },
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first. Never below 1.
    pub max_attempts: u32,
    /// Delay schedule.
    pub schedule: BackoffSchedule,
}

impl RetryConfig {
    /// Retries up to `max_attempts` in total with no delay.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            schedule: BackoffSchedule::Immediate,
        }
    }

    /// Retries up to `max_attempts` in total with exponential backoff
    /// starting at 200ms, doubling, capped at 10s, with jitter.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            schedule: BackoffSchedule::Exponential {
                initial_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(10),
                multiplier: 2.0,
                jitter: true,
            },
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self::immediate(1)
    }

    /// Replaces the schedule.
    #[must_use]
    pub fn with_schedule(mut self, schedule: BackoffSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Returns the delay before attempt `attempt` (0-indexed).
    ///
    /// Attempt 0 is never delayed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.schedule {
            BackoffSchedule::Immediate => Duration::ZERO,
            BackoffSchedule::Exponential {
                initial_delay,
                max_delay,
                multiplier,
                jitter,
            } => {
                let base = initial_delay.as_secs_f64()
                    * multiplier.powi(attempt.saturating_sub(1) as i32);
                // f64::min drops NaN; negative growth means no delay.
                let secs = base.min(max_delay.as_secs_f64()).max(0.0);
                let secs = if *jitter {
                    secs + secs * 0.25 * rand::random::<f64>()
                } else {
                    secs
                };
                Duration::try_from_secs_f64(secs).unwrap_or(*max_delay)
            }
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential(3)
    }
}
