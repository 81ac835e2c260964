//! Retry decisions for failed delivery requests.
//!
//! A [`RetryPolicy`] is a stateless function from a [`RetryAttemptContext`]
//! to a [`RetryDecision`]. The invoker builds a fresh context after every
//! failed attempt and never caches decisions, so jittered policies may answer
//! differently each time.
//!
//! [`ExponentialBackoff`] is the default policy. Its delay for attempt `n` is
//! `base_delay * backoff_multiplier^(n-1)`, capped at `max_delay`. A
//! `Retry-After` hint from the server raises the delay when it is larger.
//! With jitter enabled the final delay is drawn uniformly from `[0, delay]`
//! through a [`JitterSource`], which tests replace with [`NoJitter`] or a
//! seeded [`SeededJitter`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{Error, FailureKind, Result};

/// Everything a policy may look at when deciding on a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttemptContext {
    /// Number of the attempt that just failed, starting at 1.
    pub attempt_number: u32,
    /// Classification of the failure.
    pub cause: FailureKind,
    /// Time since the first attempt started.
    pub elapsed_so_far: Duration,
    /// Server-provided `Retry-After` hint, if any.
    pub retry_after: Option<Duration>,
}

/// Outcome of a policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt should be made.
    pub should_retry: bool,
    /// How long to wait before it. Zero when `should_retry` is false.
    pub delay_before_next_attempt: Duration,
}

impl RetryDecision {
    /// Retry after `delay`.
    pub const fn retry_after(delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay_before_next_attempt: delay,
        }
    }

    /// Stop retrying.
    pub const fn give_up() -> Self {
        Self {
            should_retry: false,
            delay_before_next_attempt: Duration::ZERO,
        }
    }
}

/// Decides whether and when a failed attempt is retried.
///
/// Implementations must be pure with respect to the invoker: the same
/// instance is shared by concurrent requests.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Decide for the attempt described by `context`.
    fn decide(&self, context: &RetryAttemptContext) -> RetryDecision;

    /// Upper bound on total attempts; the invoker stops at this count even if
    /// [`decide`](Self::decide) keeps saying yes.
    fn max_attempts(&self) -> u32 {
        u32::MAX
    }
}

/// Source of randomness for jittered delays.
pub trait JitterSource: Send + Sync + fmt::Debug {
    /// A duration in `[0, max]`.
    fn jitter(&self, max: Duration) -> Duration;
}

/// Jitter that always returns the full delay.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn jitter(&self, max: Duration) -> Duration {
        max
    }
}

/// Uniform jitter from a seedable generator.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    /// Deterministic jitter for reproducible delay sequences.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Jitter seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }
}

impl JitterSource for SeededJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let micros = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
        if micros == 0 {
            return Duration::ZERO;
        }
        // A panic while holding the lock cannot leave the generator invalid.
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Duration::from_micros(rng.random_range(0..=micros))
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_retryable_kinds() -> BTreeSet<FailureKind> {
    BTreeSet::from([
        FailureKind::Network,
        FailureKind::Timeout,
        FailureKind::RateLimited,
        FailureKind::ServerError,
    ])
}

const fn default_true() -> bool {
    true
}

/// Retry settings, as found in the `[retry]` table of the configuration
/// file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first. `0` is treated as `1`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor between consecutive delays. Must be at least 1.0.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Randomize each delay within `[0, delay]`.
    #[serde(default = "default_true")]
    pub use_jitter: bool,

    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Failure kinds that are retried. Anything else fails at once.
    #[serde(default = "default_retryable_kinds")]
    pub retryable_failure_kinds: BTreeSet<FailureKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            use_jitter: true,
            max_delay_ms: default_max_delay_ms(),
            retryable_failure_kinds: default_retryable_kinds(),
        }
    }
}

impl RetryConfig {
    /// Check the settings for values the backoff computation cannot use.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::Config(format!(
                "retry.backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(format!(
                "retry.max_delay_ms ({}) is smaller than retry.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }

    /// Total attempts, never less than one.
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether failures of `kind` are retried.
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retryable_failure_kinds.contains(&kind)
    }

    /// Replace the retryable set.
    #[must_use]
    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.retryable_failure_kinds = kinds.into_iter().collect();
        self
    }
}

/// Exponential backoff with optional full jitter.
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: RetryConfig,
    jitter: Box<dyn JitterSource>,
}

impl ExponentialBackoff {
    /// Policy from `config`, jittering from OS entropy when enabled.
    pub fn new(config: RetryConfig) -> Self {
        Self::with_jitter(config, SeededJitter::from_entropy())
    }

    /// Policy from `config` with an explicit jitter source.
    pub fn with_jitter(config: RetryConfig, jitter: impl JitterSource + 'static) -> Self {
        Self {
            config,
            jitter: Box::new(jitter),
        }
    }

    /// The settings this policy was built from.
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the attempt following `attempt_number`, before jitter.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    pub fn backoff_delay(&self, attempt_number: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(64) as i32;
        let max_ms = self.config.max_delay_ms as f64;
        let computed_ms = (self.config.base_delay_ms as f64
            * self.config.backoff_multiplier.max(1.0).powi(exponent))
        .min(max_ms);

        let computed = Duration::from_millis(computed_ms.round() as u64);
        let hinted = retry_after.unwrap_or(Duration::ZERO);
        computed
            .max(hinted)
            .min(Duration::from_millis(self.config.max_delay_ms))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn decide(&self, context: &RetryAttemptContext) -> RetryDecision {
        if !self.config.is_retryable(context.cause) {
            return RetryDecision::give_up();
        }
        if context.attempt_number >= self.config.effective_max_attempts() {
            return RetryDecision::give_up();
        }

        let computed = self.backoff_delay(context.attempt_number, None);
        let computed = if self.config.use_jitter {
            self.jitter.jitter(computed)
        } else {
            computed
        };
        // The server's hint is a floor; jitter never shortens it.
        let delay = computed
            .max(context.retry_after.unwrap_or(Duration::ZERO))
            .min(Duration::from_millis(self.config.max_delay_ms));
        RetryDecision::retry_after(delay)
    }

    fn max_attempts(&self) -> u32 {
        self.config.effective_max_attempts()
    }
}
