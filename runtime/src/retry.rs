//! Retry logic with multiplicative backoff for handling transient failures.
//!
//! This module wraps a fallible async operation in a bounded retry loop. The
//! caller decides which errors are worth retrying; everything else fails
//! immediately.
//!
//! # Example
//!
//! ```rust
//! use warehouse_sync_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(3.0)
//!     .build();
//!
//! let result = retry_with_backoff(&policy, || async {
//!     // Your fallible operation here
//!     Ok::<_, String>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Retry policy configuration for multiplicative backoff.
///
/// # Default Values
///
/// - `max_attempts`: 5 (first attempt included)
/// - `initial_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `multiplier`: 3.0 (delay triples each retry)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap for the backoff)
    pub max_delay: Duration,
    /// Factor applied to the delay after each retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 3.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Delay to wait before retry number `retry` (0 = the first retry).
    ///
    /// `initial_delay * multiplier ^ retry`, capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        if retry == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        // `as` saturates, so an overflowing product lands on u64::MAX and is capped below.
        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    /// Total attempts allowed; never less than one.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Sum of every backoff delay the policy can impose.
    #[must_use]
    pub fn worst_case_delay(&self) -> Duration {
        (0..self.attempts() - 1).map(|retry| self.delay_for_retry(retry)).sum()
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of attempts.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for the backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`], filling unset values from the default.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
        }
    }
}

/// Why a retried operation finally failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: usize,
        /// Error of the final attempt.
        last_error: E,
    },

    /// An attempt failed with an error that must not be retried.
    #[error("attempt {attempt} failed permanently: {error}")]
    Aborted {
        /// 1-based attempt that failed.
        attempt: usize,
        /// The non-retryable error.
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Aborted { attempt, .. } => *attempt,
        }
    }

    /// The error that ended the retry loop.
    #[must_use]
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Aborted { error, .. } => error,
        }
    }
}

/// Retry an async operation, treating every error as retryable.
///
/// # Errors
///
/// Returns [`RetryError::Exhausted`] with the last error once
/// `policy.max_attempts` attempts have failed.
///
/// # Example
///
/// ```rust
/// use warehouse_sync_runtime::retry::{RetryPolicy, retry_with_backoff};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = RetryPolicy::default();
///
/// let result = retry_with_backoff(&policy, || async {
///     // Simulated fallible operation
///     Ok::<_, String>(42)
/// }).await?;
///
/// assert_eq!(result, 42);
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation, |_| true).await
}

/// Retry an async operation while `is_retryable` accepts its errors.
///
/// The operation runs at most `policy.max_attempts` times. Between attempts
/// the task sleeps for [`RetryPolicy::delay_for_retry`]. A rejected error
/// stops the loop immediately.
///
/// # Errors
///
/// [`RetryError::Aborted`] for a non-retryable error,
/// [`RetryError::Exhausted`] when the attempts run out.
///
/// # Example
///
/// ```rust
/// use warehouse_sync_runtime::retry::{RetryPolicy, retry_with_predicate};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = RetryPolicy::default();
///
/// let result = retry_with_predicate(
///     &policy,
///     || async { Ok::<_, String>(42) },
///     |err: &String| err.contains("transient"),
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            },
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::debug!(
                        attempt,
                        error = %err,
                        "Error is not retryable, failing immediately"
                    );
                    return Err(RetryError::Aborted {
                        attempt,
                        error: err,
                    });
                }

                if attempt >= max_attempts {
                    tracing::error!(
                        attempt,
                        error = %err,
                        "Operation failed after max attempts"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                let delay = policy.delay_for_retry(attempt - 1);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                attempt += 1;
            },
        }
    }
}
