/// Bounded retries with exponential backoff and optional jitter
///
/// The scheduler runs an async operation and, on a retryable failure, waits
/// `min(max_delay, initial_delay * factor^(attempt-1))` before the next
/// attempt. Non-retryable failures and exhausted attempts surface the last
/// attempt's error unchanged.
use super::classification::{classify, ErrorClassification};
use crate::{AppError, AppResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry strategy trait
pub trait RetryStrategy: Send + Sync {
    /// Determine if another attempt should follow `attempt` failed attempts
    fn should_retry(&self, attempt: u32, error: &ErrorClassification) -> bool;

    /// Delay to wait after `attempt` failed attempts
    fn next_delay(&self, attempt: u32) -> Duration;

    /// Maximum number of attempts, including the first
    fn max_attempts(&self) -> u32;
}

/// Immutable retry configuration for one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay_ms: u64,

    /// Cap applied to every delay (>= initial_delay_ms)
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays (>= 1.0)
    pub backoff_factor: f64,

    /// Jitter factor (0.0 - 1.0); 0 keeps delays deterministic
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy doubling the delay after each failure
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: initial_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Single attempt, never retried
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Create with custom jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Check the policy bounds
    pub fn validate(&self) -> AppResult<()> {
        if self.max_attempts < 1 {
            return Err(AppError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(AppError::InvalidPolicy(format!(
                "max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        if !(self.backoff_factor >= 1.0) {
            return Err(AppError::InvalidPolicy(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(AppError::InvalidPolicy(format!(
                "jitter must be within 0.0..=1.0, got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    /// Delay after `attempt` failed attempts, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential_ms = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped_ms = exponential_ms.min(self.max_delay_ms as f64).max(0.0);

        Duration::from_millis(capped_ms.round() as u64)
    }

    /// Calculate exponential delay with jitter
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }

        // delay ± (delay * jitter), kept inside [0, max_delay]
        let base_ms = base.as_millis() as f64;
        let range = base_ms * self.jitter;
        let jitter = rand::thread_rng().gen_range(-range..=range);
        let final_ms = (base_ms + jitter).clamp(0.0, self.max_delay_ms as f64);

        Duration::from_millis(final_ms.round() as u64)
    }
}

impl RetryStrategy for RetryPolicy {
    fn should_retry(&self, attempt: u32, error: &ErrorClassification) -> bool {
        attempt < self.max_attempts && error.retryable
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        self.calculate_delay(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Run `operation` under `policy`, retrying retryable failures
///
/// `on_retry` is called with the number of the attempt that just failed,
/// before waiting for the next one.
pub async fn run_with_backoff<F, Fut, T>(
    operation: F,
    policy: &RetryPolicy,
    mut on_retry: Option<&mut (dyn FnMut(u32) + Send)>,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    policy.validate()?;
    let never = CancellationToken::new();

    run_with_backoff_cancellable(
        "backoff",
        operation,
        policy,
        |attempt: u32, _: &AppError, _: &ErrorClassification| {
            if let Some(callback) = on_retry.as_mut() {
                callback(attempt);
            }
        },
        &never,
    )
    .await
}

/// Run `operation` under any retry strategy until it succeeds, fails
/// terminally, or `cancel` fires
///
/// Cancellation never interrupts an attempt already running. It stops the
/// next attempt from being scheduled and yields `RecoveryCancelled`.
pub async fn run_with_backoff_cancellable<S, F, Fut, T, R>(
    label: &str,
    mut operation: F,
    strategy: &S,
    mut on_retry: R,
    cancel: &CancellationToken,
) -> AppResult<T>
where
    S: RetryStrategy + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
    R: FnMut(u32, &AppError, &ErrorClassification),
{
    let cancelled = || AppError::RecoveryCancelled {
        key: label.to_string(),
    };
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        attempt += 1;
        let error = match operation().await {
            Ok(_) if cancel.is_cancelled() => {
                tracing::debug!(operation = label, attempt, "Discarding result of cancelled attempt");
                return Err(cancelled());
            }
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(operation = label, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => error,
        };

        let classification = classify(&error);

        if cancel.is_cancelled() {
            tracing::debug!(operation = label, attempt, "Discarding result of cancelled attempt");
            return Err(cancelled());
        }

        if !strategy.should_retry(attempt, &classification) {
            if classification.retryable {
                tracing::error!(
                    operation = label,
                    attempts = attempt,
                    max_attempts = strategy.max_attempts(),
                    error = %error,
                    "Max retry attempts reached"
                );
            } else {
                tracing::warn!(
                    operation = label,
                    kind = %classification.kind,
                    error = %error,
                    "Non-retryable failure"
                );
            }
            return Err(error);
        }

        let delay = strategy.next_delay(attempt);
        tracing::warn!(
            operation = label,
            attempt,
            max_attempts = strategy.max_attempts(),
            kind = %classification.kind,
            delay = %humantime::format_duration(delay),
            error = %error,
            "Operation failed, retrying after delay"
        );

        on_retry(attempt, &error, &classification);

        if delay.is_zero() {
            // Still yield so a cancellation can land between attempts
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(operation = label, attempt, "Retry cancelled during backoff");
                    return Err(cancelled());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
