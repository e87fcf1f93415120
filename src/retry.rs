/// Retry Module
///
/// One retry policy shared by the two unreliable boundaries of the pipeline:
/// upstream JSON-RPC calls and storage calls. The policy is a `backon`
/// backoff builder, so closures can use `Retryable::retry` directly. Writes
/// that must run on a borrowed transaction connection drive the same backoff
/// through [`Attempts`].
use std::fmt::Display;
use std::time::Duration;

use backon::BackoffBuilder;
use rand::Rng;

/// Classifies an error as worth another attempt.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Exponential backoff with a hard cap and symmetric random jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Each delay is shifted by a uniform offset in `[-jitter, +jitter]`.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            factor: 1.5,
            max_delay: Duration::from_micros(337_500),
            jitter: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// Same schedule without jitter.
    pub fn without_jitter(self) -> Self {
        Self { jitter: Duration::ZERO, ..self }
    }

    /// Start tracking attempts of a single operation.
    pub fn attempts(&self, operation: &'static str) -> Attempts {
        Attempts { backoff: self.build(), operation, attempt: 1, max_attempts: self.max_attempts }
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = PolicyBackoff;

    fn build(self) -> Self::Backoff {
        PolicyBackoff { policy: self, next_delay: self.base_delay, remaining: self.max_attempts.saturating_sub(1) }
    }
}

/// Delay schedule produced by [`RetryPolicy`]; yields one delay per retry.
#[derive(Debug, Clone)]
pub struct PolicyBackoff {
    policy: RetryPolicy,
    next_delay: Duration,
    remaining: usize,
}

impl Iterator for PolicyBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let delay = self.next_delay.min(self.policy.max_delay);
        self.next_delay = self.next_delay.mul_f64(self.policy.factor).min(self.policy.max_delay);

        Some(apply_jitter(delay, self.policy.jitter))
    }
}

fn apply_jitter(delay: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return delay;
    }
    let spread = jitter.as_secs_f64();
    let offset = rand::rng().random_range(-spread..=spread);
    Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
}

/// Attempt bookkeeping for operations that cannot be expressed as a
/// re-callable closure, such as statements on a borrowed transaction.
///
/// ```ignore
/// let mut attempts = policy.attempts("insert blocks");
/// loop {
///     let result = insert_once(&mut *conn, rows).await;
///     if let Some(done) = attempts.settle(result).await {
///         return done;
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Attempts {
    backoff: PolicyBackoff,
    operation: &'static str,
    attempt: usize,
    max_attempts: usize,
}

impl Attempts {
    /// Returns the final outcome, or sleeps and returns `None` when the
    /// operation should be attempted again.
    pub async fn settle<T, E>(&mut self, result: Result<T, E>) -> Option<Result<T, E>>
    where
        E: Transient + Display,
    {
        let err = match result {
            Ok(value) => return Some(Ok(value)),
            Err(err) => err,
        };
        if !err.is_transient() {
            return Some(Err(err));
        }
        let Some(delay) = self.backoff.next() else {
            tracing::error!(
                operation = self.operation,
                attempts = self.attempt,
                error = %err,
                "Retries exhausted"
            );
            return Some(Err(err));
        };

        tracing::warn!(
            operation = self.operation,
            error = %err,
            "Attempt {}/{} failed. Retrying in {:.3}s",
            self.attempt,
            self.max_attempts,
            delay.as_secs_f32()
        );
        self.attempt += 1;
        tokio::time::sleep(delay).await;
        None
    }

    /// Number of the attempt about to run (starts at 1).
    pub fn attempt(&self) -> usize {
        self.attempt
    }
}
