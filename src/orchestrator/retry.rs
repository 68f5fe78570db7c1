use crate::config::{AiConfig, RunConfig};
use log::debug;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff with a cap and proportional jitter
///
/// Used for every collector job and for the annotation call. Attempts are
/// counted from 1 and include the first call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    /// Extra random delay as a fraction of the backoff, in `[0, 1]`
    jitter: f64,
}

/// Final value of a retried operation with the attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn from_run_config(run: &RunConfig) -> Self {
        Self::new(
            run.retry_limit,
            Duration::from_millis(run.retry_base_delay_ms),
            Duration::from_millis(run.retry_max_delay_ms),
        )
        .with_jitter(run.retry_jitter)
    }

    /// Same backoff as collectors, bounded by the annotation attempt limit
    pub fn for_annotation(ai: &AiConfig, run: &RunConfig) -> Self {
        Self {
            max_attempts: ai.max_attempts.max(1),
            ..Self::from_run_config(run)
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff after the given failed attempt, before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.jitter <= 0.0 || backoff.is_zero() {
            return backoff;
        }
        let fraction = rand::thread_rng().gen_range(0.0..=self.jitter);
        backoff + backoff.mul_f64(fraction)
    }

    /// Run `op` until it produces a value `should_retry` rejects or the
    /// attempt limit is reached
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut, P>(&self, mut op: F, should_retry: P) -> Retried<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
        P: Fn(&T) -> bool,
    {
        let mut attempt = 1;
        loop {
            let value = op(attempt).await;
            if attempt >= self.max_attempts || !should_retry(&value) {
                return Retried {
                    value,
                    attempts: attempt,
                };
            }
            let delay = self.delay_for(attempt);
            debug!(
                "Attempt {}/{} failed, retrying in {:?}",
                attempt, self.max_attempts, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
