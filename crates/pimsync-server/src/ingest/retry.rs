//! Bounded retry with an explicit delay schedule

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Delays before each attempt. The first entry is the wait before the first
/// attempt (normally zero), so the schedule length is the attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

/// The last error once the policy gave up, with how many attempts were made
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        let delays = if delays.is_empty() { vec![Duration::ZERO] } else { delays };
        Self { delays }
    }

    /// One immediate attempt plus `retries` more, each after `delay`
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        let mut delays = vec![Duration::ZERO];
        delays.extend(std::iter::repeat(delay).take(retries as usize));
        Self::new(delays)
    }

    /// Schedule for multipart chunk uploads: 0s, 3s, 5s, 10s, 20s
    pub fn upload() -> Self {
        Self::new([0, 3, 5, 10, 20].into_iter().map(Duration::from_secs).collect())
    }

    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32
    }

    /// Run `op` until it succeeds, the schedule runs out, or `retryable`
    /// rejects an error.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut op: F,
        retryable: P,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            let delay = self.delays[attempt as usize];
            attempt += 1;
            if !delay.is_zero() {
                info!(label, attempt, "Retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !retryable(&error) => {
                    warn!(label, attempt, error = %error, "Attempt failed, not retrying");
                    return Err(RetryFailure { error, attempts: attempt });
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(label, attempt, error = %error, "Attempt failed, giving up");
                    return Err(RetryFailure { error, attempts: attempt });
                }
                Err(error) => {
                    warn!(label, "Attempt {}/{} failed: {}", attempt, max_attempts, error);
                }
            }
        }
    }
}
