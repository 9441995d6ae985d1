use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `attempt * base`
    Linear { base: Duration },
    Exponential {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    pub fn exponential(base: Duration, max: Duration, jitter: bool) -> Self {
        Backoff::Exponential { base, max, jitter }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        match *self {
            Backoff::Linear { base } => base.saturating_mul(attempt),
            Backoff::Exponential { base, max, jitter } => {
                let base_ms = base.as_millis().min(u128::from(u64::MAX)) as u64;
                let max_ms = max.as_millis().min(u128::from(u64::MAX)) as u64;
                let shift = attempt.saturating_sub(1).min(16);
                let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
                let delay_ms = if jitter { rng.gen_range(0..=exp) } else { exp };
                Duration::from_millis(delay_ms)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Total sleep if every attempt fails.
    pub fn worst_case_wait(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| match self.backoff {
                Backoff::Exponential { base, max, .. } => Backoff::Exponential {
                    base,
                    max,
                    jitter: false,
                }
                .delay(attempt),
                linear => linear.delay(attempt),
            })
            .sum()
    }
}

/// Runs `op` until it succeeds, `should_retry` rejects the error, or the
/// policy runs out of attempts. Attempts are sequential and 1-based.
pub async fn retry<T, E, Op, Fut, P>(policy: RetryPolicy, should_retry: P, mut op: Op) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && should_retry(&err) => {
                let delay = policy.backoff.delay(attempt);
                debug!(attempt, max_attempts = policy.max_attempts, ?delay, %err, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
