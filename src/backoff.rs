//! Exponential backoff policies and a retry driver for store calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Exponential backoff: `delay_n = initial * factor^n`, capped at
/// `max_interval`, optionally jittered, optionally bounded by a total
/// `expiration` budget measured from the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    /// Total wall-clock budget across all attempts. `None` retries forever.
    pub expiration: Option<Duration>,
    /// Jitter coefficient in `[0, 1)`: each delay is scaled by a random
    /// factor in `[1 - jitter, 1 + jitter]`. Zero disables jitter.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(initial_interval: Duration) -> Self {
        Self {
            initial_interval,
            backoff_factor: 2.0,
            max_interval: Duration::MAX,
            expiration: None,
            jitter: 0.0,
        }
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Policy for retrying individual persistence operations.
    pub fn persistence_default() -> Self {
        Self::new(Duration::from_millis(50))
            .with_max_interval(Duration::from_secs(10))
            .with_expiration(Duration::from_secs(30))
            .with_jitter(0.2)
    }

    /// Begin tracking attempts against this policy.
    pub fn start(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            attempt: 0,
            started_at: Instant::now(),
        }
    }

    /// The undelayed, unjittered delay for a given 0-based attempt.
    fn base_delay(&self, attempt: u32) -> Duration {
        let millis =
            self.initial_interval.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped = millis.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }
}

/// Attempt counter over a [`RetryPolicy`].
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    started_at: Instant,
}

impl Backoff<'_> {
    /// The delay to sleep before the next attempt, or `None` once the
    /// policy's expiration budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(expiration) = self.policy.expiration {
            if self.started_at.elapsed() >= expiration {
                return None;
            }
        }
        let mut delay = self.policy.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        if self.policy.jitter > 0.0 {
            let scale = rand::thread_rng()
                .gen_range(1.0 - self.policy.jitter..=1.0 + self.policy.jitter);
            delay = Duration::from_millis((delay.as_millis() as f64 * scale).round() as u64);
        }
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Drive `op` until it succeeds, returns a non-retryable error, or the
/// policy's budget runs out. The last error is returned in the latter cases.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = policy.start();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}
