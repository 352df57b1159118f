use std::time::Duration;

use configs::RetryConfig;
use tokio::time::sleep;
use tracing::debug;

/// Bounded exponential backoff for queued deliveries.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff_base, backoff_max }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt number `attempt` (0-based); the first attempt has none.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u64.saturating_pow(attempt - 1);
        let ms = (self.backoff_base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(ms.min(self.backoff_max.as_millis() as u64))
    }

    pub async fn wait_before_retry(&self, attempt: u32) {
        let delay = self.backoff(attempt);
        if delay.is_zero() {
            return;
        }
        debug!(?delay, attempt, "retrying delivery");
        sleep(delay).await;
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self::new(
            cfg.max_attempts,
            Duration::from_millis(cfg.backoff_base_ms),
            Duration::from_millis(cfg.backoff_max_ms),
        )
    }
}
