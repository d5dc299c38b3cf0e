//! Connect/reconnect retry policy

use std::time::Duration;

/// How persistently the manager (re)connects
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Delay after the first failed attempt
    pub delay: Duration,
    /// Multiplier applied to the delay after each further failure (1.0 = fixed)
    pub backoff_factor: f64,
    /// Upper bound for the delay
    pub max_delay: Duration,
    /// Timeout for a single connect attempt
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(999_999),
            delay: Duration::from_secs(2),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Retry forever with a fixed delay
    pub fn unlimited(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
            ..Default::default()
        }
    }

    /// Give up after `attempts` tries, with a fixed delay
    pub fn bounded(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(attempts.max(1)),
            delay,
            ..Default::default()
        }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based)
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let scaled = self.delay.as_secs_f64() * factor.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64().max(self.delay.as_secs_f64()));
        Duration::from_secs_f64(capped)
    }
}
