use rand::Rng;
use std::time::Duration;

/// Exponential backoff used for retry scheduling.
///
/// `delay(attempt)` grows as `base * 2^attempt`, capped, with optional
/// additive jitter. Jitter only lengthens the delay so callers relying on a
/// minimum wait keep that guarantee.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    base: Duration,
    cap: Duration,
    jitter_percent: u64,
}

impl RetryBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter_percent: 10,
        }
    }

    pub fn with_jitter(mut self, jitter_percent: u64) -> Self {
        self.jitter_percent = jitter_percent;
        self
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt.min(20)));
        let capped = exponential.min(self.cap.as_millis() as u64);

        let jitter = if self.jitter_percent > 0 && capped > 0 {
            rand::thread_rng().gen_range(0..=capped / self.jitter_percent)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }
}
