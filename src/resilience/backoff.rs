//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Backoff schedule parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
    /// Jitter upper bound as a fraction of the delay.
    pub jitter_ratio: f64,
}

impl Backoff {
    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn nominal_ms(&self, retry: u32) -> u64 {
        if retry == 0 {
            return 0;
        }
        let factor = self.multiplier.max(1.0).powi(retry as i32 - 1);
        let delay = (self.base_ms as f64 * factor).min(self.max_ms as f64);
        delay as u64
    }

    /// Largest delay [`delay`](Self::delay) can return for `retry`.
    pub fn max_delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal_ms(retry);
        Duration::from_millis(nominal + self.jitter_range(nominal))
    }

    /// Jittered delay before retry number `retry`.
    pub fn delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal_ms(retry);
        let range = self.jitter_range(nominal);
        let jitter = if range > 0 {
            rand::thread_rng().gen_range(0..range)
        } else {
            0
        };
        Duration::from_millis(nominal + jitter)
    }

    fn jitter_range(&self, nominal: u64) -> u64 {
        (nominal as f64 * self.jitter_ratio.clamp(0.0, 1.0)) as u64
    }
}
