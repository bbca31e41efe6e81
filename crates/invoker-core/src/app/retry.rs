//! Retry policy: decides backoff delays after control-plane failures.

use std::time::Duration;

use rand::Rng;

/// Backoff policy for a failing control plane.
///
/// Never yields a zero delay, so a dead control plane cannot make the loop
/// busy-spin.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first consecutive failure.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound before jitter.
    pub max_delay: Duration,

    /// Fraction of the delay added at random (0.0 disables jitter).
    pub jitter: f64,
}

impl RetryPolicy {
    /// Short delays: a local control plane is either back quickly or the
    /// host supervisor restarts us.
    pub fn fetch_default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: 0.1,
        }
    }

    /// Same as `fetch_default` without randomness.
    pub fn fixed(base_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 1.0,
            max_delay: base_delay,
            jitter: 0.0,
        }
    }

    /// Deterministic part of the delay: `base * multiplier^(attempts - 1)`,
    /// capped at `max_delay`.
    ///
    /// `attempts` is the number of consecutive failures so far (1-indexed);
    /// 0 is treated as 1.
    pub fn nominal_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(capped.max(0.0));
        delay.max(Duration::from_millis(1))
    }

    /// Delay to sleep before the next attempt, including jitter.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let nominal = self.nominal_delay(attempts);
        // NaN and infinite fractions disable jitter rather than panic.
        if !(self.jitter > 0.0 && self.jitter.is_finite()) {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter);
        nominal + nominal.mul_f64(factor)
    }
}
