// core/src/retry.rs

//! Retry timing: a fixed-delay bounded policy for startup checks and a capped
//! exponential backoff with jitter for reconnects.

use rand::Rng;
use std::time::Duration;

/// `attempts` tries, `delay` apart. Used where giving up is the right answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRetry {
  pub attempts: u32,
  pub delay: Duration,
}

impl FixedRetry {
  pub fn new(attempts: u32, delay: Duration) -> Self {
    Self { attempts, delay }
  }

  /// At least one attempt is always made.
  pub fn effective_attempts(&self) -> u32 {
    self.attempts.max(1)
  }
}

/// Delay for attempt `n` (0-based) is `min(initial * multiplier^n, max)`,
/// reduced by up to 25% when jitter is on so it never exceeds `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
  pub initial: Duration,
  pub max: Duration,
  pub multiplier: f64,
  pub jitter: bool,
}

impl Default for ExponentialBackoff {
  fn default() -> Self {
    Self {
      initial: Duration::from_secs(1),
      max: Duration::from_secs(30),
      multiplier: 2.0,
      jitter: true,
    }
  }
}

impl ExponentialBackoff {
  pub fn new(initial: Duration, max: Duration) -> Self {
    Self {
      initial,
      max,
      ..Self::default()
    }
  }

  /// Millisecond delays without jitter, for tests.
  pub fn fast() -> Self {
    Self {
      initial: Duration::from_millis(1),
      max: Duration::from_millis(20),
      multiplier: 2.0,
      jitter: false,
    }
  }

  pub fn delay_for(&self, attempt: u32) -> Duration {
    let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
      self.multiplier
    } else {
      1.0
    };
    let max_secs = self.max.as_secs_f64();
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = self.initial.as_secs_f64() * multiplier.powi(exponent);
    let capped = if raw.is_finite() { raw.min(max_secs) } else { max_secs };

    let secs = if self.jitter && capped > 0.0 {
      let cut = rand::thread_rng().gen_range(0.0..=0.25);
      capped * (1.0 - cut)
    } else {
      capped
    };
    Duration::from_secs_f64(secs.max(0.0))
  }
}
