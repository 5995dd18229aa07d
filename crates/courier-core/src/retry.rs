use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    jitter_ratio: f64,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            multiplier: 2.0,
            jitter_ratio: 0.0,
            max_retries: 4,
        }
    }

    /// Backoff used by the send pipeline: 1s doubling up to 8s, 10% jitter,
    /// four retries after the initial attempt.
    pub fn send_default() -> Self {
        Self::new(1_000, 8_000)
            .with_multiplier(2.0)
            .with_jitter(0.1)
            .with_max_retries(4)
    }

    /// Backoff used by the poll loop: 3s growing by 1.5 up to 30s, no jitter.
    pub fn poll_default() -> Self {
        Self::new(3_000, 30_000).with_multiplier(1.5)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `base * multiplier^exponent`, raised to the retry hint, clamped to
    /// `[base, max]`.
    pub fn delay_for_exponent(&self, exponent: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let scaled = self.base_delay_ms as f64 * self.multiplier.powi(exponent.min(64) as i32);
        let calculated = if scaled.is_finite() {
            scaled as u64
        } else {
            u64::MAX
        };
        let hinted = retry_after_hint_ms.unwrap_or(0);
        let bounded = calculated
            .max(hinted)
            .clamp(self.base_delay_ms, self.max_delay_ms);
        Duration::from_millis(bounded)
    }

    /// Delay before retry number `attempt` (1-based): `base * multiplier^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        self.delay_for_exponent(attempt.saturating_sub(1), retry_after_hint_ms)
    }

    /// `delay_for_attempt` with symmetric random jitter of `jitter_ratio`
    /// applied to the computed backoff. The result never drops below the
    /// retry hint and never exceeds `max`.
    pub fn jittered_delay_for_attempt<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        retry_after_hint_ms: Option<u64>,
        rng: &mut R,
    ) -> Duration {
        let nominal = self.delay_for_attempt(attempt, None).as_millis() as f64;
        let jittered = if self.jitter_ratio > 0.0 {
            let spread = nominal * self.jitter_ratio;
            (nominal + rng.gen_range(-spread..=spread)).max(0.0)
        } else {
            nominal
        };
        let bounded = (jittered.round() as u64)
            .max(retry_after_hint_ms.unwrap_or(0))
            .min(self.max_delay_ms);
        Duration::from_millis(bounded)
    }

    /// Whether `attempts` made so far exhaust the budget of one initial
    /// attempt plus `max_retries` retries.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::send_default()
    }
}
