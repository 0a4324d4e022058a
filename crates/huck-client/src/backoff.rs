use std::time::Duration;

use rand::Rng;

/// Exponential resubscription delay with jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
    /// Fraction of the delay added or removed at random, 0.0..=1.0.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt. Grows until `max`, then stays there.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let scale = 1.0 + rand::rng().random_range(-jitter..=jitter);
        base.mul_f64(scale).min(self.config.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn base_delay(&self) -> Duration {
        let factor = self.config.factor.max(1);
        let multiplier = factor.checked_pow(self.attempt).unwrap_or(u32::MAX);
        self.config
            .initial
            .checked_mul(multiplier)
            .unwrap_or(self.config.max)
            .min(self.config.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            factor: 2,
            jitter: 0.0,
        }
    }

    #[test]
    fn delays_double_then_cap() {
        let mut backoff = Backoff::new(no_jitter());
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, [100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(BackoffConfig {
            jitter: 0.2,
            ..no_jitter()
        });
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay().as_millis();
            assert!((79..=120).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(no_jitter());
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_millis(1000));
        }
    }
}
