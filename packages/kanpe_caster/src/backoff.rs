//! Jittered exponential backoff for reconnect attempts.

use std::time::Duration;

use rand::Rng;

/// Backoff shape: starts at `initial`, multiplies by `factor` per attempt,
/// caps at `max`, and spreads each delay by ±`jitter` so a fleet of
/// casters doesn't stampede a restarted hub.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
    /// Fractional jitter; 0.2 means each delay lands in [0.8x, 1.2x].
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

/// Stateful delay sequence; `reset` on every successful welcome.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial;
        Self { config, current }
    }

    /// The next delay to sleep, advancing the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = Duration::min(base.mul_f64(self.config.factor), self.config.max);
        if self.config.jitter <= 0.0 {
            return base;
        }
        let spread = rand::rng().random_range(-self.config.jitter..=self.config.jitter);
        base.mul_f64(1.0 + spread)
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn doubles_until_cap() {
        let mut backoff = Backoff::new(no_jitter());
        let secs: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(secs, [1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_in_envelope() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        for expected_base in [1.0f64, 2.0, 4.0] {
            let delay = backoff.next_delay().as_secs_f64();
            assert!(
                delay >= expected_base * 0.8 - 1e-9 && delay <= expected_base * 1.2 + 1e-9,
                "delay {delay} outside ±20% of {expected_base}"
            );
        }
    }
}
