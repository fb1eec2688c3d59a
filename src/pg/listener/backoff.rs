//! Exponential backoff for reconnect attempts

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff calculator with jitter
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay.min(config.max_delay);
        Self {
            config,
            current: initial,
            attempt: 0,
        }
    }

    /// Delay before the next attempt. The first call returns the initial
    /// delay; each later call grows it until the maximum.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base = self.current.as_secs_f64();
        let delay = if self.config.jitter_factor > 0.0 && base > 0.0 {
            let jitter_range = base * self.config.jitter_factor;
            base + rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            base
        };

        let grown = (base * self.config.multiplier).min(self.config.max_delay.as_secs_f64());
        self.current = Duration::from_secs_f64(grown.max(0.0));

        Duration::from_secs_f64(delay.clamp(0.0, self.config.max_delay.as_secs_f64()))
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay.min(self.config.max_delay);
        self.attempt = 0;
    }

    /// Attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
