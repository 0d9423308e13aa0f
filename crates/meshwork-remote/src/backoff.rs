//! Reconnect backoff

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Reconnect timing, in milliseconds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Minimum delay before the first retry
    pub base_ms: f64,
    /// Upper bound of the random extra added to the first delay
    pub jitter_ms: f64,
    /// Growth factor applied to each following delay
    pub multiplier: f64,
    /// Cap on any delay
    pub max_ms: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            base_ms: 500.0,
            jitter_ms: 1000.0,
            multiplier: 1.8,
            max_ms: 15000.0,
        }
    }
}

impl ReconnectConfig {
    pub fn with_base_ms(mut self, base_ms: f64) -> Self {
        self.base_ms = base_ms;
        self
    }

    pub fn with_jitter_ms(mut self, jitter_ms: f64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_ms(mut self, max_ms: f64) -> Self {
        self.max_ms = max_ms;
        self
    }
}

/// Delay sequence between reconnect attempts
///
/// The first delay after a reset is `base + rand * jitter`; each later one
/// is the previous delay times `multiplier`, capped at `max`.
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    current_ms: f64,
}

impl ReconnectBackoff {
    pub fn new(config: ReconnectConfig) -> Self {
        ReconnectBackoff {
            config,
            current_ms: 0.0,
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// The last delay handed out, or zero after a reset
    pub fn current_ms(&self) -> f64 {
        self.current_ms
    }

    pub fn is_reset(&self) -> bool {
        self.current_ms == 0.0
    }

    pub fn next<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        self.current_ms = if self.is_reset() {
            self.config.base_ms + rng.gen::<f64>() * self.config.jitter_ms
        } else {
            (self.current_ms * self.config.multiplier).min(self.config.max_ms)
        };
        Duration::from_millis(self.current_ms as u64)
    }

    pub fn reset(&mut self) {
        self.current_ms = 0.0;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}
