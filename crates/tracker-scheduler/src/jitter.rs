//! Random start delay for scheduled cycles.
//!
//! Many cores share the same cron expressions; a small random delay keeps
//! their trackers from hitting the repository in the same instant.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JitterConfig {
    /// Maximum delay in seconds (0 = none)
    pub max_jitter_secs: u64,
}

impl JitterConfig {
    pub fn new(max_jitter_secs: u64) -> Self {
        Self { max_jitter_secs }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// A delay in `[0, max_jitter_secs)`, or zero when disabled.
    pub fn generate_jitter(&self) -> Duration {
        if self.max_jitter_secs == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::rng().random_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(jitter_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_jitter_secs > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_jitter_is_immediate() {
        let config = JitterConfig::none();
        assert_eq!(config.generate_jitter(), Duration::ZERO);
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_jitter_within_bounds_and_varied() {
        let config = JitterConfig::new(10);
        let samples: Vec<Duration> = (0..500).map(|_| config.generate_jitter()).collect();
        assert!(samples.iter().all(|s| *s < Duration::from_secs(10)));

        let unique: std::collections::HashSet<_> = samples.iter().map(|d| d.as_millis()).collect();
        assert!(unique.len() > 1);
    }
}
