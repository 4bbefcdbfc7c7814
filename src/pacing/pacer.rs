//! Pacing engine with randomized dwells and jitter
//!
//! Simulates human reading/browsing rhythm between browser actions.

use std::time::Duration;
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

/// Pacing configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingConfig {
    /// Minimum dwell between actions in milliseconds
    pub min_delay_ms: u64,
    /// Maximum dwell between actions in milliseconds
    pub max_delay_ms: u64,
    /// Add jitter to dwells (percentage, 0-100)
    pub jitter_percent: u8,
    /// Minimum scroll passes per page
    pub min_scroll_passes: u32,
    /// Maximum scroll passes per page
    pub max_scroll_passes: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 800,     // just under a second minimum
            max_delay_ms: 5000,    // 5 seconds maximum
            jitter_percent: 20,    // 20% jitter
            min_scroll_passes: 1,
            max_scroll_passes: 4,
        }
    }
}

impl PacingConfig {
    /// Midpoint dwell, clamped to the configured range
    pub fn base_delay_ms(&self) -> u64 {
        let mid = (self.min_delay_ms + self.max_delay_ms) / 2;
        mid.clamp(self.min_delay_ms, self.max_delay_ms)
    }
}

/// Pacing engine for a single worker task
pub struct Pacer {
    config: PacingConfig,
}

impl Pacer {
    /// Create a new pacer with the given config
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    /// Get current configuration
    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Pick the next dwell duration with jitter
    fn next_dwell(&self) -> Duration {
        let min = self.config.min_delay_ms.min(self.config.max_delay_ms);
        let max = self.config.max_delay_ms.max(self.config.min_delay_ms);

        let base = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };

        let jitter_range = (base as f64 * self.config.jitter_percent as f64 / 100.0) as u64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range * 2) as i64 - jitter_range as i64
        } else {
            0
        };

        let final_delay = (base as i64 + jitter).max(min as i64) as u64;

        debug!("Dwell: {}ms (base: {}ms, jitter: {}ms)", final_delay, base, jitter);
        Duration::from_millis(final_delay)
    }

    /// Sleep for one randomized dwell
    pub async fn dwell(&self) {
        sleep(self.next_dwell()).await;
    }

    /// Pick how many scroll passes to perform on the current page
    pub fn scroll_passes(&self) -> u32 {
        let min = self.config.min_scroll_passes.min(self.config.max_scroll_passes);
        let max = self.config.max_scroll_passes.max(self.config.min_scroll_passes);
        if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        }
    }
}

/// Stagger delay for the nth task of a run (index 0 starts immediately)
pub fn stagger_delay(index: usize, between: Option<Duration>) -> Duration {
    match between {
        Some(d) => d * index as u32,
        None => Duration::ZERO,
    }
}

/// Calculate delay with exponential backoff and jitter (standalone function)
pub fn calculate_backoff_with_jitter(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let base_delay = base_ms * 2u64.pow(attempt.saturating_sub(1).min(5));
    let capped_delay = base_delay.min(max_ms);

    // Add ±20% jitter
    let jitter_range = capped_delay / 5;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range * 2) as i64 - jitter_range as i64
    } else {
        0
    };

    Duration::from_millis((capped_delay as i64 + jitter).max(0) as u64)
}
