//! Human-like pacing for browser interactions
//!
//! Controls dwell times between actions and staggered task starts.

mod pacer;

pub use pacer::{Pacer, PacingConfig, calculate_backoff_with_jitter, stagger_delay};
