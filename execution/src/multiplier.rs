//! Multiplier curve.
//!
//! The multiplier is a pure function of time since the round started running:
//! `e^(k * t)`. It is recomputed from elapsed time on every tick rather than
//! accumulated, so tick latency never introduces drift.

use std::time::Duration;

use liftoff_types::MIN_MULTIPLIER;

/// Default growth rate `k`, per second.
pub const DEFAULT_GROWTH_RATE: f64 = 0.06;

/// Multiplier after `elapsed_secs`, or `None` when the input is unusable
/// (negative or non-finite elapsed time).
pub fn checked_multiplier_at(elapsed_secs: f64, growth_rate: f64) -> Option<f64> {
    if !elapsed_secs.is_finite() || elapsed_secs < 0.0 {
        return None;
    }
    let value = (growth_rate * elapsed_secs).exp();
    if value.is_nan() || value < MIN_MULTIPLIER {
        return None;
    }
    Some(value.min(f64::MAX))
}

/// Multiplier after `elapsed_secs`, clamped to 1.00 for unusable input.
pub fn multiplier_at(elapsed_secs: f64, growth_rate: f64) -> f64 {
    checked_multiplier_at(elapsed_secs, growth_rate).unwrap_or(MIN_MULTIPLIER)
}

/// Time the curve needs to reach `target`.
pub fn time_to_reach(target: f64, growth_rate: f64) -> Duration {
    if target <= MIN_MULTIPLIER || growth_rate <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(target.ln() / growth_rate)
}
