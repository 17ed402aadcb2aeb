//! Phase timing for crash rounds.
//!
//! A round progresses through three phases and then starts over:
//! 1. **Waiting** - Bets accepted, crash point drawn and kept private
//! 2. **Running** - Multiplier climbs until the crash point or a force-crash
//! 3. **Crashed** - Final multiplier published, bets classified, history recorded
//!
//! Waiting and Crashed have fixed durations. Running lasts until the curve
//! reaches the crash point, so its length is a function of the draw.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use liftoff_execution::round_scheduler::PhaseConfig;
//!
//! let config = PhaseConfig::default();
//! config.validate()?;
//! let next_round_time = config.waiting_ends_at(now_ms);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::multiplier::DEFAULT_GROWTH_RATE;

pub const DEFAULT_WAITING_MS: u64 = 10_000;
pub const DEFAULT_CRASHED_MS: u64 = 5_000;
pub const DEFAULT_TICK_MS: u64 = 100;
pub const DEFAULT_RESTART_BACKOFF_MS: u64 = 5_000;
pub const DEFAULT_HISTORY_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_HISTORY_RETRY_BACKOFF_MS: u64 = 250;

/// Phase configuration with durations in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Duration of the waiting phase.
    pub waiting_ms: u64,
    /// Duration of the crashed phase.
    pub crashed_ms: u64,
    /// Interval between multiplier updates while running.
    pub tick_ms: u64,
    /// Curve growth rate `k`, per second.
    pub growth_rate: f64,
    /// Delay before the supervisor restarts a failed cycle.
    pub restart_backoff_ms: u64,
    /// Attempts per history write before it is deferred.
    pub history_retry_attempts: u32,
    /// Base delay between history write attempts.
    pub history_retry_backoff_ms: u64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            waiting_ms: DEFAULT_WAITING_MS,
            crashed_ms: DEFAULT_CRASHED_MS,
            tick_ms: DEFAULT_TICK_MS,
            growth_rate: DEFAULT_GROWTH_RATE,
            restart_backoff_ms: DEFAULT_RESTART_BACKOFF_MS,
            history_retry_attempts: DEFAULT_HISTORY_RETRY_ATTEMPTS,
            history_retry_backoff_ms: DEFAULT_HISTORY_RETRY_BACKOFF_MS,
        }
    }
}

impl PhaseConfig {
    /// Validate the configuration (all durations must be > 0).
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.waiting_ms == 0 {
            return Err("waiting_ms must be greater than zero");
        }
        if self.crashed_ms == 0 {
            return Err("crashed_ms must be greater than zero");
        }
        if self.tick_ms == 0 {
            return Err("tick_ms must be greater than zero");
        }
        if !self.growth_rate.is_finite() || self.growth_rate <= 0.0 {
            return Err("growth_rate must be a positive number");
        }
        if self.restart_backoff_ms == 0 {
            return Err("restart_backoff_ms must be greater than zero");
        }
        if self.history_retry_attempts == 0 {
            return Err("history_retry_attempts must be greater than zero");
        }
        Ok(())
    }

    pub fn waiting(&self) -> Duration {
        Duration::from_millis(self.waiting_ms)
    }

    pub fn crashed(&self) -> Duration {
        Duration::from_millis(self.crashed_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn history_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.history_retry_backoff_ms)
    }

    /// Epoch milliseconds at which a waiting phase entered at `now_ms` closes.
    pub fn waiting_ends_at(&self, now_ms: u64) -> u64 {
        now_ms.saturating_add(self.waiting_ms)
    }
}
