//! Shared types for the liftoff crash engine.
//!
//! These are the shapes the engine publishes to the shared round store and to
//! the append-only history. The crash point of an in-flight round is not part
//! of any type in this crate: it only leaves the engine after the round has
//! crashed, inside a [`FairnessReveal`] or as `crashedAt`.

pub mod bet;
pub mod fairness;
pub mod history;
pub mod round;

pub use bet::{Bet, BetError, BetOutcome};
pub use fairness::FairnessReveal;
pub use history::HistoryRecord;
pub use round::{Round, RoundPatch, RoundStatus};

/// Smallest multiplier a round can publish.
pub const MIN_MULTIPLIER: f64 = 1.00;

/// Guards against `x * 100.0` landing a hair below an exact cent.
const CENT_EPSILON: f64 = 1e-9;

/// Round a multiplier to two decimal places (display precision).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Truncate a multiplier to two decimal places.
///
/// Used for values published while a round is running, so a published value
/// never exceeds the underlying curve.
pub fn floor2(value: f64) -> f64 {
    (value * 100.0 + CENT_EPSILON).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(2.0), 2.0);
        assert_eq!(round2(49.999), 50.0);
    }

    #[test]
    fn test_floor2() {
        assert_eq!(floor2(1.019), 1.01);
        assert_eq!(floor2(2.0), 2.0);
        assert_eq!(floor2(1.15), 1.15);
        assert_eq!(floor2(1.0), 1.0);
    }
}
