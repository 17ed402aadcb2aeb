use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::RoundStatus;

/// A single user's stake in a round.
///
/// Bets are written by external actors. Once `cashed_out` is set, or the
/// round has crashed, a bet is never mutated again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub amount: f64,
    #[serde(default)]
    pub cashed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cashout_multiplier: Option<f64>,
}

impl Bet {
    pub fn new(amount: f64) -> Self {
        Self {
            amount,
            cashed_out: false,
            cashout_multiplier: None,
        }
    }

    /// Classify the bet once its round has crashed.
    pub fn outcome(&self) -> BetOutcome {
        match (self.cashed_out, self.cashout_multiplier) {
            (true, Some(multiplier)) => BetOutcome::Won { multiplier },
            _ => BetOutcome::Lost,
        }
    }
}

/// Post-crash classification of a bet. Payouts are not computed here.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BetOutcome {
    Won { multiplier: f64 },
    Lost,
}

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum BetError {
    #[error("no round is active")]
    NoRound,
    #[error("bets are closed (status={status})")]
    BettingClosed { status: RoundStatus },
    #[error("user {user} already has a bet in this round")]
    DuplicateBet { user: String },
    #[error("bet amount must be a positive number (got {amount})")]
    InvalidAmount { amount: f64 },
    #[error("user {user} has no bet in this round")]
    NoBet { user: String },
    #[error("user {user} already cashed out")]
    AlreadyCashedOut { user: String },
    #[error("cash out requires a running round (status={status})")]
    NotRunning { status: RoundStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome() {
        let lost = Bet::new(10.0);
        assert_eq!(lost.outcome(), BetOutcome::Lost);

        let won = Bet {
            amount: 10.0,
            cashed_out: true,
            cashout_multiplier: Some(1.5),
        };
        assert_eq!(won.outcome(), BetOutcome::Won { multiplier: 1.5 });
    }

    #[test]
    fn test_bet_shape() {
        let json = serde_json::to_value(Bet::new(25.0)).unwrap();
        assert_eq!(json, serde_json::json!({ "amount": 25.0, "cashedOut": false }));

        let parsed: Bet =
            serde_json::from_str(r#"{"amount":5,"cashedOut":true,"cashoutMultiplier":2.25}"#)
                .unwrap();
        assert_eq!(parsed.cashout_multiplier, Some(2.25));
    }
}
