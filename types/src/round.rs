use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Bet, FairnessReveal, MIN_MULTIPLIER};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Waiting,
    Running,
    Crashed,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Waiting => "waiting",
            RoundStatus::Running => "running",
            RoundStatus::Crashed => "crashed",
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The published state of the current round.
///
/// The engine writes `status`, `multiplier`, `start_time`, `crashed_at` and
/// `reveal`. External actors write `bets` and `force_crash`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub round_id: String,
    pub status: RoundStatus,
    pub multiplier: f64,
    /// Epoch milliseconds at which the waiting window closes.
    pub next_round_time: u64,
    /// Epoch milliseconds at which the round started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crashed_at: Option<f64>,
    #[serde(default)]
    pub bets: BTreeMap<String, Bet>,
    #[serde(default)]
    pub force_crash: bool,
    /// `sha256(server_seed)` for hash-committed rounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reveal: Option<FairnessReveal>,
}

impl Round {
    /// Fresh state for a round entering its waiting window.
    pub fn waiting(round_id: String, next_round_time: u64, commitment: Option<String>) -> Self {
        Self {
            round_id,
            status: RoundStatus::Waiting,
            multiplier: MIN_MULTIPLIER,
            next_round_time,
            start_time: None,
            crashed_at: None,
            bets: BTreeMap::new(),
            force_crash: false,
            commitment,
            reveal: None,
        }
    }

    /// Merge engine-owned fields. `bets` and `force_crash` are never touched.
    pub fn apply(&mut self, patch: &RoundPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(multiplier) = patch.multiplier {
            self.multiplier = multiplier;
        }
        if let Some(start_time) = patch.start_time {
            self.start_time = Some(start_time);
        }
        if let Some(crashed_at) = patch.crashed_at {
            self.crashed_at = Some(crashed_at);
        }
        if let Some(reveal) = &patch.reveal {
            self.reveal = Some(reveal.clone());
        }
    }
}

/// A field-scoped update to the current round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoundPatch {
    pub status: Option<RoundStatus>,
    pub multiplier: Option<f64>,
    pub start_time: Option<u64>,
    pub crashed_at: Option<f64>,
    pub reveal: Option<FairnessReveal>,
}

impl RoundPatch {
    pub fn running(start_time: u64) -> Self {
        Self {
            status: Some(RoundStatus::Running),
            multiplier: Some(MIN_MULTIPLIER),
            start_time: Some(start_time),
            ..Default::default()
        }
    }

    pub fn tick(multiplier: f64) -> Self {
        Self {
            multiplier: Some(multiplier),
            ..Default::default()
        }
    }

    pub fn crashed(final_multiplier: f64, reveal: Option<FairnessReveal>) -> Self {
        Self {
            status: Some(RoundStatus::Crashed),
            multiplier: Some(final_multiplier),
            crashed_at: Some(final_multiplier),
            reveal,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_keeps_bets_and_force_crash() {
        let mut round = Round::waiting("r-1".to_string(), 10_000, None);
        round.bets.insert("alice".to_string(), Bet::new(10.0));
        round.force_crash = true;

        round.apply(&RoundPatch::running(10_000));
        round.apply(&RoundPatch::tick(1.25));

        assert_eq!(round.status, RoundStatus::Running);
        assert_eq!(round.multiplier, 1.25);
        assert_eq!(round.start_time, Some(10_000));
        assert_eq!(round.bets.len(), 1);
        assert!(round.force_crash);
    }

    #[test]
    fn test_crashed_patch() {
        let mut round = Round::waiting("r-1".to_string(), 10_000, None);
        round.apply(&RoundPatch::crashed(2.0, None));
        assert_eq!(round.status, RoundStatus::Crashed);
        assert_eq!(round.multiplier, 2.0);
        assert_eq!(round.crashed_at, Some(2.0));
    }

    #[test]
    fn test_published_shape() {
        let round = Round::waiting("r-1".to_string(), 10_000, Some("ab".to_string()));
        let json = serde_json::to_value(&round).unwrap();
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["multiplier"], 1.0);
        assert_eq!(json["nextRoundTime"], 10_000);
        assert_eq!(json["roundId"], "r-1");
        assert_eq!(json["forceCrash"], false);
        assert_eq!(json["commitment"], "ab");
        assert!(json.get("crashPoint").is_none());
        assert!(json.get("startTime").is_none());
    }
}
