//! Round state machine.
//!
//! [`RoundEngine::run_cycle`] drives one round through Waiting, Running and
//! Crashed against a [`RoundStore`]. The engine is the only writer of the
//! phase fields; it never holds a copy of the round across a suspension point
//! without reading it back from the store.
//!
//! ## Running
//!
//! Every tick re-reads the round before publishing, so a force-crash is picked
//! up within one tick. The multiplier is recomputed from elapsed time, floored
//! to two decimals, and never published below a value already published.
//!
//! ## Crashed
//!
//! The final multiplier is committed first. Only then are the bets read back
//! and classified, so any cash-out the store accepted before the commit is a
//! win and nothing after it can be.

use std::time::{SystemTime, UNIX_EPOCH};

use liftoff_types::{
    floor2, round2, BetOutcome, HistoryRecord, Round, RoundPatch, MIN_MULTIPLIER,
};
use thiserror::Error as ThisError;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::fairness::{DrawSource, FairnessError, FairnessGenerator};
use crate::history::HistoryRecorder;
use crate::multiplier::checked_multiplier_at;
use crate::round_scheduler::PhaseConfig;
use crate::store::{RoundStore, StoreError};

#[derive(Debug, ThisError)]
pub enum EngineError {
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Fairness(#[from] FairnessError),
    #[error("round record vanished mid-cycle")]
    RoundVanished,
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing => Self::RoundVanished,
            other => Self::Store(other),
        }
    }
}

/// What one completed cycle produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundSummary {
    pub round_id: String,
    pub crashed_at: f64,
    pub forced: bool,
    pub won: usize,
    pub lost: usize,
}

pub struct RoundEngine<S, D = FairnessGenerator> {
    store: S,
    phases: PhaseConfig,
    draws: D,
    recorder: HistoryRecorder,
}

impl<S: RoundStore, D: DrawSource> RoundEngine<S, D> {
    pub fn new(store: S, phases: PhaseConfig, draws: D) -> Self {
        let recorder =
            HistoryRecorder::new(phases.history_retry_attempts, phases.history_retry_backoff());
        Self {
            store,
            phases,
            draws,
            recorder,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn phases(&self) -> &PhaseConfig {
        &self.phases
    }

    /// History records still waiting for a successful append.
    pub fn pending_history(&self) -> usize {
        self.recorder.pending()
    }

    /// Run one full round, from minting its id to the end of the crashed window.
    pub async fn run_cycle(&mut self) -> Result<RoundSummary, EngineError> {
        if self.recorder.pending() > 0 {
            if let Err(err) = self.recorder.flush(&self.store).await {
                warn!(?err, pending = self.recorder.pending(), "deferred history still failing");
            }
        }

        // Waiting
        let round_id = Uuid::now_v7().to_string();
        let draw = self.draws.draw()?;
        let commitment = draw.commitment();
        let next_round_time = self.phases.waiting_ends_at(now_ms());
        self.store
            .create_round(Round::waiting(round_id.clone(), next_round_time, commitment.clone()))
            .await?;
        info!(%round_id, next_round_time, ?commitment, "round waiting");
        sleep(self.phases.waiting()).await;

        // Running
        let start_time = now_ms();
        self.store.update_round(RoundPatch::running(start_time)).await?;
        info!(%round_id, start_time, "round running");
        let (final_multiplier, forced) = self.run_ticks(&round_id, draw.crash_point()).await?;

        // Crashed
        let crashed_at = round2(final_multiplier);
        self.store
            .update_round(RoundPatch::crashed(crashed_at, draw.reveal()))
            .await?;
        info!(%round_id, crashed_at, forced, "round crashed");

        let record = HistoryRecord {
            round_id: round_id.clone(),
            crashed_at,
            timestamp: now_ms(),
            reveal: draw.reveal(),
        };
        if let Err(err) = self.recorder.record(&self.store, record).await {
            warn!(?err, pending = self.recorder.pending(), "history write deferred");
        }

        let round = self.current_round(&round_id).await?;
        let (won, lost) = classify(&round);
        info!(%round_id, won, lost, "bets settled");

        sleep(self.phases.crashed()).await;
        Ok(RoundSummary {
            round_id,
            crashed_at,
            forced,
            won,
            lost,
        })
    }

    /// Tick until the curve reaches `crash_point` or a force-crash is observed.
    /// Returns the final multiplier and whether the round was forced.
    async fn run_ticks(&self, round_id: &str, crash_point: f64) -> Result<(f64, bool), EngineError> {
        let started = Instant::now();
        let mut published = MIN_MULTIPLIER;
        loop {
            let round = self.current_round(round_id).await?;
            if round.force_crash {
                debug!(%round_id, multiplier = published, "force-crash observed");
                return Ok((published, true));
            }

            let elapsed = started.elapsed().as_secs_f64();
            let multiplier = match checked_multiplier_at(elapsed, self.phases.growth_rate) {
                Some(multiplier) => multiplier,
                None => {
                    warn!(%round_id, elapsed, "invalid multiplier; clamping to 1.00");
                    MIN_MULTIPLIER
                }
            };
            if multiplier >= crash_point {
                return Ok((crash_point, false));
            }

            published = floor2(multiplier).max(published);
            self.store.update_round(RoundPatch::tick(published)).await?;
            trace!(%round_id, multiplier = published, "tick");
            sleep(self.phases.tick()).await;
        }
    }

    /// The current round, provided it is still the one this cycle created.
    async fn current_round(&self, round_id: &str) -> Result<Round, EngineError> {
        match self.store.read_round().await? {
            Some(round) if round.round_id == round_id => Ok(round),
            _ => Err(EngineError::RoundVanished),
        }
    }
}

/// Log each bet's outcome and count winners and losers.
fn classify(round: &Round) -> (usize, usize) {
    let mut won = 0;
    let mut lost = 0;
    for (user, bet) in &round.bets {
        match bet.outcome() {
            BetOutcome::Won { multiplier } => {
                won += 1;
                info!(round_id = %round.round_id, %user, amount = bet.amount, multiplier, "bet won");
            }
            BetOutcome::Lost => {
                lost += 1;
                info!(round_id = %round.round_id, %user, amount = bet.amount, "bet lost");
            }
        }
    }
    (won, lost)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use liftoff_types::Bet;

    #[test]
    fn test_missing_maps_to_vanished() {
        assert!(matches!(
            EngineError::from(StoreError::Missing),
            EngineError::RoundVanished
        ));
        assert!(matches!(
            EngineError::from(StoreError::Unavailable("down".to_string())),
            EngineError::Store(_)
        ));
    }

    #[test]
    fn test_classify() {
        let mut round = Round::waiting("r-1".to_string(), 0, None);
        round.bets.insert("alice".to_string(), Bet::new(10.0));
        round.bets.insert(
            "bob".to_string(),
            Bet {
                amount: 5.0,
                cashed_out: true,
                cashout_multiplier: Some(1.4),
            },
        );
        assert_eq!(classify(&round), (1, 1));
    }
}
