//! Perpetual driver for the round engine.
//!
//! Each cycle runs to completion, fails, or is cut short because the round
//! record disappeared from the store. A failed cycle is abandoned (never
//! resumed) and a fresh one starts after a jittered delay bounded by the
//! configured restart backoff. A vanished round restarts immediately, also
//! when it vanishes during that delay.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::backoff::jittered_backoff;
use crate::engine::{EngineError, RoundEngine, RoundSummary};
use crate::fairness::{DrawSource, FairnessGenerator};
use crate::store::RoundStore;

/// How a supervised cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(RoundSummary),
    /// The round record was removed externally; restarted without delay.
    Reset,
    /// The cycle failed; restarted after `delay`.
    Failed { error: EngineError, delay: Duration },
}

pub struct Supervisor<S, D = FairnessGenerator> {
    engine: RoundEngine<S, D>,
    rng: StdRng,
}

impl<S: RoundStore, D: DrawSource> Supervisor<S, D> {
    pub fn new(engine: RoundEngine<S, D>) -> Self {
        Self {
            engine,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn engine(&self) -> &RoundEngine<S, D> {
        &self.engine
    }

    /// Run cycles forever.
    pub async fn run(mut self) {
        info!("round supervisor started");
        loop {
            self.run_once().await;
        }
    }

    /// Run one cycle under the restart policy, including any restart delay.
    pub async fn run_once(&mut self) -> CycleOutcome {
        let removed = round_removed(self.engine.store().watch_round());
        let result = tokio::select! {
            result = self.engine.run_cycle() => result,
            _ = removed => {
                warn!("round record removed; restarting cycle");
                return CycleOutcome::Reset;
            }
        };

        match result {
            Ok(summary) => CycleOutcome::Completed(summary),
            Err(EngineError::RoundVanished) => {
                warn!("round record vanished; restarting cycle");
                CycleOutcome::Reset
            }
            Err(error) => {
                let delay = jittered_backoff(&mut self.rng, self.engine.phases().restart_backoff());
                error!(?error, delay_ms = delay.as_millis() as u64, "round cycle failed; restarting");
                let removed = round_removed(self.engine.store().watch_round());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => CycleOutcome::Failed { error, delay },
                    _ = removed => {
                        warn!("round record removed during backoff; restarting cycle");
                        CycleOutcome::Reset
                    }
                }
            }
        }
    }
}

/// Resolves once the round record goes from present to absent.
async fn round_removed(mut exists: watch::Receiver<bool>) {
    let created = exists.wait_for(|exists| *exists).await.is_ok();
    let removed = created && exists.wait_for(|exists| !*exists).await.is_ok();
    if !removed {
        // Store dropped its sender; nothing left to watch.
        std::future::pending::<()>().await;
    }
}
