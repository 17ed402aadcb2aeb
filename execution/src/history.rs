//! Round history recorder.
//!
//! Exactly one record is appended per completed round. Appends are retried
//! with jittered backoff; a record that still fails stays queued and is
//! flushed, in round order, before the next round is minted. Duplicate
//! appends (a restart re-recording a round) count as success.

use std::collections::VecDeque;
use std::time::Duration;

use liftoff_types::HistoryRecord;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error as ThisError;
use tracing::{debug, info, warn};

use crate::backoff::{jittered_backoff, next_backoff};
use crate::store::{AppendOutcome, RoundStore, StoreError};

/// Cap on retry delay growth, as a multiple of the base delay.
const MAX_BACKOFF_FACTOR: u32 = 8;

#[derive(Debug, ThisError)]
pub enum HistoryError {
    #[error("history write for round {round_id} failed after {attempts} attempts")]
    Exhausted {
        round_id: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

pub struct HistoryRecorder {
    attempts: u32,
    backoff: Duration,
    pending: VecDeque<HistoryRecord>,
    rng: StdRng,
}

impl HistoryRecorder {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
            pending: VecDeque::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Records waiting for a successful append.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue `record` behind any deferred records and flush.
    pub async fn record<S: RoundStore>(
        &mut self,
        store: &S,
        record: HistoryRecord,
    ) -> Result<(), HistoryError> {
        self.pending.push_back(record);
        self.flush(store).await
    }

    /// Append deferred records oldest first, stopping at the first failure.
    pub async fn flush<S: RoundStore>(&mut self, store: &S) -> Result<(), HistoryError> {
        while let Some(record) = self.pending.front().cloned() {
            let round_id = record.round_id.clone();
            let crashed_at = record.crashed_at;
            match self.append_with_retry(store, record).await? {
                AppendOutcome::Appended => {
                    info!(%round_id, crashed_at, "round recorded");
                }
                AppendOutcome::Duplicate => {
                    debug!(%round_id, "round already recorded");
                }
            }
            self.pending.pop_front();
        }
        Ok(())
    }

    async fn append_with_retry<S: RoundStore>(
        &mut self,
        store: &S,
        record: HistoryRecord,
    ) -> Result<AppendOutcome, HistoryError> {
        let max_backoff = self.backoff.saturating_mul(MAX_BACKOFF_FACTOR);
        let mut backoff = self.backoff;
        let mut attempt = 1;
        loop {
            match store.append_history(record.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if attempt < self.attempts => {
                    let delay = jittered_backoff(&mut self.rng, backoff);
                    warn!(
                        round_id = %record.round_id,
                        attempt,
                        ?err,
                        delay_ms = delay.as_millis() as u64,
                        "history write failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    backoff = next_backoff(backoff, max_backoff);
                    attempt += 1;
                }
                Err(source) => {
                    return Err(HistoryError::Exhausted {
                        round_id: record.round_id,
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }
}
