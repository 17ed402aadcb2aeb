//! Shared round state.
//!
//! [`RoundStore`] is the contract the engine needs from whatever holds the
//! current round and the history log: an atomic overwrite, an atomic
//! field-scoped merge, an atomic snapshot read, a create-if-absent history
//! append, and a feed telling whether the round record exists at all.
//!
//! [`MemoryStore`] implements it in process. It also exposes the operations
//! of the external actors (placing bets, cashing out, the admin force-crash
//! and reset), and arbitrates the cash-out race: cash-out and the crash commit
//! take the same lock, so a cash-out is honoured iff it lands first.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use liftoff_types::{Bet, BetError, HistoryRecord, Round, RoundPatch, RoundStatus};
use thiserror::Error as ThisError;
use tokio::sync::{broadcast, watch};

const DEFAULT_UPDATES_BUFFER: usize = 1_024;

/// Most recent history records kept in memory.
pub const HISTORY_WINDOW: usize = 500;

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("round record is missing")]
    Missing,
    #[error(transparent)]
    Rejected(#[from] BetError),
}

/// Result of a history append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// A record with the same round id already existed; nothing was written.
    Duplicate,
}

pub trait RoundStore: Send + Sync {
    /// Replace the current round wholesale.
    fn create_round(&self, round: Round) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Merge engine-owned fields into the current round.
    ///
    /// Fails with [`StoreError::Missing`] when there is no round to merge into.
    fn update_round(&self, patch: RoundPatch)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Snapshot of the current round, if any.
    fn read_round(&self) -> impl Future<Output = Result<Option<Round>, StoreError>> + Send;

    /// Append a record unless one with the same round id exists.
    fn append_history(
        &self,
        record: HistoryRecord,
    ) -> impl Future<Output = Result<AppendOutcome, StoreError>> + Send;

    /// Whether the round record exists. Changes when it is created or removed.
    fn watch_round(&self) -> watch::Receiver<bool>;
}

#[derive(Default)]
struct State {
    round: Option<Round>,
    /// Oldest first, at most [`HISTORY_WINDOW`] records.
    history: VecDeque<HistoryRecord>,
}

impl State {
    /// Duplicates are detected within the window. Rounds are only ever
    /// re-recorded shortly after they crash, well inside it.
    fn append(&mut self, record: HistoryRecord) -> AppendOutcome {
        if self
            .history
            .iter()
            .any(|existing| existing.round_id == record.round_id)
        {
            return AppendOutcome::Duplicate;
        }
        if self.history.len() == HISTORY_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(record);
        AppendOutcome::Appended
    }
}

struct Inner {
    state: RwLock<State>,
    exists: watch::Sender<bool>,
    updates: broadcast::Sender<Round>,
}

/// In-process round store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATES_BUFFER)
    }
}

impl MemoryStore {
    pub fn new(updates_buffer: usize) -> Self {
        let (exists, _) = watch::channel(false);
        let (updates, _) = broadcast::channel(updates_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                exists,
                updates,
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.inner
            .state
            .read()
            .map_err(|_| StoreError::Unavailable("round state lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.inner
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("round state lock poisoned".to_string()))
    }

    fn set_exists(&self, exists: bool) {
        self.inner.exists.send_if_modified(|current| {
            let changed = *current != exists;
            *current = exists;
            changed
        });
    }

    /// Callers hold the write guard, so snapshots reach subscribers in the
    /// order the mutations were applied.
    fn publish(&self, _guard: &RwLockWriteGuard<'_, State>, round: Round) {
        // No receivers is fine.
        let _ = self.inner.updates.send(round);
    }

    /// Stream of round snapshots, one per mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<Round> {
        self.inner.updates.subscribe()
    }

    pub fn snapshot(&self) -> Result<Option<Round>, StoreError> {
        Ok(self.read()?.round.clone())
    }

    /// Most recent history records first.
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryRecord>, StoreError> {
        let state = self.read()?;
        Ok(state.history.iter().rev().take(limit).cloned().collect())
    }

    pub fn history_len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.history.len())
    }

    /// Load previously persisted records, oldest first.
    pub fn seed_history(&self, records: Vec<HistoryRecord>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        for record in records {
            state.append(record);
        }
        Ok(())
    }

    /// Place a bet for `user`. Only accepted while the round is waiting.
    pub fn place_bet(&self, user: &str, amount: f64) -> Result<Round, StoreError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(BetError::InvalidAmount { amount }.into());
        }
        let mut state = self.write()?;
        let round = state.round.as_mut().ok_or(BetError::NoRound)?;
        if round.status != RoundStatus::Waiting {
            return Err(BetError::BettingClosed { status: round.status }.into());
        }
        if round.bets.contains_key(user) {
            return Err(BetError::DuplicateBet { user: user.to_string() }.into());
        }
        round.bets.insert(user.to_string(), Bet::new(amount));
        let round = round.clone();
        self.publish(&state, round.clone());
        Ok(round)
    }

    /// Cash out `user` at the currently published multiplier.
    ///
    /// Rejected unless the round is running, so a request that lands after the
    /// crash commit is never honoured.
    pub fn cash_out(&self, user: &str) -> Result<Bet, StoreError> {
        let mut state = self.write()?;
        let round = state.round.as_mut().ok_or(BetError::NoRound)?;
        if round.status != RoundStatus::Running {
            return Err(BetError::NotRunning { status: round.status }.into());
        }
        let multiplier = round.multiplier;
        let bet = round
            .bets
            .get_mut(user)
            .ok_or_else(|| BetError::NoBet { user: user.to_string() })?;
        if bet.cashed_out {
            return Err(BetError::AlreadyCashedOut { user: user.to_string() }.into());
        }
        bet.cashed_out = true;
        bet.cashout_multiplier = Some(multiplier);
        let bet = bet.clone();
        let round = round.clone();
        self.publish(&state, round);
        Ok(bet)
    }

    /// Admin override. The engine picks it up on its next tick.
    pub fn set_force_crash(&self, force_crash: bool) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let round = state.round.as_mut().ok_or(StoreError::Missing)?;
        round.force_crash = force_crash;
        let round = round.clone();
        self.publish(&state, round);
        Ok(())
    }

    /// Delete the round record. Returns whether one existed.
    pub fn remove_round(&self) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        let removed = state.round.take().is_some();
        self.set_exists(false);
        Ok(removed)
    }
}

impl RoundStore for MemoryStore {
    async fn create_round(&self, round: Round) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.round = Some(round.clone());
        self.set_exists(true);
        self.publish(&state, round);
        Ok(())
    }

    async fn update_round(&self, patch: RoundPatch) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let round = state.round.as_mut().ok_or(StoreError::Missing)?;
        round.apply(&patch);
        let round = round.clone();
        self.publish(&state, round);
        Ok(())
    }

    async fn read_round(&self) -> Result<Option<Round>, StoreError> {
        self.snapshot()
    }

    async fn append_history(&self, record: HistoryRecord) -> Result<AppendOutcome, StoreError> {
        Ok(self.write()?.append(record))
    }

    fn watch_round(&self) -> watch::Receiver<bool> {
        self.inner.exists.subscribe()
    }
}
