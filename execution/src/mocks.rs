//! Test doubles for the round store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use liftoff_types::{HistoryRecord, Round, RoundPatch};
use tokio::sync::watch;

use crate::fairness::{CrashDraw, DrawSource, FairnessError};
use crate::store::{AppendOutcome, MemoryStore, RoundStore, StoreError};

#[derive(Default)]
struct Failures {
    creates: AtomicU32,
    updates: AtomicU32,
    reads: AtomicU32,
    history: AtomicU32,
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

fn injected(op: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {op} failure"))
}

/// Wraps a [`MemoryStore`], failing the next N calls of an operation on
/// demand and recording every patch the engine writes.
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    failures: Arc<Failures>,
    patches: Arc<Mutex<Vec<RoundPatch>>>,
    created: Arc<Mutex<Vec<Round>>>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failures: Arc::new(Failures::default()),
            patches: Arc::new(Mutex::new(Vec::new())),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_creates(&self, count: u32) {
        self.failures.creates.store(count, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, count: u32) {
        self.failures.updates.store(count, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, count: u32) {
        self.failures.reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_history_writes(&self, count: u32) {
        self.failures.history.store(count, Ordering::SeqCst);
    }

    /// Every patch successfully merged, in order.
    pub fn patches(&self) -> Vec<RoundPatch> {
        self.patches.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Every round successfully created, in order.
    pub fn created(&self) -> Vec<Round> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl RoundStore for FlakyStore {
    async fn create_round(&self, round: Round) -> Result<(), StoreError> {
        if take(&self.failures.creates) {
            return Err(injected("create"));
        }
        self.inner.create_round(round.clone()).await?;
        if let Ok(mut created) = self.created.lock() {
            created.push(round);
        }
        Ok(())
    }

    async fn update_round(&self, patch: RoundPatch) -> Result<(), StoreError> {
        if take(&self.failures.updates) {
            return Err(injected("update"));
        }
        self.inner.update_round(patch.clone()).await?;
        if let Ok(mut patches) = self.patches.lock() {
            patches.push(patch);
        }
        Ok(())
    }

    async fn read_round(&self) -> Result<Option<Round>, StoreError> {
        if take(&self.failures.reads) {
            return Err(injected("read"));
        }
        self.inner.read_round().await
    }

    async fn append_history(&self, record: HistoryRecord) -> Result<AppendOutcome, StoreError> {
        if take(&self.failures.history) {
            return Err(injected("history"));
        }
        self.inner.append_history(record).await
    }

    fn watch_round(&self) -> watch::Receiver<bool> {
        self.inner.watch_round()
    }
}

/// Hands out a scripted sequence of crash points, repeating the last one.
pub struct FixedDraws {
    points: VecDeque<f64>,
    last: f64,
}

impl FixedDraws {
    pub fn new(points: impl IntoIterator<Item = f64>) -> Self {
        let points: VecDeque<f64> = points.into_iter().collect();
        let last = points.back().copied().unwrap_or(2.0);
        Self { points, last }
    }
}

impl DrawSource for FixedDraws {
    fn draw(&mut self) -> Result<CrashDraw, FairnessError> {
        Ok(CrashDraw::fixed(self.points.pop_front().unwrap_or(self.last)))
    }
}
