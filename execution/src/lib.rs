//! Liftoff crash engine.
//!
//! This crate contains the round state machine ([`RoundEngine`]), the fairness
//! generator that draws each round's crash point, the multiplier curve, the
//! history recorder, and the [`Supervisor`] that keeps rounds cycling forever.
//!
//! ## Confidentiality
//! - The crash point lives only in a [`CrashDraw`] owned by the engine until the
//!   round has crashed. It is never written to the store or logged before then.
//! - A draw is never reused: every cycle mints a new round id and a new draw.
//!
//! ## Store contract
//! The engine only talks to shared state through [`RoundStore`]: a wholesale
//! overwrite at Waiting entry, field-scoped merges afterwards (so bets placed
//! concurrently are never clobbered), snapshot reads, a create-if-absent
//! history append, and a feed of whether the round record exists.
//!
//! ## Running the engine (example)
//! ```rust,ignore
//! use liftoff_execution::{
//!     FairnessConfig, FairnessGenerator, MemoryStore, PhaseConfig, RoundEngine, Supervisor,
//! };
//!
//! let store = MemoryStore::default();
//! let engine = RoundEngine::new(
//!     store.clone(),
//!     PhaseConfig::default(),
//!     FairnessGenerator::new(FairnessConfig::default()),
//! );
//! tokio::spawn(Supervisor::new(engine).run());
//! ```

pub mod engine;
pub mod fairness;
pub mod history;
pub mod multiplier;
pub mod round_scheduler;
pub mod store;
pub mod supervisor;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;


mod backoff;

pub use engine::{EngineError, RoundEngine, RoundSummary};
pub use fairness::{
    compute_commitment, crash_point_from_seeds, verify_crash_point, CrashDraw, DrawSource,
    FairnessAlgorithm, FairnessConfig, FairnessError, FairnessGenerator, VerifyError,
    MIN_CRASH_POINT, SEED_LEN,
};
pub use history::{HistoryError, HistoryRecorder};
pub use multiplier::{checked_multiplier_at, multiplier_at, time_to_reach, DEFAULT_GROWTH_RATE};
pub use round_scheduler::PhaseConfig;
pub use store::{AppendOutcome, MemoryStore, RoundStore, StoreError, HISTORY_WINDOW};
pub use supervisor::{CycleOutcome, Supervisor};
