use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use liftoff_execution::{AppendOutcome, MemoryStore, RoundStore, StoreError, HISTORY_WINDOW};
use liftoff_types::{FairnessReveal, HistoryRecord, Round, RoundPatch};
use rusqlite::{params, Connection};
use tokio::sync::watch;
use tracing::info;

/// Append-only round history in SQLite, keyed by round id.
#[derive(Clone)]
pub struct SqliteHistory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistory {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("open history db")?;
        init_schema_sqlite(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// The most recent `limit` records, oldest first.
    pub fn load_recent(&self, limit: usize) -> anyhow::Result<Vec<HistoryRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("history db lock poisoned"))?;
        let mut stmt = conn.prepare(
            "SELECT round_id, crashed_at, timestamp, reveal FROM history
             ORDER BY rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (round_id, crashed_at, timestamp, reveal) = row?;
            let reveal = reveal
                .map(|raw| serde_json::from_str::<FairnessReveal>(&raw))
                .transpose()
                .with_context(|| format!("decode reveal for round {round_id}"))?;
            records.push(HistoryRecord {
                round_id,
                crashed_at,
                timestamp: timestamp.max(0) as u64,
                reveal,
            });
        }
        records.reverse();
        Ok(records)
    }

    /// Insert unless the round id is already present.
    pub fn append(&self, record: &HistoryRecord) -> Result<AppendOutcome, StoreError> {
        let reveal = record
            .reveal
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StoreError::Unavailable(format!("encode reveal: {err}")))?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("history db lock poisoned".to_string()))?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO history (round_id, crashed_at, timestamp, reveal)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.round_id,
                    record.crashed_at,
                    record.timestamp as i64,
                    reveal
                ],
            )
            .map_err(|err| StoreError::Unavailable(format!("history write failed: {err}")))?;
        Ok(if changed == 0 {
            AppendOutcome::Duplicate
        } else {
            AppendOutcome::Appended
        })
    }
}

fn init_schema_sqlite(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS history (
             round_id TEXT PRIMARY KEY,
             crashed_at REAL NOT NULL,
             timestamp INTEGER NOT NULL,
             reveal TEXT
         );",
    )
    .context("init history schema")?;
    Ok(())
}

/// The store the engine runs against: round state in memory, history in
/// memory and optionally in SQLite.
#[derive(Clone)]
pub struct ServiceStore {
    memory: MemoryStore,
    durable: Option<SqliteHistory>,
}

impl ServiceStore {
    pub fn in_memory(memory: MemoryStore) -> Self {
        Self {
            memory,
            durable: None,
        }
    }

    /// Open the history db and replay its most recent window into `memory`.
    pub fn with_sqlite(memory: MemoryStore, path: &Path) -> anyhow::Result<Self> {
        let durable = SqliteHistory::open(path)?;
        let records = durable.load_recent(HISTORY_WINDOW)?;
        info!(path = %path.display(), rounds = records.len(), "loaded round history");
        memory
            .seed_history(records)
            .context("seed history into memory")?;
        Ok(Self {
            memory,
            durable: Some(durable),
        })
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }
}

impl RoundStore for ServiceStore {
    async fn create_round(&self, round: Round) -> Result<(), StoreError> {
        self.memory.create_round(round).await
    }

    async fn update_round(&self, patch: RoundPatch) -> Result<(), StoreError> {
        self.memory.update_round(patch).await
    }

    async fn read_round(&self) -> Result<Option<Round>, StoreError> {
        self.memory.read_round().await
    }

    async fn append_history(&self, record: HistoryRecord) -> Result<AppendOutcome, StoreError> {
        let Some(durable) = self.durable.clone() else {
            return self.memory.append_history(record).await;
        };
        let pending = record.clone();
        let outcome = tokio::task::spawn_blocking(move || durable.append(&pending))
            .await
            .map_err(|err| StoreError::Unavailable(format!("history writer failed: {err}")))??;
        // The primary key dedupes; only new rows enter the in-memory window.
        if outcome == AppendOutcome::Appended {
            self.memory.append_history(record).await?;
        }
        Ok(outcome)
    }

    fn watch_round(&self) -> watch::Receiver<bool> {
        self.memory.watch_round()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, crashed_at: f64) -> HistoryRecord {
        HistoryRecord {
            round_id: id.to_string(),
            crashed_at,
            timestamp: 1_700_000_000_000,
            reveal: None,
        }
    }

    #[test]
    fn append_is_create_if_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = SqliteHistory::open(&dir.path().join("history.db")).unwrap();

        assert_eq!(history.append(&record("r-1", 1.5)), Ok(AppendOutcome::Appended));
        assert_eq!(history.append(&record("r-1", 9.0)), Ok(AppendOutcome::Duplicate));

        let records = history.load_recent(10).unwrap();
        assert_eq!(records, vec![record("r-1", 1.5)]);
    }

    #[test]
    fn reveal_round_trips_through_db() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = SqliteHistory::open(&dir.path().join("history.db")).unwrap();
        let mut revealed = record("r-1", 2.31);
        revealed.reveal = Some(FairnessReveal {
            server_seed: "aa".repeat(32),
            client_seed: "bb".repeat(32),
            commitment: "cc".repeat(32),
        });
        history.append(&revealed).unwrap();
        history.append(&record("r-2", 1.01)).unwrap();

        assert_eq!(history.load_recent(10).unwrap(), vec![revealed, record("r-2", 1.01)]);
    }

    #[tokio::test]
    async fn history_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");

        let store = ServiceStore::with_sqlite(MemoryStore::default(), &path).unwrap();
        store.append_history(record("r-1", 1.5)).await.unwrap();
        store.append_history(record("r-2", 3.2)).await.unwrap();
        assert_eq!(
            store.append_history(record("r-2", 3.2)).await,
            Ok(AppendOutcome::Duplicate)
        );
        drop(store);

        let reopened = ServiceStore::with_sqlite(MemoryStore::default(), &path).unwrap();
        let ids: Vec<_> = reopened
            .memory()
            .history(10)
            .unwrap()
            .into_iter()
            .map(|record| record.round_id)
            .collect();
        assert_eq!(ids, vec!["r-2", "r-1"]);

        // A round recorded before the restart stays recorded once.
        assert_eq!(
            reopened.append_history(record("r-1", 1.5)).await,
            Ok(AppendOutcome::Duplicate)
        );
        assert_eq!(reopened.memory().history_len().unwrap(), 2);
    }

    #[tokio::test]
    async fn reopen_loads_only_the_recent_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        let history = SqliteHistory::open(&path).unwrap();
        for i in 0..HISTORY_WINDOW + 5 {
            history.append(&record(&format!("r-{i}"), 1.5)).unwrap();
        }

        let recent = history.load_recent(3).unwrap();
        let ids: Vec<_> = recent.iter().map(|record| record.round_id.as_str()).collect();
        let expected: Vec<String> = (HISTORY_WINDOW + 2..HISTORY_WINDOW + 5)
            .map(|i| format!("r-{i}"))
            .collect();
        assert_eq!(ids, expected);
        drop(history);

        let store = ServiceStore::with_sqlite(MemoryStore::default(), &path).unwrap();
        assert_eq!(store.memory().history_len().unwrap(), HISTORY_WINDOW);

        // Evicted from memory, still deduped by the db.
        assert_eq!(
            store.append_history(record("r-0", 1.5)).await,
            Ok(AppendOutcome::Duplicate)
        );
        assert_eq!(
            store.memory().history(1).unwrap()[0].round_id,
            format!("r-{}", HISTORY_WINDOW + 4)
        );
    }
}
