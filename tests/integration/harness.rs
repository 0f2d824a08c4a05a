//! Shared fixtures for the integration tests.
//!
//! Every test gets its own SQLite file (named with a uuid under the system
//! temp dir) and a book pinned to a Tuesday, so the weekend lock never
//! interferes. `StaticSource` stands in for the projection files.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use faabook::config::{AppConfig, StorageConfig};
use faabook::engine::book::Sportsbook;
use faabook::odds::source::ProjectionSource;
use faabook::storage::LedgerStore;
use faabook::types::{BookError, MatchupInput, SeasonRecord, TeamInput};

/// Tuesday 07:00 league time (UTC-5).
pub fn tuesday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 14, 12, 0, 0).unwrap()
}

/// A SQLite file removed (with its WAL side files) on drop.
pub struct TempDb {
    path: PathBuf,
}

impl TempDb {
    pub fn new() -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("faabook_it_{}.db", Uuid::new_v4()));
        Self { path }
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            database_url: format!("sqlite://{}", self.path.to_string_lossy()),
            max_connections: 8,
            busy_timeout_ms: 5_000,
            max_retries: 8,
            base_backoff_ms: 5,
        }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path.to_string_lossy()));
        }
    }
}

pub fn config(db: &TempDb) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.odds.balance_adjustment = false;
    cfg.storage = db.storage_config();
    cfg
}

pub async fn open_book(db: &TempDb) -> Sportsbook {
    let cfg = config(db);
    let store = LedgerStore::open(&cfg.storage).await.unwrap();
    store.migrate().await.unwrap();
    Sportsbook::from_config(store, &cfg)
        .unwrap()
        .with_clock(Arc::new(tuesday))
}

pub fn team(id: &str, score: f64) -> TeamInput {
    TeamInput {
        team_id: id.into(),
        name: format!("Team {id}"),
        owner: format!("owner-{id}"),
        recent_score: Some(score),
        starter_points: vec![],
        record: SeasonRecord::default(),
    }
}

pub fn matchup(id: &str, a: (&str, f64), b: (&str, f64)) -> MatchupInput {
    MatchupInput {
        matchup_id: id.into(),
        team_a: team(a.0, a.1),
        team_b: team(b.0, b.1),
    }
}

/// m1: t1 120 v t2 100 (t1 -20 @ -120, total 220, ML -355/+355).
/// m2: t3 104 v t4 101 (t3 -3 @ -110, total 205).
pub fn sample_matchups() -> Vec<MatchupInput> {
    vec![
        matchup("m1", ("t1", 120.0), ("t2", 100.0)),
        matchup("m2", ("t3", 104.0), ("t4", 101.0)),
    ]
}

/// Deterministic in-memory projection source.
pub struct StaticSource {
    weeks: Mutex<HashMap<u32, Vec<MatchupInput>>>,
    calls: Mutex<u32>,
    /// If set, every call fails with this message.
    force_error: Mutex<Option<String>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self {
            weeks: Mutex::new(HashMap::new()),
            calls: Mutex::new(0),
            force_error: Mutex::new(None),
        }
    }

    pub fn with_week(self, week: u32, matchups: Vec<MatchupInput>) -> Self {
        self.set_week(week, matchups);
        self
    }

    pub fn set_week(&self, week: u32, matchups: Vec<MatchupInput>) {
        self.weeks.lock().unwrap().insert(week, matchups);
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ProjectionSource for StaticSource {
    async fn matchups(&self, week: u32) -> Result<Vec<MatchupInput>, BookError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(BookError::Source(msg));
        }
        self.weeks
            .lock()
            .unwrap()
            .get(&week)
            .cloned()
            .ok_or_else(|| BookError::Source(format!("no projections for week {week}")))
    }
}
