use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub mod models;
use models::*;

use crate::events::detector::{BonusStateMap, PlayerStateMap};
use crate::events::{EventKind, MatchEvent};
use crate::fpl::models::{EntryId, GameweekId, PlayerId, StatIdentifier};
use crate::scoring::bonus::BonusHolders;
use crate::scoring::EffectiveScore;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Chronological event log ──────────────────────────────────────────────

    /// Append detected events for a gameweek, in batch order.
    pub fn append_events(&self, gw: GameweekId, events: &[MatchEvent]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for ev in events {
            tx.execute(
                "INSERT INTO event_log (gameweek, kind, subjects, fixture, points_delta, signature, occurred_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    gw,
                    ev.kind.as_str(),
                    serde_json::to_string(&ev.subjects)?,
                    ev.fixture,
                    ev.points_delta,
                    ev.signature(),
                    ev.occurred_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Load the full persisted log for a gameweek, oldest first.
    pub fn load_event_log(&self, gw: GameweekId) -> Result<Vec<MatchEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT kind, subjects, fixture, points_delta, occurred_at
             FROM event_log WHERE gameweek=?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![gw], map_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Keep only the newest `max` entries for a gameweek.
    pub fn truncate_event_log(&self, gw: GameweekId, max: usize) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM event_log WHERE gameweek=?1 AND id NOT IN (
                 SELECT id FROM event_log WHERE gameweek=?1 ORDER BY id DESC LIMIT ?2
             )",
            params![gw, max as i64],
        )?;
        Ok(())
    }

    /// List the most recent logged events across gameweeks, for the
    /// presentation collaborator.
    pub fn recent_events(&self, limit: i64) -> Result<Vec<StoredEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, gameweek, kind, subjects, fixture, points_delta, occurred_at
             FROM event_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, GameweekId>(1)?, map_event_at(row, 2)?))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (id, gameweek, event) = row?;
            events.push(StoredEvent {
                id,
                gameweek,
                event,
            });
        }
        Ok(events)
    }

    // ── Diff state (previous player/bonus snapshots) ─────────────────────────

    pub fn load_player_state(&self, gw: GameweekId) -> Result<PlayerStateMap> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT fixture, player, identifier, points FROM player_state WHERE gameweek=?1",
        )?;
        let rows = stmt.query_map(params![gw], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)?,
            ))
        })?;
        let mut state = PlayerStateMap::new();
        for row in rows {
            let (fixture, player, identifier, points) = row?;
            let Some(identifier) = StatIdentifier::parse(&identifier) else {
                continue;
            };
            state
                .entry((fixture, player))
                .or_insert_with(BTreeMap::new)
                .insert(identifier, points);
        }
        Ok(state)
    }

    pub fn replace_player_state(&self, gw: GameweekId, state: &PlayerStateMap) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM player_state WHERE gameweek=?1", params![gw])?;
        for ((fixture, player), categories) in state {
            for (identifier, points) in categories {
                tx.execute(
                    "INSERT INTO player_state (gameweek, fixture, player, identifier, points)
                     VALUES (?1,?2,?3,?4,?5)",
                    params![gw, fixture, player, identifier.as_str(), points],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_bonus_state(&self, gw: GameweekId) -> Result<BonusStateMap> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT fixture, tier, player FROM bonus_state WHERE gameweek=?1")?;
        let rows = stmt.query_map(params![gw], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, u8>(1)?,
                row.get::<_, PlayerId>(2)?,
            ))
        })?;
        let mut state = BonusStateMap::new();
        for row in rows {
            let (fixture, tier, player) = row?;
            if !(1..=3).contains(&tier) {
                continue;
            }
            let holders: &mut BonusHolders = state.entry(fixture).or_default();
            holders.holders[(3 - tier) as usize].push(player);
        }
        for holders in state.values_mut() {
            for set in &mut holders.holders {
                set.sort_unstable();
            }
        }
        Ok(state)
    }

    pub fn replace_bonus_state(&self, gw: GameweekId, state: &BonusStateMap) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM bonus_state WHERE gameweek=?1", params![gw])?;
        for (fixture, holders) in state {
            for (slot, set) in holders.holders.iter().enumerate() {
                let tier = BonusHolders::tier_points(slot);
                for player in set {
                    tx.execute(
                        "INSERT INTO bonus_state (gameweek, fixture, tier, player)
                         VALUES (?1,?2,?3,?4)",
                        params![gw, fixture, tier, player],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop all diff state and the log for a gameweek. Called on gameweek
    /// transition.
    pub fn clear_gameweek_state(&self, gw: GameweekId) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM event_log WHERE gameweek=?1", params![gw])?;
        tx.execute("DELETE FROM player_state WHERE gameweek=?1", params![gw])?;
        tx.execute("DELETE FROM bonus_state WHERE gameweek=?1", params![gw])?;
        tx.commit()?;
        Ok(())
    }

    // ── Derived scores ───────────────────────────────────────────────────────

    pub fn upsert_derived_score(
        &self,
        entry: EntryId,
        gw: GameweekId,
        score: &EffectiveScore,
    ) -> Result<()> {
        let breakdown = serde_json::to_string(&score.breakdown)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO derived_scores (entry, gameweek, total, bench_points, breakdown, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(entry, gameweek) DO UPDATE SET
                total=excluded.total,
                bench_points=excluded.bench_points,
                breakdown=excluded.breakdown,
                updated_at=excluded.updated_at",
            params![entry, gw, score.total, score.bench_points, breakdown, Utc::now()],
        )?;
        Ok(())
    }

    pub fn get_derived_score(&self, entry: EntryId, gw: GameweekId) -> Result<Option<DerivedScoreRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT entry, gameweek, total, bench_points, breakdown, updated_at
             FROM derived_scores WHERE entry=?1 AND gameweek=?2",
        )?;
        let mut rows = stmt.query_map(params![entry, gw], |row| {
            Ok(DerivedScoreRow {
                entry: row.get(0)?,
                gameweek: row.get(1)?,
                total: row.get(2)?,
                bench_points: row.get(3)?,
                breakdown: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    // ── Gameweek reconciliation ──────────────────────────────────────────────

    /// Mark a gameweek's derived results as reconciled with its final
    /// (provisionally or officially confirmed) upstream state.
    pub fn mark_gameweek_reconciled(&self, gw: GameweekId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO gameweek_recon (gameweek, reconciled, updated_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT(gameweek) DO UPDATE SET
                reconciled=1, updated_at=excluded.updated_at",
            params![gw, Utc::now()],
        )?;
        Ok(())
    }

    pub fn is_gameweek_reconciled(&self, gw: GameweekId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let reconciled: bool = conn
            .query_row(
                "SELECT reconciled FROM gameweek_recon WHERE gameweek=?1",
                params![gw],
                |row| row.get(0),
            )
            .unwrap_or(false);
        Ok(reconciled)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_event(row: &rusqlite::Row) -> rusqlite::Result<MatchEvent> {
    map_event_at(row, 0)
}

fn map_event_at(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<MatchEvent> {
    let kind_str: String = row.get(offset)?;
    let subjects_json: String = row.get(offset + 1)?;
    let kind = EventKind::from_str(&kind_str).unwrap_or(EventKind::Bonus);
    let subjects: Vec<String> = serde_json::from_str(&subjects_json).unwrap_or_default();
    Ok(MatchEvent {
        kind,
        subjects,
        fixture: row.get(offset + 2)?,
        points_delta: row.get(offset + 3)?,
        occurred_at: row.get(offset + 4)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS event_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    gameweek     INTEGER NOT NULL,
    kind         TEXT    NOT NULL,
    subjects     TEXT    NOT NULL,
    fixture      INTEGER NOT NULL,
    points_delta INTEGER NOT NULL,
    signature    TEXT    NOT NULL,
    occurred_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS player_state (
    gameweek   INTEGER NOT NULL,
    fixture    INTEGER NOT NULL,
    player     INTEGER NOT NULL,
    identifier TEXT    NOT NULL,
    points     INTEGER NOT NULL,
    PRIMARY KEY (gameweek, fixture, player, identifier)
);

CREATE TABLE IF NOT EXISTS bonus_state (
    gameweek INTEGER NOT NULL,
    fixture  INTEGER NOT NULL,
    tier     INTEGER NOT NULL,
    player   INTEGER NOT NULL,
    PRIMARY KEY (gameweek, fixture, tier, player)
);

CREATE TABLE IF NOT EXISTS derived_scores (
    entry        INTEGER NOT NULL,
    gameweek     INTEGER NOT NULL,
    total        INTEGER NOT NULL,
    bench_points INTEGER NOT NULL,
    breakdown    TEXT    NOT NULL,
    updated_at   TEXT    NOT NULL,
    PRIMARY KEY (entry, gameweek)
);

CREATE TABLE IF NOT EXISTS gameweek_recon (
    gameweek   INTEGER PRIMARY KEY,
    reconciled INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_event_log_gameweek ON event_log(gameweek);
CREATE INDEX IF NOT EXISTS idx_event_log_signature ON event_log(signature);
"#;
