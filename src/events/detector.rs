//! Snapshot diffing: turns two consecutive live-gameweek snapshots into the
//! minimal set of discrete scoring events explaining the delta.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::Database;
use crate::fpl::models::{
    Fixture, FixtureId, GameweekId, LiveGameweek, Player, PlayerId, StatIdentifier, TeamId,
};
use crate::scoring::bonus::BonusHolders;

use super::log::EventLog;
use super::{EventKind, MatchEvent};

/// Per-(fixture, player) map of stat categories to their currently-awarded
/// point values. Built fresh from each snapshot, never mutated in place.
pub type PlayerStateMap = HashMap<(FixtureId, PlayerId), BTreeMap<StatIdentifier, i32>>;

/// Per-fixture provisional bonus rank-band holders.
pub type BonusStateMap = HashMap<FixtureId, BonusHolders>;

/// Extract the diffable per-player state from a live snapshot. Minutes,
/// bonus and BPS are excluded; bonus has its own rank-band pass.
pub fn build_player_state(live: &LiveGameweek) -> PlayerStateMap {
    let mut state = PlayerStateMap::new();
    for element in &live.elements {
        for fixture in &element.explain {
            let entry = state.entry((fixture.fixture, element.id)).or_default();
            for stat in &fixture.stats {
                if EventKind::from_stat(stat.identifier).is_some() {
                    entry.insert(stat.identifier, stat.points);
                }
            }
        }
    }
    state
}

/// Compute the current bonus rank-band holders for every started fixture.
pub fn build_bonus_state(fixtures: &[Fixture]) -> BonusStateMap {
    fixtures
        .iter()
        .filter(|f| f.started)
        .map(|f| (f.id, BonusHolders::from_bps(&f.bps_entries())))
        .collect()
}

fn subject_name(players: &HashMap<PlayerId, &Player>, id: PlayerId) -> String {
    players
        .get(&id)
        .map(|p| p.web_name.clone())
        .unwrap_or_else(|| format!("player{id}"))
}

/// Diff two snapshots into candidate events, sorted by the fixed
/// type-priority table and then by subject name.
pub fn diff_snapshots(
    prev: &PlayerStateMap,
    curr: &PlayerStateMap,
    prev_bonus: &BonusStateMap,
    curr_bonus: &BonusStateMap,
    roster: &[Player],
    now: DateTime<Utc>,
) -> Vec<MatchEvent> {
    let players: HashMap<PlayerId, &Player> = roster.iter().map(|p| (p.id, p)).collect();
    let mut candidates: Vec<MatchEvent> = Vec::new();
    // (fixture, team, kind, per-player delta) -> affected subjects
    let mut team_buckets: BTreeMap<(FixtureId, TeamId, EventKind, i32), Vec<String>> =
        BTreeMap::new();

    let keys: HashSet<(FixtureId, PlayerId)> =
        prev.keys().chain(curr.keys()).copied().collect();
    for key in keys {
        let (fixture, player_id) = key;
        let empty = BTreeMap::new();
        let before = prev.get(&key).unwrap_or(&empty);
        let after = curr.get(&key).unwrap_or(&empty);
        let categories: HashSet<StatIdentifier> =
            before.keys().chain(after.keys()).copied().collect();

        for category in categories {
            let Some(kind) = EventKind::from_stat(category) else {
                continue;
            };
            let delta =
                after.get(&category).copied().unwrap_or(0) - before.get(&category).copied().unwrap_or(0);
            if delta == 0 {
                continue;
            }

            if kind.is_team_wide() {
                let team = players.get(&player_id).map(|p| p.team).unwrap_or(0);
                team_buckets
                    .entry((fixture, team, kind, delta))
                    .or_default()
                    .push(subject_name(&players, player_id));
                continue;
            }

            let subject = subject_name(&players, player_id);
            if kind.is_repeating() {
                // One event per unit of magnitude, each carrying the signed
                // unit value.
                for _ in 0..delta.abs() {
                    candidates.push(MatchEvent {
                        kind,
                        subjects: vec![subject.clone()],
                        fixture,
                        points_delta: delta.signum(),
                        occurred_at: now,
                    });
                }
            } else {
                candidates.push(MatchEvent {
                    kind,
                    subjects: vec![subject],
                    fixture,
                    points_delta: delta,
                    occurred_at: now,
                });
            }
        }
    }

    for ((fixture, _team, kind, delta), mut subjects) in team_buckets {
        subjects.sort();
        candidates.push(MatchEvent {
            kind,
            subjects,
            fixture,
            points_delta: delta,
            occurred_at: now,
        });
    }

    candidates.extend(diff_bonus(prev_bonus, curr_bonus, &players, now));

    candidates.sort_by(|a, b| {
        a.kind
            .priority()
            .cmp(&b.kind.priority())
            .then_with(|| a.subjects.cmp(&b.subjects))
    });
    candidates
}

/// Bonus events fire only when the set of players occupying a rank band
/// changes; a BPS move that reshuffles nobody between bands is not an event.
fn diff_bonus(
    prev: &BonusStateMap,
    curr: &BonusStateMap,
    players: &HashMap<PlayerId, &Player>,
    now: DateTime<Utc>,
) -> Vec<MatchEvent> {
    let mut events = Vec::new();
    let fixtures: HashSet<FixtureId> = prev.keys().chain(curr.keys()).copied().collect();
    let default = BonusHolders::default();

    for fixture in fixtures {
        let before = prev.get(&fixture).unwrap_or(&default);
        let after = curr.get(&fixture).unwrap_or(&default);
        if before == after {
            continue;
        }

        let tier_of = |holders: &BonusHolders, id: PlayerId| -> i32 {
            for (slot, set) in holders.holders.iter().enumerate() {
                if set.contains(&id) {
                    return BonusHolders::tier_points(slot) as i32;
                }
            }
            0
        };

        let mut affected: HashSet<PlayerId> = HashSet::new();
        for holders in [before, after] {
            for set in &holders.holders {
                affected.extend(set.iter().copied());
            }
        }

        // Sorted change-set: every player whose band assignment moved, with
        // the net point swing carried on the event.
        let mut changed: Vec<(String, i32)> = affected
            .into_iter()
            .filter_map(|id| {
                let swing = tier_of(after, id) - tier_of(before, id);
                (swing != 0).then(|| (subject_name(players, id), swing))
            })
            .collect();
        if changed.is_empty() {
            continue;
        }
        changed.sort();

        let points_delta = changed.iter().map(|(_, swing)| swing).sum();
        events.push(MatchEvent {
            kind: EventKind::Bonus,
            subjects: changed.into_iter().map(|(name, _)| name).collect(),
            fixture,
            points_delta,
            occurred_at: now,
        });
    }
    events
}

struct DetectorState {
    gameweek: Option<GameweekId>,
    players: PlayerStateMap,
    bonus: BonusStateMap,
    log: EventLog,
}

/// The Event Diff Detector. Owns the previous-state maps and the persisted
/// log for the active gameweek. One mutex guards the whole
/// compare → append → persist → swap sequence, so the next poll's snapshot
/// can never race an in-progress state mutation.
pub struct EventDetector {
    db: Database,
    max_log: usize,
    inner: Mutex<DetectorState>,
}

const APPEND_RETRIES: u32 = 3;

impl EventDetector {
    pub fn new(db: Database, max_log: usize) -> Self {
        EventDetector {
            db,
            max_log,
            inner: Mutex::new(DetectorState {
                gameweek: None,
                players: PlayerStateMap::new(),
                bonus: BonusStateMap::new(),
                log: EventLog::new(max_log),
            }),
        }
    }

    /// Process one poll's snapshot to completion. `fixtures` must already be
    /// filtered to the gameweek. Returns the newly appended events.
    pub async fn process(
        &self,
        gw: GameweekId,
        live: &LiveGameweek,
        fixtures: &[Fixture],
        roster: &[Player],
    ) -> Result<Vec<MatchEvent>> {
        let mut state = self.inner.lock().await;

        if state.gameweek != Some(gw) {
            if let Some(old) = state.gameweek {
                info!("gameweek transition {} -> {}: clearing diff state", old, gw);
                self.db.clear_gameweek_state(old)?;
            }
            // Restores persisted state after a restart; empty for a genuinely
            // new gameweek.
            state.players = self.db.load_player_state(gw)?;
            state.bonus = self.db.load_bonus_state(gw)?;
            state.log = EventLog::restore(self.max_log, self.db.load_event_log(gw)?);
            if !state.log.is_empty() {
                info!(
                    "restored {} logged event(s) for gameweek {}",
                    state.log.len(),
                    gw
                );
            }
            state.gameweek = Some(gw);
        }

        let curr_players = build_player_state(live);
        let curr_bonus = build_bonus_state(fixtures);
        let candidates = diff_snapshots(
            &state.players,
            &curr_players,
            &state.bonus,
            &curr_bonus,
            roster,
            Utc::now(),
        );
        let appended = state.log.merge(candidates);

        if !appended.is_empty() {
            for ev in &appended {
                info!(
                    "event: {} {} fixture={} delta={}",
                    ev.kind.as_str(),
                    ev.subjects.join(", "),
                    ev.fixture,
                    ev.points_delta
                );
            }
            self.append_with_retry(gw, &appended).await?;
            self.db.truncate_event_log(gw, self.max_log)?;
        }
        self.db.replace_player_state(gw, &curr_players)?;
        self.db.replace_bonus_state(gw, &curr_bonus)?;

        // Swap only after persistence succeeded, so a failed cycle is
        // re-derived from the old state next time.
        state.players = curr_players;
        state.bonus = curr_bonus;
        Ok(appended)
    }

    /// Log appends are the one fatal-class persistence path: silently losing
    /// an appended event would break the idempotence contract, so failures
    /// are retried before surfacing.
    async fn append_with_retry(&self, gw: GameweekId, events: &[MatchEvent]) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=APPEND_RETRIES {
            match self.db.append_events(gw, events) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "event log append failed (attempt {}/{}): {}",
                        attempt, APPEND_RETRIES, e
                    );
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
            }
        }
        Err(last_err.unwrap()).context("event log append exhausted retries")
    }
}
