use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::MatchEvent;
use crate::fpl::models::{EntryId, GameweekId};

/// A logged chronological event, as read back from the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub gameweek: GameweekId,
    #[serde(flatten)]
    pub event: MatchEvent,
}

/// Persisted derived score for one manager in one gameweek. Written every
/// poll cycle; also the fallback value when a later cycle fails for that
/// manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedScoreRow {
    pub entry: EntryId,
    pub gameweek: GameweekId,
    pub total: i32,
    pub bench_points: i32,
    /// JSON-encoded per-player contribution breakdown.
    pub breakdown: String,
    pub updated_at: DateTime<Utc>,
}
