use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PlayerId = u32;
pub type TeamId = u32;
pub type FixtureId = u32;
pub type GameweekId = u32;
pub type EntryId = u64;

/// One round of the competition, with its transfer deadline and status flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gameweek {
    pub id: GameweekId,
    pub deadline_time: DateTime<Utc>,
    pub is_current: bool,
    pub is_next: bool,
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub short_name: String,
}

/// Playing position, from the upstream `element_type` integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

impl TryFrom<u8> for Position {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Position::Goalkeeper),
            2 => Ok(Position::Defender),
            3 => Ok(Position::Midfielder),
            4 => Ok(Position::Forward),
            other => Err(format!("unknown element_type {other}")),
        }
    }
}

impl From<Position> for u8 {
    fn from(p: Position) -> u8 {
        match p {
            Position::Goalkeeper => 1,
            Position::Defender => 2,
            Position::Midfielder => 3,
            Position::Forward => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub web_name: String,
    pub team: TeamId,
    pub element_type: Position,
}

/// Decoded `bootstrap-static` payload, trimmed to the fields the engine uses.
#[derive(Debug, Clone, Deserialize)]
pub struct Bootstrap {
    pub events: Vec<Gameweek>,
    pub teams: Vec<Team>,
    pub elements: Vec<Player>,
}

/// Fixture lifecycle derived from the upstream flag pair.
/// `Finished` (official) implies the match is also provisionally over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureStatus {
    NotStarted,
    InProgress,
    ProvisionallyFinished,
    Finished,
}

/// Upstream fixture as it arrives on the wire. `event` may be null for
/// fixtures not yet assigned to a gameweek (postponements); those are dropped
/// during normalization and never reach the rest of the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFixture {
    pub id: FixtureId,
    pub event: Option<GameweekId>,
    pub kickoff_time: Option<DateTime<Utc>>,
    pub team_h: TeamId,
    pub team_a: TeamId,
    #[serde(default)]
    pub started: Option<bool>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub finished_provisional: bool,
    #[serde(default)]
    pub stats: Vec<FixtureStat>,
}

/// A normalized fixture: guaranteed to belong to exactly one gameweek.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub id: FixtureId,
    pub event: GameweekId,
    /// Absent for fixtures without a confirmed kickoff; such fixtures never
    /// form polling windows.
    pub kickoff_time: Option<DateTime<Utc>>,
    pub team_h: TeamId,
    pub team_a: TeamId,
    pub started: bool,
    pub finished: bool,
    pub finished_provisional: bool,
    pub stats: Vec<FixtureStat>,
}

impl Fixture {
    /// Normalize a wire fixture, returning `None` when it has no gameweek.
    pub fn from_raw(raw: RawFixture) -> Option<Fixture> {
        let event = raw.event?;
        Some(Fixture {
            id: raw.id,
            event,
            kickoff_time: raw.kickoff_time,
            team_h: raw.team_h,
            team_a: raw.team_a,
            started: raw.started.unwrap_or(false),
            finished: raw.finished,
            finished_provisional: raw.finished_provisional,
            stats: raw.stats,
        })
    }

    pub fn status(&self) -> FixtureStatus {
        if self.finished {
            FixtureStatus::Finished
        } else if self.finished_provisional {
            FixtureStatus::ProvisionallyFinished
        } else if self.started {
            FixtureStatus::InProgress
        } else {
            FixtureStatus::NotStarted
        }
    }

    pub fn involves(&self, team: TeamId) -> bool {
        self.team_h == team || self.team_a == team
    }

    /// Raw bonus-point-system entries for both sides, one per player with a
    /// nonzero BPS total.
    pub fn bps_entries(&self) -> Vec<(PlayerId, i32)> {
        self.stat_entries(StatIdentifier::Bps)
    }

    /// True once upstream has published official bonus for this fixture, at
    /// which point provisional bonus must no longer be added on top.
    pub fn official_bonus_awarded(&self) -> bool {
        self.stats
            .iter()
            .any(|s| s.identifier == StatIdentifier::Bonus && !s.is_empty())
    }

    fn stat_entries(&self, identifier: StatIdentifier) -> Vec<(PlayerId, i32)> {
        self.stats
            .iter()
            .filter(|s| s.identifier == identifier)
            .flat_map(|s| s.h.iter().chain(s.a.iter()))
            .map(|e| (e.element, e.value))
            .collect()
    }
}

/// One stat category on a fixture, split into home and away entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureStat {
    pub identifier: StatIdentifier,
    #[serde(default)]
    pub h: Vec<StatEntry>,
    #[serde(default)]
    pub a: Vec<StatEntry>,
}

impl FixtureStat {
    pub fn is_empty(&self) -> bool {
        self.h.is_empty() && self.a.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatEntry {
    pub element: PlayerId,
    pub value: i32,
}

/// Closed set of point-bearing stat categories. Upstream sends these as
/// free-form strings; unknown identifiers fail decoding at the boundary
/// rather than leaking into the diff engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatIdentifier {
    Minutes,
    GoalsScored,
    Assists,
    CleanSheets,
    GoalsConceded,
    OwnGoals,
    PenaltiesSaved,
    PenaltiesMissed,
    YellowCards,
    RedCards,
    Saves,
    DefensiveContribution,
    Bonus,
    Bps,
}

impl StatIdentifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatIdentifier::Minutes => "minutes",
            StatIdentifier::GoalsScored => "goals_scored",
            StatIdentifier::Assists => "assists",
            StatIdentifier::CleanSheets => "clean_sheets",
            StatIdentifier::GoalsConceded => "goals_conceded",
            StatIdentifier::OwnGoals => "own_goals",
            StatIdentifier::PenaltiesSaved => "penalties_saved",
            StatIdentifier::PenaltiesMissed => "penalties_missed",
            StatIdentifier::YellowCards => "yellow_cards",
            StatIdentifier::RedCards => "red_cards",
            StatIdentifier::Saves => "saves",
            StatIdentifier::DefensiveContribution => "defensive_contribution",
            StatIdentifier::Bonus => "bonus",
            StatIdentifier::Bps => "bps",
        }
    }

    pub fn parse(s: &str) -> Option<StatIdentifier> {
        Some(match s {
            "minutes" => StatIdentifier::Minutes,
            "goals_scored" => StatIdentifier::GoalsScored,
            "assists" => StatIdentifier::Assists,
            "clean_sheets" => StatIdentifier::CleanSheets,
            "goals_conceded" => StatIdentifier::GoalsConceded,
            "own_goals" => StatIdentifier::OwnGoals,
            "penalties_saved" => StatIdentifier::PenaltiesSaved,
            "penalties_missed" => StatIdentifier::PenaltiesMissed,
            "yellow_cards" => StatIdentifier::YellowCards,
            "red_cards" => StatIdentifier::RedCards,
            "saves" => StatIdentifier::Saves,
            "defensive_contribution" => StatIdentifier::DefensiveContribution,
            "bonus" => StatIdentifier::Bonus,
            "bps" => StatIdentifier::Bps,
            _ => return None,
        })
    }
}

/// Live per-player state for one gameweek, refreshed every poll. Snapshots
/// are never mutated after capture, only superseded by the next poll.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveGameweek {
    pub elements: Vec<LiveElement>,
}

impl LiveGameweek {
    pub fn element(&self, id: PlayerId) -> Option<&LiveElement> {
        self.elements.iter().find(|e| e.id == id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveElement {
    pub id: PlayerId,
    pub stats: LiveStats,
    /// Per-fixture breakdown of where the points came from.
    #[serde(default)]
    pub explain: Vec<ExplainFixture>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveStats {
    #[serde(default)]
    pub minutes: i32,
    #[serde(default)]
    pub total_points: i32,
    /// Official bonus, zero until upstream confirms it.
    #[serde(default)]
    pub bonus: i32,
    #[serde(default)]
    pub bps: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainFixture {
    pub fixture: FixtureId,
    pub stats: Vec<ExplainStat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainStat {
    pub identifier: StatIdentifier,
    pub points: i32,
    pub value: i32,
}

/// Chips are mutually exclusive; at most one is active per gameweek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chip {
    #[serde(rename = "bboost")]
    BenchBoost,
    #[serde(rename = "3xc")]
    TripleCaptain,
    #[serde(rename = "freehit")]
    FreeHit,
    #[serde(rename = "wildcard")]
    Wildcard,
}

/// A manager's squad for one gameweek: 15 picks in squad order, positions
/// 1–11 nominally starting, 12–15 the bench.
#[derive(Debug, Clone, Deserialize)]
pub struct Picks {
    #[serde(default)]
    pub active_chip: Option<Chip>,
    pub picks: Vec<Pick>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pick {
    pub element: PlayerId,
    /// 1-based squad slot; 1–11 start, 12–15 bench (12 is the bench GK).
    pub position: u8,
    /// 0 for bench players, 1 for starters, 2 for captain, 3 under triple-captain.
    pub multiplier: u8,
    pub is_captain: bool,
    pub is_vice_captain: bool,
}

impl Pick {
    pub fn is_starter(&self) -> bool {
        self.position <= 11
    }
}

/// Per-gameweek summary rows from a manager's season history.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryHistory {
    pub current: Vec<GameweekSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameweekSummary {
    pub event: GameweekId,
    pub points: i32,
    pub total_points: i32,
}
