pub mod detector;
pub mod log;

pub use detector::EventDetector;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fpl::models::{FixtureId, StatIdentifier};

/// Discrete scoring occurrence kinds. The set is closed so the priority
/// ordering below is exhaustive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Goal,
    OwnGoal,
    Assist,
    PenaltySaved,
    PenaltyMissed,
    RedCard,
    YellowCard,
    CleanSheet,
    GoalsConceded,
    Saves,
    DefensiveContribution,
    Bonus,
}

impl EventKind {
    /// Fixed presentation priority within one poll cycle. Candidates are
    /// sorted by this, then alphabetically by subject, before the log merge.
    /// This ordering is a contract, not an artifact of detection order.
    pub fn priority(&self) -> u8 {
        match self {
            EventKind::Goal => 0,
            EventKind::OwnGoal => 1,
            EventKind::Assist => 2,
            EventKind::PenaltySaved => 3,
            EventKind::PenaltyMissed => 4,
            EventKind::RedCard => 5,
            EventKind::YellowCard => 6,
            EventKind::CleanSheet => 7,
            EventKind::GoalsConceded => 8,
            EventKind::Saves => 9,
            EventKind::DefensiveContribution => 10,
            EventKind::Bonus => 11,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Goal => "goal",
            EventKind::OwnGoal => "own_goal",
            EventKind::Assist => "assist",
            EventKind::PenaltySaved => "penalty_saved",
            EventKind::PenaltyMissed => "penalty_missed",
            EventKind::RedCard => "red_card",
            EventKind::YellowCard => "yellow_card",
            EventKind::CleanSheet => "clean_sheet",
            EventKind::GoalsConceded => "goals_conceded",
            EventKind::Saves => "saves",
            EventKind::DefensiveContribution => "defensive_contribution",
            EventKind::Bonus => "bonus",
        }
    }

    pub fn from_str(s: &str) -> Option<EventKind> {
        Some(match s {
            "goal" => EventKind::Goal,
            "own_goal" => EventKind::OwnGoal,
            "assist" => EventKind::Assist,
            "penalty_saved" => EventKind::PenaltySaved,
            "penalty_missed" => EventKind::PenaltyMissed,
            "red_card" => EventKind::RedCard,
            "yellow_card" => EventKind::YellowCard,
            "clean_sheet" => EventKind::CleanSheet,
            "goals_conceded" => EventKind::GoalsConceded,
            "saves" => EventKind::Saves,
            "defensive_contribution" => EventKind::DefensiveContribution,
            "bonus" => EventKind::Bonus,
            _ => return None,
        })
    }

    /// Map a live-stat category to its event kind. Minutes carry appearance
    /// points but are not feed-worthy; bonus is handled by the rank-band
    /// pass; BPS never appears in the explain breakdown.
    pub fn from_stat(identifier: StatIdentifier) -> Option<EventKind> {
        Some(match identifier {
            StatIdentifier::GoalsScored => EventKind::Goal,
            StatIdentifier::OwnGoals => EventKind::OwnGoal,
            StatIdentifier::Assists => EventKind::Assist,
            StatIdentifier::PenaltiesSaved => EventKind::PenaltySaved,
            StatIdentifier::PenaltiesMissed => EventKind::PenaltyMissed,
            StatIdentifier::RedCards => EventKind::RedCard,
            StatIdentifier::YellowCards => EventKind::YellowCard,
            StatIdentifier::CleanSheets => EventKind::CleanSheet,
            StatIdentifier::GoalsConceded => EventKind::GoalsConceded,
            StatIdentifier::Saves => EventKind::Saves,
            StatIdentifier::DefensiveContribution => EventKind::DefensiveContribution,
            StatIdentifier::Minutes | StatIdentifier::Bonus | StatIdentifier::Bps => return None,
        })
    }

    /// Clean sheets and goals conceded are awarded per team, so all affected
    /// players of one side share a single event.
    pub fn is_team_wide(&self) -> bool {
        matches!(self, EventKind::CleanSheet | EventKind::GoalsConceded)
    }

    /// Save points accrue one unit at a time; a multi-point delta becomes
    /// that many single-unit events.
    pub fn is_repeating(&self) -> bool {
        matches!(self, EventKind::Saves)
    }
}

/// An immutable entry of the chronological feed. Appended once detected and
/// never mutated; the oldest entries are discarded once the log outgrows its
/// bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEvent {
    pub kind: EventKind,
    /// Affected player names, sorted; a single element for most kinds.
    pub subjects: Vec<String>,
    pub fixture: FixtureId,
    pub points_delta: i32,
    pub occurred_at: DateTime<Utc>,
}

impl MatchEvent {
    /// Occurrence signature used for idempotent log merging: kind + subjects
    /// + fixture + point value. Multi-subject events fold their sorted
    /// change-set in through `subjects`.
    pub fn signature(&self) -> String {
        format!(
            "{}_{}_fixture{}_{}",
            self.kind.as_str(),
            self.subjects.join("+"),
            self.fixture,
            self.points_delta
        )
    }
}
