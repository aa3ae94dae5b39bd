//! Combines the effective lineup, live points and provisional bonus into a
//! manager's gameweek score.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::fpl::models::{Fixture, LiveGameweek, Picks, Player, PlayerId};

use super::autosub::{apply_auto_subs, build_squad_context, EffectiveLineup};
use super::bonus::provisional_bonus;

/// One effective player's share of the total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerContribution {
    pub element: PlayerId,
    /// Live points plus any provisional bonus, before the multiplier.
    pub points: i32,
    pub multiplier: u8,
    pub total: i32,
    pub from_bench: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveScore {
    pub total: i32,
    /// Points left on the bench (players who did not come on).
    pub bench_points: i32,
    pub breakdown: Vec<PlayerContribution>,
}

/// Provisional bonus per player, summed over fixtures that have started but
/// whose official bonus has not yet been published. Once upstream confirms
/// bonus it is already folded into the live points, so adding it again here
/// would double-count.
fn pending_bonus(fixtures: &[Fixture]) -> BTreeMap<PlayerId, i32> {
    let mut pending: BTreeMap<PlayerId, i32> = BTreeMap::new();
    for fixture in fixtures {
        if !fixture.started || fixture.official_bonus_awarded() {
            continue;
        }
        for (player, bonus) in provisional_bonus(&fixture.bps_entries()) {
            *pending.entry(player).or_insert(0) += bonus as i32;
        }
    }
    pending
}

/// Compute a manager's effective gameweek score. `fixtures` must already be
/// filtered to the gameweek being scored.
pub fn compute_effective_score(
    picks: &Picks,
    live: &LiveGameweek,
    fixtures: &[Fixture],
    players: &[Player],
) -> EffectiveScore {
    let ctx = build_squad_context(picks, players, fixtures, live);
    let lineup = apply_auto_subs(picks, &ctx);
    score_lineup(&lineup, live, fixtures)
}

/// Score an already-resolved lineup. Split out so callers that need the
/// lineup itself (subbed_on/off, effective captain) don't resolve it twice.
pub fn score_lineup(
    lineup: &EffectiveLineup,
    live: &LiveGameweek,
    fixtures: &[Fixture],
) -> EffectiveScore {
    let pending = pending_bonus(fixtures);
    let base_points = |element: PlayerId| -> i32 {
        let live_points = live
            .element(element)
            .map(|e| e.stats.total_points)
            .unwrap_or(0);
        live_points + pending.get(&element).copied().unwrap_or(0)
    };

    let mut total = 0;
    let mut breakdown = Vec::with_capacity(lineup.starters.len());
    for pick in &lineup.starters {
        let points = base_points(pick.element);
        // The captain multiplier applies to provisional bonus too, since
        // `points` already includes it.
        let contribution = points * pick.multiplier as i32;
        total += contribution;
        breakdown.push(PlayerContribution {
            element: pick.element,
            points,
            multiplier: pick.multiplier,
            total: contribution,
            from_bench: pick.from_bench,
        });
    }

    let bench_points = lineup.bench.iter().map(|&e| base_points(e)).sum();

    EffectiveScore {
        total,
        bench_points,
        breakdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fpl::models::{
        Chip, FixtureStat, LiveElement, LiveStats, Pick, Position, StatEntry, StatIdentifier,
    };

    fn player(id: u32, team: u32, position: Position) -> Player {
        Player {
            id,
            web_name: format!("P{id}"),
            team,
            element_type: position,
        }
    }

    fn fixture(id: u32, started: bool, bps: &[(u32, i32)], official_bonus: bool) -> Fixture {
        let mut stats = vec![FixtureStat {
            identifier: StatIdentifier::Bps,
            h: bps
                .iter()
                .map(|&(element, value)| StatEntry { element, value })
                .collect(),
            a: vec![],
        }];
        if official_bonus {
            stats.push(FixtureStat {
                identifier: StatIdentifier::Bonus,
                h: vec![StatEntry {
                    element: bps.first().map(|e| e.0).unwrap_or(0),
                    value: 3,
                }],
                a: vec![],
            });
        }
        Fixture {
            id,
            event: 1,
            kickoff_time: None,
            team_h: 1,
            team_a: 2,
            started,
            finished: false,
            finished_provisional: false,
            stats,
        }
    }

    fn live(points: &[(u32, i32, i32)]) -> LiveGameweek {
        LiveGameweek {
            elements: points
                .iter()
                .map(|&(id, minutes, total_points)| LiveElement {
                    id,
                    stats: LiveStats {
                        minutes,
                        total_points,
                        bonus: 0,
                        bps: 0,
                    },
                    explain: vec![],
                })
                .collect(),
        }
    }

    /// Minimal 15-man squad over two teams; everyone plays.
    fn full_setup() -> (Picks, Vec<Player>, Vec<Fixture>, LiveGameweek) {
        let mk = |element: u32, position: u8, multiplier: u8, cap: bool, vice: bool| Pick {
            element,
            position,
            multiplier,
            is_captain: cap,
            is_vice_captain: vice,
        };
        let picks = Picks {
            active_chip: None,
            picks: vec![
                mk(1, 1, 1, false, false),
                mk(2, 2, 1, false, false),
                mk(3, 3, 1, false, false),
                mk(4, 4, 1, false, false),
                mk(5, 5, 1, false, false),
                mk(6, 6, 1, false, false),
                mk(7, 7, 1, false, false),
                mk(8, 8, 1, false, false),
                mk(9, 9, 2, true, false),
                mk(10, 10, 1, false, true),
                mk(11, 11, 1, false, false),
                mk(12, 12, 0, false, false),
                mk(13, 13, 0, false, false),
                mk(14, 14, 0, false, false),
                mk(15, 15, 0, false, false),
            ],
        };
        let players = vec![
            player(1, 1, Position::Goalkeeper),
            player(2, 1, Position::Defender),
            player(3, 1, Position::Defender),
            player(4, 1, Position::Defender),
            player(5, 1, Position::Defender),
            player(6, 1, Position::Midfielder),
            player(7, 1, Position::Midfielder),
            player(8, 1, Position::Midfielder),
            player(9, 1, Position::Midfielder),
            player(10, 1, Position::Forward),
            player(11, 1, Position::Forward),
            player(12, 1, Position::Goalkeeper),
            player(13, 1, Position::Defender),
            player(14, 1, Position::Midfielder),
            player(15, 1, Position::Forward),
        ];
        let fixtures = vec![fixture(100, true, &[], false)];
        let live = live(&[
            (1, 90, 2),
            (2, 90, 1),
            (3, 90, 6),
            (4, 90, 2),
            (5, 90, 1),
            (6, 90, 3),
            (7, 90, 2),
            (8, 90, 5),
            (9, 90, 8),
            (10, 90, 2),
            (11, 90, 4),
            (12, 90, 1),
            (13, 90, 2),
            (14, 90, 1),
            (15, 90, 2),
        ]);
        (picks, players, fixtures, live)
    }

    #[test]
    fn captain_counts_double() {
        let (picks, players, fixtures, live) = full_setup();
        let score = compute_effective_score(&picks, &live, &fixtures, &players);
        // Starters sum to 36; captain (8 pts) counted twice.
        assert_eq!(score.total, 36 + 8);
        assert_eq!(score.bench_points, 1 + 2 + 1 + 2);
        assert_eq!(score.breakdown.len(), 11);
    }

    #[test]
    fn provisional_bonus_applies_while_unconfirmed() {
        let (picks, players, mut fixtures, live) = full_setup();
        // Captain (9) tops the BPS: 3 provisional bonus, doubled by captaincy.
        fixtures[0] = fixture(100, true, &[(9, 40), (3, 35), (7, 30)], false);
        let score = compute_effective_score(&picks, &live, &fixtures, &players);
        assert_eq!(score.total, 36 + 8 + 2 * 3 + 2 + 1);
    }

    #[test]
    fn confirmed_bonus_is_not_double_counted() {
        let (picks, players, mut fixtures, live) = full_setup();
        fixtures[0] = fixture(100, true, &[(9, 40), (3, 35), (7, 30)], true);
        let score = compute_effective_score(&picks, &live, &fixtures, &players);
        // Official bonus published: live points already include it.
        assert_eq!(score.total, 36 + 8);
    }

    #[test]
    fn bonus_ignored_before_kickoff() {
        let (picks, players, mut fixtures, live) = full_setup();
        fixtures[0] = fixture(100, false, &[(9, 40)], false);
        let score = compute_effective_score(&picks, &live, &fixtures, &players);
        assert_eq!(score.total, 36 + 8);
    }

    #[test]
    fn bench_boost_sums_all_fifteen() {
        let (mut picks, players, fixtures, live) = full_setup();
        picks.active_chip = Some(Chip::BenchBoost);
        let score = compute_effective_score(&picks, &live, &fixtures, &players);
        assert_eq!(score.total, 36 + 8 + 6);
        assert_eq!(score.bench_points, 0);
        assert_eq!(score.breakdown.len(), 15);
    }

    #[test]
    fn substitute_inherits_points_not_captaincy() {
        let (picks, players, fixtures, mut live) = full_setup();
        // Captain 9 never played: vice 10 takes the armband, DEF 13 comes on.
        live.elements[8].stats.minutes = 0;
        live.elements[8].stats.total_points = 0;
        let score = compute_effective_score(&picks, &live, &fixtures, &players);
        let vice = score.breakdown.iter().find(|c| c.element == 10).unwrap();
        assert_eq!(vice.multiplier, 2);
        let sub = score.breakdown.iter().find(|c| c.element == 13).unwrap();
        assert_eq!(sub.multiplier, 1);
        assert!(sub.from_bench);
        // 36 minus the captain's 8, plus the sub's 2, plus the vice's
        // doubled 2.
        assert_eq!(score.total, 36 - 8 + 2 + 2);
        assert_eq!(score.bench_points, 1 + 1 + 2);
    }
}
