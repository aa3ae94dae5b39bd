//! Automatic substitutions, applied the same way the upstream game resolves
//! lineups once a gameweek's matches have been played.

use std::collections::{HashMap, HashSet};

use crate::fpl::models::{Chip, Fixture, LiveGameweek, Picks, Player, PlayerId, Position};

use super::formation::FormationCounts;

/// Match state for one squad member, derived from live stats and the
/// fixture list for the gameweek.
#[derive(Debug, Clone, Copy)]
pub struct PlayerContext {
    pub position: Position,
    pub minutes: i32,
    /// Every fixture for this player's team in the gameweek has kicked off.
    /// On a double gameweek this only becomes true once the second match
    /// starts, which is what gates early substitutions.
    pub all_fixtures_started: bool,
}

pub type SquadContext = HashMap<PlayerId, PlayerContext>;

/// Build per-player match state for a squad. `fixtures` must already be
/// filtered to the gameweek being scored.
pub fn build_squad_context(
    picks: &Picks,
    players: &[Player],
    fixtures: &[Fixture],
    live: &LiveGameweek,
) -> SquadContext {
    let by_id: HashMap<PlayerId, &Player> = players.iter().map(|p| (p.id, p)).collect();
    let mut ctx = SquadContext::new();
    for pick in &picks.picks {
        let Some(player) = by_id.get(&pick.element) else {
            continue;
        };
        let team_fixtures: Vec<&Fixture> =
            fixtures.iter().filter(|f| f.involves(player.team)).collect();
        // A blank gameweek (no fixtures) leaves nothing to wait for, so the
        // player is immediately eligible to be subbed out.
        let all_started = team_fixtures.iter().all(|f| f.started);
        let minutes = live
            .element(pick.element)
            .map(|e| e.stats.minutes)
            .unwrap_or(0);
        ctx.insert(
            pick.element,
            PlayerContext {
                position: player.element_type,
                minutes,
                all_fixtures_started: all_started,
            },
        );
    }
    ctx
}

/// One slot of the effective lineup after substitutions.
#[derive(Debug, Clone)]
pub struct EffectivePick {
    pub element: PlayerId,
    pub position: Position,
    pub multiplier: u8,
    pub from_bench: bool,
}

/// The resolved lineup: effective starters (possibly fewer than 11 when no
/// legal substitute existed), leftover bench, and the resolved captaincy.
#[derive(Debug, Clone)]
pub struct EffectiveLineup {
    pub starters: Vec<EffectivePick>,
    /// Bench players who did not come on, in bench order.
    pub bench: Vec<PlayerId>,
    pub subbed_on: Vec<PlayerId>,
    pub subbed_off: Vec<PlayerId>,
    /// Whoever carries the captain multiplier after fallback; `None` when
    /// both captain and vice are unavailable and everyone scores 1x.
    pub effective_captain: Option<PlayerId>,
}

/// A starter is due a substitution only when they have zero minutes *and*
/// every fixture for their team has started. A player missing from the
/// context (unknown to bootstrap) is never swapped in either direction.
fn needs_sub(ctx: &SquadContext, element: PlayerId) -> bool {
    match ctx.get(&element) {
        Some(c) => c.minutes == 0 && c.all_fixtures_started,
        None => false,
    }
}

/// Apply automatic substitutions and captaincy fallback to a squad.
pub fn apply_auto_subs(picks: &Picks, ctx: &SquadContext) -> EffectiveLineup {
    let mut ordered: Vec<_> = picks.picks.clone();
    ordered.sort_by_key(|p| p.position);

    let captain_multiplier: u8 = if picks.active_chip == Some(Chip::TripleCaptain) {
        3
    } else {
        2
    };
    let captain = ordered.iter().find(|p| p.is_captain).map(|p| p.element);
    let vice = ordered
        .iter()
        .find(|p| p.is_vice_captain)
        .map(|p| p.element);

    let position_of = |element: PlayerId| ctx.get(&element).map(|c| c.position);

    // Bench boost: no substitutions at all, all 15 count. Bench players come
    // through the wire with multiplier 0 and count at 1x.
    if picks.active_chip == Some(Chip::BenchBoost) {
        let starters = ordered
            .iter()
            .map(|p| EffectivePick {
                element: p.element,
                position: position_of(p.element).unwrap_or(Position::Midfielder),
                multiplier: p.multiplier.max(1),
                from_bench: !p.is_starter(),
            })
            .collect();
        return EffectiveLineup {
            starters,
            bench: Vec::new(),
            subbed_on: Vec::new(),
            subbed_off: Vec::new(),
            effective_captain: captain,
        };
    }

    let (starting, bench): (Vec<_>, Vec<_>) = ordered.iter().partition(|p| p.is_starter());

    let mut effective: Vec<EffectivePick> = Vec::with_capacity(11);
    let mut subbed_on: Vec<PlayerId> = Vec::new();
    let mut subbed_off: Vec<PlayerId> = Vec::new();
    let mut used_bench: HashSet<PlayerId> = HashSet::new();

    // Goalkeeper substitution is resolved first and independently: the bench
    // keeper is the only legal replacement, so no formation check is needed.
    let starting_gk = starting
        .iter()
        .find(|p| position_of(p.element) == Some(Position::Goalkeeper));
    let bench_gk = bench
        .iter()
        .find(|p| position_of(p.element) == Some(Position::Goalkeeper));
    if let (Some(gk), Some(sub_gk)) = (starting_gk, bench_gk) {
        if needs_sub(ctx, gk.element) && !needs_sub(ctx, sub_gk.element) {
            subbed_off.push(gk.element);
            subbed_on.push(sub_gk.element);
            used_bench.insert(sub_gk.element);
            effective.push(EffectivePick {
                element: sub_gk.element,
                position: Position::Goalkeeper,
                multiplier: 1,
                from_bench: true,
            });
        }
    }

    // Seed the effective lineup with every starter not already swapped out.
    for pick in &starting {
        if subbed_off.contains(&pick.element) {
            continue;
        }
        effective.push(EffectivePick {
            element: pick.element,
            position: position_of(pick.element).unwrap_or(Position::Midfielder),
            multiplier: pick.multiplier.max(1),
            from_bench: false,
        });
    }

    // Outfield substitutions in squad order. The formation simulation runs
    // against the already-adjusted counts so cascading substitutions compose.
    let mut counts = FormationCounts::from_positions(effective.iter().map(|p| p.position));
    for pick in &starting {
        let Some(out_pos) = position_of(pick.element) else {
            continue;
        };
        if out_pos == Position::Goalkeeper || !needs_sub(ctx, pick.element) {
            continue;
        }

        let mut replacement: Option<(PlayerId, Position)> = None;
        for candidate in &bench {
            if used_bench.contains(&candidate.element) {
                continue;
            }
            let Some(in_pos) = position_of(candidate.element) else {
                continue;
            };
            if in_pos == Position::Goalkeeper || needs_sub(ctx, candidate.element) {
                continue;
            }
            if counts.with_swap(out_pos, in_pos).is_legal() {
                replacement = Some((candidate.element, in_pos));
                break;
            }
        }

        // With or without a replacement, the non-player leaves the lineup;
        // an unfillable gap just means fewer than 11 effective starters.
        subbed_off.push(pick.element);
        effective.retain(|p| p.element != pick.element);
        counts.remove(out_pos);
        if let Some((element, in_pos)) = replacement {
            subbed_on.push(element);
            used_bench.insert(element);
            counts.add(in_pos);
            effective.push(EffectivePick {
                element,
                position: in_pos,
                multiplier: 1,
                from_bench: true,
            });
        }
    }

    // Captaincy fallback: vice inherits the captain multiplier when the
    // captain went off; if the vice is gone too, everyone stays at 1x.
    let is_effective = |id: Option<PlayerId>| {
        id.map(|id| effective.iter().any(|p| p.element == id))
            .unwrap_or(false)
    };
    let effective_captain = if is_effective(captain) {
        captain
    } else if is_effective(vice) {
        vice
    } else {
        None
    };

    for pick in &mut effective {
        if Some(pick.element) == effective_captain {
            pick.multiplier = captain_multiplier;
        } else if pick.multiplier > 1 {
            // A demoted captain slot (vice fallback or no captain at all).
            pick.multiplier = 1;
        }
    }

    let leftover_bench = bench
        .iter()
        .filter(|p| !used_bench.contains(&p.element))
        .map(|p| p.element)
        .collect();

    EffectiveLineup {
        starters: effective,
        bench: leftover_bench,
        subbed_on,
        subbed_off,
        effective_captain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fpl::models::Pick;

    /// A standard 4-4-2 squad: slots 1..=11 start, 12 is the bench GK,
    /// 13..=15 are outfield bench (DEF, MID, FWD). Captain slot 9, vice 10.
    fn squad(chip: Option<Chip>) -> Picks {
        let mk = |element: u32, position: u8, multiplier: u8| Pick {
            element,
            position,
            multiplier,
            is_captain: element == 9,
            is_vice_captain: element == 10,
        };
        Picks {
            active_chip: chip,
            picks: vec![
                mk(1, 1, 1),  // GK
                mk(2, 2, 1),  // DEF
                mk(3, 3, 1),  // DEF
                mk(4, 4, 1),  // DEF
                mk(5, 5, 1),  // DEF
                mk(6, 6, 1),  // MID
                mk(7, 7, 1),  // MID
                mk(8, 8, 1),  // MID
                mk(9, 9, 2),  // MID, captain
                mk(10, 10, 1), // FWD, vice
                mk(11, 11, 1), // FWD
                mk(12, 12, 0), // bench GK
                mk(13, 13, 0), // bench DEF
                mk(14, 14, 0), // bench MID
                mk(15, 15, 0), // bench FWD
            ],
        }
    }

    fn position_for(element: u32) -> Position {
        match element {
            1 | 12 => Position::Goalkeeper,
            2..=5 | 13 => Position::Defender,
            6..=9 | 14 => Position::Midfielder,
            _ => Position::Forward,
        }
    }

    /// Everyone played 90 and all fixtures started, except the listed
    /// zero-minute players.
    fn context(zero_minutes: &[u32]) -> SquadContext {
        let mut ctx = SquadContext::new();
        for element in 1..=15u32 {
            ctx.insert(
                element,
                PlayerContext {
                    position: position_for(element),
                    minutes: if zero_minutes.contains(&element) { 0 } else { 90 },
                    all_fixtures_started: true,
                },
            );
        }
        ctx
    }

    #[test]
    fn no_subs_when_everyone_played() {
        let lineup = apply_auto_subs(&squad(None), &context(&[]));
        assert_eq!(lineup.starters.len(), 11);
        assert!(lineup.subbed_on.is_empty());
        assert!(lineup.subbed_off.is_empty());
        assert_eq!(lineup.effective_captain, Some(9));
        assert_eq!(lineup.bench, vec![12, 13, 14, 15]);
    }

    #[test]
    fn goalkeeper_swap_resolved_independently() {
        let lineup = apply_auto_subs(&squad(None), &context(&[1]));
        assert_eq!(lineup.subbed_off, vec![1]);
        assert_eq!(lineup.subbed_on, vec![12]);
        let gk = lineup.starters.iter().find(|p| p.element == 12).unwrap();
        assert_eq!(gk.multiplier, 1);
        assert_eq!(lineup.effective_captain, Some(9));
    }

    #[test]
    fn goalkeeper_not_swapped_for_unplayed_bench_keeper() {
        let lineup = apply_auto_subs(&squad(None), &context(&[1, 12]));
        assert!(lineup.subbed_on.is_empty());
        // The non-playing keeper stays put; nobody else can go in goal.
        assert!(lineup.starters.iter().any(|p| p.element == 1));
    }

    #[test]
    fn outfield_sub_takes_first_legal_bench_player() {
        // MID 8 sat out; bench DEF 13 keeps the formation legal and comes on.
        let lineup = apply_auto_subs(&squad(None), &context(&[8]));
        assert_eq!(lineup.subbed_off, vec![8]);
        assert_eq!(lineup.subbed_on, vec![13]);
    }

    #[test]
    fn formation_floor_skips_illegal_candidate() {
        // Both forwards out. DEF 13 covers the first gap (1-5-4-1). For the
        // second gap MID 14 would leave zero forwards and must be skipped in
        // favour of FWD 15.
        let lineup = apply_auto_subs(&squad(None), &context(&[10, 11]));
        assert_eq!(lineup.subbed_off, vec![10, 11]);
        assert_eq!(lineup.subbed_on, vec![13, 15]);
    }

    #[test]
    fn ineligible_bench_player_is_skipped() {
        // DEF 2 out and bench DEF 13 also unplayed: MID 14 comes on instead.
        let lineup = apply_auto_subs(&squad(None), &context(&[2, 13]));
        assert_eq!(lineup.subbed_off, vec![2]);
        assert_eq!(lineup.subbed_on, vec![14]);
    }

    #[test]
    fn double_gameweek_starter_is_not_subbed_early() {
        let mut ctx = context(&[8]);
        // Player 8 has a second fixture still to come.
        ctx.get_mut(&8).unwrap().all_fixtures_started = false;
        let lineup = apply_auto_subs(&squad(None), &ctx);
        assert!(lineup.subbed_off.is_empty());
        assert!(lineup.starters.iter().any(|p| p.element == 8));
    }

    #[test]
    fn unfillable_gap_leaves_fewer_than_eleven() {
        // FWD 11 out with the whole bench also out: nobody can come on.
        let lineup = apply_auto_subs(&squad(None), &context(&[11, 13, 14, 15]));
        assert_eq!(lineup.starters.len(), 10);
        assert_eq!(lineup.subbed_off, vec![11]);
        assert!(lineup.subbed_on.is_empty());
    }

    #[test]
    fn vice_inherits_captain_multiplier() {
        // Captain 9 (MID) out; vice 10 stays on and takes the 2x.
        let lineup = apply_auto_subs(&squad(None), &context(&[9]));
        assert_eq!(lineup.effective_captain, Some(10));
        let vice = lineup.starters.iter().find(|p| p.element == 10).unwrap();
        assert_eq!(vice.multiplier, 2);
        // The bench player who replaced the captain gets no multiplier.
        for sub in &lineup.subbed_on {
            let p = lineup.starters.iter().find(|p| p.element == *sub).unwrap();
            assert_eq!(p.multiplier, 1);
        }
    }

    #[test]
    fn triple_captain_fallback_is_three_x() {
        let lineup = apply_auto_subs(&squad(Some(Chip::TripleCaptain)), &context(&[9]));
        let vice = lineup.starters.iter().find(|p| p.element == 10).unwrap();
        assert_eq!(vice.multiplier, 3);
    }

    #[test]
    fn captain_and_vice_both_out_means_flat_multipliers() {
        let lineup = apply_auto_subs(&squad(None), &context(&[9, 10]));
        assert_eq!(lineup.effective_captain, None);
        assert!(lineup.starters.iter().all(|p| p.multiplier == 1));
    }

    #[test]
    fn bench_boost_counts_all_fifteen_without_subs() {
        let lineup = apply_auto_subs(&squad(Some(Chip::BenchBoost)), &context(&[8]));
        assert_eq!(lineup.starters.len(), 15);
        assert!(lineup.bench.is_empty());
        assert!(lineup.subbed_off.is_empty());
        let bench_mid = lineup.starters.iter().find(|p| p.element == 14).unwrap();
        assert_eq!(bench_mid.multiplier, 1);
    }

    #[test]
    fn cascading_subs_use_adjusted_counts() {
        // DEF 2 and DEF 3 both out. DEF 13 covers the first gap like for
        // like; MID 14 covers the second, checked against the counts as
        // already adjusted by the first swap.
        let lineup = apply_auto_subs(&squad(None), &context(&[2, 3]));
        assert_eq!(lineup.subbed_off, vec![2, 3]);
        assert_eq!(lineup.subbed_on, vec![13, 14]);
        let counts =
            FormationCounts::from_positions(lineup.starters.iter().map(|p| p.position));
        assert!(counts.is_legal());
    }

    #[test]
    fn effective_lineup_is_legal_or_documented_short() {
        for zeros in [vec![2u32], vec![2, 3], vec![5, 13], vec![11, 15]] {
            let lineup = apply_auto_subs(&squad(None), &context(&zeros));
            let counts =
                FormationCounts::from_positions(lineup.starters.iter().map(|p| p.position));
            assert!(
                counts.is_legal() || lineup.starters.len() < 11,
                "zeros {zeros:?}: illegal full-size lineup"
            );
        }
    }
}
