//! Provisional bonus points, inferred from the bonus-point-system scores of a
//! fixture in progress before upstream confirms the official allocation.
//!
//! This is the only bonus implementation in the crate. The scoring
//! aggregator, the event detector's rank-band comparison and any display
//! path must all go through [`provisional_bonus`] so they can never diverge.

use std::collections::BTreeMap;

use crate::fpl::models::PlayerId;

/// Bonus tier for a rank: 1st place 3 points, 2nd 2, 3rd 1, everyone else 0.
fn rank_bonus(rank: usize) -> u8 {
    match rank {
        1 => 3,
        2 => 2,
        3 => 1,
        _ => 0,
    }
}

/// Allocate provisional bonus from raw BPS entries.
///
/// Entries are ranked descending by score. Every member of a tie group gets
/// the group's rank bonus, and the rank counter then advances by the group
/// size, so `[30, 30, 28, 10]` pays 3/3/1/0: the pair at rank 1 both take 3,
/// the next player lands on rank 3 and takes 1. Ties can widen how many
/// players are paid at a tier but never change the 3/2/1 tier values.
pub fn provisional_bonus(bps: &[(PlayerId, i32)]) -> BTreeMap<PlayerId, u8> {
    let mut sorted: Vec<(PlayerId, i32)> = bps.to_vec();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut allocation = BTreeMap::new();
    let mut rank = 1usize;
    let mut i = 0usize;
    while i < sorted.len() && rank <= 3 {
        let score = sorted[i].1;
        let mut group_end = i;
        while group_end < sorted.len() && sorted[group_end].1 == score {
            group_end += 1;
        }
        let bonus = rank_bonus(rank);
        if bonus > 0 {
            for &(player, _) in &sorted[i..group_end] {
                allocation.insert(player, bonus);
            }
        }
        rank += group_end - i;
        i = group_end;
    }
    allocation
}

/// The 3/2/1 holder sets for a fixture, used by the event detector to decide
/// whether a BPS change actually moved anyone between rank bands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BonusHolders {
    /// `holders[0]` is the 3-point set, `[1]` the 2-point, `[2]` the 1-point.
    /// Each set is sorted by player id.
    pub holders: [Vec<PlayerId>; 3],
}

impl BonusHolders {
    pub fn from_bps(bps: &[(PlayerId, i32)]) -> Self {
        let allocation = provisional_bonus(bps);
        let mut holders: [Vec<PlayerId>; 3] = Default::default();
        for (player, bonus) in allocation {
            holders[3 - bonus as usize].push(player);
        }
        for set in &mut holders {
            set.sort_unstable();
        }
        BonusHolders { holders }
    }

    pub fn tier_points(slot: usize) -> u8 {
        3 - slot as u8
    }
}
