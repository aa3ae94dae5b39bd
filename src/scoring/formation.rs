use crate::fpl::models::Position;

/// Position counts for a proposed effective lineup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormationCounts {
    pub gk: u8,
    pub def: u8,
    pub mid: u8,
    pub fwd: u8,
}

impl FormationCounts {
    pub fn from_positions<I: IntoIterator<Item = Position>>(positions: I) -> Self {
        let mut counts = FormationCounts::default();
        for p in positions {
            counts.add(p);
        }
        counts
    }

    pub fn add(&mut self, p: Position) {
        match p {
            Position::Goalkeeper => self.gk += 1,
            Position::Defender => self.def += 1,
            Position::Midfielder => self.mid += 1,
            Position::Forward => self.fwd += 1,
        }
    }

    pub fn remove(&mut self, p: Position) {
        match p {
            Position::Goalkeeper => self.gk = self.gk.saturating_sub(1),
            Position::Defender => self.def = self.def.saturating_sub(1),
            Position::Midfielder => self.mid = self.mid.saturating_sub(1),
            Position::Forward => self.fwd = self.fwd.saturating_sub(1),
        }
    }

    /// Counts after replacing one `out` player with one `inn` player, used to
    /// simulate a candidate substitution before accepting it.
    pub fn with_swap(mut self, out: Position, inn: Position) -> FormationCounts {
        self.remove(out);
        self.add(inn);
        self
    }

    /// Lineup legality rule: at least 1 GK, 3 DEF, 2 MID, 1 FWD.
    pub fn is_legal(&self) -> bool {
        self.gk >= 1 && self.def >= 3 && self.mid >= 2 && self.fwd >= 1
    }
}
