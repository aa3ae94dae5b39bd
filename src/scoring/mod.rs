pub mod aggregate;
pub mod autosub;
pub mod bonus;
pub mod formation;

pub use aggregate::{compute_effective_score, EffectiveScore};
