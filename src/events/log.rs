use std::collections::{HashMap, VecDeque};

use super::MatchEvent;

/// In-memory view of the chronological event log for the active gameweek.
/// Append-only between gameweek transitions, bounded by discarding the
/// oldest entries, and idempotent against re-processing via occurrence
/// counting on event signatures.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<MatchEvent>,
    max_len: usize,
}

impl EventLog {
    pub fn new(max_len: usize) -> Self {
        EventLog {
            entries: VecDeque::new(),
            max_len,
        }
    }

    pub fn restore(max_len: usize, entries: Vec<MatchEvent>) -> Self {
        let mut log = EventLog::new(max_len);
        for ev in entries {
            log.entries.push_back(ev);
        }
        log.truncate_overflow();
        log
    }

    /// Merge a batch of candidates detected in one poll cycle.
    ///
    /// For every signature, a candidate is appended only when its running
    /// occurrence count within the batch exceeds the count already logged.
    /// Re-running detection from a stale previous-state therefore cannot
    /// re-emit events that are already recorded, while a genuine second
    /// occurrence (the same signature one more time) still gets through.
    /// Returns the events actually appended, in batch order.
    pub fn merge(&mut self, candidates: Vec<MatchEvent>) -> Vec<MatchEvent> {
        let mut logged: HashMap<String, usize> = HashMap::new();
        for ev in &self.entries {
            *logged.entry(ev.signature()).or_insert(0) += 1;
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut appended = Vec::new();
        for candidate in candidates {
            let sig = candidate.signature();
            let count = seen.entry(sig.clone()).or_insert(0);
            *count += 1;
            if *count > logged.get(&sig).copied().unwrap_or(0) {
                self.entries.push_back(candidate.clone());
                appended.push(candidate);
            }
        }

        self.truncate_overflow();
        appended
    }

    /// Drop the oldest entries once the bound is exceeded.
    pub fn truncate_overflow(&mut self) {
        while self.entries.len() > self.max_len {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchEvent> {
        self.entries.iter()
    }
}
