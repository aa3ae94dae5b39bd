use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::fpl::models::{Fixture, FixtureId};

/// Kickoffs within this much of a window's start are polled as one session.
pub const GROUP_THRESHOLD_MINUTES: i64 = 30;

/// Nominal kickoff-to-final-whistle span, stoppage time included. Window end
/// verification against real fixture state starts once this elapses.
pub const MATCH_DURATION_MINUTES: i64 = 150;

/// A contiguous live-polling session derived from nearby kickoffs. Owned by
/// the scheduler and recomputed whenever fixture data is refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KickoffWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub fixtures: Vec<FixtureId>,
}

/// Group fixtures into kickoff windows. Fixtures whose kickoff falls within
/// the threshold of a window's start are merged into it, extending the
/// window's end when a later-finishing fixture joins. Fixtures without a
/// kickoff time never form windows.
pub fn group_windows(fixtures: &[Fixture]) -> Vec<KickoffWindow> {
    let mut scheduled: Vec<(DateTime<Utc>, FixtureId)> = fixtures
        .iter()
        .filter_map(|f| f.kickoff_time.map(|k| (k, f.id)))
        .collect();
    scheduled.sort();

    let threshold = Duration::minutes(GROUP_THRESHOLD_MINUTES);
    let duration = Duration::minutes(MATCH_DURATION_MINUTES);

    let mut windows: Vec<KickoffWindow> = Vec::new();
    for (kickoff, id) in scheduled {
        let finish = kickoff + duration;
        match windows.last_mut() {
            Some(window) if kickoff - window.start <= threshold => {
                window.fixtures.push(id);
                if finish > window.end {
                    window.end = finish;
                }
            }
            _ => windows.push(KickoffWindow {
                start: kickoff,
                end: finish,
                fixtures: vec![id],
            }),
        }
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixture(id: u32, kickoff: Option<DateTime<Utc>>) -> Fixture {
        Fixture {
            id,
            event: 1,
            kickoff_time: kickoff,
            team_h: 1,
            team_a: 2,
            started: false,
            finished: false,
            finished_provisional: false,
            stats: vec![],
        }
    }

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 4, hour, min, 0).unwrap()
    }

    #[test]
    fn nearby_kickoffs_merge_into_one_window() {
        let fixtures = vec![
            fixture(1, Some(at(14, 0))),
            fixture(2, Some(at(14, 0))),
            fixture(3, Some(at(14, 15))),
        ];
        let windows = group_windows(&fixtures);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].fixtures, vec![1, 2, 3]);
        assert_eq!(windows[0].start, at(14, 0));
        // Extended to cover the 14:15 kickoff's full match.
        assert_eq!(windows[0].end, at(14, 15) + Duration::minutes(MATCH_DURATION_MINUTES));
    }

    #[test]
    fn distant_kickoffs_get_separate_windows() {
        let fixtures = vec![fixture(1, Some(at(12, 30))), fixture(2, Some(at(17, 30)))];
        let windows = group_windows(&fixtures);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].fixtures, vec![1]);
        assert_eq!(windows[1].fixtures, vec![2]);
    }

    #[test]
    fn threshold_is_anchored_to_window_start() {
        // 14:00, 14:25, 14:50: the third is 25' after the second but 50'
        // after the window start, so it opens a new window.
        let fixtures = vec![
            fixture(1, Some(at(14, 0))),
            fixture(2, Some(at(14, 25))),
            fixture(3, Some(at(14, 50))),
        ];
        let windows = group_windows(&fixtures);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].fixtures, vec![1, 2]);
        assert_eq!(windows[1].fixtures, vec![3]);
    }

    #[test]
    fn unscheduled_fixtures_form_no_window() {
        let fixtures = vec![fixture(1, None)];
        assert!(group_windows(&fixtures).is_empty());
    }

    #[test]
    fn unsorted_input_is_handled() {
        let fixtures = vec![
            fixture(2, Some(at(17, 30))),
            fixture(1, Some(at(12, 30))),
        ];
        let windows = group_windows(&fixtures);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].fixtures, vec![1]);
    }
}
