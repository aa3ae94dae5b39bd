//! Adaptive polling scheduler: decides when to poll based on fixture
//! kickoff/finish windows and runs the slow backoff loop awaiting official
//! gameweek confirmation.

pub mod windows;

pub use windows::{group_windows, KickoffWindow};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::events::EventDetector;
use crate::fpl::client::{FplApi, FplError};
use crate::fpl::models::{EntryId, Fixture, FixtureStatus, Gameweek, GameweekId};
use crate::fpl::UpstreamCache;
use crate::scoring::compute_effective_score;
use crate::state::UpstreamHealth;

/// Live polling starts this many minutes before a window's first kickoff.
const LIVE_LEAD_MINUTES: i64 = 5;
/// When matches outrun the nominal window end, polling extends a minute at a
/// time, bounded so a stuck upstream flag cannot pin us in live mode forever.
const WINDOW_EXTENSION_SECS: u64 = 60;
const MAX_WINDOW_EXTENSIONS: u32 = 120;
/// Bonus-confirmation backoff: every 2 minutes for the first hour, then
/// every 5 minutes, capped at a maximum total wait.
const BONUS_FAST_SECS: u64 = 120;
const BONUS_SLOW_SECS: u64 = 300;
const BONUS_FAST_PHASE_MINUTES: i64 = 60;
const BONUS_MAX_WAIT_MINUTES: i64 = 240;
/// Re-plan cadence when there is nothing on the horizon.
const IDLE_REPLAN_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    Idle,
    PreMatch,
    Live,
    BonusConfirmation,
    Rescheduling,
}

/// Snapshot of the scheduler's position, for collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleState {
    pub mode: ScheduleMode,
    pub active_window: Option<KickoffWindow>,
    pub next_transition_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct BonusWait {
    gw: GameweekId,
    since: DateTime<Utc>,
}

/// Resolve which gameweek scheduling should treat as current.
///
/// Upstream advances its `is_current` pointer lazily: the flag can still sit
/// on a fully completed gameweek after the next one's deadline has passed.
/// When that happens the next gameweek is the effective one. The heuristic
/// lives here, isolated, so it can be revisited without touching the rest of
/// the scheduler.
pub fn effective_current_gameweek(
    gameweeks: &[Gameweek],
    fixtures: &[Fixture],
    now: DateTime<Utc>,
) -> Option<GameweekId> {
    let nominal = gameweeks
        .iter()
        .find(|g| g.is_current)
        .or_else(|| gameweeks.iter().find(|g| !g.finished))?;

    let nominal_fixtures: Vec<&Fixture> =
        fixtures.iter().filter(|f| f.event == nominal.id).collect();
    let nominal_done = nominal.finished
        || (!nominal_fixtures.is_empty() && nominal_fixtures.iter().all(|f| f.finished));

    if nominal_done {
        if let Some(next) = gameweeks.iter().find(|g| g.is_next) {
            if next.deadline_time <= now {
                return Some(next.id);
            }
        }
    }
    Some(nominal.id)
}

/// Poll cadence while waiting for official bonus confirmation.
fn bonus_poll_interval(waited: ChronoDuration) -> Duration {
    if waited < ChronoDuration::minutes(BONUS_FAST_PHASE_MINUTES) {
        Duration::from_secs(BONUS_FAST_SECS)
    } else {
        Duration::from_secs(BONUS_SLOW_SECS)
    }
}

pub struct Scheduler {
    api: Arc<dyn FplApi>,
    cache: UpstreamCache,
    db: Database,
    detector: EventDetector,
    health: UpstreamHealth,
    entries: Vec<EntryId>,
    live_poll: Duration,
    prematch_poll: Duration,
    state: RwLock<ScheduleState>,
    /// Every pending timer task. A reschedule aborts all of them before
    /// computing new ones; an orphaned timer would mean a duplicate loop.
    timers: StdMutex<Vec<JoinHandle<()>>>,
    /// At most one polling loop runs at a time; starting another is a no-op.
    poll_loop_active: AtomicBool,
    /// Pending bonus confirmation, tracked by gameweek id rather than
    /// `is_current` because upstream flips its pointer to the next gameweek
    /// at the same moment it finalizes the previous one.
    bonus_wait: StdMutex<Option<BonusWait>>,
    bonus_task: StdMutex<Option<JoinHandle<()>>>,
    resched: Notify,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn FplApi>,
        db: Database,
        health: UpstreamHealth,
        entries: Vec<EntryId>,
        live_poll: Duration,
        prematch_poll: Duration,
        max_event_log: usize,
    ) -> Arc<Self> {
        let cache = UpstreamCache::new(Arc::clone(&api), health.clone());
        let detector = EventDetector::new(db.clone(), max_event_log);
        Arc::new(Scheduler {
            api,
            cache,
            db,
            detector,
            health,
            entries,
            live_poll,
            prematch_poll,
            state: RwLock::new(ScheduleState {
                mode: ScheduleMode::Idle,
                active_window: None,
                next_transition_at: None,
            }),
            timers: StdMutex::new(Vec::new()),
            poll_loop_active: AtomicBool::new(false),
            bonus_wait: StdMutex::new(None),
            bonus_task: StdMutex::new(None),
            resched: Notify::new(),
        })
    }

    pub fn schedule_state(&self) -> ScheduleState {
        self.state.read().unwrap().clone()
    }

    fn set_state(
        &self,
        mode: ScheduleMode,
        active_window: Option<KickoffWindow>,
        next_transition_at: Option<DateTime<Utc>>,
    ) {
        let mut state = self.state.write().unwrap();
        if state.mode != mode {
            debug!("schedule mode {:?} -> {:?}", state.mode, mode);
        }
        *state = ScheduleState {
            mode,
            active_window,
            next_transition_at,
        };
    }

    /// Abort every pending timer and stop the polling loop. Runs at the top
    /// of every reschedule so no duplicate loops can survive a re-plan.
    fn cancel_timers(&self) {
        let mut timers = self.timers.lock().unwrap();
        for handle in timers.drain(..) {
            handle.abort();
        }
        self.poll_loop_active.store(false, Ordering::SeqCst);
    }

    fn register_timer(&self, handle: JoinHandle<()>) {
        self.timers.lock().unwrap().push(handle);
    }

    fn request_reschedule(&self) {
        self.resched.notify_one();
    }

    /// Run forever: plan, then wait for whichever timer asks for a re-plan.
    pub async fn run(self: Arc<Self>) {
        loop {
            if let Err(e) = self.reschedule().await {
                error!("reschedule failed: {e:#}");
                if self.health.is_degraded() {
                    let snapshot = self.health.snapshot();
                    warn!("upstream degraded since {:?}: {:?}", snapshot.last_error_at, snapshot.last_error);
                }
                tokio::time::sleep(Duration::from_secs(30)).await;
                continue;
            }
            debug!("schedule installed: {:?}", self.schedule_state().mode);
            self.resched.notified().await;
        }
    }

    /// The transient `Rescheduling` pass: refresh fixture data, reconcile
    /// anything missed, then install the timers for the current position.
    async fn reschedule(self: &Arc<Self>) -> Result<()> {
        self.cancel_timers();
        self.set_state(ScheduleMode::Rescheduling, None, None);

        let bootstrap = self.cache.bootstrap().await.context("fetching bootstrap")?;
        let fixtures = self.cache.fixtures().await.context("fetching fixtures")?;
        let now = Utc::now();

        self.recovery_pass(&bootstrap.events, &fixtures).await;

        let Some(gw) = effective_current_gameweek(&bootstrap.events, &fixtures, now) else {
            info!("no schedulable gameweek; idling");
            self.set_state(ScheduleMode::Idle, None, None);
            return Ok(());
        };
        let gw_fixtures: Vec<Fixture> =
            fixtures.iter().filter(|f| f.event == gw).cloned().collect();
        let deadline = bootstrap
            .events
            .iter()
            .find(|e| e.id == gw)
            .map(|e| e.deadline_time);

        // Resume a pending bonus-confirmation wait across re-plans.
        let pending = *self.bonus_wait.lock().unwrap();
        if let Some(wait) = pending {
            self.ensure_bonus_task(wait);
        }

        let lead = ChronoDuration::minutes(LIVE_LEAD_MINUTES);
        let windows = group_windows(&gw_fixtures);

        // Inside a kickoff window (or just ahead of one): go live.
        if let Some(window) = windows
            .iter()
            .find(|w| now >= w.start - lead && now <= w.end)
        {
            info!(
                "live polling: window of {} fixture(s) until {}",
                window.fixtures.len(),
                window.end
            );
            self.set_state(ScheduleMode::Live, Some(window.clone()), Some(window.end));
            self.start_poll_loop(gw, self.live_poll);
            self.spawn_window_end_check(gw, window.clone());
            return Ok(());
        }

        // A window nominally over but with matches still running (e.g. after
        // a restart): stay live and let end-verification drive the exit.
        if let Some(window) = windows.iter().filter(|w| now > w.end).last() {
            let still_running = gw_fixtures.iter().any(|f| {
                window.fixtures.contains(&f.id) && f.status() == FixtureStatus::InProgress
            });
            if still_running {
                info!("window overran its nominal end; continuing live polling");
                self.set_state(ScheduleMode::Live, Some(window.clone()), None);
                self.start_poll_loop(gw, self.live_poll);
                self.spawn_window_end_check(gw, window.clone());
                return Ok(());
            }
        }

        // Between deadline and first kickoff: pre-match polling, with the
        // switch to live scheduled at first kickoff.
        if let (Some(dl), Some(first)) = (deadline, windows.first()) {
            if now >= dl && now < first.start {
                info!("pre-match polling until first kickoff at {}", first.start);
                self.set_state(
                    ScheduleMode::PreMatch,
                    Some(first.clone()),
                    Some(first.start),
                );
                self.start_poll_loop(gw, self.prematch_poll);
                self.schedule_wake_at(first.start - lead);
                return Ok(());
            }
        }

        // Everything played but official confirmation outstanding: make sure
        // the bonus wait exists (covers restarts mid-wait).
        let all_provisional = !gw_fixtures.is_empty()
            && gw_fixtures.iter().any(|f| f.started)
            && gw_fixtures.iter().all(|f| !f.started || f.finished_provisional);
        let any_unofficial = gw_fixtures.iter().any(|f| f.started && !f.finished);
        if all_provisional && any_unofficial && pending.is_none() {
            if !self.db.is_gameweek_reconciled(gw)? {
                self.begin_bonus_wait(gw);
                self.set_state(ScheduleMode::BonusConfirmation, None, None);
                return Ok(());
            }
        }
        if pending.is_some() {
            self.set_state(ScheduleMode::BonusConfirmation, None, None);
            return Ok(());
        }

        // Nothing live: idle until the next deadline or window lead-in.
        let mut wake: Option<DateTime<Utc>> = windows
            .iter()
            .map(|w| w.start - lead)
            .find(|start| *start > now);
        if let Some(dl) = deadline {
            if dl > now {
                wake = Some(wake.map_or(dl, |w| w.min(dl)));
            }
        }
        let wake = wake.unwrap_or(now + ChronoDuration::minutes(IDLE_REPLAN_MINUTES));
        info!("idle until {}", wake);
        self.set_state(ScheduleMode::Idle, None, Some(wake));
        self.schedule_wake_at(wake);
        Ok(())
    }

    /// Reconcile gameweeks that completed while we were not watching (missed
    /// transitions after a restart). Officially finished gameweeks are
    /// recomputed and marked; provisionally finished ones are recomputed and
    /// left for the bonus-confirmation path to finalize.
    async fn recovery_pass(&self, gameweeks: &[Gameweek], fixtures: &[Fixture]) {
        let now = Utc::now();
        for gw in gameweeks {
            if gw.deadline_time > now {
                continue;
            }
            let gw_fixtures: Vec<&Fixture> =
                fixtures.iter().filter(|f| f.event == gw.id).collect();
            if gw_fixtures.is_empty() {
                continue;
            }
            let official = gw.finished || gw_fixtures.iter().all(|f| f.finished);
            let provisional = gw_fixtures.iter().all(|f| f.finished_provisional);
            if !official && !provisional {
                continue;
            }
            match self.db.is_gameweek_reconciled(gw.id) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!("reconciliation check failed for gameweek {}: {}", gw.id, e);
                    continue;
                }
            }
            info!("recovery: refreshing completed gameweek {}", gw.id);
            if let Err(e) = self.poll_cycle(gw.id).await {
                warn!("recovery recompute failed for gameweek {}: {:#}", gw.id, e);
                continue;
            }
            if official {
                if let Err(e) = self.db.mark_gameweek_reconciled(gw.id) {
                    warn!("failed to mark gameweek {} reconciled: {}", gw.id, e);
                }
            }
        }
    }

    /// Start the polling loop for a gameweek. A no-op while one is active;
    /// the loop is registered as a timer so every reschedule tears it down.
    fn start_poll_loop(self: &Arc<Self>, gw: GameweekId, interval: Duration) {
        if self.poll_loop_active.swap(true, Ordering::SeqCst) {
            debug!("polling loop already active; not starting another");
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = this.poll_cycle(gw).await {
                    // Degraded upstream must not stop the loop; the next tick
                    // retries against whatever the cache can serve.
                    error!("poll cycle failed: {e:#}");
                }
            }
        });
        self.register_timer(handle);
    }

    /// One poll: fetch the snapshot, detect events, score the watchlist.
    async fn poll_cycle(&self, gw: GameweekId) -> Result<()> {
        let bootstrap = self.cache.bootstrap().await.context("bootstrap")?;
        let fixtures = self.cache.fixtures().await.context("fixtures")?;
        let gw_fixtures: Vec<Fixture> =
            fixtures.into_iter().filter(|f| f.event == gw).collect();
        let live = self
            .cache
            .live_gameweek(gw)
            .await
            .context("live gameweek")?;

        if let Err(e) = self
            .detector
            .process(gw, &live, &gw_fixtures, &bootstrap.elements)
            .await
        {
            // Event detection failure must not abort scoring.
            error!("event detection failed: {e:#}");
        }

        // Picks for the whole watchlist are fetched concurrently; each
        // manager fails or succeeds independently.
        let picks_results = join_all(self.entries.iter().map(|&entry| async move {
            (entry, self.health.track(self.api.entry_picks(entry, gw).await))
        }))
        .await;

        for (entry, result) in picks_results {
            match result {
                Ok(picks) => {
                    let score =
                        compute_effective_score(&picks, &live, &gw_fixtures, &bootstrap.elements);
                    if let Err(e) = self.db.upsert_derived_score(entry, gw, &score) {
                        warn!("failed to persist score for entry {}: {}", entry, e);
                    }
                }
                Err(FplError::NotFound(_)) => {
                    debug!("no picks yet for entry {} in gameweek {}", entry, gw);
                }
                Err(e) => {
                    // Last persisted derived value stands in for this cycle.
                    warn!("picks fetch failed for entry {}: {}", entry, e);
                }
            }
        }
        Ok(())
    }

    /// Wake the planner at an absolute time.
    fn schedule_wake_at(self: &Arc<Self>, at: DateTime<Utc>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let wait = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            this.request_reschedule();
        });
        self.register_timer(handle);
    }

    /// At window end, re-verify against fresh fixture data that every
    /// started match is provisionally finished; if not, extend polling a
    /// minute at a time up to the bound, then hand over to bonus
    /// confirmation.
    fn spawn_window_end_check(self: &Arc<Self>, gw: GameweekId, window: KickoffWindow) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let wait = (window.end - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            let mut extensions = 0u32;
            loop {
                this.cache.invalidate_volatile().await;
                // A failed fetch cannot prove the matches are over; it counts
                // as an unfinished match and burns an extension like one.
                let still_running = match this.cache.fixtures().await {
                    Ok(fixtures) => fixtures.iter().any(|f| {
                        window.fixtures.contains(&f.id) && f.status() == FixtureStatus::InProgress
                    }),
                    Err(e) => {
                        warn!("window-end verification fetch failed: {}", e);
                        true
                    }
                };
                if !still_running {
                    info!(
                        "all window fixtures provisionally finished; awaiting official bonus for gameweek {}",
                        gw
                    );
                    this.begin_bonus_wait(gw);
                    this.request_reschedule();
                    return;
                }
                extensions += 1;
                if extensions > MAX_WINDOW_EXTENSIONS {
                    warn!("window verification exceeded its extension bound; moving on");
                    this.begin_bonus_wait(gw);
                    this.request_reschedule();
                    return;
                }
                debug!(
                    "matches still running; extending live polling ({}/{})",
                    extensions, MAX_WINDOW_EXTENSIONS
                );
                tokio::time::sleep(Duration::from_secs(WINDOW_EXTENSION_SECS)).await;
            }
        });
        self.register_timer(handle);
    }

    fn begin_bonus_wait(self: &Arc<Self>, gw: GameweekId) {
        let wait = {
            let mut pending = self.bonus_wait.lock().unwrap();
            match *pending {
                Some(existing) if existing.gw == gw => existing,
                _ => {
                    let wait = BonusWait {
                        gw,
                        since: Utc::now(),
                    };
                    *pending = Some(wait);
                    wait
                }
            }
        };
        self.ensure_bonus_task(wait);
    }

    /// Spawn the confirmation loop unless one is already running. The task
    /// deliberately lives outside the timer set so re-plans do not reset the
    /// backoff clock.
    fn ensure_bonus_task(self: &Arc<Self>, wait: BonusWait) {
        let mut task = self.bonus_task.lock().unwrap();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            this.bonus_confirmation_loop(wait).await;
        }));
    }

    async fn bonus_confirmation_loop(self: Arc<Self>, wait: BonusWait) {
        info!(
            "bonus confirmation polling started for gameweek {}",
            wait.gw
        );
        loop {
            let waited = Utc::now() - wait.since;
            if waited > ChronoDuration::minutes(BONUS_MAX_WAIT_MINUTES) {
                warn!(
                    "bonus confirmation for gameweek {} capped after {} minutes",
                    wait.gw,
                    waited.num_minutes()
                );
                break;
            }
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..15_000));
            tokio::time::sleep(bonus_poll_interval(waited) + jitter).await;

            self.cache.invalidate_volatile().await;
            match self.cache.fixtures().await {
                Ok(fixtures) => {
                    let confirmed = fixtures
                        .iter()
                        .filter(|f| f.event == wait.gw)
                        .all(|f| f.finished);
                    if confirmed {
                        info!("gameweek {} officially confirmed", wait.gw);
                        break;
                    }
                }
                Err(e) => warn!("confirmation fetch failed: {}", e),
            }
        }

        // Full recompute against the final data, then back to planning.
        if let Err(e) = self.poll_cycle(wait.gw).await {
            warn!("final recompute failed for gameweek {}: {:#}", wait.gw, e);
        }
        self.verify_official_totals(wait.gw).await;
        if let Err(e) = self.db.mark_gameweek_reconciled(wait.gw) {
            warn!("failed to mark gameweek {} reconciled: {}", wait.gw, e);
        }
        *self.bonus_wait.lock().unwrap() = None;
        self.request_reschedule();
    }

    /// Cross-check our derived totals against the official per-gameweek
    /// summaries once a gameweek is final. Divergence is logged, never fatal.
    async fn verify_official_totals(&self, gw: GameweekId) {
        for &entry in &self.entries {
            let history = match self.health.track(self.api.entry_history(entry).await) {
                Ok(h) => h,
                Err(e) => {
                    debug!("history fetch failed for entry {}: {}", entry, e);
                    continue;
                }
            };
            let Some(official) = history.current.iter().find(|s| s.event == gw) else {
                continue;
            };
            match self.db.get_derived_score(entry, gw) {
                Ok(Some(derived)) if derived.total != official.points => warn!(
                    "entry {} gameweek {}: derived {} != official {}",
                    entry, gw, derived.total, official.points
                ),
                Ok(_) => {}
                Err(e) => warn!("derived score lookup failed for entry {}: {}", entry, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fpl::models::{Bootstrap, EntryHistory, LiveGameweek, Picks};
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn gameweek(id: u32, deadline: DateTime<Utc>, current: bool, next: bool, finished: bool) -> Gameweek {
        Gameweek {
            id,
            deadline_time: deadline,
            is_current: current,
            is_next: next,
            finished,
        }
    }

    fn fixture(id: u32, event: u32, finished: bool) -> Fixture {
        Fixture {
            id,
            event,
            kickoff_time: None,
            team_h: 1,
            team_a: 2,
            started: finished,
            finished,
            finished_provisional: finished,
            stats: vec![],
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn nominal_current_gameweek_is_used() {
        let gws = vec![
            gameweek(7, at(4, 10), true, false, false),
            gameweek(8, at(11, 10), false, true, false),
        ];
        let fixtures = vec![fixture(1, 7, false)];
        assert_eq!(
            effective_current_gameweek(&gws, &fixtures, at(5, 12)),
            Some(7)
        );
    }

    #[test]
    fn stale_current_pointer_rolls_to_next_after_deadline() {
        // GW7 finished, upstream still flags it current, and GW8's deadline
        // has passed: GW8 is effective.
        let gws = vec![
            gameweek(7, at(4, 10), true, false, true),
            gameweek(8, at(11, 10), false, true, false),
        ];
        let fixtures = vec![fixture(1, 7, true)];
        assert_eq!(
            effective_current_gameweek(&gws, &fixtures, at(11, 12)),
            Some(8)
        );
    }

    #[test]
    fn finished_current_before_next_deadline_stays_current() {
        let gws = vec![
            gameweek(7, at(4, 10), true, false, true),
            gameweek(8, at(11, 10), false, true, false),
        ];
        let fixtures = vec![fixture(1, 7, true)];
        // Transition window: GW7 done but GW8's deadline still ahead.
        assert_eq!(
            effective_current_gameweek(&gws, &fixtures, at(8, 12)),
            Some(7)
        );
    }

    #[test]
    fn fully_finished_fixtures_count_as_done_even_without_flag() {
        let gws = vec![
            gameweek(7, at(4, 10), true, false, false),
            gameweek(8, at(11, 10), false, true, false),
        ];
        let fixtures = vec![fixture(1, 7, true), fixture(2, 7, true)];
        assert_eq!(
            effective_current_gameweek(&gws, &fixtures, at(11, 12)),
            Some(8)
        );
    }

    #[test]
    fn bonus_backoff_is_two_then_five_minutes() {
        assert_eq!(
            bonus_poll_interval(ChronoDuration::minutes(10)),
            Duration::from_secs(120)
        );
        assert_eq!(
            bonus_poll_interval(ChronoDuration::minutes(59)),
            Duration::from_secs(120)
        );
        assert_eq!(
            bonus_poll_interval(ChronoDuration::minutes(61)),
            Duration::from_secs(300)
        );
    }

    struct FakeApi;

    #[async_trait]
    impl FplApi for FakeApi {
        async fn bootstrap(&self) -> Result<Bootstrap, FplError> {
            Ok(Bootstrap {
                events: vec![],
                teams: vec![],
                elements: vec![],
            })
        }
        async fn fixtures(&self) -> Result<Vec<Fixture>, FplError> {
            Ok(vec![])
        }
        async fn live_gameweek(&self, _gw: GameweekId) -> Result<LiveGameweek, FplError> {
            Ok(LiveGameweek { elements: vec![] })
        }
        async fn entry_picks(&self, _e: EntryId, _gw: GameweekId) -> Result<Picks, FplError> {
            Err(FplError::NotFound("picks".into()))
        }
        async fn entry_history(&self, _e: EntryId) -> Result<EntryHistory, FplError> {
            Err(FplError::NotFound("history".into()))
        }
    }

    /// Serves a fixed bootstrap/fixtures payload; picks and history do not
    /// exist, as for a watchlist with no entries yet.
    struct ScenarioApi {
        gameweeks: Vec<Gameweek>,
        fixtures: Vec<Fixture>,
    }

    #[async_trait]
    impl FplApi for ScenarioApi {
        async fn bootstrap(&self) -> Result<Bootstrap, FplError> {
            Ok(Bootstrap {
                events: self.gameweeks.clone(),
                teams: vec![],
                elements: vec![],
            })
        }
        async fn fixtures(&self) -> Result<Vec<Fixture>, FplError> {
            Ok(self.fixtures.clone())
        }
        async fn live_gameweek(&self, _gw: GameweekId) -> Result<LiveGameweek, FplError> {
            Ok(LiveGameweek { elements: vec![] })
        }
        async fn entry_picks(&self, _e: EntryId, _gw: GameweekId) -> Result<Picks, FplError> {
            Err(FplError::NotFound("picks".into()))
        }
        async fn entry_history(&self, _e: EntryId) -> Result<EntryHistory, FplError> {
            Err(FplError::NotFound("history".into()))
        }
    }

    struct DownstreamOutageApi;

    #[async_trait]
    impl FplApi for DownstreamOutageApi {
        async fn bootstrap(&self) -> Result<Bootstrap, FplError> {
            Err(FplError::Upstream("bootstrap unavailable".into()))
        }
        async fn fixtures(&self) -> Result<Vec<Fixture>, FplError> {
            Err(FplError::Upstream("fixtures unavailable".into()))
        }
        async fn live_gameweek(&self, _gw: GameweekId) -> Result<LiveGameweek, FplError> {
            Err(FplError::Upstream("live unavailable".into()))
        }
        async fn entry_picks(&self, _e: EntryId, _gw: GameweekId) -> Result<Picks, FplError> {
            Err(FplError::Upstream("picks unavailable".into()))
        }
        async fn entry_history(&self, _e: EntryId) -> Result<EntryHistory, FplError> {
            Err(FplError::Upstream("history unavailable".into()))
        }
    }

    fn scheduler_with(api: Arc<dyn FplApi>) -> Arc<Scheduler> {
        Scheduler::new(
            api,
            Database::open(":memory:").unwrap(),
            UpstreamHealth::new(),
            vec![],
            Duration::from_secs(30),
            Duration::from_secs(120),
            100,
        )
    }

    fn test_scheduler() -> Arc<Scheduler> {
        scheduler_with(Arc::new(FakeApi))
    }

    fn kickoff_fixture(id: u32, event: u32, kickoff: DateTime<Utc>) -> Fixture {
        Fixture {
            id,
            event,
            kickoff_time: Some(kickoff),
            team_h: 1,
            team_a: 2,
            started: false,
            finished: false,
            finished_provisional: false,
            stats: vec![],
        }
    }

    #[tokio::test]
    async fn second_poll_loop_start_is_a_noop() {
        let scheduler = test_scheduler();
        scheduler.start_poll_loop(1, Duration::from_secs(3600));
        scheduler.start_poll_loop(1, Duration::from_secs(3600));
        assert_eq!(
            scheduler.timers.lock().unwrap().len(),
            1,
            "only one polling loop may run at a time"
        );
        scheduler.cancel_timers();
    }

    #[tokio::test]
    async fn reschedule_cancels_previous_loop_before_starting_again() {
        let scheduler = test_scheduler();
        scheduler.start_poll_loop(1, Duration::from_secs(3600));
        assert!(scheduler.poll_loop_active.load(Ordering::SeqCst));

        scheduler.cancel_timers();
        assert!(!scheduler.poll_loop_active.load(Ordering::SeqCst));
        assert!(scheduler.timers.lock().unwrap().is_empty());

        // A fresh start after cancellation is accepted again.
        scheduler.start_poll_loop(1, Duration::from_secs(3600));
        assert_eq!(scheduler.timers.lock().unwrap().len(), 1);
        scheduler.cancel_timers();
    }

    #[tokio::test]
    async fn empty_upstream_schedule_goes_idle() {
        let scheduler = test_scheduler();
        scheduler.reschedule().await.unwrap();
        let state = scheduler.schedule_state();
        assert_eq!(state.mode, ScheduleMode::Idle);
        assert!(state.active_window.is_none());
        scheduler.cancel_timers();
    }

    #[tokio::test]
    async fn deadline_passed_before_kickoff_enters_prematch() {
        let now = Utc::now();
        let kickoff = now + ChronoDuration::hours(2);
        let api = ScenarioApi {
            gameweeks: vec![gameweek(7, now - ChronoDuration::hours(1), true, false, false)],
            fixtures: vec![kickoff_fixture(1, 7, kickoff)],
        };
        let scheduler = scheduler_with(Arc::new(api));
        scheduler.reschedule().await.unwrap();

        let state = scheduler.schedule_state();
        assert_eq!(state.mode, ScheduleMode::PreMatch);
        assert_eq!(state.next_transition_at, Some(kickoff));
        assert!(scheduler.poll_loop_active.load(Ordering::SeqCst));
        scheduler.cancel_timers();
    }

    #[tokio::test]
    async fn kickoff_window_in_progress_enters_live() {
        let now = Utc::now();
        let kickoff = now - ChronoDuration::minutes(30);
        let mut fx = kickoff_fixture(1, 7, kickoff);
        fx.started = true;
        let api = ScenarioApi {
            gameweeks: vec![gameweek(7, now - ChronoDuration::hours(3), true, false, false)],
            fixtures: vec![fx],
        };
        let scheduler = scheduler_with(Arc::new(api));
        scheduler.reschedule().await.unwrap();

        let state = scheduler.schedule_state();
        assert_eq!(state.mode, ScheduleMode::Live);
        let window = state.active_window.expect("live mode carries its window");
        assert_eq!(window.fixtures, vec![1]);
        assert_eq!(state.next_transition_at, Some(window.end));
        assert!(scheduler.poll_loop_active.load(Ordering::SeqCst));
        scheduler.cancel_timers();
    }

    #[tokio::test]
    async fn provisionally_finished_gameweek_rearms_bonus_wait() {
        // Restart after all matches went provisionally final: the planner
        // must re-enter bonus confirmation for that gameweek id.
        let now = Utc::now();
        let mut fx = kickoff_fixture(1, 7, now - ChronoDuration::hours(4));
        fx.started = true;
        fx.finished_provisional = true;
        let api = ScenarioApi {
            gameweeks: vec![gameweek(7, now - ChronoDuration::hours(6), true, false, false)],
            fixtures: vec![fx],
        };
        let scheduler = scheduler_with(Arc::new(api));
        scheduler.reschedule().await.unwrap();

        assert_eq!(
            scheduler.schedule_state().mode,
            ScheduleMode::BonusConfirmation
        );
        let wait = scheduler
            .bonus_wait
            .lock()
            .unwrap()
            .expect("wait tracked by gameweek id");
        assert_eq!(wait.gw, 7);
        scheduler.cancel_timers();
    }

    #[tokio::test(start_paused = true)]
    async fn window_end_fetch_failures_still_hand_over_to_bonus_wait() {
        // Every verification fetch fails: each failure burns an extension
        // like an unfinished match, and once the bound is hit the task must
        // still arm the bonus wait and wake the planner rather than leave
        // live mode with no pending transition.
        let scheduler = scheduler_with(Arc::new(DownstreamOutageApi));
        let window = KickoffWindow {
            start: Utc::now() - ChronoDuration::hours(3),
            end: Utc::now() - ChronoDuration::minutes(5),
            fixtures: vec![1],
        };
        scheduler.spawn_window_end_check(7, window);
        let handle = scheduler.timers.lock().unwrap().pop().unwrap();
        handle.await.unwrap();

        assert!(
            scheduler.bonus_wait.lock().unwrap().is_some(),
            "verification must hand over to bonus confirmation"
        );
        tokio::time::timeout(Duration::from_secs(1), scheduler.resched.notified())
            .await
            .expect("a reschedule must be requested");
        scheduler.cancel_timers();
    }
}
