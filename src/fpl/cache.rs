//! Stale-while-revalidate caching of upstream responses.
//!
//! A fresh-enough cached value is returned synchronously. A stale value is
//! still returned immediately while at most one background refresh per cache
//! key is in flight; an in-flight marker prevents duplicate concurrent
//! upstream calls. Cold misses fetch inline, with waiters parked on a notify
//! so a burst of first lookups still produces a single upstream call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use super::client::{FplApi, FplError};
use super::models::{Bootstrap, Fixture, GameweekId, LiveGameweek};
use crate::state::UpstreamHealth;

struct SlotState<T> {
    value: Option<(T, Instant)>,
    in_flight: bool,
}

/// One cache key: a value with its fetch time plus the in-flight marker.
pub struct SwrSlot<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
    ttl: Duration,
}

impl<T: Clone + Send + 'static> SwrSlot<T> {
    pub fn new(ttl: Duration) -> Self {
        SwrSlot {
            state: Mutex::new(SlotState {
                value: None,
                in_flight: false,
            }),
            notify: Notify::new(),
            ttl,
        }
    }

    /// Get the cached value, refreshing per the stale-while-revalidate
    /// discipline. `fetch` is only invoked when this call wins the in-flight
    /// marker.
    pub async fn get<F, Fut>(self: &Arc<Self>, fetch: F) -> Result<T, FplError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FplError>> + Send + 'static,
    {
        loop {
            let mut state = self.state.lock().await;
            match &state.value {
                Some((value, fetched_at)) if fetched_at.elapsed() < self.ttl => {
                    return Ok(value.clone());
                }
                Some((value, _)) => {
                    // Stale: serve immediately, refresh in the background if
                    // nobody else already is.
                    let stale = value.clone();
                    if !state.in_flight {
                        state.in_flight = true;
                        drop(state);
                        let slot = Arc::clone(self);
                        tokio::spawn(async move {
                            let result = fetch().await;
                            slot.settle(result).await;
                        });
                    }
                    return Ok(stale);
                }
                None => {
                    if state.in_flight {
                        // Another task is doing the cold fetch; wait for it.
                        drop(state);
                        self.notify.notified().await;
                        continue;
                    }
                    state.in_flight = true;
                    drop(state);
                    let result = fetch().await;
                    let mut state = self.state.lock().await;
                    state.in_flight = false;
                    let out = match result {
                        Ok(v) => {
                            state.value = Some((v.clone(), Instant::now()));
                            Ok(v)
                        }
                        Err(e) => Err(e),
                    };
                    drop(state);
                    self.notify.notify_waiters();
                    return out;
                }
            }
        }
    }

    async fn settle(self: &Arc<Self>, result: Result<T, FplError>) {
        let mut state = self.state.lock().await;
        match result {
            Ok(value) => {
                state.value = Some((value, Instant::now()));
            }
            Err(e) => {
                // Keep the stale value; the next access retries the refresh.
                warn!("cache refresh failed: {}", e);
            }
        }
        state.in_flight = false;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Drop the cached value so the next access fetches fresh.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.value = None;
    }
}

/// Process-wide cache over the upstream source: one slot per bootstrap and
/// fixtures payload, one per live gameweek.
pub struct UpstreamCache {
    api: Arc<dyn FplApi>,
    health: UpstreamHealth,
    bootstrap: Arc<SwrSlot<Bootstrap>>,
    fixtures: Arc<SwrSlot<Vec<Fixture>>>,
    live: Mutex<HashMap<GameweekId, Arc<SwrSlot<LiveGameweek>>>>,
    live_ttl: Duration,
}

impl UpstreamCache {
    pub fn new(api: Arc<dyn FplApi>, health: UpstreamHealth) -> Self {
        UpstreamCache {
            api,
            health,
            // Bootstrap changes rarely; fixtures change on every goal while
            // matches run, so they get a much shorter window.
            bootstrap: Arc::new(SwrSlot::new(Duration::from_secs(600))),
            fixtures: Arc::new(SwrSlot::new(Duration::from_secs(30))),
            live: Mutex::new(HashMap::new()),
            live_ttl: Duration::from_secs(15),
        }
    }

    pub async fn bootstrap(&self) -> Result<Bootstrap, FplError> {
        let api = Arc::clone(&self.api);
        let health = self.health.clone();
        self.bootstrap
            .get(move || async move { health.track(api.bootstrap().await) })
            .await
    }

    pub async fn fixtures(&self) -> Result<Vec<Fixture>, FplError> {
        let api = Arc::clone(&self.api);
        let health = self.health.clone();
        self.fixtures
            .get(move || async move { health.track(api.fixtures().await) })
            .await
    }

    pub async fn live_gameweek(&self, gw: GameweekId) -> Result<LiveGameweek, FplError> {
        let slot = {
            let mut live = self.live.lock().await;
            Arc::clone(
                live.entry(gw)
                    .or_insert_with(|| Arc::new(SwrSlot::new(self.live_ttl))),
            )
        };
        let api = Arc::clone(&self.api);
        let health = self.health.clone();
        slot.get(move || async move { health.track(api.live_gameweek(gw).await) })
            .await
    }

    /// Force the next fixture/live reads to hit upstream. Used at window-end
    /// verification, where a stale "in progress" would wrongly extend polling.
    pub async fn invalidate_volatile(&self) {
        self.fixtures.invalidate().await;
        let live = self.live.lock().await;
        for slot in live.values() {
            slot.invalidate().await;
        }
        debug!("volatile upstream caches invalidated");
    }
}
