use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use super::models::{
    Bootstrap, EntryHistory, EntryId, Fixture, GameweekId, LiveGameweek, Picks, RawFixture,
};

/// Upstream failure taxonomy. `NotFound` is semantic absence (a future
/// gameweek's picks legitimately do not exist yet) and is never treated as
/// degradation; everything else transient flips the process-wide degraded
/// flag while callers fall back to the last good snapshot.
#[derive(Debug, Error)]
pub enum FplError {
    /// 404 from upstream: the resource does not exist (yet).
    #[error("not found: {0}")]
    NotFound(String),

    /// 5xx, timeout, or connection failure: upstream is degraded.
    #[error("upstream degraded: {0}")]
    Upstream(String),

    /// Payload arrived but did not decode into the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

impl FplError {
    pub fn is_degraded(&self) -> bool {
        matches!(self, FplError::Upstream(_))
    }
}

/// Trait seam over the upstream data source so the scheduler and poll cycle
/// can run against a fake in tests.
#[async_trait]
pub trait FplApi: Send + Sync {
    async fn bootstrap(&self) -> Result<Bootstrap, FplError>;
    async fn fixtures(&self) -> Result<Vec<Fixture>, FplError>;
    async fn live_gameweek(&self, gw: GameweekId) -> Result<LiveGameweek, FplError>;
    async fn entry_picks(&self, entry: EntryId, gw: GameweekId) -> Result<Picks, FplError>;
    async fn entry_history(&self, entry: EntryId) -> Result<EntryHistory, FplError>;
}

/// Client for the official Fantasy Premier League API.
#[derive(Clone)]
pub struct FplClient {
    http: Client,
    /// Base URL for overriding in tests
    base_url: String,
}

impl FplClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(FplClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FplError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FplError::Upstream(format!("{url}: {e}")))?;

        match resp.status() {
            StatusCode::NOT_FOUND => return Err(FplError::NotFound(url)),
            s if s.is_server_error() => {
                return Err(FplError::Upstream(format!("{url}: HTTP {s}")));
            }
            s if !s.is_success() => {
                return Err(FplError::Upstream(format!("{url}: HTTP {s}")));
            }
            _ => {}
        }

        resp.json::<T>()
            .await
            .map_err(|e| FplError::Decode(format!("{url}: {e}")))
    }
}

#[async_trait]
impl FplApi for FplClient {
    async fn bootstrap(&self) -> Result<Bootstrap, FplError> {
        self.get_json("bootstrap-static/").await
    }

    async fn fixtures(&self) -> Result<Vec<Fixture>, FplError> {
        let raw: Vec<RawFixture> = self.get_json("fixtures/").await?;
        // Fixtures without a gameweek (unrescheduled postponements) are
        // dropped here so the rest of the engine can rely on the invariant
        // that every fixture belongs to exactly one gameweek.
        Ok(raw.into_iter().filter_map(Fixture::from_raw).collect())
    }

    async fn live_gameweek(&self, gw: GameweekId) -> Result<LiveGameweek, FplError> {
        self.get_json(&format!("event/{gw}/live/")).await
    }

    async fn entry_picks(&self, entry: EntryId, gw: GameweekId) -> Result<Picks, FplError> {
        self.get_json(&format!("entry/{entry}/event/{gw}/picks/"))
            .await
    }

    async fn entry_history(&self, entry: EntryId) -> Result<EntryHistory, FplError> {
        self.get_json(&format!("entry/{entry}/history/")).await
    }
}
