//! Upstream HTTP gateway.
//!
//! Bounded, rate-respectful client for the fantasy API with a
//! read-through cache. Network failures return empty defaults rather
//! than erroring so the event pipeline stays responsive; the scheduler's
//! periodic refresh provides eventual consistency.

pub mod api;
pub mod cache;

use crate::agents::{Agent, AgentContext};
use crate::events::payloads::{DataRefreshRequestedPayload, DataUpdatedPayload};
use crate::events::{Event, EventKind};
use crate::storage::{Database, HistoryRow};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use api::{BootstrapResponse, ElementSummary, LiveResponse};
pub use cache::{Cache, MemoryCache, RedisCache};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Cache lifetimes. Bootstrap changes at most a couple of times a day,
/// fixtures rarely, per-player history daily; live stats churn during
/// matches.
const TTL_BOOTSTRAP: Duration = Duration::from_secs(6 * 3600);
const TTL_FIXTURES: Duration = Duration::from_secs(12 * 3600);
const TTL_PLAYER_DETAIL: Duration = Duration::from_secs(24 * 3600);
const TTL_LIVE: Duration = Duration::from_secs(60);
const TTL_LEAGUE: Duration = Duration::from_secs(3600);

pub struct FplClient {
    http: reqwest::Client,
    base_url: String,
    cache: Arc<dyn Cache>,
    db: Database,
}

impl FplClient {
    pub fn new(base_url: impl Into<String>, cache: Arc<dyn Cache>, db: Database) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("gafferbot/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into(),
            cache,
            db,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// GET a JSON document; any transport error, timeout or non-2xx
    /// yields `None` with a warning.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Option<T> {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Upstream request {url} failed: {e}");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!("Upstream {url} returned HTTP {}", response.status());
            return None;
        }
        match response.json::<T>().await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Upstream {url} returned malformed body: {e}");
                None
            }
        }
    }

    /// Read-through fetch: cache hit short-circuits unless forced; a
    /// successful fetch is written back best-effort; a failed fetch
    /// returns the default without poisoning the cache.
    async fn fetch_cached<T>(&self, key: &str, ttl: Duration, force: bool, url: String) -> T
    where
        T: DeserializeOwned + Serialize + Default,
    {
        if !force {
            if let Some(raw) = self.cache.get(key).await {
                if let Ok(value) = serde_json::from_str::<T>(&raw) {
                    return value;
                }
            }
        }

        let Some(value) = self.get_json::<T>(&url).await else {
            return T::default();
        };
        if let Ok(raw) = serde_json::to_string(&value) {
            self.cache.set(key, &raw, ttl).await;
        }
        value
    }

    /// Players, teams and gameweeks in one aggregate document.
    pub async fn fetch_bootstrap(&self, force: bool) -> BootstrapResponse {
        self.fetch_cached(
            "bootstrap",
            TTL_BOOTSTRAP,
            force,
            format!("{}/bootstrap-static/", self.base_url),
        )
        .await
    }

    pub async fn fetch_fixtures(&self, gameweek: Option<i32>, force: bool) -> Vec<api::ApiFixture> {
        let key = match gameweek {
            Some(gw) => format!("fixtures:{gw}"),
            None => "fixtures:all".to_string(),
        };
        let url = match gameweek {
            Some(gw) => format!("{}/fixtures/?event={gw}", self.base_url),
            None => format!("{}/fixtures/", self.base_url),
        };
        self.fetch_cached(&key, TTL_FIXTURES, force, url).await
    }

    pub async fn fetch_player_detail(&self, player_id: i64, force: bool) -> ElementSummary {
        self.fetch_cached(
            &format!("player:{player_id}"),
            TTL_PLAYER_DETAIL,
            force,
            format!("{}/element-summary/{player_id}/", self.base_url),
        )
        .await
    }

    pub async fn fetch_live(&self, gameweek: i32, force: bool) -> LiveResponse {
        self.fetch_cached(
            &format!("live:gw{gameweek}"),
            TTL_LIVE,
            force,
            format!("{}/event/{gameweek}/live/", self.base_url),
        )
        .await
    }

    pub async fn fetch_league_standings(
        &self,
        league_id: i64,
        force: bool,
    ) -> api::LeagueStandingsResponse {
        self.fetch_cached(
            &format!("league:{league_id}"),
            TTL_LEAGUE,
            force,
            format!("{}/leagues-classic/{league_id}/standings/", self.base_url),
        )
        .await
    }

    /// Fetch bootstrap and fixtures concurrently, persist the derived
    /// rows, and return the update summary for the `data.updated` event.
    /// `None` when the bootstrap fetch came back empty.
    pub async fn update_all_data(&self, force: bool) -> Result<Option<DataUpdatedPayload>> {
        let (bootstrap, fixtures) =
            tokio::join!(self.fetch_bootstrap(force), self.fetch_fixtures(None, force));

        if bootstrap.is_empty() {
            warn!("Bootstrap fetch came back empty, skipping persistence");
            return Ok(None);
        }

        let players: Vec<_> = bootstrap
            .elements
            .iter()
            .filter_map(|p| p.to_player())
            .collect();
        let teams: Vec<_> = bootstrap.teams.iter().map(|t| t.to_team()).collect();
        let gameweeks: Vec<_> = bootstrap
            .events
            .iter()
            .filter_map(|e| e.to_gameweek())
            .collect();
        let fixture_rows: Vec<_> = fixtures.iter().map(|f| f.to_fixture()).collect();

        self.db.upsert_players(&players)?;
        self.db.upsert_teams(&teams)?;
        self.db.upsert_gameweeks(&gameweeks)?;
        self.db.upsert_fixtures(&fixture_rows)?;

        let current = bootstrap.current_gameweek().map(|e| e.id);
        info!(
            "Data updated: {} players, {} teams, {} fixtures (current GW {:?})",
            players.len(),
            teams.len(),
            fixture_rows.len(),
            current
        );

        Ok(Some(DataUpdatedPayload {
            gameweek: current,
            num_players: players.len(),
            num_teams: teams.len(),
            num_fixtures: fixture_rows.len(),
            updated_at: Utc::now(),
        }))
    }

    /// Pull per-gameweek detail history for the given players into the
    /// store. Used where direct defensive counters are wanted instead of
    /// the bootstrap proxy.
    pub async fn refresh_player_history(&self, player_ids: &[i64], force: bool) -> Result<usize> {
        let mut rows: Vec<HistoryRow> = Vec::new();
        for chunk in player_ids.chunks(8) {
            let fetches = chunk.iter().map(|id| self.fetch_player_detail(*id, force));
            for summary in futures_util::future::join_all(fetches).await {
                rows.extend(summary.history.iter().map(|h| h.to_history_row()));
            }
        }
        if rows.is_empty() {
            return Ok(0);
        }
        self.db.upsert_history(&rows)
    }

    /// Persist the live per-player statistics of a gameweek as history
    /// rows. Called after a gameweek completes to capture outcomes.
    pub async fn sync_gameweek_history(&self, gameweek: i32, force: bool) -> Result<usize> {
        let live = self.fetch_live(gameweek, force).await;
        if live.is_empty() {
            warn!("Live data for GW{gameweek} unavailable");
            return Ok(0);
        }
        let rows: Vec<HistoryRow> = live
            .elements
            .iter()
            .map(|e| e.to_history_row(gameweek))
            .collect();
        self.db.upsert_history(&rows)
    }
}

/// Agent face of the gateway: reacts to refresh requests and completed
/// gameweeks, publishing `data.updated` once fresh rows are persisted.
pub struct DataCollectorAgent {
    client: Arc<FplClient>,
}

impl DataCollectorAgent {
    pub fn new(client: Arc<FplClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Agent for DataCollectorAgent {
    fn name(&self) -> &str {
        "data_collector"
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::DataRefreshRequested, EventKind::GameweekCompleted]
    }

    async fn handle_event(&self, event: Event, ctx: AgentContext) -> Result<()> {
        match event.kind {
            EventKind::DataRefreshRequested => {
                let force = event
                    .payload_as::<DataRefreshRequestedPayload>()
                    .map(|p| p.force)
                    .unwrap_or(false);
                if let Some(payload) = self.client.update_all_data(force).await? {
                    ctx.publish(
                        Event::from_payload(EventKind::DataUpdated, &payload)
                            .with_correlation(event.id.to_string()),
                    )
                    .await;
                }
            }
            EventKind::GameweekCompleted => {
                if let Some(gameweek) = event.payload_i64("gameweek") {
                    let synced = self
                        .client
                        .sync_gameweek_history(gameweek as i32, true)
                        .await?;
                    info!("Synced {synced} outcome rows for GW{gameweek}");
                }
            }
            _ => {}
        }
        Ok(())
    }
}
