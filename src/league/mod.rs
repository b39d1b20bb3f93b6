//! Mini-league intelligence.
//!
//! Keeps the standings history and rival roster current so the
//! coordinator's competitive context (rank, gap to leader) has data to
//! read. Only runs when a league is configured.

use crate::agents::{Agent, AgentContext};
use crate::events::{Event, EventKind};
use crate::gateway::FplClient;
use crate::storage::Database;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct LeagueIntelAgent {
    db: Database,
    client: Arc<FplClient>,
    league_id: i64,
}

impl LeagueIntelAgent {
    pub fn new(db: Database, client: Arc<FplClient>, league_id: i64) -> Self {
        Self {
            db,
            client,
            league_id,
        }
    }

    /// Pull the current table and persist it against the given gameweek.
    pub async fn sync_standings(&self, gameweek: i32, force: bool) -> Result<usize> {
        let standings = self
            .client
            .fetch_league_standings(self.league_id, force)
            .await;
        if standings.is_empty() {
            warn!("League {} standings unavailable", self.league_id);
            return Ok(0);
        }

        let results = &standings.standings.results;
        for entry in results {
            self.db.upsert_standing(
                self.league_id,
                gameweek,
                entry.entry,
                entry.rank,
                entry.total,
                entry.event_total,
            )?;
            self.db
                .upsert_rival(self.league_id, entry.entry, &entry.entry_name)?;
        }
        info!(
            "League {}: {} standings recorded for GW{gameweek}",
            self.league_id,
            results.len()
        );
        Ok(results.len())
    }
}

#[async_trait]
impl Agent for LeagueIntelAgent {
    fn name(&self) -> &str {
        "league_intel"
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::DataUpdated, EventKind::GameweekCompleted]
    }

    async fn handle_event(&self, event: Event, _ctx: AgentContext) -> Result<()> {
        let gameweek = event
            .payload_i64("gameweek")
            .map(|gw| gw as i32)
            .or_else(|| self.db.current_gameweek().ok().flatten().map(|gw| gw.id))
            .unwrap_or(1);
        // Completed gameweeks force a fresh table; routine refreshes can
        // ride the cache.
        let force = event.kind == EventKind::GameweekCompleted;
        self.sync_standings(gameweek, force).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryCache;

    #[tokio::test]
    async fn unreachable_upstream_records_nothing() {
        let db = Database::open_in_memory().unwrap();
        let client = Arc::new(FplClient::new(
            "http://127.0.0.1:9".to_string(),
            Arc::new(MemoryCache::new()),
            db.clone(),
        ));
        let agent = LeagueIntelAgent::new(db.clone(), client, 777);
        assert_eq!(agent.sync_standings(5, true).await.unwrap(), 0);
        assert!(db.competitive_gap(777, 1).unwrap().is_none());
    }

    #[tokio::test]
    async fn cached_standings_feed_the_competitive_gap() {
        use std::time::Duration;

        let db = Database::open_in_memory().unwrap();
        let cache = Arc::new(MemoryCache::new());
        let raw = serde_json::json!({
            "standings": { "results": [
                { "entry": 11, "rank": 1, "total": 620, "event_total": 61, "entry_name": "Leaders" },
                { "entry": 22, "rank": 2, "total": 575, "event_total": 48, "entry_name": "Chasers" }
            ]}
        });
        crate::gateway::Cache::set(
            &*cache,
            "league:777",
            &raw.to_string(),
            Duration::from_secs(60),
        )
        .await;

        let client = Arc::new(FplClient::new(
            "http://127.0.0.1:9".to_string(),
            cache,
            db.clone(),
        ));
        let agent = LeagueIntelAgent::new(db.clone(), client, 777);
        assert_eq!(agent.sync_standings(8, false).await.unwrap(), 2);

        let (rank, gap) = db.competitive_gap(777, 22).unwrap().unwrap();
        assert_eq!(rank, 2);
        assert_eq!(gap, -45);
    }
}
