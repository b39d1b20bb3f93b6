//! Expected-goals analyst.
//!
//! Ranks attacking players by expected goal involvement per 90 and flags
//! over- and under-performers against their expected numbers.

use crate::agents::{Agent, AgentContext};
use crate::events::payloads::{AnalysisRequestedPayload, XgPlayerStat, XgSummary};
use crate::events::{Event, EventKind};
use crate::models::{Player, Position};
use crate::storage::Database;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

/// Three full games before per-90 numbers stabilize.
pub const MIN_MINUTES: i64 = 270;
/// |goals - xG| beyond this flags a performer.
const PERFORMANCE_THRESHOLD: f64 = 0.5;

pub struct XgAnalyst {
    db: Database,
    last_analysis: RwLock<Option<XgSummary>>,
}

impl XgAnalyst {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            last_analysis: RwLock::new(None),
        }
    }

    pub fn last_analysis(&self) -> Option<XgSummary> {
        self.last_analysis.read().clone()
    }

    pub fn analyze(&self, gameweek: i32) -> Result<XgSummary> {
        let players = self.db.all_players()?;

        let mut stats: Vec<XgPlayerStat> = players
            .iter()
            .filter(|p| matches!(p.position, Position::Midfielder | Position::Forward))
            .filter(|p| p.minutes >= MIN_MINUTES)
            .map(player_stat)
            .collect();

        stats.sort_by(|a, b| b.xgi_per_90.total_cmp(&a.xgi_per_90));
        let rankings: Vec<XgPlayerStat> = stats.iter().take(30).cloned().collect();

        let mut overperformers: Vec<XgPlayerStat> = stats
            .iter()
            .filter(|s| s.xg_diff >= PERFORMANCE_THRESHOLD)
            .cloned()
            .collect();
        overperformers.sort_by(|a, b| b.xg_diff.total_cmp(&a.xg_diff));
        overperformers.truncate(20);

        let mut underperformers: Vec<XgPlayerStat> = stats
            .iter()
            .filter(|s| s.xg_diff <= -PERFORMANCE_THRESHOLD)
            .cloned()
            .collect();
        underperformers.sort_by(|a, b| a.xg_diff.total_cmp(&b.xg_diff));
        underperformers.truncate(20);

        Ok(XgSummary {
            gameweek,
            players_analyzed: stats.len(),
            min_minutes_required: MIN_MINUTES,
            rankings,
            overperformers,
            underperformers,
        })
    }
}

fn player_stat(player: &Player) -> XgPlayerStat {
    let price = player.price();
    XgPlayerStat {
        player_id: player.id,
        web_name: player.web_name.clone(),
        team_id: player.team_id,
        position: player.position,
        price,
        minutes: player.minutes,
        goals: player.goals_scored,
        assists: player.assists,
        xg: player.expected_goals,
        xa: player.expected_assists,
        xgi: player.expected_goal_involvements,
        xg_per_90: player.expected_goals_per_90,
        xa_per_90: player.expected_assists_per_90,
        xgi_per_90: player.expected_goal_involvements_per_90,
        xg_diff: player.goals_scored as f64 - player.expected_goals,
        xgi_per_million: if price > 0.0 {
            player.expected_goal_involvements / price
        } else {
            0.0
        },
    }
}

#[async_trait]
impl Agent for XgAnalyst {
    fn name(&self) -> &str {
        "xg_analyst"
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::DataUpdated, EventKind::AnalysisRequested]
    }

    async fn handle_event(&self, event: Event, ctx: AgentContext) -> Result<()> {
        if event.kind == EventKind::AnalysisRequested {
            let requested = event
                .payload_as::<AnalysisRequestedPayload>()
                .map(|p| p.analysis_type)
                .unwrap_or_default();
            if !super::analysis_requested_for(Some(&requested), "xg") {
                return Ok(());
            }
        }

        let gameweek = event
            .payload_i64("gameweek")
            .map(|gw| gw as i32)
            .or_else(|| self.db.current_gameweek().ok().flatten().map(|gw| gw.id))
            .unwrap_or(1);

        let summary = self.analyze(gameweek)?;
        info!(
            "xG analysis complete: {} players, {} overperformers",
            summary.players_analyzed,
            summary.overperformers.len()
        );
        *self.last_analysis.write() = Some(summary.clone());

        ctx.publish(
            Event::from_payload(EventKind::XgAnalysisCompleted, &summary)
                .with_correlation(event.id.to_string()),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Availability;

    fn attacker(id: i64, minutes: i64, goals: i64, xg: f64, xgi_per_90: f64) -> Player {
        Player {
            id,
            code: 3000 + id,
            web_name: format!("A{id}"),
            position: Position::Forward,
            team_id: 1 + id % 5,
            now_cost: 80,
            status: Availability::Available,
            chance_of_playing_next_round: None,
            selected_by_percent: 20.0,
            form: 5.0,
            points_per_game: 4.5,
            total_points: 60,
            minutes,
            goals_scored: goals,
            assists: 2,
            clean_sheets: 0,
            bps: 150,
            transfers_in_event: 0,
            transfers_out_event: 0,
            cost_change_event: 0,
            cost_change_start: 0,
            expected_goals: xg,
            expected_assists: 1.5,
            expected_goal_involvements: xg + 1.5,
            expected_goals_per_90: xg / (minutes as f64 / 90.0),
            expected_assists_per_90: 0.2,
            expected_goal_involvements_per_90: xgi_per_90,
        }
    }

    #[test]
    fn thresholds_and_rankings() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_players(&[
            attacker(1, 900, 8, 5.0, 0.9),  // overperformer, top xGI
            attacker(2, 900, 2, 4.0, 0.6),  // underperformer
            attacker(3, 900, 3, 3.2, 0.4),  // neither
            attacker(4, 200, 9, 1.0, 2.0),  // under minutes floor
        ])
        .unwrap();

        let analyst = XgAnalyst::new(db);
        let summary = analyst.analyze(8).unwrap();

        assert_eq!(summary.players_analyzed, 3);
        assert_eq!(summary.rankings[0].player_id, 1);
        assert_eq!(summary.overperformers.len(), 1);
        assert_eq!(summary.overperformers[0].player_id, 1);
        assert_eq!(summary.underperformers.len(), 1);
        assert_eq!(summary.underperformers[0].player_id, 2);
    }
}
