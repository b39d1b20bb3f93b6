//! Defensive-contribution analyst.
//!
//! Ranks defenders and midfielders by how reliably they bank the
//! defensive-contribution bonus, and by bonus points per currency unit.
//! Prefers the direct per-gameweek counters from the detail endpoint;
//! falls back to a BPS-derived proxy when no history rows exist for a
//! player yet.

use crate::agents::{Agent, AgentContext};
use crate::events::payloads::{AnalysisRequestedPayload, DcPlayerStat, DcSummary};
use crate::events::{Event, EventKind};
use crate::models::{GameweekStats, Player, Position};
use crate::rules::RulesEngine;
use crate::storage::{Database, HistoryRow};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

/// Minimum appearances before a consistency score means anything.
const MIN_GAMES: i64 = 3;
/// Recent-games window for the consistency fraction.
const RECENT_WINDOW: i64 = 6;
/// BPS-proxy tuning when direct counters are missing.
const PROXY_BPS_PER_DC_POINT: f64 = 20.0;
const PROXY_THRESHOLD_DEF: f64 = 30.0;
const PROXY_THRESHOLD_MID: f64 = 40.0;

pub struct DcAnalyst {
    db: Database,
    last_analysis: RwLock<Option<DcSummary>>,
}

impl DcAnalyst {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            last_analysis: RwLock::new(None),
        }
    }

    pub fn last_analysis(&self) -> Option<DcSummary> {
        self.last_analysis.read().clone()
    }

    pub fn analyze(&self, gameweek: i32) -> Result<DcSummary> {
        let players = self.db.all_players()?;
        let mut stats: Vec<DcPlayerStat> = Vec::new();

        for player in &players {
            if !matches!(player.position, Position::Defender | Position::Midfielder) {
                continue;
            }
            if player.minutes < MIN_GAMES * 60 {
                continue;
            }
            if let Some(stat) = self.player_stat(player)? {
                stats.push(stat);
            }
        }

        let rank = |position: Position, by_value: bool, take: usize| -> Vec<DcPlayerStat> {
            let mut subset: Vec<DcPlayerStat> = stats
                .iter()
                .filter(|s| s.position == position)
                .cloned()
                .collect();
            if by_value {
                subset.sort_by(|a, b| b.dc_per_million.total_cmp(&a.dc_per_million));
            } else {
                subset.sort_by(|a, b| {
                    b.consistency
                        .total_cmp(&a.consistency)
                        .then(b.dc_points.total_cmp(&a.dc_points))
                });
            }
            subset.truncate(take);
            subset
        };

        let summary = DcSummary {
            gameweek,
            players_analyzed: stats.len(),
            min_games_required: MIN_GAMES,
            defender_rankings: rank(Position::Defender, false, 30),
            midfielder_rankings: rank(Position::Midfielder, false, 30),
            defender_value_rankings: rank(Position::Defender, true, 20),
            midfielder_value_rankings: rank(Position::Midfielder, true, 20),
        };
        Ok(summary)
    }

    fn player_stat(&self, player: &Player) -> Result<Option<DcPlayerStat>> {
        let games_played = player.minutes as f64 / 90.0;
        let history = self.db.history_for_player(player.id, RECENT_WINDOW)?;
        let played: Vec<&HistoryRow> = history.iter().filter(|h| h.minutes > 0).collect();

        let (consistency, dc_points) = if !played.is_empty() && has_counters(&played) {
            let per_game: Vec<i64> = played
                .iter()
                .map(|h| direct_dc_points(player.position, h))
                .collect();
            let with_bonus = per_game.iter().filter(|&&p| p > 0).count();
            let consistency = with_bonus as f64 / played.len() as f64 * 100.0;
            (consistency, per_game.iter().sum::<i64>() as f64)
        } else {
            proxy_from_bps(player, games_played)
        };

        let price = player.price();
        Ok(Some(DcPlayerStat {
            player_id: player.id,
            web_name: player.web_name.clone(),
            team_id: player.team_id,
            position: player.position,
            price,
            games_played,
            consistency,
            dc_points,
            dc_per_million: if price > 0.0 { dc_points / price } else { 0.0 },
            selected_by_percent: player.selected_by_percent,
        }))
    }
}

fn has_counters(rows: &[&HistoryRow]) -> bool {
    rows.iter().any(|h| {
        h.defensive_contribution > 0 || h.clearances_blocks_interceptions > 0 || h.tackles > 0
    })
}

/// Bonus points for one gameweek: the upstream's own counter when
/// published, otherwise derived from the raw counters.
fn direct_dc_points(position: Position, row: &HistoryRow) -> i64 {
    if row.defensive_contribution > 0 {
        return row.defensive_contribution;
    }
    let stats = GameweekStats {
        clearances_blocks_interceptions: row.clearances_blocks_interceptions,
        tackles: row.tackles,
        recoveries: row.recoveries,
        ..Default::default()
    };
    RulesEngine::defensive_contribution_points(position, &stats)
}

/// Season-aggregate proxy: strip estimated attacking BPS, treat the rest
/// as defensive work.
fn proxy_from_bps(player: &Player, games_played: f64) -> (f64, f64) {
    let attacking_bps = player.goals_scored as f64 * 30.0
        + player.assists as f64 * 20.0
        + if player.position == Position::Defender {
            player.clean_sheets as f64 * 12.0
        } else {
            0.0
        };
    let defensive_bps = (player.bps as f64 - attacking_bps).max(0.0);
    let threshold = if player.position == Position::Defender {
        PROXY_THRESHOLD_DEF
    } else {
        PROXY_THRESHOLD_MID
    };
    let consistency = if games_played > 0.0 {
        (defensive_bps / games_played / threshold * 100.0).min(100.0)
    } else {
        0.0
    };
    (consistency, defensive_bps / PROXY_BPS_PER_DC_POINT)
}

#[async_trait]
impl Agent for DcAnalyst {
    fn name(&self) -> &str {
        "dc_analyst"
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
            if !super::analysis_requested_for(Some(&requested), "dc") {
                return Ok(());
            }
        }

        let gameweek = event
            .payload_i64("gameweek")
            .map(|gw| gw as i32)
            .or_else(|| {
                self.db
                    .current_gameweek()
                    .ok()
                    .flatten()
                    .map(|gw| gw.id)
            })
            .unwrap_or(1);

        let summary = self.analyze(gameweek)?;
        info!(
            "DC analysis complete: {} players, {} defender targets",
            summary.players_analyzed,
            summary.defender_rankings.len()
        );
        *self.last_analysis.write() = Some(summary.clone());

        ctx.publish(
            Event::from_payload(EventKind::DcAnalysisCompleted, &summary)
                .with_correlation(event.id.to_string()),
        )
        .await;
        Ok(())
    }
}
