//! Composite value analyst.
//!
//! Joins the defensive, fixture and expected-goals analyses for a target
//! gameweek into a single weighted value score per player. Partial
//! results are buffered; if the full set has not arrived within the join
//! window the analyst warns and proceeds with whatever it has.

use crate::agents::{Agent, AgentContext};
use crate::events::payloads::{
    AnalysisRequestedPayload, DcSummary, FixtureSummary, ValueEntry, ValueRankings, ValueWeights,
    XgSummary,
};
use crate::events::{self, Event, EventKind, EventPriority};
use crate::models::{Availability, Position};
use crate::storage::Database;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long to wait for the full analysis set before proceeding.
const JOIN_WINDOW: Duration = Duration::from_secs(60);
/// Players below this many minutes are not ranked.
const MIN_MINUTES: i64 = 90;

#[derive(Default)]
struct PendingJoin {
    dc: Option<DcSummary>,
    fixtures: Option<FixtureSummary>,
    xg: Option<XgSummary>,
    correlation: Option<String>,
    timeout_armed: bool,
}

impl PendingJoin {
    fn is_complete(&self) -> bool {
        self.dc.is_some() && self.fixtures.is_some() && self.xg.is_some()
    }

    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.dc.is_none() {
            missing.push("dc");
        }
        if self.fixtures.is_none() {
            missing.push("fixture");
        }
        if self.xg.is_none() {
            missing.push("xg");
        }
        missing
    }
}

pub struct ValueAnalyst {
    db: Database,
    weights: ValueWeights,
    pending: Arc<Mutex<HashMap<i32, PendingJoin>>>,
    last_rankings: Arc<RwLock<Option<ValueRankings>>>,
}

impl ValueAnalyst {
    pub fn new(db: Database) -> Self {
        Self::with_weights(db, ValueWeights::default())
    }

    pub fn with_weights(db: Database, weights: ValueWeights) -> Self {
        Self {
            db,
            weights,
            pending: Arc::new(Mutex::new(HashMap::new())),
            last_rankings: Arc::new(RwLock::new(None)),
        }
    }

    pub fn last_rankings(&self) -> Option<ValueRankings> {
        self.last_rankings.read().clone()
    }

    /// Store one incoming summary; returns the join state ready for
    /// publication, if the set became complete.
    fn absorb(&self, event: &Event) -> Result<Option<(i32, PendingJoin)>> {
        let mut pending = self.pending.lock();

        let gameweek = match event.kind {
            EventKind::DcAnalysisCompleted => {
                let summary: DcSummary = event.payload_as()?;
                let gw = summary.gameweek;
                pending.entry(gw).or_default().dc = Some(summary);
                gw
            }
            EventKind::FixtureAnalysisCompleted => {
                let summary: FixtureSummary = event.payload_as()?;
                let gw = summary.start_gameweek;
                pending.entry(gw).or_default().fixtures = Some(summary);
                gw
            }
            EventKind::XgAnalysisCompleted => {
                let summary: XgSummary = event.payload_as()?;
                let gw = summary.gameweek;
                pending.entry(gw).or_default().xg = Some(summary);
                gw
            }
            _ => return Ok(None),
        };

        let entry = pending.entry(gameweek).or_default();
        if entry.correlation.is_none() {
            entry.correlation = event
                .correlation_id
                .clone()
                .or_else(|| Some(event.id.to_string()));
        }

        if entry.is_complete() {
            let entry = pending.remove(&gameweek).unwrap_or_default();
            return Ok(Some((gameweek, entry)));
        }
        Ok(None)
    }

    fn arm_timeout(&self, gameweek: i32, ctx: AgentContext) {
        {
            let mut pending = self.pending.lock();
            let Some(entry) = pending.get_mut(&gameweek) else {
                return;
            };
            if entry.timeout_armed {
                return;
            }
            entry.timeout_armed = true;
        }

        let db = self.db.clone();
        let weights = self.weights;
        let pending = Arc::clone(&self.pending);
        let last_rankings = Arc::clone(&self.last_rankings);
        tokio::spawn(async move {
            tokio::time::sleep(JOIN_WINDOW).await;
            let Some(entry) = pending.lock().remove(&gameweek) else {
                return; // completed in time
            };
            let missing = entry.missing();
            warn!(
                "Value join window elapsed for GW{gameweek}, proceeding without {:?}",
                missing
            );
            ctx.publish(events::notification(
                "warning",
                format!("Value rankings for GW{gameweek} built from partial analyses"),
                json!({ "missing": missing }),
            ))
            .await;
            publish_rankings(&db, weights, &last_rankings, gameweek, entry, &ctx).await;
        });
    }
}

async fn publish_rankings(
    db: &Database,
    weights: ValueWeights,
    last_rankings: &Arc<RwLock<Option<ValueRankings>>>,
    gameweek: i32,
    join: PendingJoin,
    ctx: &AgentContext,
) {
    let correlation = join.correlation.clone();
    match combine(db, weights, gameweek, &join) {
        Ok(rankings) => {
            info!(
                "Value rankings published: {} players for GW{gameweek}",
                rankings.total_ranked
            );
            *last_rankings.write() = Some(rankings.clone());
            let mut event = Event::from_payload(EventKind::ValueRankingsCompleted, &rankings)
                .with_priority(EventPriority::High);
            if let Some(correlation) = correlation {
                event = event.with_correlation(correlation);
            }
            ctx.publish(event).await;
        }
        Err(e) => {
            ctx.publish(events::notification(
                "error",
                "Value analysis failed",
                json!({ "gameweek": gameweek, "error": format!("{e:#}") }),
            ))
            .await;
        }
    }
}

fn combine(
    db: &Database,
    weights: ValueWeights,
    gameweek: i32,
    join: &PendingJoin,
) -> Result<ValueRankings> {
    let players = db.all_players()?;

    // Lookup tables from whichever specialist summaries arrived.
    let mut dc_points: HashMap<i64, f64> = HashMap::new();
    if let Some(dc) = &join.dc {
        for stat in dc
            .defender_rankings
            .iter()
            .chain(&dc.midfielder_rankings)
            .chain(&dc.defender_value_rankings)
            .chain(&dc.midfielder_value_rankings)
        {
            dc_points.insert(stat.player_id, stat.dc_points);
        }
    }
    let mut team_difficulty: HashMap<i64, f64> = HashMap::new();
    if let Some(fixtures) = &join.fixtures {
        for outlook in &fixtures.team_outlooks {
            team_difficulty.insert(outlook.team_id, outlook.avg_difficulty);
        }
    }
    let mut xgi_per_90: HashMap<i64, f64> = HashMap::new();
    if let Some(xg) = &join.xg {
        for stat in xg
            .rankings
            .iter()
            .chain(&xg.overperformers)
            .chain(&xg.underperformers)
        {
            xgi_per_90.insert(stat.player_id, stat.xgi_per_90);
        }
    }

    struct Candidate {
        player_id: i64,
        web_name: String,
        position: Position,
        team_id: i64,
        price: f64,
        ownership: f64,
        base: f64,
        dc: f64,
        fixture_ease: f64,
        xg: f64,
    }

    let candidates: Vec<Candidate> = players
        .iter()
        .filter(|p| p.status == Availability::Available && p.minutes >= MIN_MINUTES)
        .map(|p| Candidate {
            player_id: p.id,
            web_name: p.web_name.clone(),
            position: p.position,
            team_id: p.team_id,
            price: p.price(),
            ownership: p.selected_by_percent,
            base: p.points_per_million(),
            dc: dc_points.get(&p.id).copied().unwrap_or(0.0),
            fixture_ease: 5.0 - team_difficulty.get(&p.team_id).copied().unwrap_or(3.0),
            xg: xgi_per_90.get(&p.id).copied().unwrap_or(0.0),
        })
        .collect();

    let normalize = |extract: fn(&Candidate) -> f64| -> Box<dyn Fn(&Candidate) -> f64> {
        let min = candidates.iter().map(extract).fold(f64::INFINITY, f64::min);
        let max = candidates
            .iter()
            .map(extract)
            .fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;
        Box::new(move |c: &Candidate| {
            if span <= f64::EPSILON {
                0.0
            } else {
                (extract(c) - min) / span
            }
        })
    };

    let norm_base = normalize(|c| c.base);
    let norm_dc = normalize(|c| c.dc);
    let norm_fixture = normalize(|c| c.fixture_ease);
    let norm_xg = normalize(|c| c.xg);

    let mut entries: Vec<ValueEntry> = candidates
        .iter()
        .map(|c| {
            let score = weights.base_points * norm_base(c)
                + weights.defensive * norm_dc(c)
                + weights.fixture * norm_fixture(c)
                + weights.xg * norm_xg(c);
            ValueEntry {
                player_id: c.player_id,
                web_name: c.web_name.clone(),
                position: c.position,
                team_id: c.team_id,
                price: c.price,
                value_score: score * 10.0,
                ownership: c.ownership,
            }
        })
        .collect();
    entries.sort_by(|a, b| b.value_score.total_cmp(&a.value_score));

    let mut by_position: HashMap<Position, Vec<ValueEntry>> = HashMap::new();
    for entry in &entries {
        let bucket = by_position.entry(entry.position).or_default();
        if bucket.len() < 20 {
            bucket.push(entry.clone());
        }
    }

    Ok(ValueRankings {
        gameweek,
        total_ranked: entries.len(),
        weights,
        by_position,
        top_overall: entries.into_iter().take(30).collect(),
    })
}

#[async_trait]
impl Agent for ValueAnalyst {
    fn name(&self) -> &str {
        "value_analyst"
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![
            EventKind::DcAnalysisCompleted,
            EventKind::FixtureAnalysisCompleted,
            EventKind::XgAnalysisCompleted,
            EventKind::AnalysisRequested,
        ]
    }

    async fn handle_event(&self, event: Event, ctx: AgentContext) -> Result<()> {
        if event.kind == EventKind::AnalysisRequested {
            let payload = event.payload_as::<AnalysisRequestedPayload>().ok();
            let requested = payload.as_ref().map(|p| p.analysis_type.as_str());
            if !super::analysis_requested_for(requested, "value") {
                return Ok(());
            }
            // Forced combination from whatever has arrived so far.
            let gameweek = payload
                .and_then(|p| p.gameweek)
                .or_else(|| self.db.current_gameweek().ok().flatten().map(|gw| gw.id))
                .unwrap_or(1);
            let entry = self.pending.lock().remove(&gameweek).unwrap_or_default();
            publish_rankings(&self.db, self.weights, &self.last_rankings, gameweek, entry, &ctx)
                .await;
            return Ok(());
        }

        if let Some((gameweek, join)) = self.absorb(&event)? {
            publish_rankings(&self.db, self.weights, &self.last_rankings, gameweek, join, &ctx)
                .await;
        } else {
            // Entry still pending: make sure the join window is armed.
            let gameweek = event
                .payload_i64("gameweek")
                .or_else(|| event.payload_i64("start_gameweek"))
                .map(|v| v as i32);
            if let Some(gameweek) = gameweek {
                self.arm_timeout(gameweek, ctx);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::payloads::{DcPlayerStat, TeamFixtureOutlook};
    use crate::models::Player;

    fn player(id: i64, position: Position, team_id: i64, minutes: i64, points: i64) -> Player {
        Player {
            id,
            code: 4000 + id,
            web_name: format!("V{id}"),
            position,
            team_id,
            now_cost: 60,
            status: Availability::Available,
            chance_of_playing_next_round: None,
            selected_by_percent: 30.0,
            form: 4.0,
            points_per_game: 4.0,
            total_points: points,
            minutes,
            goals_scored: 2,
            assists: 1,
            clean_sheets: 2,
            bps: 120,
            transfers_in_event: 0,
            transfers_out_event: 0,
            cost_change_event: 0,
            cost_change_start: 0,
            expected_goals: 1.5,
            expected_assists: 0.8,
            expected_goal_involvements: 2.3,
            expected_goals_per_90: 0.2,
            expected_assists_per_90: 0.1,
            expected_goal_involvements_per_90: 0.3,
        }
    }

    fn join_with_dc(dc_for_player: i64) -> PendingJoin {
        PendingJoin {
            dc: Some(DcSummary {
                gameweek: 8,
                players_analyzed: 1,
                min_games_required: 3,
                defender_rankings: vec![DcPlayerStat {
                    player_id: dc_for_player,
                    web_name: "V1".into(),
                    team_id: 1,
                    position: Position::Defender,
                    price: 6.0,
                    games_played: 6.0,
                    consistency: 80.0,
                    dc_points: 9.0,
                    dc_per_million: 1.5,
                    selected_by_percent: 30.0,
                }],
                midfielder_rankings: vec![],
                defender_value_rankings: vec![],
                midfielder_value_rankings: vec![],
            }),
            fixtures: Some(FixtureSummary {
                start_gameweek: 8,
                lookahead_gameweeks: 6,
                team_outlooks: vec![
                    TeamFixtureOutlook {
                        team_id: 1,
                        team_short_name: "ALP".into(),
                        avg_difficulty: 2.0,
                        classification: crate::events::payloads::FixtureOutlookClass::Easy,
                        fixtures: vec![],
                    },
                    TeamFixtureOutlook {
                        team_id: 2,
                        team_short_name: "BET".into(),
                        avg_difficulty: 4.5,
                        classification: crate::events::payloads::FixtureOutlookClass::Hard,
                        fixtures: vec![],
                    },
                ],
                swings: vec![],
            }),
            xg: None,
            correlation: None,
            timeout_armed: false,
        }
    }

    #[test]
    fn join_completeness_tracking() {
        let join = join_with_dc(1);
        assert!(!join.is_complete());
        assert_eq!(join.missing(), vec!["xg"]);
    }

    #[test]
    fn combine_prefers_dc_and_easy_fixtures() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_players(&[
            player(1, Position::Defender, 1, 600, 50), // has DC, easy fixtures
            player(2, Position::Defender, 2, 600, 50), // no DC, hard fixtures
        ])
        .unwrap();

        let rankings = combine(&db, ValueWeights::default(), 8, &join_with_dc(1)).unwrap();
        assert_eq!(rankings.total_ranked, 2);
        assert_eq!(rankings.top_overall[0].player_id, 1);
        assert!(rankings.top_overall[0].value_score > rankings.top_overall[1].value_score);
        assert_eq!(rankings.by_position[&Position::Defender].len(), 2);
    }

    #[test]
    fn combine_with_empty_join_still_ranks_by_base_value() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_players(&[
            player(1, Position::Midfielder, 1, 600, 90),
            player(2, Position::Midfielder, 1, 600, 30),
        ])
        .unwrap();

        let rankings = combine(&db, ValueWeights::default(), 8, &PendingJoin::default()).unwrap();
        assert_eq!(rankings.top_overall[0].player_id, 1);
    }

    #[test]
    fn unavailable_and_benched_players_excluded() {
        let db = Database::open_in_memory().unwrap();
        let mut injured = player(1, Position::Forward, 1, 600, 80);
        injured.status = Availability::Injured;
        let benched = player(2, Position::Forward, 1, 30, 5);
        db.upsert_players(&[injured, benched]).unwrap();

        let rankings = combine(&db, ValueWeights::default(), 8, &PendingJoin::default()).unwrap();
        assert_eq!(rankings.total_ranked, 0);
    }
}
