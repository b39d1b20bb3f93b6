//! Decision log and outcome learning.
//!
//! Sole writer of the decision, prediction and correction tables. Every
//! published decision lands here as an append-only record; when a
//! gameweek completes, predictions are joined with observed points, the
//! per-position and per-price-bracket bias corrections consulted by the
//! prediction service are re-aggregated, and team strength ratings are
//! rolled forward from the results.

pub mod elo;

use crate::agents::{Agent, AgentContext};
use crate::events::payloads::{
    CaptainSelectedPayload, ChipUsedPayload, GameweekCompletedPayload, TeamSelectedPayload,
};
use crate::events::{Event, EventKind, EventPriority};
use crate::models::{DecisionRecord, Position, PredictionRecord, Transfer};
use crate::storage::Database;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

/// Price-bracket boundaries in tenths.
const PREMIUM_FLOOR: i64 = 100;
const MID_PRICE_FLOOR: i64 = 60;

const AGENT_NAME: &str = "learning";

pub struct LearningAgent {
    db: Database,
}

impl LearningAgent {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn record_decision(
        &self,
        gameweek: i32,
        kind: &str,
        data: serde_json::Value,
        reasoning: &str,
        expected_value: f64,
        agent: &str,
    ) -> Result<()> {
        self.db.record_decision(&DecisionRecord {
            gameweek,
            kind: kind.to_string(),
            data,
            reasoning: reasoning.to_string(),
            expected_value,
            confidence: 0.7,
            agent: agent.to_string(),
            created_at: Utc::now(),
        })
    }

    fn log_team_selection(&self, event: &Event) -> Result<()> {
        let payload: TeamSelectedPayload = event.payload_as()?;
        let source = event.source.as_deref().unwrap_or("manager");
        info!("Logging team selection for GW{}", payload.gameweek);

        self.record_decision(
            payload.gameweek,
            "team_selection",
            json!({
                "squad": payload.squad.iter().map(|m| m.player_id).collect::<Vec<_>>(),
                "chip": payload.chip.map(|c| c.as_str()),
                "total_cost": payload.total_cost,
            }),
            &payload.announcement,
            payload.expected_points,
            source,
        )?;

        // The squad's predictions become the records later joined with
        // outcomes. Most recent write per (code, gameweek) wins.
        for member in &payload.squad {
            let Some(&predicted) = payload.predictions.get(&member.player_id) else {
                continue;
            };
            self.db.upsert_prediction(&PredictionRecord {
                player_code: member.code,
                player_id: member.player_id,
                gameweek: payload.gameweek,
                predicted_points: predicted,
                confidence: 0.7,
                model_version: "coordinator".to_string(),
                created_at: Utc::now(),
                actual_points: None,
                error: None,
            })?;
        }
        Ok(())
    }

    fn log_transfer(&self, event: &Event) -> Result<()> {
        let transfer: Transfer = event.payload_as()?;
        self.db.record_transfer(&transfer)?;
        self.record_decision(
            transfer.gameweek,
            "transfer",
            json!({
                "out": transfer.player_out_id,
                "in": transfer.player_in_id,
                "cost": transfer.cost,
                "is_free": transfer.is_free,
            }),
            &transfer.reasoning,
            0.0,
            event.source.as_deref().unwrap_or("manager"),
        )
    }

    fn log_captain(&self, event: &Event) -> Result<()> {
        let payload: CaptainSelectedPayload = event.payload_as()?;
        self.record_decision(
            payload.gameweek,
            "captain_selection",
            json!({
                "captain_id": payload.captain_id,
                "vice_captain_id": payload.vice_captain_id,
            }),
            &payload.reasoning,
            0.0,
            event.source.as_deref().unwrap_or("manager"),
        )
    }

    fn log_chip(&self, event: &Event) -> Result<()> {
        let payload: ChipUsedPayload = event.payload_as()?;
        self.db.record_chip(payload.chip, payload.gameweek)?;
        self.record_decision(
            payload.gameweek,
            "chip_used",
            json!({ "chip": payload.chip.as_str() }),
            &payload.reasoning,
            0.0,
            event.source.as_deref().unwrap_or("manager"),
        )
    }

    fn log_recommendation(&self, event: &Event) -> Result<()> {
        let gameweek = event.payload_i64("gameweek").unwrap_or(0) as i32;
        self.db.record_agent_recommendation(
            event.source.as_deref().unwrap_or("unknown"),
            gameweek,
            event.kind.as_str(),
            &serde_json::Value::Object(event.payload.clone()),
        )
    }

    /// Join stored predictions with observed points, fill the error
    /// columns, and re-aggregate the bias-correction tables.
    async fn analyze_completed_gameweek(&self, event: &Event, ctx: &AgentContext) -> Result<()> {
        let payload: GameweekCompletedPayload = event.payload_as()?;
        let gameweek = payload.gameweek;
        info!("Analyzing prediction accuracy for GW{gameweek}");

        let predictions = self.db.predictions_for_gameweek(gameweek)?;
        if predictions.is_empty() {
            warn!("No predictions on record for GW{gameweek}");
            return Ok(());
        }

        let actuals = self.db.points_for_gameweek(gameweek)?;
        if actuals.is_empty() {
            // The data collector syncs outcomes off the same event; fail
            // so the retry re-delivers this one after it has.
            anyhow::bail!("no outcome rows for GW{gameweek} yet");
        }

        let mut residuals_by_position: HashMap<&'static str, Vec<f64>> = HashMap::new();
        let mut residuals_by_bracket: HashMap<&'static str, Vec<f64>> = HashMap::new();
        let mut total_abs_error = 0.0;
        let mut joined = 0usize;

        for prediction in &predictions {
            let actual = actuals.get(&prediction.player_id).copied().unwrap_or(0);
            // Residual is actual minus predicted: a positive mean means
            // the model runs cold and the correction is additive.
            let residual = actual as f64 - prediction.predicted_points;
            let error = residual.abs();
            self.db
                .fill_prediction_outcome(prediction.player_code, gameweek, actual, error)?;
            total_abs_error += error;
            joined += 1;

            if let Some(player) = self.db.player(prediction.player_id)? {
                residuals_by_position
                    .entry(position_bucket(player.position))
                    .or_default()
                    .push(residual);
                residuals_by_bracket
                    .entry(price_bucket(player.now_cost))
                    .or_default()
                    .push(residual);
            }
        }

        let mean_error = total_abs_error / joined as f64;
        self.db.record_metric("prediction_error", gameweek, mean_error)?;
        info!("GW{gameweek}: mean absolute prediction error {mean_error:.2} over {joined} players");

        self.update_corrections("position", residuals_by_position)?;
        self.update_corrections("price_bracket", residuals_by_bracket)?;

        let rated = elo::apply_gameweek(&self.db, gameweek)?;
        if rated > 0 {
            info!("Elo ratings updated from {rated} GW{gameweek} results");
        }

        ctx.publish(
            Event::from_payload(
                EventKind::AnalysisCompleted,
                &json!({
                    "gameweek": gameweek,
                    "agent": AGENT_NAME,
                    "metrics": {
                        "avg_prediction_error": mean_error,
                        "predictions_tracked": joined,
                    },
                }),
            )
            .with_priority(EventPriority::Low),
        )
        .await;
        Ok(())
    }

    /// Fold this gameweek's residuals into the running per-bucket means.
    fn update_corrections(
        &self,
        bucket_kind: &str,
        residuals: HashMap<&'static str, Vec<f64>>,
    ) -> Result<()> {
        let existing = self.db.bias_corrections_with_samples()?;
        for (bucket, values) in residuals {
            if values.is_empty() {
                continue;
            }
            let gw_sum: f64 = values.iter().sum();
            let gw_n = values.len() as i64;
            let (old_correction, old_n) = existing
                .get(&(bucket_kind.to_string(), bucket.to_string()))
                .copied()
                .unwrap_or((0.0, 0));
            let n = old_n + gw_n;
            let correction = (old_correction * old_n as f64 + gw_sum) / n as f64;
            self.db
                .set_bias_correction(bucket_kind, bucket, correction, n)?;
        }
        Ok(())
    }
}

fn position_bucket(position: Position) -> &'static str {
    position.short_name()
}

fn price_bucket(now_cost: i64) -> &'static str {
    if now_cost >= PREMIUM_FLOOR {
        "premium"
    } else if now_cost >= MID_PRICE_FLOOR {
        "mid_price"
    } else {
        "budget"
    }
}

#[async_trait]
impl Agent for LearningAgent {
    fn name(&self) -> &str {
        AGENT_NAME
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![
            EventKind::TeamSelected,
            EventKind::TransferExecuted,
            EventKind::CaptainSelected,
            EventKind::ChipUsed,
            EventKind::GameweekCompleted,
            EventKind::TransferRecommended,
            EventKind::ChipRecommendation,
        ]
    }

    async fn handle_event(&self, event: Event, ctx: AgentContext) -> Result<()> {
        match event.kind {
            EventKind::TeamSelected => self.log_team_selection(&event),
            EventKind::TransferExecuted => self.log_transfer(&event),
            EventKind::CaptainSelected => self.log_captain(&event),
            EventKind::ChipUsed => self.log_chip(&event),
            EventKind::GameweekCompleted => self.analyze_completed_gameweek(&event, &ctx).await,
            EventKind::TransferRecommended | EventKind::ChipRecommendation => {
                self.log_recommendation(&event)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Availability, Player};
    use crate::storage::HistoryRow;

    fn seed_player(db: &Database, id: i64, position: Position, cost: i64) {
        db.upsert_players(&[Player {
            id,
            code: 6000 + id,
            web_name: format!("L{id}"),
            position,
            team_id: 1,
            now_cost: cost,
            status: Availability::Available,
            chance_of_playing_next_round: None,
            selected_by_percent: 10.0,
            form: 4.0,
            points_per_game: 4.0,
            total_points: 40,
            minutes: 900,
            goals_scored: 1,
            assists: 1,
            clean_sheets: 1,
            bps: 100,
            transfers_in_event: 0,
            transfers_out_event: 0,
            cost_change_event: 0,
            cost_change_start: 0,
            expected_goals: 1.0,
            expected_assists: 1.0,
            expected_goal_involvements: 2.0,
            expected_goals_per_90: 0.1,
            expected_assists_per_90: 0.1,
            expected_goal_involvements_per_90: 0.2,
        }])
        .unwrap();
    }

    fn seed_prediction(db: &Database, id: i64, gameweek: i32, predicted: f64) {
        db.upsert_prediction(&PredictionRecord {
            player_code: 6000 + id,
            player_id: id,
            gameweek,
            predicted_points: predicted,
            confidence: 0.7,
            model_version: "test".into(),
            created_at: Utc::now(),
            actual_points: None,
            error: None,
        })
        .unwrap();
    }

    fn seed_outcome(db: &Database, id: i64, gameweek: i32, points: i64) {
        db.upsert_history(&[HistoryRow {
            player_id: id,
            gameweek,
            total_points: points,
            minutes: 90,
            ..Default::default()
        }])
        .unwrap();
    }

    #[tokio::test]
    async fn completed_gameweek_fills_errors_and_corrections() {
        let db = Database::open_in_memory().unwrap();
        // Two defenders consistently under-predicted by 2, one premium
        // forward over-predicted by 3.
        seed_player(&db, 1, Position::Defender, 50);
        seed_player(&db, 2, Position::Defender, 55);
        seed_player(&db, 3, Position::Forward, 120);
        seed_prediction(&db, 1, 7, 3.0);
        seed_prediction(&db, 2, 7, 4.0);
        seed_prediction(&db, 3, 7, 8.0);
        seed_outcome(&db, 1, 7, 5);
        seed_outcome(&db, 2, 7, 6);
        seed_outcome(&db, 3, 7, 5);

        let agent = LearningAgent::new(db.clone());
        let bus = std::sync::Arc::new(crate::bus::EventBus::new("redis://localhost:6379", "t"));
        let runner = crate::agents::AgentRunner::new(std::sync::Arc::new(agent), bus);
        let event = Event::from_payload(
            EventKind::GameweekCompleted,
            &GameweekCompletedPayload {
                gameweek: 7,
                average_score: None,
            },
        );
        crate::bus::EventHandler::handle(&*runner, event).await.unwrap();

        let predictions = db.predictions_for_gameweek(7).unwrap();
        assert!(predictions.iter().all(|p| p.actual_points.is_some()));
        let forward = predictions.iter().find(|p| p.player_id == 3).unwrap();
        assert_eq!(forward.actual_points, Some(5));
        assert!((forward.error.unwrap() - 3.0).abs() < 1e-9);

        let corrections = db.bias_corrections().unwrap();
        // Defenders ran hot by +2, the premium bracket cold by -3.
        assert!(
            (corrections[&("position".to_string(), "DEF".to_string())] - 2.0).abs() < 1e-9
        );
        assert!(
            (corrections[&("price_bracket".to_string(), "premium".to_string())] + 3.0).abs()
                < 1e-9
        );
    }

    #[tokio::test]
    async fn corrections_aggregate_across_gameweeks() {
        let db = Database::open_in_memory().unwrap();
        seed_player(&db, 1, Position::Midfielder, 70);

        let agent = LearningAgent::new(db.clone());
        let bus = std::sync::Arc::new(crate::bus::EventBus::new("redis://localhost:6379", "t"));
        let runner = crate::agents::AgentRunner::new(std::sync::Arc::new(agent), bus);

        for (gameweek, predicted, actual) in [(5, 4.0, 6), (6, 4.0, 8)] {
            seed_prediction(&db, 1, gameweek, predicted);
            seed_outcome(&db, 1, gameweek, actual);
            let event = Event::from_payload(
                EventKind::GameweekCompleted,
                &GameweekCompletedPayload {
                    gameweek,
                    average_score: None,
                },
            );
            crate::bus::EventHandler::handle(&*runner, event).await.unwrap();
        }

        let samples = db.bias_corrections_with_samples().unwrap();
        let (correction, n) = samples[&("position".to_string(), "MID".to_string())];
        // Residuals +2 then +4, aggregated mean +3 over two samples.
        assert_eq!(n, 2);
        assert!((correction - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn team_selection_writes_decision_and_predictions() {
        let db = Database::open_in_memory().unwrap();
        seed_player(&db, 1, Position::Midfielder, 70);
        let player = db.player(1).unwrap().unwrap();
        let member = crate::models::SquadMember::from_player(&player);

        let mut predictions = HashMap::new();
        predictions.insert(1i64, 5.5f64);
        let payload = TeamSelectedPayload {
            gameweek: 9,
            squad: vec![member],
            transfers: vec![],
            chip: None,
            total_cost: 70,
            predictions,
            expected_points: 5.5,
            announcement: "squad is in".into(),
        };

        let agent = LearningAgent::new(db.clone());
        let bus = std::sync::Arc::new(crate::bus::EventBus::new("redis://localhost:6379", "t"));
        let runner = crate::agents::AgentRunner::new(std::sync::Arc::new(agent), bus);
        let event =
            Event::from_payload(EventKind::TeamSelected, &payload).with_source("manager");
        crate::bus::EventHandler::handle(&*runner, event).await.unwrap();

        let decisions = db.decisions_for(9).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].kind, "team_selection");
        assert_eq!(decisions[0].agent, "manager");

        let stored = db.predictions_for_gameweek(9).unwrap();
        assert_eq!(stored.len(), 1);
        assert!((stored[0].predicted_points - 5.5).abs() < 1e-9);
        assert_eq!(stored[0].model_version, "coordinator");
    }
}
