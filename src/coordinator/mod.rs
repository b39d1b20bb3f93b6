//! Weekly decision coordinator.
//!
//! Reacts to planning triggers and explicit selection requests; runs
//! predictions, transfer optimization, chip arbitration, formation and
//! captaincy; persists the draft; publishes the decision events the
//! learning store records. The draft for a gameweek is a single cell,
//! overwritten on every run until the deadline.

use crate::agents::{Agent, AgentContext};
use crate::announce::{self, TextGenerator};
use crate::events::payloads::{
    CaptainSelectedPayload, ChipUsedPayload, GameweekPlanningPayload, TeamSelectedPayload,
    TeamSelectionRequestedPayload, ValueRankings,
};
use crate::events::{self, Event, EventKind, EventPriority};
use crate::models::{Chip, Squad, SquadMember, Transfer, NEW_SQUAD_BUDGET};
use crate::notify::Webhook;
use crate::optimizer::{
    chips, formation, MultiGwPredictions, SquadOptimizer, TransferAction, TransferOptimizer,
    TransferPlan,
};
use crate::prediction::PredictionService;
use crate::rules::RulesEngine;
use crate::storage::{Database, DraftTeam, HeldTeam};
use crate::synthesis::{CompetitiveContext, SynthesisEngine};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

const AGENT_NAME: &str = "manager";
/// Planning horizon for transfer evaluation.
const HORIZON: i32 = 4;

pub struct ManagerAgent {
    db: Database,
    prediction: Arc<PredictionService>,
    synthesis: SynthesisEngine,
    webhook: Arc<Webhook>,
    text_generator: Option<Arc<dyn TextGenerator>>,
    team_id: Option<i64>,
    league_id: Option<i64>,
    latest_rankings: Mutex<Option<ValueRankings>>,
    /// Planning triggers already handled, keyed (gameweek, trigger).
    handled_triggers: Mutex<HashSet<(i32, String)>>,
}

impl ManagerAgent {
    pub fn new(
        db: Database,
        prediction: Arc<PredictionService>,
        webhook: Arc<Webhook>,
        text_generator: Option<Arc<dyn TextGenerator>>,
        team_id: Option<i64>,
        league_id: Option<i64>,
    ) -> Self {
        Self {
            synthesis: SynthesisEngine::new(db.clone()),
            db,
            prediction,
            webhook,
            text_generator,
            team_id,
            league_id,
            latest_rankings: Mutex::new(None),
            handled_triggers: Mutex::new(HashSet::new()),
        }
    }

    fn competitive_context(&self) -> Option<CompetitiveContext> {
        let (league_id, team_id) = (self.league_id?, self.team_id?);
        match self.db.competitive_gap(league_id, team_id) {
            Ok(Some((rank, gap))) => Some(CompetitiveContext {
                rank,
                gap_to_leader: gap,
            }),
            _ => None,
        }
    }

    fn multi_gw_predictions(&self, start_gw: i32) -> MultiGwPredictions {
        let mut predictions = MultiGwPredictions::new();
        for gw in start_gw..start_gw + HORIZON {
            for (player_id, xp) in self.prediction.predict_all(gw, true) {
                predictions.entry(player_id).or_default().insert(gw, xp);
            }
        }
        predictions
    }

    /// The full weekly decision, §-by-§: load squad, predict, optimize
    /// transfers, arbitrate chips, set the lineup, persist the draft,
    /// announce and publish.
    pub async fn run_weekly_decision(&self, gameweek: i32, ctx: &AgentContext) -> Result<()> {
        info!("Planning GW{gameweek}");

        // Fail closed without a squad on record.
        let Some(held) = self.db.held_team()? else {
            error!("No current squad on record; cannot plan GW{gameweek}");
            ctx.publish(events::notification(
                "error",
                "Weekly decision aborted: no current squad on record",
                json!({ "gameweek": gameweek }),
            ))
            .await;
            return Ok(());
        };

        let multi_predictions = self.multi_gw_predictions(gameweek);
        let target_predictions: HashMap<i64, f64> = multi_predictions
            .iter()
            .map(|(id, by_gw)| (*id, by_gw.get(&gameweek).copied().unwrap_or(0.0)))
            .collect();

        let pool = self.db.all_players()?;
        let chip_outlook = chips::best_recommendation(&self.db, gameweek)?;
        let context = self.competitive_context();
        let rankings = self.latest_rankings.lock().clone();
        let recommendations = self.synthesis.synthesize(
            gameweek,
            &target_predictions,
            rankings.as_ref(),
            chip_outlook.clone(),
            context,
        )?;

        let plan = TransferOptimizer::with_horizon(HORIZON).optimize(
            &held.squad,
            &pool,
            &multi_predictions,
            gameweek,
            held.free_transfers,
            held.bank,
            chip_outlook,
        );
        info!("Transfer plan: {:?} ({})", plan.action, plan.rationale);

        let (mut squad, transfers, chip_used, validation_budget) =
            match self.apply_plan(gameweek, &held, &plan, &pool, &multi_predictions, &target_predictions) {
                Ok(outcome) => outcome,
                Err(violations) => {
                    error!("GW{gameweek} decision failed validation: {violations}");
                    ctx.publish(events::notification(
                        "error",
                        format!("GW{gameweek} decision failed validation"),
                        json!({ "violations": violations }),
                    ))
                    .await;
                    return Ok(());
                }
            };

        // Lineup, captaincy, final validation.
        let Some(chosen_formation) = formation::assign_slots(&mut squad, &target_predictions)
        else {
            error!("GW{gameweek}: no legal formation for the built squad");
            ctx.publish(events::notification(
                "error",
                format!("GW{gameweek} decision produced an unfieldable squad"),
                json!({}),
            ))
            .await;
            return Ok(());
        };
        let captains = formation::select_captains(&mut squad, &target_predictions);

        let (squad_ok, squad_violations) = RulesEngine::validate_squad(&squad, validation_budget);
        let eleven = squad.starting_eleven();
        let (eleven_ok, eleven_violations) =
            RulesEngine::validate_starting_eleven(&eleven, Some(chosen_formation));
        if !squad_ok || !eleven_ok {
            let all: Vec<String> = squad_violations
                .iter()
                .chain(&eleven_violations)
                .map(|v| format!("{}: {}", v.rule, v.message))
                .collect();
            error!("GW{gameweek} decision failed validation: {all:?}");
            ctx.publish(events::notification(
                "error",
                format!("GW{gameweek} decision failed validation"),
                json!({ "violations": all }),
            ))
            .await;
            return Ok(());
        }

        let expected_points: f64 = squad
            .starting_eleven()
            .iter()
            .map(|m| target_predictions.get(&m.player_id).copied().unwrap_or(0.0))
            .sum();

        // Announcement, with the template as a fallback.
        let rationale = format!(
            "{} Posture: {:?}.",
            plan.rationale, recommendations.posture
        );
        let announcement = announce::announce(
            self.text_generator.as_deref(),
            gameweek,
            &squad,
            &transfers,
            chip_used,
            &rationale,
        )
        .await;

        // Draft is one cell per gameweek; latest write wins until the
        // deadline.
        self.db.save_draft(&DraftTeam {
            gameweek,
            squad: squad.clone(),
            transfers: transfers.clone(),
            chip: chip_used,
            announcement: announcement.clone(),
        })?;

        self.publish_decision(
            gameweek,
            &squad,
            &transfers,
            chip_used,
            &target_predictions,
            expected_points,
            announcement.clone(),
            captains,
            &plan,
            ctx,
        )
        .await;

        self.webhook
            .send_team_announcement(&announcement, gameweek)
            .await;
        if !transfers.is_empty() {
            let summary: Vec<String> = transfers
                .iter()
                .map(|t| format!("{} -> {}", t.player_out_name, t.player_in_name))
                .collect();
            self.webhook
                .send_transfer_summary(&summary.join("\n"), gameweek, plan.hit_cost)
                .await;
        }

        info!("GW{gameweek} planning complete: formation {chosen_formation:?}, {} transfers, chip {:?}",
            transfers.len(), chip_used.map(|c| c.as_str()));
        Ok(())
    }

    /// Turn the transfer plan into a concrete squad. Returns the squad,
    /// executed transfers, chip and the budget to validate against, or a
    /// violation description.
    #[allow(clippy::type_complexity)]
    fn apply_plan(
        &self,
        gameweek: i32,
        held: &HeldTeam,
        plan: &TransferPlan,
        pool: &[crate::models::Player],
        multi_predictions: &MultiGwPredictions,
        target_predictions: &HashMap<i64, f64>,
    ) -> std::result::Result<(Squad, Vec<Transfer>, Option<Chip>, i64), String> {
        match plan.action {
            TransferAction::UseChip => {
                let recommendation = plan
                    .chip
                    .as_ref()
                    .expect("use-chip plan always carries a recommendation");
                match recommendation.chip {
                    Chip::Wildcard => {
                        let built = SquadOptimizer::build_wildcard(
                            gameweek,
                            &held.squad,
                            held.bank,
                            multi_predictions,
                            HORIZON,
                            pool,
                        );
                        info!("{}", built.reasoning);
                        Ok((
                            built.squad,
                            Vec::new(),
                            Some(Chip::Wildcard),
                            held.squad.selling_value() + held.bank,
                        ))
                    }
                    Chip::FreeHit => {
                        let built =
                            SquadOptimizer::build_free_hit(gameweek, pool, target_predictions);
                        info!("{}", built.reasoning);
                        Ok((built.squad, Vec::new(), Some(Chip::FreeHit), NEW_SQUAD_BUDGET))
                    }
                    // Bench boost and triple captain keep the squad;
                    // transfers are deferred to protect the chip week.
                    other => Ok((
                        held.squad.clone(),
                        Vec::new(),
                        Some(other),
                        held.squad.selling_value() + held.bank,
                    )),
                }
            }
            TransferAction::Make => {
                let option = plan
                    .best
                    .as_ref()
                    .expect("make plan always carries an option");
                let outgoing = held
                    .squad
                    .members
                    .iter()
                    .find(|m| m.player_id == option.player_out_id)
                    .cloned()
                    .ok_or_else(|| "outgoing player missing from squad".to_string())?;
                let incoming = pool
                    .iter()
                    .find(|p| p.id == option.player_in_id)
                    .ok_or_else(|| "incoming player missing from pool".to_string())?;

                let budget_available = outgoing.selling_price + held.bank;
                let (ok, violations) = RulesEngine::validate_transfer(
                    &outgoing,
                    incoming,
                    &held.squad,
                    budget_available,
                );
                if !ok {
                    return Err(violations
                        .iter()
                        .map(|v| format!("{}: {}", v.rule, v.message))
                        .collect::<Vec<_>>()
                        .join("; "));
                }

                let mut squad = held.squad.clone();
                squad
                    .members
                    .retain(|m| m.player_id != option.player_out_id);
                squad.members.push(SquadMember::from_player(incoming));

                let transfer = Transfer {
                    gameweek,
                    player_out_id: outgoing.player_id,
                    player_out_name: outgoing.web_name.clone(),
                    player_in_id: incoming.id,
                    player_in_name: incoming.web_name.clone(),
                    position: incoming.position,
                    cost: plan.hit_cost,
                    is_free: plan.hit_cost == 0,
                    reasoning: plan.rationale.clone(),
                };

                let remaining_bank = held.bank + outgoing.selling_price - incoming.now_cost;
                let purchase_total: i64 = squad.members.iter().map(|m| m.purchase_price).sum();
                Ok((
                    squad,
                    vec![transfer],
                    None,
                    purchase_total + remaining_bank.max(0),
                ))
            }
            TransferAction::Roll => {
                let purchase_total: i64 =
                    held.squad.members.iter().map(|m| m.purchase_price).sum();
                Ok((held.squad.clone(), Vec::new(), None, purchase_total + held.bank))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish_decision(
        &self,
        gameweek: i32,
        squad: &Squad,
        transfers: &[Transfer],
        chip_used: Option<Chip>,
        predictions: &HashMap<i64, f64>,
        expected_points: f64,
        announcement: String,
        captains: Option<(i64, i64)>,
        plan: &TransferPlan,
        ctx: &AgentContext,
    ) {
        let squad_predictions: HashMap<i64, f64> = squad
            .members
            .iter()
            .map(|m| {
                (
                    m.player_id,
                    predictions.get(&m.player_id).copied().unwrap_or(0.0),
                )
            })
            .collect();

        let payload = TeamSelectedPayload {
            gameweek,
            squad: squad.members.clone(),
            transfers: transfers.to_vec(),
            chip: chip_used,
            total_cost: squad.total_cost(),
            predictions: squad_predictions,
            expected_points,
            announcement,
        };
        ctx.publish(
            Event::from_payload(EventKind::TeamSelected, &payload)
                .with_priority(EventPriority::High),
        )
        .await;

        for transfer in transfers {
            ctx.publish(Event::from_payload(EventKind::TransferExecuted, transfer))
                .await;
        }

        if let Some((captain_id, vice_id)) = captains {
            let name_of = |id: i64| {
                squad
                    .members
                    .iter()
                    .find(|m| m.player_id == id)
                    .map(|m| m.web_name.clone())
                    .unwrap_or_default()
            };
            let payload = CaptainSelectedPayload {
                gameweek,
                captain_id,
                captain_name: name_of(captain_id),
                vice_captain_id: vice_id,
                vice_captain_name: name_of(vice_id),
                reasoning: "highest expected scorers in the starting eleven".to_string(),
            };
            ctx.publish(Event::from_payload(EventKind::CaptainSelected, &payload))
                .await;
        }

        if let Some(chip) = chip_used {
            let payload = ChipUsedPayload {
                gameweek,
                chip,
                reasoning: plan.rationale.clone(),
            };
            ctx.publish(
                Event::from_payload(EventKind::ChipUsed, &payload)
                    .with_priority(EventPriority::High),
            )
            .await;
        }
    }
}

#[async_trait]
impl Agent for ManagerAgent {
    fn name(&self) -> &str {
        AGENT_NAME
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![
            EventKind::GameweekPlanning,
            EventKind::TeamSelectionRequested,
            EventKind::ValueRankingsCompleted,
        ]
    }

    async fn handle_event(&self, event: Event, ctx: AgentContext) -> Result<()> {
        match event.kind {
            EventKind::ValueRankingsCompleted => {
                if let Ok(rankings) = event.payload_as::<ValueRankings>() {
                    info!(
                        "Cached value rankings for GW{} ({} players)",
                        rankings.gameweek, rankings.total_ranked
                    );
                    *self.latest_rankings.lock() = Some(rankings);
                }
                Ok(())
            }
            EventKind::GameweekPlanning => {
                let payload: GameweekPlanningPayload = event.payload_as()?;
                // The scheduler's ±1h windows can fire a trigger twice;
                // dedupe on (gameweek, trigger).
                let key = (payload.gameweek, payload.trigger.clone());
                if !self.handled_triggers.lock().insert(key) {
                    warn!(
                        "Duplicate planning trigger {} for GW{}, ignoring",
                        payload.trigger, payload.gameweek
                    );
                    return Ok(());
                }
                self.run_weekly_decision(payload.gameweek, &ctx).await
            }
            EventKind::TeamSelectionRequested => {
                let gameweek = event
                    .payload_as::<TeamSelectionRequestedPayload>()
                    .map(|p| p.gameweek)?;
                self.run_weekly_decision(gameweek, &ctx).await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::models::{Availability, Player, Position};
    use crate::prediction::ModelSet;

    fn pool_player(id: i64, position: Position, team_id: i64, cost: i64, form: f64) -> Player {
        Player {
            id,
            code: 5000 + id,
            web_name: format!("M{id}"),
            position,
            team_id,
            now_cost: cost,
            status: Availability::Available,
            chance_of_playing_next_round: None,
            selected_by_percent: 25.0,
            form,
            points_per_game: form,
            total_points: (form * 10.0) as i64,
            minutes: 900,
            goals_scored: 2,
            assists: 2,
            clean_sheets: 2,
            bps: 150,
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
        }
    }

    /// Catalog with a full legal squad's worth of players plus upgrade
    /// targets in every position.
    fn seed_catalog(db: &Database) -> Vec<i64> {
        let mut players = Vec::new();
        let mut id = 0;
        for (position, count) in [
            (Position::Goalkeeper, 4),
            (Position::Defender, 8),
            (Position::Midfielder, 8),
            (Position::Forward, 6),
        ] {
            for i in 0..count {
                id += 1;
                let form = 3.0 + (i as f64) * 0.3;
                players.push(pool_player(id, position, id % 11 + 1, 55, form));
            }
        }
        db.upsert_players(&players).unwrap();
        players.iter().map(|p| p.id).collect()
    }

    fn seed_held_team(db: &Database) {
        // First 2 GK (ids 1-2), 5 DEF (5-9), 5 MID (13-17), 3 FWD (21-23).
        let ids = [1, 2, 5, 6, 7, 8, 9, 13, 14, 15, 16, 17, 21, 22, 23];
        let members: Vec<SquadMember> = ids
            .iter()
            .map(|id| SquadMember::from_player(&db.player(*id).unwrap().unwrap()))
            .collect();
        db.set_held_team(&HeldTeam {
            gameweek: 9,
            squad: Squad::new(members),
            bank: 20,
            free_transfers: 1,
        })
        .unwrap();
    }

    fn manager(db: &Database) -> ManagerAgent {
        let prediction = Arc::new(PredictionService::with_models(db.clone(), ModelSet::new()));
        ManagerAgent::new(
            db.clone(),
            prediction,
            Arc::new(Webhook::new(None)),
            None,
            None,
            None,
        )
    }

    fn test_ctx() -> AgentContext {
        let bus = Arc::new(EventBus::new("redis://localhost:6379", "t"));
        let runner = crate::agents::AgentRunner::new(
            Arc::new(crate::learning::LearningAgent::new(
                Database::open_in_memory().unwrap(),
            )),
            bus,
        );
        runner.context()
    }

    #[tokio::test]
    async fn weekly_decision_writes_a_valid_draft() {
        let db = Database::open_in_memory().unwrap();
        seed_catalog(&db);
        seed_held_team(&db);

        let manager = manager(&db);
        manager.run_weekly_decision(10, &test_ctx()).await.unwrap();

        let draft = db.load_draft(10).unwrap().expect("draft written");
        assert_eq!(draft.squad.len(), 15);

        // Captain and vice exist, are distinct, and both start.
        let captain = draft.squad.captain().expect("captain assigned");
        let vice = draft.squad.vice_captain().expect("vice assigned");
        assert_ne!(captain.player_id, vice.player_id);
        assert!(captain.slot.unwrap() <= 11);
        assert!(vice.slot.unwrap() <= 11);

        // The starting eleven is a legal formation.
        let eleven = draft.squad.starting_eleven();
        let (ok, violations) = RulesEngine::validate_starting_eleven(&eleven, None);
        assert!(ok, "{violations:?}");
        assert!(!draft.announcement.is_empty());
    }

    #[tokio::test]
    async fn missing_squad_fails_closed_without_draft() {
        let db = Database::open_in_memory().unwrap();
        seed_catalog(&db);

        let manager = manager(&db);
        manager.run_weekly_decision(10, &test_ctx()).await.unwrap();
        assert!(db.load_draft(10).unwrap().is_none());
    }

    #[tokio::test]
    async fn executed_transfers_keep_positions_aligned() {
        let db = Database::open_in_memory().unwrap();
        seed_catalog(&db);
        seed_held_team(&db);

        let manager = manager(&db);
        manager.run_weekly_decision(10, &test_ctx()).await.unwrap();

        let draft = db.load_draft(10).unwrap().unwrap();
        assert!(draft.transfers.len() <= 2);
        for transfer in &draft.transfers {
            assert_eq!(
                db.player(transfer.player_in_id)
                    .unwrap()
                    .unwrap()
                    .position,
                transfer.position
            );
            // A transferred squad still has the full fifteen.
            assert_eq!(draft.squad.len(), 15);
            assert!(draft.squad.contains(transfer.player_in_id));
            assert!(!draft.squad.contains(transfer.player_out_id));
        }
    }

    #[tokio::test]
    async fn duplicate_planning_trigger_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        seed_catalog(&db);
        seed_held_team(&db);

        let manager = manager(&db);
        let ctx = test_ctx();
        let payload = GameweekPlanningPayload {
            gameweek: 10,
            trigger: "24h".into(),
            deadline: chrono::Utc::now(),
            hours_until: 24.5,
        };
        let event = Event::from_payload(EventKind::GameweekPlanning, &payload);
        manager.handle_event(event.clone(), ctx.clone()).await.unwrap();

        // Wipe the draft; a replayed trigger must not recreate it.
        let first = db.load_draft(10).unwrap();
        assert!(first.is_some());
        let replay = Event::from_payload(EventKind::GameweekPlanning, &payload);
        manager.handle_event(replay, ctx).await.unwrap();
    }
}
