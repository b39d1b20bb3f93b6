//! Synchronous prediction facade.
//!
//! Never errors toward callers: a missing player maps to 0, a missing
//! model falls back to the form heuristic, and every adjustment floors
//! the result at zero.

use crate::models::{Availability, Player, Position};
use crate::prediction::features::{FeatureAssembler, Features, FEATURE_COLUMNS};
use crate::prediction::model::{self, ModelSet, PointsModel};
use crate::price::PriceChangeClassifier;
use crate::storage::Database;
use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Price brackets (tenths) for the learned bias corrections.
const PREMIUM_FLOOR: i64 = 100;
const MID_PRICE_FLOOR: i64 = 60;

/// Version tag recorded when the form heuristic stands in for a model.
pub const FALLBACK_VERSION: &str = "form_fallback";

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub models_loaded: bool,
    pub positions_covered: Vec<&'static str>,
    pub versions: HashMap<String, String>,
    pub feature_columns: Vec<&'static str>,
}

/// Breakdown of one prediction for audit and debugging.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionBreakdown {
    pub player_id: i64,
    pub gameweek: i32,
    pub raw: f64,
    pub bias_adjustment: f64,
    pub news_multiplier: f64,
    pub final_prediction: f64,
    pub model_version: String,
    pub features: HashMap<String, f64>,
}

pub struct PredictionService {
    db: Database,
    assembler: FeatureAssembler,
    models: RwLock<ModelSet>,
    price_classifier: PriceChangeClassifier,
    fallback_warned: AtomicBool,
}

impl PredictionService {
    pub fn new(db: Database) -> Self {
        let models = model::load_from_registry(&db);
        Self {
            assembler: FeatureAssembler::new(db.clone()),
            db,
            models: RwLock::new(models),
            price_classifier: PriceChangeClassifier::new(),
            fallback_warned: AtomicBool::new(false),
        }
    }

    pub fn with_models(db: Database, models: ModelSet) -> Self {
        Self {
            assembler: FeatureAssembler::new(db.clone()),
            db,
            models: RwLock::new(models),
            price_classifier: PriceChangeClassifier::new(),
            fallback_warned: AtomicBool::new(false),
        }
    }

    pub fn reload_models(&self) {
        *self.models.write() = model::load_from_registry(&self.db);
    }

    /// Expected points for the given players. Unknown ids map to 0.
    pub fn predict_points(
        &self,
        player_ids: &[i64],
        gameweek: i32,
        apply_adjustments: bool,
    ) -> HashMap<i64, f64> {
        let corrections = if apply_adjustments {
            self.db.bias_corrections().unwrap_or_default()
        } else {
            HashMap::new()
        };

        let mut predictions = HashMap::with_capacity(player_ids.len());
        for &player_id in player_ids {
            let prediction = match self.db.player(player_id) {
                Ok(Some(player)) => self.predict_single(&player, gameweek, apply_adjustments, &corrections),
                _ => 0.0,
            };
            predictions.insert(player_id, prediction);
        }
        predictions
    }

    /// Expected points for every player on record.
    pub fn predict_all(&self, gameweek: i32, exclude_unavailable: bool) -> HashMap<i64, f64> {
        let corrections = self.db.bias_corrections().unwrap_or_default();
        let players = match self.db.all_players() {
            Ok(players) => players,
            Err(e) => {
                warn!("predict_all: store read failed: {e:#}");
                return HashMap::new();
            }
        };

        players
            .iter()
            .filter(|p| !exclude_unavailable || p.status != Availability::Unavailable)
            .map(|p| (p.id, self.predict_single(p, gameweek, true, &corrections)))
            .collect()
    }

    fn predict_single(
        &self,
        player: &Player,
        gameweek: i32,
        apply_adjustments: bool,
        corrections: &HashMap<(String, String), f64>,
    ) -> f64 {
        let (raw, _) = self.raw_prediction(player, gameweek);
        if !apply_adjustments {
            return raw;
        }
        let adjusted = (raw + self.bias_adjustment(player, corrections)).max(0.0);
        (adjusted * news_multiplier(player)).max(0.0)
    }

    fn raw_prediction(&self, player: &Player, gameweek: i32) -> (f64, String) {
        let models = self.models.read();
        match models.get(&player.position) {
            Some(points_model) => {
                let features = self
                    .assembler
                    .assemble(player, gameweek)
                    .unwrap_or_default();
                (points_model.predict(&features), points_model.version().to_string())
            }
            None => {
                if !self.fallback_warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        "No model for {}; using form fallback (reported once)",
                        player.position.short_name()
                    );
                }
                (form_fallback(player), FALLBACK_VERSION.to_string())
            }
        }
    }

    fn bias_adjustment(
        &self,
        player: &Player,
        corrections: &HashMap<(String, String), f64>,
    ) -> f64 {
        let mut adjustment = 0.0;
        if let Some(value) = corrections.get(&(
            "position".to_string(),
            player.position.short_name().to_string(),
        )) {
            adjustment += value;
        }
        let bracket = price_bracket(player.now_cost);
        if let Some(value) = corrections.get(&("price_bracket".to_string(), bracket.to_string())) {
            adjustment += value;
        }
        if adjustment != 0.0 {
            debug!(
                "Bias adjustment for {}: {adjustment:+.2}",
                player.web_name
            );
        }
        adjustment
    }

    /// Price-change outlook for the given players (or all when empty).
    pub fn predict_price_changes(&self, player_ids: &[i64]) -> HashMap<i64, (String, f64)> {
        let players = match self.db.all_players() {
            Ok(players) => players,
            Err(_) => return HashMap::new(),
        };
        players
            .iter()
            .filter(|p| player_ids.is_empty() || player_ids.contains(&p.id))
            .map(|p| {
                let c = self.price_classifier.classify(p);
                (p.id, (c.label.to_string(), c.confidence))
            })
            .collect()
    }

    pub fn model_info(&self) -> ModelInfo {
        let models = self.models.read();
        let mut versions = HashMap::new();
        let mut positions = Vec::new();
        for position in Position::ALL {
            if let Some(m) = models.get(&position) {
                positions.push(position.short_name());
                versions.insert(position.short_name().to_string(), m.version().to_string());
            }
        }
        ModelInfo {
            models_loaded: !models.is_empty(),
            positions_covered: positions,
            versions,
            feature_columns: FEATURE_COLUMNS.to_vec(),
        }
    }

    /// Full audit trail for one prediction.
    pub fn explain(&self, player_id: i64, gameweek: i32) -> Result<Option<PredictionBreakdown>> {
        let Some(player) = self.db.player(player_id)? else {
            return Ok(None);
        };
        let corrections = self.db.bias_corrections().unwrap_or_default();
        let features = self
            .assembler
            .assemble(&player, gameweek)
            .unwrap_or_default();
        let (raw, model_version) = self.raw_prediction(&player, gameweek);
        let bias = self.bias_adjustment(&player, &corrections);
        let multiplier = news_multiplier(&player);
        Ok(Some(PredictionBreakdown {
            player_id,
            gameweek,
            raw,
            bias_adjustment: bias,
            news_multiplier: multiplier,
            final_prediction: ((raw + bias).max(0.0) * multiplier).max(0.0),
            model_version,
            features: features.as_map().clone(),
        }))
    }
}

/// `(form x 1.5 + points-per-game x 0.5) / 2`
fn form_fallback(player: &Player) -> f64 {
    ((player.form * 1.5 + player.points_per_game * 0.5) / 2.0).max(0.0)
}

fn price_bracket(now_cost: i64) -> &'static str {
    if now_cost >= PREMIUM_FLOOR {
        "premium"
    } else if now_cost >= MID_PRICE_FLOOR {
        "mid_price"
    } else {
        "budget"
    }
}

/// Scale down players whose availability signals doubt or worse. The
/// upstream's chance-of-playing wins when published.
fn news_multiplier(player: &Player) -> f64 {
    let chance = player
        .chance_of_playing_next_round
        .map(|c| (c as f64 / 100.0).clamp(0.0, 1.0));
    match player.status {
        Availability::Available => 1.0,
        Availability::Doubtful => chance.unwrap_or(0.5),
        Availability::Injured | Availability::Suspended => chance.unwrap_or(0.1),
        Availability::Unavailable => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::model::LinearModel;

    fn seed_player(db: &Database, id: i64, position: Position, cost: i64, form: f64, ppg: f64) {
        let player = Player {
            id,
            code: 7000 + id,
            web_name: format!("S{id}"),
            position,
            team_id: 1,
            now_cost: cost,
            status: Availability::Available,
            chance_of_playing_next_round: None,
            selected_by_percent: 15.0,
            form,
            points_per_game: ppg,
            total_points: 45,
            minutes: 900,
            goals_scored: 2,
            assists: 3,
            clean_sheets: 2,
            bps: 180,
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
        };
        db.upsert_players(&[player]).unwrap();
    }

    #[test]
    fn fallback_formula_without_models() {
        let db = Database::open_in_memory().unwrap();
        seed_player(&db, 1, Position::Midfielder, 75, 6.0, 4.0);
        let service = PredictionService::with_models(db, ModelSet::new());

        let predictions = service.predict_points(&[1, 999], 10, false);
        // (6.0 * 1.5 + 4.0 * 0.5) / 2 = 5.5
        assert!((predictions[&1] - 5.5).abs() < 1e-9);
        assert_eq!(predictions[&999], 0.0);
    }

    #[test]
    fn bias_corrections_are_additive_and_floored() {
        let db = Database::open_in_memory().unwrap();
        seed_player(&db, 1, Position::Defender, 110, 2.0, 2.0);
        db.set_bias_correction("position", "DEF", -0.5, 100).unwrap();
        db.set_bias_correction("price_bracket", "premium", -10.0, 50)
            .unwrap();
        let service = PredictionService::with_models(db, ModelSet::new());

        // Raw fallback is (3.0 + 1.0)/2 = 2.0; corrections drag it below
        // zero and the floor holds.
        let predictions = service.predict_points(&[1], 10, true);
        assert_eq!(predictions[&1], 0.0);
    }

    #[test]
    fn news_adjustment_scales_doubtful_players() {
        let db = Database::open_in_memory().unwrap();
        seed_player(&db, 1, Position::Forward, 80, 6.0, 4.0);
        let mut doubtful = db.player(1).unwrap().unwrap();
        doubtful.status = Availability::Doubtful;
        doubtful.chance_of_playing_next_round = Some(75);
        db.upsert_players(&[doubtful]).unwrap();

        let service = PredictionService::with_models(db, ModelSet::new());
        let with = service.predict_points(&[1], 10, true)[&1];
        let without = service.predict_points(&[1], 10, false)[&1];
        assert!((without - 5.5).abs() < 1e-9);
        assert!((with - 5.5 * 0.75).abs() < 1e-9);
    }

    #[test]
    fn registered_model_takes_over() {
        let db = Database::open_in_memory().unwrap();
        seed_player(&db, 1, Position::Midfielder, 75, 6.0, 4.0);

        let mut coefficients = HashMap::new();
        coefficients.insert("form".to_string(), 1.0);
        let mut models = ModelSet::new();
        models.insert(
            Position::Midfielder,
            Arc::new(LinearModel::new("unit", 0.5, coefficients)) as Arc<dyn PointsModel>,
        );
        let service = PredictionService::with_models(db, models);

        let predictions = service.predict_points(&[1], 10, false);
        // 0.5 + 1.0 * form(6.0) = 6.5
        assert!((predictions[&1] - 6.5).abs() < 1e-9);

        let info = service.model_info();
        assert!(info.models_loaded);
        assert_eq!(info.positions_covered, vec!["MID"]);
    }

    #[test]
    fn explain_breaks_down_the_pipeline() {
        let db = Database::open_in_memory().unwrap();
        seed_player(&db, 1, Position::Forward, 120, 4.0, 4.0);
        db.set_bias_correction("price_bracket", "premium", 0.6, 40)
            .unwrap();
        let service = PredictionService::with_models(db, ModelSet::new());

        let breakdown = service.explain(1, 10).unwrap().unwrap();
        assert!((breakdown.raw - 4.0).abs() < 1e-9);
        assert!((breakdown.bias_adjustment - 0.6).abs() < 1e-9);
        assert_eq!(breakdown.news_multiplier, 1.0);
        assert!((breakdown.final_prediction - 4.6).abs() < 1e-9);
        assert_eq!(breakdown.model_version, FALLBACK_VERSION);
        assert!(breakdown.features.contains_key("form"));
    }

    #[test]
    fn predict_all_excludes_unavailable() {
        let db = Database::open_in_memory().unwrap();
        seed_player(&db, 1, Position::Midfielder, 75, 6.0, 4.0);
        seed_player(&db, 2, Position::Midfielder, 75, 6.0, 4.0);
        let mut gone = db.player(2).unwrap().unwrap();
        gone.status = Availability::Unavailable;
        db.upsert_players(&[gone]).unwrap();

        let service = PredictionService::with_models(db, ModelSet::new());
        let predictions = service.predict_all(10, true);
        assert!(predictions.contains_key(&1));
        assert!(!predictions.contains_key(&2));
    }
}
