//! Multi-horizon transfer optimizer.
//!
//! Evaluates every position independently over an H-gameweek horizon,
//! compares the best upgrade against chip expected value, and settles
//! roll vs make vs hit. Missing predictions count as zero, which
//! naturally deprioritizes players the models cannot see.

use crate::events::payloads::ChipRecommendationPayload;
use crate::models::{Player, Position, Squad, SquadMember};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Default planning horizon in gameweeks.
pub const DEFAULT_HORIZON: i32 = 4;
/// Average gain per gameweek worth a free transfer.
pub const FREE_TRANSFER_THRESHOLD: f64 = 2.0;
/// Average gain per gameweek worth a points hit.
pub const HIT_THRESHOLD: f64 = 4.0;
/// Points deducted per transfer beyond the free allocation.
pub const HIT_COST: i64 = 4;
/// Price slack allowed over a straight holder-for-candidate swap, in
/// tenths.
const UPGRADE_SLACK: i64 = 10;
/// Weak holders examined per position.
const WEAK_HOLDERS_PER_POSITION: usize = 2;
/// Replacement candidates ranked per weak holder.
const CANDIDATES_PER_HOLDER: usize = 10;
/// Options carried forward per position into the cross-position merge.
const OPTIONS_PER_POSITION: usize = 3;

/// player id -> gameweek -> expected points.
pub type MultiGwPredictions = HashMap<i64, HashMap<i32, f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferAction {
    Make,
    Roll,
    UseChip,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferOption {
    pub position: Position,
    pub player_out_id: i64,
    pub player_out_name: String,
    pub player_out_price: i64,
    pub player_in_id: i64,
    pub player_in_name: String,
    pub player_in_price: i64,
    /// (gameweek, holder xP, candidate xP) across the horizon.
    pub gw_deltas: Vec<(i32, f64, f64)>,
    pub total_gain: f64,
    pub avg_gain_per_gw: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferPlan {
    pub action: TransferAction,
    pub best: Option<TransferOption>,
    pub top_options: Vec<TransferOption>,
    pub chip: Option<ChipRecommendationPayload>,
    /// Points hit the plan accepts (0 unless paying for the move).
    pub hit_cost: i64,
    pub rationale: String,
}

pub struct TransferOptimizer {
    horizon: i32,
}

impl TransferOptimizer {
    pub fn new() -> Self {
        Self {
            horizon: DEFAULT_HORIZON,
        }
    }

    pub fn with_horizon(horizon: i32) -> Self {
        Self {
            horizon: horizon.max(1),
        }
    }

    /// Full optimization pass. `bank` in tenths; `pool` is every player
    /// in the catalog; `chip` the best standing chip recommendation.
    pub fn optimize(
        &self,
        squad: &Squad,
        pool: &[Player],
        predictions: &MultiGwPredictions,
        current_gw: i32,
        free_transfers: i64,
        bank: i64,
        chip: Option<ChipRecommendationPayload>,
    ) -> TransferPlan {
        let mut all_options: Vec<TransferOption> = Vec::new();
        for position in Position::ALL {
            let mut options =
                self.position_options(squad, pool, predictions, current_gw, bank, position);
            options.truncate(OPTIONS_PER_POSITION);
            all_options.extend(options);
        }
        all_options.sort_by(|a, b| b.total_gain.total_cmp(&a.total_gain));

        self.decide(all_options, free_transfers, chip)
    }

    fn horizon_range(&self, current_gw: i32) -> impl Iterator<Item = i32> {
        current_gw..current_gw + self.horizon
    }

    fn total_xp(&self, predictions: &MultiGwPredictions, player_id: i64, current_gw: i32) -> f64 {
        let by_gw = predictions.get(&player_id);
        self.horizon_range(current_gw)
            .map(|gw| by_gw.and_then(|m| m.get(&gw)).copied().unwrap_or(0.0))
            .sum()
    }

    fn position_options(
        &self,
        squad: &Squad,
        pool: &[Player],
        predictions: &MultiGwPredictions,
        current_gw: i32,
        bank: i64,
        position: Position,
    ) -> Vec<TransferOption> {
        let holders: Vec<&SquadMember> = squad
            .members
            .iter()
            .filter(|m| m.position == position)
            .collect();
        if holders.is_empty() {
            return Vec::new();
        }

        // Weakest holders by average expected points per price.
        let mut by_value: Vec<&SquadMember> = holders.clone();
        by_value.sort_by(|a, b| {
            let value = |m: &SquadMember| {
                let avg = self.total_xp(predictions, m.player_id, current_gw) / self.horizon as f64;
                if m.now_cost > 0 {
                    avg / (m.now_cost as f64 / 10.0)
                } else {
                    0.0
                }
            };
            value(a).total_cmp(&value(b))
        });

        let squad_ids: HashSet<i64> = squad.members.iter().map(|m| m.player_id).collect();
        let mut options = Vec::new();

        for holder in by_value.into_iter().take(WEAK_HOLDERS_PER_POSITION) {
            let max_price = holder.selling_price + bank + UPGRADE_SLACK;
            let mut replacements: Vec<&Player> = pool
                .iter()
                .filter(|p| p.position == position)
                .filter(|p| p.status.is_selectable())
                .filter(|p| !squad_ids.contains(&p.id))
                .filter(|p| p.now_cost <= max_price)
                .collect();
            replacements.sort_by(|a, b| {
                self.total_xp(predictions, b.id, current_gw)
                    .total_cmp(&self.total_xp(predictions, a.id, current_gw))
            });

            for candidate in replacements.into_iter().take(CANDIDATES_PER_HOLDER) {
                let gw_deltas: Vec<(i32, f64, f64)> = self
                    .horizon_range(current_gw)
                    .map(|gw| {
                        let out_xp = predictions
                            .get(&holder.player_id)
                            .and_then(|m| m.get(&gw))
                            .copied()
                            .unwrap_or(0.0);
                        let in_xp = predictions
                            .get(&candidate.id)
                            .and_then(|m| m.get(&gw))
                            .copied()
                            .unwrap_or(0.0);
                        (gw, out_xp, in_xp)
                    })
                    .collect();
                let total_gain: f64 = gw_deltas.iter().map(|(_, out, inn)| inn - out).sum();
                if total_gain <= 0.0 {
                    continue;
                }
                options.push(TransferOption {
                    position,
                    player_out_id: holder.player_id,
                    player_out_name: holder.web_name.clone(),
                    player_out_price: holder.now_cost,
                    player_in_id: candidate.id,
                    player_in_name: candidate.web_name.clone(),
                    player_in_price: candidate.now_cost,
                    avg_gain_per_gw: total_gain / gw_deltas.len() as f64,
                    gw_deltas,
                    total_gain,
                });
            }
        }

        options.sort_by(|a, b| b.total_gain.total_cmp(&a.total_gain));
        debug!(
            "{}: {} transfer options above water",
            position.short_name(),
            options.len()
        );
        options
    }

    fn decide(
        &self,
        options: Vec<TransferOption>,
        free_transfers: i64,
        chip: Option<ChipRecommendationPayload>,
    ) -> TransferPlan {
        let best = options.first().cloned();
        let top_options: Vec<TransferOption> = options.into_iter().take(3).collect();
        let best_gain = best.as_ref().map(|o| o.total_gain).unwrap_or(0.0);

        // Chip arbitration: a chip whose expected value beats the best
        // transfer defers all transfers.
        if let Some(recommendation) = &chip {
            if recommendation.expected_gain > best_gain {
                let rationale = format!(
                    "{} expected value {:.1} beats best transfer gain {:.1}; defer transfers and play the chip",
                    recommendation.chip.as_str(),
                    recommendation.expected_gain,
                    best_gain
                );
                return TransferPlan {
                    action: TransferAction::UseChip,
                    best,
                    top_options,
                    chip,
                    hit_cost: 0,
                    rationale,
                };
            }
        }

        let Some(option) = best else {
            return TransferPlan {
                action: TransferAction::Roll,
                best: None,
                top_options,
                chip,
                hit_cost: 0,
                rationale: "No beneficial transfer options found; roll the transfer".to_string(),
            };
        };

        let avg = option.avg_gain_per_gw;
        if avg < FREE_TRANSFER_THRESHOLD {
            let rationale = format!(
                "Best option gains {avg:.1} pts/GW, under the {FREE_TRANSFER_THRESHOLD:.1} pts/GW threshold; roll to bank a transfer"
            );
            return TransferPlan {
                action: TransferAction::Roll,
                best: Some(option),
                top_options,
                chip,
                hit_cost: 0,
                rationale,
            };
        }

        if free_transfers >= 1 {
            let rationale = format!(
                "Best option gains {avg:.1} pts/GW ({:.1} total); good value for a free transfer",
                option.total_gain
            );
            return TransferPlan {
                action: TransferAction::Make,
                best: Some(option),
                top_options,
                chip,
                hit_cost: 0,
                rationale,
            };
        }

        if avg >= HIT_THRESHOLD {
            let rationale = format!(
                "Best option gains {avg:.1} pts/GW ({:.1} total); worth the -{HIT_COST} hit",
                option.total_gain
            );
            return TransferPlan {
                action: TransferAction::Make,
                best: Some(option),
                top_options,
                chip,
                hit_cost: HIT_COST,
                rationale,
            };
        }

        TransferPlan {
            action: TransferAction::Roll,
            best: Some(option),
            top_options,
            chip,
            hit_cost: 0,
            rationale: format!(
                "No free transfers and {avg:.1} pts/GW does not clear the {HIT_THRESHOLD:.1} hit threshold; roll"
            ),
        }
    }
}

impl Default for TransferOptimizer {
    fn default() -> Self {
        Self::new()
    }
}
