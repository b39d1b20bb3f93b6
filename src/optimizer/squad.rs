//! Full-squad builders for the rebuild chips.
//!
//! Free hit optimizes a single gameweek on a fresh budget; wildcard
//! optimizes a time-decayed horizon on selling value plus bank. Both use
//! greedy position-by-position selection with budget reservation so the
//! tail positions are never priced out, then relax to cheapest-available
//! if a slot still cannot be filled.

use crate::models::{Chip, Player, Position, Squad, SquadMember, NEW_SQUAD_BUDGET};
use crate::optimizer::transfers::MultiGwPredictions;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Per-gameweek weight decay for the wildcard horizon objective.
const WILDCARD_DECAY: f64 = 0.85;
/// Cheapest realistic slot price per position, in tenths.
fn floor_price(position: Position) -> i64 {
    match position {
        Position::Goalkeeper | Position::Defender => 40,
        Position::Midfielder | Position::Forward => 45,
    }
}

/// Selection order: thin positions first so elite options are not
/// priced out by the deep ones.
const SELECTION_ORDER: [Position; 4] = [
    Position::Goalkeeper,
    Position::Forward,
    Position::Defender,
    Position::Midfielder,
];

#[derive(Debug, Clone, Serialize)]
pub struct OptimizedSquad {
    pub squad: Squad,
    pub chip: Chip,
    pub horizon: i32,
    /// Total cost in tenths.
    pub total_cost: i64,
    /// Budget left over in tenths.
    pub budget_remaining: i64,
    /// Objective value of the chosen fifteen.
    pub total_xp: f64,
    pub reasoning: String,
}

pub struct SquadOptimizer;

impl SquadOptimizer {
    /// Fresh budget, single-gameweek objective; the squad reverts after
    /// the gameweek so only the target week matters.
    pub fn build_free_hit(
        gameweek: i32,
        pool: &[Player],
        predictions: &HashMap<i64, f64>,
    ) -> OptimizedSquad {
        let squad = greedy_select(pool, predictions, NEW_SQUAD_BUDGET);
        let total_cost = squad.total_cost();
        let total_xp = squad
            .members
            .iter()
            .map(|m| predictions.get(&m.player_id).copied().unwrap_or(0.0))
            .sum();
        OptimizedSquad {
            reasoning: format!(
                "Free hit squad for GW{gameweek}: {:.1} expected points from a fresh {:.1} budget",
                total_xp,
                NEW_SQUAD_BUDGET as f64 / 10.0
            ),
            squad,
            chip: Chip::FreeHit,
            horizon: 1,
            total_cost,
            budget_remaining: NEW_SQUAD_BUDGET - total_cost,
            total_xp,
        }
    }

    /// Selling value plus bank, horizon objective with 0.85^n decay on
    /// later gameweeks; the rebuild is permanent.
    pub fn build_wildcard(
        gameweek: i32,
        current_squad: &Squad,
        bank: i64,
        predictions: &MultiGwPredictions,
        horizon: i32,
        pool: &[Player],
    ) -> OptimizedSquad {
        let budget = current_squad.selling_value() + bank;
        let aggregated = aggregate_with_decay(predictions, gameweek, horizon);
        let squad = greedy_select(pool, &aggregated, budget);
        let total_cost = squad.total_cost();
        let total_xp = squad
            .members
            .iter()
            .map(|m| aggregated.get(&m.player_id).copied().unwrap_or(0.0))
            .sum();
        OptimizedSquad {
            reasoning: format!(
                "Wildcard squad for GW{gameweek}-{}: {:.1} weighted expected points on a {:.1} budget",
                gameweek + horizon - 1,
                total_xp,
                budget as f64 / 10.0
            ),
            squad,
            chip: Chip::Wildcard,
            horizon,
            total_cost,
            budget_remaining: budget - total_cost,
            total_xp,
        }
    }
}

/// Collapse a multi-gameweek prediction matrix into one number per
/// player, weighting nearer gameweeks more heavily and rescaling so the
/// magnitude stays comparable to a plain horizon sum.
pub fn aggregate_with_decay(
    predictions: &MultiGwPredictions,
    start_gw: i32,
    horizon: i32,
) -> HashMap<i64, f64> {
    let mut aggregated = HashMap::with_capacity(predictions.len());
    for (player_id, by_gw) in predictions {
        let mut total = 0.0;
        let mut weight_sum = 0.0;
        for step in 0..horizon {
            let weight = WILDCARD_DECAY.powi(step);
            total += weight * by_gw.get(&(start_gw + step)).copied().unwrap_or(0.0);
            weight_sum += weight;
        }
        if weight_sum > 0.0 {
            aggregated.insert(*player_id, total / weight_sum * horizon as f64);
        }
    }
    aggregated
}

fn greedy_select(pool: &[Player], objective: &HashMap<i64, f64>, budget: i64) -> Squad {
    let score = |p: &Player| objective.get(&p.id).copied().unwrap_or(0.0);

    let mut by_position: HashMap<Position, Vec<&Player>> = HashMap::new();
    for player in pool {
        if !player.status.is_selectable() {
            continue;
        }
        by_position.entry(player.position).or_default().push(player);
    }
    for candidates in by_position.values_mut() {
        candidates.sort_by(|a, b| score(b).total_cmp(&score(a)).then(a.id.cmp(&b.id)));
    }

    let mut members: Vec<SquadMember> = Vec::with_capacity(15);
    let mut spent: i64 = 0;
    let mut team_counts: HashMap<i64, usize> = HashMap::new();
    let mut picked: HashSet<i64> = HashSet::new();

    for (order_index, position) in SELECTION_ORDER.iter().enumerate() {
        let target = position.squad_quota();
        // Budget reserved for every slot still unfilled in later
        // positions, at their floor prices.
        let reserved_for_rest: i64 = SELECTION_ORDER[order_index + 1..]
            .iter()
            .map(|p| p.squad_quota() as i64 * floor_price(*p))
            .sum();

        let candidates = by_position.get(position).cloned().unwrap_or_default();
        let mut selected = 0usize;

        for candidate in &candidates {
            if selected >= target {
                break;
            }
            if picked.contains(&candidate.id) {
                continue;
            }
            if team_counts.get(&candidate.team_id).copied().unwrap_or(0) >= 3 {
                continue;
            }
            let slots_left_here = (target - selected - 1) as i64;
            let available =
                budget - spent - reserved_for_rest - slots_left_here * floor_price(*position);
            if candidate.now_cost > available {
                continue;
            }

            members.push(SquadMember::from_player(candidate));
            spent += candidate.now_cost;
            *team_counts.entry(candidate.team_id).or_insert(0) += 1;
            picked.insert(candidate.id);
            selected += 1;
            debug!(
                "{} {selected}/{target}: {} at {:.1}",
                position.short_name(),
                candidate.web_name,
                candidate.price()
            );
        }

        // Relaxation: fill any remaining slots with the cheapest legal
        // options regardless of objective.
        if selected < target {
            warn!(
                "Only {selected}/{target} {} at target quality, relaxing to budget picks",
                position.short_name()
            );
            let mut cheapest = candidates.clone();
            cheapest.sort_by(|a, b| a.now_cost.cmp(&b.now_cost).then(a.id.cmp(&b.id)));
            for candidate in cheapest {
                if selected >= target {
                    break;
                }
                if picked.contains(&candidate.id) {
                    continue;
                }
                if team_counts.get(&candidate.team_id).copied().unwrap_or(0) >= 3 {
                    continue;
                }
                if candidate.now_cost > budget - spent {
                    continue;
                }
                members.push(SquadMember::from_player(candidate));
                spent += candidate.now_cost;
                *team_counts.entry(candidate.team_id).or_insert(0) += 1;
                picked.insert(candidate.id);
                selected += 1;
            }
        }
    }

    Squad::new(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Availability, NEW_SQUAD_BUDGET};
    use crate::rules::RulesEngine;

    fn pool_player(id: i64, position: Position, team_id: i64, cost: i64) -> Player {
        Player {
            id,
            code: id,
            web_name: format!("C{id}"),
            position,
            team_id,
            now_cost: cost,
            status: Availability::Available,
            chance_of_playing_next_round: None,
            selected_by_percent: 10.0,
            form: 4.0,
            points_per_game: 4.0,
            total_points: 40,
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

    /// A pool deep enough to build any legal squad: 6 GK, 12 DEF,
    /// 12 MID, 8 FWD across many teams, prices 40-120.
    fn deep_pool() -> Vec<Player> {
        let mut pool = Vec::new();
        let mut id = 0;
        for (position, count) in [
            (Position::Goalkeeper, 6),
            (Position::Defender, 12),
            (Position::Midfielder, 12),
            (Position::Forward, 8),
        ] {
            for i in 0..count {
                id += 1;
                let cost = 40 + (i as i64 % 5) * 20;
                pool.push(pool_player(id, position, id % 17 + 1, cost));
            }
        }
        pool
    }

    fn xp_by_price(pool: &[Player]) -> HashMap<i64, f64> {
        // Pricier players predict better, the classic tradeoff.
        pool.iter()
            .map(|p| (p.id, p.now_cost as f64 / 15.0))
            .collect()
    }

    #[test]
    fn free_hit_squad_is_legal() {
        let pool = deep_pool();
        let predictions = xp_by_price(&pool);
        let built = SquadOptimizer::build_free_hit(18, &pool, &predictions);

        let (ok, violations) = RulesEngine::validate_squad(&built.squad, NEW_SQUAD_BUDGET);
        assert!(ok, "violations: {violations:?}");
        assert!(built.total_cost <= NEW_SQUAD_BUDGET);
        assert_eq!(built.budget_remaining, NEW_SQUAD_BUDGET - built.total_cost);
        assert!(built.total_xp > 0.0);
    }

    #[test]
    fn free_hit_with_zero_predictions_is_still_legal() {
        let pool = deep_pool();
        let built = SquadOptimizer::build_free_hit(18, &pool, &HashMap::new());
        let (ok, violations) = RulesEngine::validate_squad(&built.squad, NEW_SQUAD_BUDGET);
        assert!(ok, "violations: {violations:?}");
        assert_eq!(built.total_xp, 0.0);
    }

    #[test]
    fn wildcard_budget_is_selling_value_plus_bank() {
        let pool = deep_pool();
        // Current squad of fifteen cheap players, selling value 15 * 45.
        let current = Squad::new(
            pool.iter()
                .take(15)
                .map(|p| {
                    let mut m = SquadMember::from_player(p);
                    m.selling_price = 45;
                    m
                })
                .collect(),
        );
        let mut predictions = MultiGwPredictions::new();
        for p in &pool {
            predictions.insert(
                p.id,
                (20..24).map(|gw| (gw, p.now_cost as f64 / 20.0)).collect(),
            );
        }

        let built = SquadOptimizer::build_wildcard(20, &current, 25, &predictions, 4, &pool);
        let budget = current.selling_value() + 25;
        assert!(built.total_cost <= budget);
        let (ok, violations) = RulesEngine::validate_squad(&built.squad, budget);
        assert!(ok, "violations: {violations:?}");
        assert_eq!(built.chip, Chip::Wildcard);
    }

    #[test]
    fn decay_weights_nearer_gameweeks() {
        let mut predictions = MultiGwPredictions::new();
        // Player 1 scores early, player 2 scores late; same total.
        predictions.insert(1, HashMap::from([(10, 8.0), (11, 0.0)]));
        predictions.insert(2, HashMap::from([(10, 0.0), (11, 8.0)]));

        let aggregated = aggregate_with_decay(&predictions, 10, 2);
        assert!(aggregated[&1] > aggregated[&2]);
    }

    #[test]
    fn team_cap_respected_even_when_one_team_dominates() {
        // Every defender plays for team 1 and predicts absurdly well:
        // the cap still holds the squad to three of them plus relaxed
        // picks elsewhere.
        let mut pool = deep_pool();
        let mut predictions: HashMap<i64, f64> = xp_by_price(&pool);
        for p in pool.iter_mut() {
            if p.position == Position::Defender {
                p.team_id = if p.id % 3 == 0 { 2 } else { 1 };
            }
        }
        for p in &pool {
            if p.team_id == 1 {
                predictions.insert(p.id, 99.0);
            }
        }

        let built = SquadOptimizer::build_free_hit(18, &pool, &predictions);
        let counts = built.squad.team_counts();
        assert!(counts.values().all(|&n| n <= 3), "team counts: {counts:?}");
        assert_eq!(built.squad.len(), 15);
    }
}
