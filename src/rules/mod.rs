//! Squad, lineup and transfer validation plus the scoring derivation.
//!
//! Stateless. Every threshold and multiplier in here belongs to the
//! ruleset itself, not to configuration.

use crate::models::{
    GameweekStats, Player, Position, Squad, SquadMember, MAX_PER_TEAM, SQUAD_SIZE,
    STARTING_XI_SIZE,
};
use serde::Serialize;
use std::collections::HashMap;

/// (defenders, midfielders, forwards); the goalkeeper is always 1.
pub type Formation = (usize, usize, usize);

pub const VALID_FORMATIONS: [Formation; 10] = [
    (3, 4, 3),
    (3, 5, 2),
    (3, 2, 5),
    (4, 3, 3),
    (4, 4, 2),
    (4, 5, 1),
    (4, 2, 4),
    (5, 3, 2),
    (5, 4, 1),
    (5, 2, 3),
];

// Appearance
const POINTS_PLAYING_UNDER_60: i64 = 1;
const POINTS_PLAYING_60_PLUS: i64 = 2;
// Goals by position
const POINTS_GOAL_GK_DEF: i64 = 6;
const POINTS_GOAL_MID: i64 = 5;
const POINTS_GOAL_FWD: i64 = 4;
const POINTS_ASSIST: i64 = 3;
// Clean sheets
const POINTS_CLEAN_SHEET_GK_DEF: i64 = 4;
const POINTS_CLEAN_SHEET_MID: i64 = 1;
// Per 2 conceded, goalkeeper and defender only
const POINTS_GOALS_CONCEDED: i64 = -1;
// Per 3 saves, goalkeeper only
const POINTS_SAVES: i64 = 1;
const POINTS_PENALTY_SAVE: i64 = 5;
const POINTS_PENALTY_MISS: i64 = -2;
const POINTS_YELLOW_CARD: i64 = -1;
const POINTS_RED_CARD: i64 = -3;
const POINTS_OWN_GOAL: i64 = -2;
// Defensive contribution: 1 pt per 5 CBI+T for defenders, per 6
// CBI+T+recoveries for midfielders
const DC_DEFENDER_THRESHOLD: i64 = 5;
const DC_MIDFIELDER_THRESHOLD: i64 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleViolation {
    pub rule: &'static str,
    pub message: String,
}

impl RuleViolation {
    fn new(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

pub struct RulesEngine;

impl RulesEngine {
    /// Validate a complete 15-player squad against composition, budget,
    /// per-team cap and duplicate rules. Budget is in tenths and checked
    /// against purchase prices.
    pub fn validate_squad(squad: &Squad, budget: i64) -> (bool, Vec<RuleViolation>) {
        let mut violations = Vec::new();

        if squad.len() != SQUAD_SIZE {
            violations.push(RuleViolation::new(
                "squad_size",
                format!("Squad must have exactly {SQUAD_SIZE} players (has {})", squad.len()),
            ));
        }

        let counts = squad.position_counts();
        for position in Position::ALL {
            let required = position.squad_quota();
            let actual = counts.get(&position).copied().unwrap_or(0);
            if actual != required {
                violations.push(RuleViolation::new(
                    "position_composition",
                    format!(
                        "Must have {required} {} (has {actual})",
                        position.short_name()
                    ),
                ));
            }
        }

        let total_cost: i64 = squad.members.iter().map(|m| m.purchase_price).sum();
        if total_cost > budget {
            violations.push(RuleViolation::new(
                "budget",
                format!(
                    "Squad cost {:.1} exceeds budget {:.1}",
                    total_cost as f64 / 10.0,
                    budget as f64 / 10.0
                ),
            ));
        }

        for (team_id, count) in squad.team_counts() {
            if count > MAX_PER_TEAM {
                violations.push(RuleViolation::new(
                    "team_limit",
                    format!("Max {MAX_PER_TEAM} players from team {team_id} (has {count})"),
                ));
            }
        }

        let mut seen = HashMap::new();
        for member in &squad.members {
            *seen.entry(member.player_id).or_insert(0) += 1;
        }
        if seen.values().any(|&n| n > 1) {
            violations.push(RuleViolation::new(
                "duplicates",
                "Squad contains duplicate players",
            ));
        }

        (violations.is_empty(), violations)
    }

    /// Validate a starting eleven. When `formation` is given the actual
    /// shape must match it exactly.
    pub fn validate_starting_eleven(
        players: &[&SquadMember],
        formation: Option<Formation>,
    ) -> (bool, Vec<RuleViolation>) {
        let mut violations = Vec::new();

        if players.len() != STARTING_XI_SIZE {
            violations.push(RuleViolation::new(
                "starting_xi_size",
                format!(
                    "Starting XI must have exactly {STARTING_XI_SIZE} players (has {})",
                    players.len()
                ),
            ));
            return (false, violations);
        }

        let mut counts: HashMap<Position, usize> = HashMap::new();
        for p in players {
            *counts.entry(p.position).or_insert(0) += 1;
        }

        let goalkeepers = counts.get(&Position::Goalkeeper).copied().unwrap_or(0);
        if goalkeepers != 1 {
            violations.push(RuleViolation::new(
                "formation_gk",
                format!("Starting XI must have exactly 1 GKP (has {goalkeepers})"),
            ));
        }

        let actual: Formation = (
            counts.get(&Position::Defender).copied().unwrap_or(0),
            counts.get(&Position::Midfielder).copied().unwrap_or(0),
            counts.get(&Position::Forward).copied().unwrap_or(0),
        );

        if !Self::is_valid_formation(actual) {
            violations.push(RuleViolation::new(
                "formation_invalid",
                format!("Formation {}-{}-{} is not valid", actual.0, actual.1, actual.2),
            ));
        }

        if let Some(requested) = formation {
            if requested != actual {
                violations.push(RuleViolation::new(
                    "formation_mismatch",
                    format!(
                        "Requested formation {:?} does not match actual {:?}",
                        requested, actual
                    ),
                ));
            }
        }

        (violations.is_empty(), violations)
    }

    /// Validate a proposed transfer against the current squad.
    /// `budget_available` is in tenths (bank plus the seller's value).
    pub fn validate_transfer(
        player_out: &SquadMember,
        player_in: &Player,
        current_squad: &Squad,
        budget_available: i64,
    ) -> (bool, Vec<RuleViolation>) {
        let mut violations = Vec::new();

        if !current_squad.contains(player_out.player_id) {
            violations.push(RuleViolation::new(
                "transfer_out_not_in_squad",
                format!("{} is not in the current squad", player_out.web_name),
            ));
        }

        if current_squad.contains(player_in.id) {
            violations.push(RuleViolation::new(
                "transfer_in_already_in_squad",
                format!("{} is already in the squad", player_in.web_name),
            ));
        }

        if player_out.position != player_in.position {
            violations.push(RuleViolation::new(
                "transfer_position_mismatch",
                format!(
                    "Must replace {} with {}",
                    player_out.position.short_name(),
                    player_in.position.short_name()
                ),
            ));
        }

        if player_in.now_cost > budget_available {
            violations.push(RuleViolation::new(
                "transfer_budget_exceeded",
                format!(
                    "Transfer cost {:.1} exceeds available budget {:.1}",
                    player_in.price(),
                    budget_available as f64 / 10.0
                ),
            ));
        }

        let mut team_counts = current_squad.team_counts();
        if let Some(count) = team_counts.get_mut(&player_out.team_id) {
            *count = count.saturating_sub(1);
        }
        *team_counts.entry(player_in.team_id).or_insert(0) += 1;
        if team_counts
            .get(&player_in.team_id)
            .is_some_and(|&n| n > MAX_PER_TEAM)
        {
            violations.push(RuleViolation::new(
                "team_limit",
                format!(
                    "Transfer would exceed {MAX_PER_TEAM} players from team {}",
                    player_in.team_id
                ),
            ));
        }

        (violations.is_empty(), violations)
    }

    pub fn is_valid_formation(formation: Formation) -> bool {
        VALID_FORMATIONS.contains(&formation)
    }

    pub fn valid_formations() -> Vec<Formation> {
        let mut formations = VALID_FORMATIONS.to_vec();
        formations.sort();
        formations
    }

    /// Points earned by a player for one gameweek's performance.
    pub fn score(position: Position, stats: &GameweekStats) -> i64 {
        let mut points = 0;

        if stats.minutes > 0 {
            points += if stats.minutes >= 60 {
                POINTS_PLAYING_60_PLUS
            } else {
                POINTS_PLAYING_UNDER_60
            };
        }

        points += stats.goals_scored
            * match position {
                Position::Goalkeeper | Position::Defender => POINTS_GOAL_GK_DEF,
                Position::Midfielder => POINTS_GOAL_MID,
                Position::Forward => POINTS_GOAL_FWD,
            };

        points += stats.assists * POINTS_ASSIST;

        points += stats.clean_sheets
            * match position {
                Position::Goalkeeper | Position::Defender => POINTS_CLEAN_SHEET_GK_DEF,
                Position::Midfielder => POINTS_CLEAN_SHEET_MID,
                Position::Forward => 0,
            };

        if matches!(position, Position::Goalkeeper | Position::Defender) {
            points += (stats.goals_conceded / 2) * POINTS_GOALS_CONCEDED;
        }

        if position == Position::Goalkeeper {
            points += (stats.saves / 3) * POINTS_SAVES;
        }

        points += stats.penalties_saved * POINTS_PENALTY_SAVE;
        points += stats.penalties_missed * POINTS_PENALTY_MISS;
        points += stats.yellow_cards * POINTS_YELLOW_CARD;
        points += stats.red_cards * POINTS_RED_CARD;
        points += stats.own_goals * POINTS_OWN_GOAL;

        points + Self::defensive_contribution_points(position, stats)
    }

    /// Defensive-contribution bonus. Monotone non-decreasing in each of
    /// its constituent counters.
    pub fn defensive_contribution_points(position: Position, stats: &GameweekStats) -> i64 {
        match position {
            Position::Defender => {
                (stats.clearances_blocks_interceptions + stats.tackles) / DC_DEFENDER_THRESHOLD
            }
            Position::Midfielder => {
                (stats.clearances_blocks_interceptions + stats.tackles + stats.recoveries)
                    / DC_MIDFIELDER_THRESHOLD
            }
            Position::Goalkeeper | Position::Forward => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NEW_SQUAD_BUDGET;

    fn member(id: i64, position: Position, team_id: i64, cost: i64) -> SquadMember {
        SquadMember {
            player_id: id,
            code: 1000 + id,
            web_name: format!("P{id}"),
            position,
            team_id,
            now_cost: cost,
            purchase_price: cost,
            selling_price: cost,
            slot: None,
            is_captain: false,
            is_vice_captain: false,
        }
    }

    /// 2 GK, 5 DEF, 5 MID, 3 FWD spread across teams, total cost 950.
    fn legal_squad() -> Squad {
        let mut members = Vec::new();
        let mut id = 0;
        let mut add = |position: Position, count: usize, cost: i64, members: &mut Vec<SquadMember>| {
            for _ in 0..count {
                id += 1;
                members.push(member(id, position, id % 10 + 1, cost));
            }
        };
        add(Position::Goalkeeper, 2, 45, &mut members);
        add(Position::Defender, 5, 55, &mut members);
        add(Position::Midfielder, 5, 75, &mut members);
        add(Position::Forward, 3, 70, &mut members);
        Squad::new(members)
    }

    #[test]
    fn legal_squad_passes() {
        let squad = legal_squad();
        assert_eq!(squad.total_cost(), 950);
        let (ok, violations) = RulesEngine::validate_squad(&squad, NEW_SQUAD_BUDGET);
        assert!(ok, "unexpected violations: {violations:?}");
    }

    #[test]
    fn six_defenders_flag_position_composition() {
        // 6 DEF / 4 MID, otherwise compliant at cost 950.
        let mut squad = legal_squad();
        let swapped = squad
            .members
            .iter_mut()
            .find(|m| m.position == Position::Midfielder)
            .unwrap();
        swapped.position = Position::Defender;

        let (ok, violations) = RulesEngine::validate_squad(&squad, NEW_SQUAD_BUDGET);
        assert!(!ok);
        assert!(violations.iter().any(|v| v.rule == "position_composition"));
    }

    #[test]
    fn budget_team_cap_and_duplicates() {
        let mut squad = legal_squad();
        squad.members[0].purchase_price = 600;
        let (_, violations) = RulesEngine::validate_squad(&squad, NEW_SQUAD_BUDGET);
        assert!(violations.iter().any(|v| v.rule == "budget"));

        let mut squad = legal_squad();
        for m in squad.members.iter_mut().take(4) {
            m.team_id = 3;
        }
        let (_, violations) = RulesEngine::validate_squad(&squad, NEW_SQUAD_BUDGET);
        assert!(violations.iter().any(|v| v.rule == "team_limit"));

        let mut squad = legal_squad();
        squad.members[1].player_id = squad.members[0].player_id;
        let (_, violations) = RulesEngine::validate_squad(&squad, NEW_SQUAD_BUDGET);
        assert!(violations.iter().any(|v| v.rule == "duplicates"));
    }

    #[test]
    fn starting_eleven_formations() {
        let squad = legal_squad();
        // 1 GK, 4 DEF, 4 MID, 2 FWD
        let eleven: Vec<&SquadMember> = squad
            .members
            .iter()
            .filter(|m| m.position == Position::Goalkeeper)
            .take(1)
            .chain(squad.members.iter().filter(|m| m.position == Position::Defender).take(4))
            .chain(squad.members.iter().filter(|m| m.position == Position::Midfielder).take(4))
            .chain(squad.members.iter().filter(|m| m.position == Position::Forward).take(2))
            .collect();

        let (ok, _) = RulesEngine::validate_starting_eleven(&eleven, None);
        assert!(ok);

        let (ok, violations) = RulesEngine::validate_starting_eleven(&eleven, Some((4, 4, 2)));
        assert!(ok, "{violations:?}");

        let (ok, violations) = RulesEngine::validate_starting_eleven(&eleven, Some((3, 5, 2)));
        assert!(!ok);
        assert!(violations.iter().any(|v| v.rule == "formation_mismatch"));

        // Two goalkeepers is never legal.
        let mut twelve = eleven.clone();
        twelve[1] = squad
            .members
            .iter()
            .filter(|m| m.position == Position::Goalkeeper)
            .nth(1)
            .unwrap();
        let (ok, violations) = RulesEngine::validate_starting_eleven(&twelve, None);
        assert!(!ok);
        assert!(violations.iter().any(|v| v.rule == "formation_gk"));
    }

    #[test]
    fn formation_set_is_closed() {
        assert!(RulesEngine::is_valid_formation((3, 4, 3)));
        assert!(RulesEngine::is_valid_formation((5, 2, 3)));
        assert!(!RulesEngine::is_valid_formation((2, 5, 3)));
        assert!(!RulesEngine::is_valid_formation((5, 5, 0)));
        assert_eq!(RulesEngine::valid_formations().len(), 10);
    }

    fn test_player(id: i64, position: Position, team_id: i64, cost: i64) -> Player {
        Player {
            id,
            code: 9000 + id,
            web_name: format!("In{id}"),
            position,
            team_id,
            now_cost: cost,
            status: crate::models::Availability::Available,
            chance_of_playing_next_round: None,
            selected_by_percent: 5.0,
            form: 3.0,
            points_per_game: 3.0,
            total_points: 30,
            minutes: 900,
            goals_scored: 0,
            assists: 0,
            clean_sheets: 0,
            bps: 0,
            transfers_in_event: 0,
            transfers_out_event: 0,
            cost_change_event: 0,
            cost_change_start: 0,
            expected_goals: 0.0,
            expected_assists: 0.0,
            expected_goal_involvements: 0.0,
            expected_goals_per_90: 0.0,
            expected_assists_per_90: 0.0,
            expected_goal_involvements_per_90: 0.0,
        }
    }

    #[test]
    fn transfer_validation() {
        let squad = legal_squad();
        let out = squad
            .members
            .iter()
            .find(|m| m.position == Position::Midfielder)
            .unwrap();

        let incoming = test_player(500, Position::Midfielder, 15, 60);
        let (ok, violations) =
            RulesEngine::validate_transfer(out, &incoming, &squad, out.selling_price + 10);
        assert!(ok, "{violations:?}");

        // Wrong position
        let wrong_pos = test_player(501, Position::Forward, 15, 60);
        let (_, violations) =
            RulesEngine::validate_transfer(out, &wrong_pos, &squad, out.selling_price + 10);
        assert!(violations.iter().any(|v| v.rule == "transfer_position_mismatch"));

        // Too expensive
        let pricey = test_player(502, Position::Midfielder, 15, 140);
        let (_, violations) =
            RulesEngine::validate_transfer(out, &pricey, &squad, out.selling_price + 10);
        assert!(violations.iter().any(|v| v.rule == "transfer_budget_exceeded"));

        // Already in squad
        let duplicate = test_player(out.player_id, Position::Midfielder, 15, 60);
        let (_, violations) =
            RulesEngine::validate_transfer(out, &duplicate, &squad, out.selling_price + 10);
        assert!(violations
            .iter()
            .any(|v| v.rule == "transfer_in_already_in_squad"));
    }

    #[test]
    fn defender_scoring_with_defensive_contribution() {
        // 90 minutes, clean sheet, 1 conceded, 8 CBI + 4 tackles:
        // 2 + 4 + 0 + floor(12/5) = 8
        let stats = GameweekStats {
            minutes: 90,
            clean_sheets: 1,
            goals_conceded: 1,
            clearances_blocks_interceptions: 8,
            tackles: 4,
            ..Default::default()
        };
        assert_eq!(RulesEngine::score(Position::Defender, &stats), 8);
    }

    #[test]
    fn goalkeeper_saves_and_conceded_division() {
        let stats = GameweekStats {
            minutes: 90,
            saves: 7,
            goals_conceded: 4,
            ..Default::default()
        };
        // 2 (appearance) + 2 (7/3 saves) - 2 (4/2 conceded) = 2
        assert_eq!(RulesEngine::score(Position::Goalkeeper, &stats), 2);
    }

    #[test]
    fn goal_points_by_position() {
        let stats = GameweekStats {
            minutes: 90,
            goals_scored: 2,
            ..Default::default()
        };
        assert_eq!(RulesEngine::score(Position::Defender, &stats), 2 + 12);
        assert_eq!(RulesEngine::score(Position::Midfielder, &stats), 2 + 10);
        assert_eq!(RulesEngine::score(Position::Forward, &stats), 2 + 8);
    }

    #[test]
    fn negative_events() {
        let stats = GameweekStats {
            minutes: 55,
            penalties_missed: 1,
            yellow_cards: 1,
            red_cards: 1,
            own_goals: 1,
            ..Default::default()
        };
        // 1 - 2 - 1 - 3 - 2 = -7
        assert_eq!(RulesEngine::score(Position::Forward, &stats), -7);
    }

    #[test]
    fn dc_bonus_is_monotone() {
        let mut previous = 0;
        for cbi in 0..30 {
            let stats = GameweekStats {
                clearances_blocks_interceptions: cbi,
                tackles: 3,
                ..Default::default()
            };
            let points = RulesEngine::defensive_contribution_points(Position::Defender, &stats);
            assert!(points >= previous);
            previous = points;
        }
        // Forwards and goalkeepers never earn the bonus.
        let heavy = GameweekStats {
            clearances_blocks_interceptions: 50,
            tackles: 20,
            recoveries: 30,
            ..Default::default()
        };
        assert_eq!(
            RulesEngine::defensive_contribution_points(Position::Forward, &heavy),
            0
        );
        assert_eq!(
            RulesEngine::defensive_contribution_points(Position::Goalkeeper, &heavy),
            0
        );
    }
}
