//! Core domain types shared across the engine.
//!
//! Prices are carried in tenths of the currency unit throughout (so 1000
//! is the fresh-squad budget). Conversions to display millions happen at
//! the edges only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fresh-squad budget in tenths.
pub const NEW_SQUAD_BUDGET: i64 = 1000;
/// Squad composition: 2 GK, 5 DEF, 5 MID, 3 FWD.
pub const SQUAD_SIZE: usize = 15;
pub const STARTING_XI_SIZE: usize = 11;
pub const MAX_PER_TEAM: usize = 3;
/// Last gameweek of the first half of the season (chip instance split).
pub const FIRST_HALF_END: i32 = 19;

/// Playing position. The upstream encodes these as `element_type` 1-4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

impl Position {
    pub const ALL: [Position; 4] = [
        Position::Goalkeeper,
        Position::Defender,
        Position::Midfielder,
        Position::Forward,
    ];

    pub fn from_element_type(element_type: i64) -> Option<Self> {
        match element_type {
            1 => Some(Position::Goalkeeper),
            2 => Some(Position::Defender),
            3 => Some(Position::Midfielder),
            4 => Some(Position::Forward),
            _ => None,
        }
    }

    pub fn element_type(&self) -> i64 {
        match self {
            Position::Goalkeeper => 1,
            Position::Defender => 2,
            Position::Midfielder => 3,
            Position::Forward => 4,
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "GKP",
            Position::Defender => "DEF",
            Position::Midfielder => "MID",
            Position::Forward => "FWD",
        }
    }

    /// Required number of squad slots for this position.
    pub fn squad_quota(&self) -> usize {
        match self {
            Position::Goalkeeper => 2,
            Position::Defender => 5,
            Position::Midfielder => 5,
            Position::Forward => 3,
        }
    }
}

/// Availability flag. The upstream encodes these as single letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Doubtful,
    Injured,
    Suspended,
    Unavailable,
}

impl Availability {
    pub fn from_code(code: &str) -> Self {
        match code {
            "a" => Availability::Available,
            "d" => Availability::Doubtful,
            "i" => Availability::Injured,
            "s" => Availability::Suspended,
            _ => Availability::Unavailable,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Availability::Available => "a",
            Availability::Doubtful => "d",
            Availability::Injured => "i",
            Availability::Suspended => "s",
            Availability::Unavailable => "u",
        }
    }

    pub fn is_selectable(&self) -> bool {
        matches!(self, Availability::Available | Availability::Doubtful)
    }
}

/// A player as persisted in the store. `id` is the per-season element id,
/// `code` the stable cross-season identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub code: i64,
    pub web_name: String,
    pub position: Position,
    pub team_id: i64,
    /// Current price in tenths.
    pub now_cost: i64,
    pub status: Availability,
    pub chance_of_playing_next_round: Option<i64>,
    pub selected_by_percent: f64,
    pub form: f64,
    pub points_per_game: f64,
    pub total_points: i64,
    pub minutes: i64,
    pub goals_scored: i64,
    pub assists: i64,
    pub clean_sheets: i64,
    pub bps: i64,
    pub transfers_in_event: i64,
    pub transfers_out_event: i64,
    pub cost_change_event: i64,
    pub cost_change_start: i64,
    pub expected_goals: f64,
    pub expected_assists: f64,
    pub expected_goal_involvements: f64,
    pub expected_goals_per_90: f64,
    pub expected_assists_per_90: f64,
    pub expected_goal_involvements_per_90: f64,
}

impl Player {
    /// Price in display millions.
    pub fn price(&self) -> f64 {
        self.now_cost as f64 / 10.0
    }

    pub fn points_per_million(&self) -> f64 {
        if self.now_cost <= 0 {
            return 0.0;
        }
        self.total_points as f64 / self.price()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub short_name: String,
    pub strength_attack_home: i64,
    pub strength_attack_away: i64,
    pub strength_defence_home: i64,
    pub strength_defence_away: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub id: i64,
    /// None for fixtures not yet assigned to a gameweek.
    pub gameweek: Option<i32>,
    pub team_h: i64,
    pub team_a: i64,
    pub team_h_difficulty: i64,
    pub team_a_difficulty: i64,
    pub team_h_score: Option<i64>,
    pub team_a_score: Option<i64>,
    pub finished: bool,
}

impl Fixture {
    /// Difficulty of this fixture from `team_id`'s perspective, if they
    /// are involved.
    pub fn difficulty_for(&self, team_id: i64) -> Option<i64> {
        if self.team_h == team_id {
            Some(self.team_h_difficulty)
        } else if self.team_a == team_id {
            Some(self.team_a_difficulty)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gameweek {
    pub id: i32,
    pub name: String,
    pub deadline_time: DateTime<Utc>,
    pub finished: bool,
    pub is_current: bool,
    pub is_next: bool,
}

/// One member of a held squad, with the prices needed for selling-value
/// arithmetic and the assigned slot (1-11 starting, 12-15 bench).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadMember {
    pub player_id: i64,
    pub code: i64,
    pub web_name: String,
    pub position: Position,
    pub team_id: i64,
    pub now_cost: i64,
    pub purchase_price: i64,
    pub selling_price: i64,
    pub slot: Option<u8>,
    pub is_captain: bool,
    pub is_vice_captain: bool,
}

impl SquadMember {
    pub fn from_player(player: &Player) -> Self {
        Self {
            player_id: player.id,
            code: player.code,
            web_name: player.web_name.clone(),
            position: player.position,
            team_id: player.team_id,
            now_cost: player.now_cost,
            purchase_price: player.now_cost,
            selling_price: player.now_cost,
            slot: None,
            is_captain: false,
            is_vice_captain: false,
        }
    }
}

/// A 15-player squad. Construction does not validate; the rules engine
/// owns validation so invalid candidates can be inspected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Squad {
    pub members: Vec<SquadMember>,
}

impl Squad {
    pub fn new(members: Vec<SquadMember>) -> Self {
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, player_id: i64) -> bool {
        self.members.iter().any(|m| m.player_id == player_id)
    }

    pub fn position_counts(&self) -> HashMap<Position, usize> {
        let mut counts = HashMap::new();
        for m in &self.members {
            *counts.entry(m.position).or_insert(0) += 1;
        }
        counts
    }

    pub fn team_counts(&self) -> HashMap<i64, usize> {
        let mut counts = HashMap::new();
        for m in &self.members {
            *counts.entry(m.team_id).or_insert(0) += 1;
        }
        counts
    }

    /// Sum of current prices in tenths.
    pub fn total_cost(&self) -> i64 {
        self.members.iter().map(|m| m.now_cost).sum()
    }

    /// Sum of selling prices in tenths.
    pub fn selling_value(&self) -> i64 {
        self.members.iter().map(|m| m.selling_price).sum()
    }

    pub fn starting_eleven(&self) -> Vec<&SquadMember> {
        self.members
            .iter()
            .filter(|m| matches!(m.slot, Some(s) if s <= STARTING_XI_SIZE as u8))
            .collect()
    }

    pub fn captain(&self) -> Option<&SquadMember> {
        self.members.iter().find(|m| m.is_captain)
    }

    pub fn vice_captain(&self) -> Option<&SquadMember> {
        self.members.iter().find(|m| m.is_vice_captain)
    }
}

/// An executed or proposed transfer. In- and out-players always share a
/// position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub gameweek: i32,
    pub player_out_id: i64,
    pub player_out_name: String,
    pub player_in_id: i64,
    pub player_in_name: String,
    pub position: Position,
    /// Points hit paid for this transfer (0 when free).
    pub cost: i64,
    pub is_free: bool,
    pub reasoning: String,
}

/// One-shot squad levers. Two instances of each per season, split at the
/// halfway gameweek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chip {
    Wildcard,
    BenchBoost,
    TripleCaptain,
    FreeHit,
}

impl Chip {
    pub const ALL: [Chip; 4] = [
        Chip::Wildcard,
        Chip::BenchBoost,
        Chip::TripleCaptain,
        Chip::FreeHit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chip::Wildcard => "wildcard",
            Chip::BenchBoost => "bench_boost",
            Chip::TripleCaptain => "triple_captain",
            Chip::FreeHit => "free_hit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "wildcard" => Some(Chip::Wildcard),
            "bench_boost" => Some(Chip::BenchBoost),
            "triple_captain" => Some(Chip::TripleCaptain),
            "free_hit" => Some(Chip::FreeHit),
            _ => None,
        }
    }

    /// Which half-season instance a usage in `gameweek` consumes.
    pub fn half_for(gameweek: i32) -> u8 {
        if gameweek <= FIRST_HALF_END {
            1
        } else {
            2
        }
    }
}

/// Append-only record of a published decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub gameweek: i32,
    pub kind: String,
    pub data: serde_json::Value,
    pub reasoning: String,
    pub expected_value: f64,
    pub confidence: f64,
    pub agent: String,
    pub created_at: DateTime<Utc>,
}

/// Stored prediction, later joined with the observed outcome. Keyed by
/// (player code, gameweek); the per-season id is kept for joins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub player_code: i64,
    pub player_id: i64,
    pub gameweek: i32,
    pub predicted_points: f64,
    pub confidence: f64,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub actual_points: Option<i64>,
    pub error: Option<f64>,
}

/// Per-gameweek performance counters, as returned by the live endpoint
/// and the player detail history. Input to the scoring rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameweekStats {
    pub minutes: i64,
    pub goals_scored: i64,
    pub assists: i64,
    pub clean_sheets: i64,
    pub goals_conceded: i64,
    pub saves: i64,
    pub penalties_saved: i64,
    pub penalties_missed: i64,
    pub yellow_cards: i64,
    pub red_cards: i64,
    pub own_goals: i64,
    pub clearances_blocks_interceptions: i64,
    pub tackles: i64,
    pub recoveries: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_round_trips_element_type() {
        for pos in Position::ALL {
            assert_eq!(Position::from_element_type(pos.element_type()), Some(pos));
        }
        assert_eq!(Position::from_element_type(5), None);
    }

    #[test]
    fn availability_codes() {
        assert_eq!(Availability::from_code("a"), Availability::Available);
        assert_eq!(Availability::from_code("x"), Availability::Unavailable);
        assert!(Availability::Doubtful.is_selectable());
        assert!(!Availability::Injured.is_selectable());
    }

    #[test]
    fn chip_half_split() {
        assert_eq!(Chip::half_for(19), 1);
        assert_eq!(Chip::half_for(20), 2);
    }

    #[test]
    fn squad_aggregates() {
        let mut squad = Squad::default();
        for (id, team, cost) in [(1, 1, 45), (2, 1, 55), (3, 2, 60)] {
            squad.members.push(SquadMember {
                player_id: id,
                code: id + 1000,
                web_name: format!("P{id}"),
                position: Position::Defender,
                team_id: team,
                now_cost: cost,
                purchase_price: cost,
                selling_price: cost - 1,
                slot: None,
                is_captain: false,
                is_vice_captain: false,
            });
        }
        assert_eq!(squad.total_cost(), 160);
        assert_eq!(squad.selling_value(), 157);
        assert_eq!(squad.team_counts()[&1], 2);
        assert!(squad.contains(2));
        assert!(!squad.contains(99));
    }
}
