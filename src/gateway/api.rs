//! Wire models for the upstream fantasy API.
//!
//! The upstream serializes several numeric fields as strings (`form`,
//! `selected_by_percent`, the expected-goal family); those stay `String`
//! here and are parsed once at the conversion boundary so nothing
//! downstream ever touches raw maps.

use crate::models::{Availability, Fixture, Gameweek, Player, Position, Team};
use crate::storage::HistoryRow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn parse_f64(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(0.0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapResponse {
    #[serde(default)]
    pub elements: Vec<ApiPlayer>,
    #[serde(default)]
    pub teams: Vec<ApiTeam>,
    #[serde(default)]
    pub events: Vec<ApiEvent>,
}

impl BootstrapResponse {
    /// An all-empty response signals a failed fetch.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.teams.is_empty() && self.events.is_empty()
    }

    pub fn current_gameweek(&self) -> Option<&ApiEvent> {
        self.events.iter().find(|e| e.is_current)
    }

    pub fn next_gameweek(&self) -> Option<&ApiEvent> {
        self.events.iter().find(|e| e.is_next)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiPlayer {
    pub id: i64,
    #[serde(default)]
    pub code: i64,
    pub web_name: String,
    pub element_type: i64,
    pub team: i64,
    pub now_cost: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub chance_of_playing_next_round: Option<i64>,
    #[serde(default)]
    pub selected_by_percent: String,
    #[serde(default)]
    pub form: String,
    #[serde(default)]
    pub points_per_game: String,
    #[serde(default)]
    pub total_points: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub goals_scored: i64,
    #[serde(default)]
    pub assists: i64,
    #[serde(default)]
    pub clean_sheets: i64,
    #[serde(default)]
    pub bps: i64,
    #[serde(default)]
    pub transfers_in_event: i64,
    #[serde(default)]
    pub transfers_out_event: i64,
    #[serde(default)]
    pub cost_change_event: i64,
    #[serde(default)]
    pub cost_change_start: i64,
    #[serde(default)]
    pub expected_goals: String,
    #[serde(default)]
    pub expected_assists: String,
    #[serde(default)]
    pub expected_goal_involvements: String,
    #[serde(default)]
    pub expected_goals_per_90: String,
    #[serde(default)]
    pub expected_assists_per_90: String,
    #[serde(default)]
    pub expected_goal_involvements_per_90: String,
}

impl ApiPlayer {
    pub fn to_player(&self) -> Option<Player> {
        let position = Position::from_element_type(self.element_type)?;
        Some(Player {
            id: self.id,
            code: self.code,
            web_name: self.web_name.clone(),
            position,
            team_id: self.team,
            now_cost: self.now_cost,
            status: Availability::from_code(&self.status),
            chance_of_playing_next_round: self.chance_of_playing_next_round,
            selected_by_percent: parse_f64(&self.selected_by_percent),
            form: parse_f64(&self.form),
            points_per_game: parse_f64(&self.points_per_game),
            total_points: self.total_points,
            minutes: self.minutes,
            goals_scored: self.goals_scored,
            assists: self.assists,
            clean_sheets: self.clean_sheets,
            bps: self.bps,
            transfers_in_event: self.transfers_in_event,
            transfers_out_event: self.transfers_out_event,
            cost_change_event: self.cost_change_event,
            cost_change_start: self.cost_change_start,
            expected_goals: parse_f64(&self.expected_goals),
            expected_assists: parse_f64(&self.expected_assists),
            expected_goal_involvements: parse_f64(&self.expected_goal_involvements),
            expected_goals_per_90: parse_f64(&self.expected_goals_per_90),
            expected_assists_per_90: parse_f64(&self.expected_assists_per_90),
            expected_goal_involvements_per_90: parse_f64(&self.expected_goal_involvements_per_90),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiTeam {
    pub id: i64,
    pub name: String,
    pub short_name: String,
    #[serde(default)]
    pub strength_attack_home: i64,
    #[serde(default)]
    pub strength_attack_away: i64,
    #[serde(default)]
    pub strength_defence_home: i64,
    #[serde(default)]
    pub strength_defence_away: i64,
}

impl ApiTeam {
    pub fn to_team(&self) -> Team {
        Team {
            id: self.id,
            name: self.name.clone(),
            short_name: self.short_name.clone(),
            strength_attack_home: self.strength_attack_home,
            strength_attack_away: self.strength_attack_away,
            strength_defence_home: self.strength_defence_home,
            strength_defence_away: self.strength_defence_away,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiEvent {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub deadline_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub is_next: bool,
}

impl ApiEvent {
    pub fn to_gameweek(&self) -> Option<Gameweek> {
        Some(Gameweek {
            id: self.id,
            name: self.name.clone(),
            deadline_time: self.deadline_time?,
            finished: self.finished,
            is_current: self.is_current,
            is_next: self.is_next,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiFixture {
    pub id: i64,
    /// Gameweek, absent for unscheduled fixtures.
    pub event: Option<i32>,
    pub team_h: i64,
    pub team_a: i64,
    #[serde(default)]
    pub team_h_difficulty: Option<i64>,
    #[serde(default)]
    pub team_a_difficulty: Option<i64>,
    #[serde(default)]
    pub team_h_score: Option<i64>,
    #[serde(default)]
    pub team_a_score: Option<i64>,
    #[serde(default)]
    pub finished: bool,
}

impl ApiFixture {
    pub fn to_fixture(&self) -> Fixture {
        Fixture {
            id: self.id,
            gameweek: self.event,
            team_h: self.team_h,
            team_a: self.team_a,
            team_h_difficulty: self.team_h_difficulty.unwrap_or(3),
            team_a_difficulty: self.team_a_difficulty.unwrap_or(3),
            team_h_score: self.team_h_score,
            team_a_score: self.team_a_score,
            finished: self.finished,
        }
    }
}

/// `element-summary/{id}/` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementSummary {
    #[serde(default)]
    pub history: Vec<ApiHistoryItem>,
    #[serde(default)]
    pub history_past: Vec<ApiPastSeason>,
}

impl ElementSummary {
    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.history_past.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiHistoryItem {
    pub element: i64,
    pub round: i32,
    #[serde(default)]
    pub total_points: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub goals_scored: i64,
    #[serde(default)]
    pub assists: i64,
    #[serde(default)]
    pub clean_sheets: i64,
    #[serde(default)]
    pub goals_conceded: i64,
    #[serde(default)]
    pub saves: i64,
    #[serde(default)]
    pub bonus: i64,
    #[serde(default)]
    pub bps: i64,
    #[serde(default)]
    pub clearances_blocks_interceptions: i64,
    #[serde(default)]
    pub tackles: i64,
    #[serde(default)]
    pub recoveries: i64,
    #[serde(default)]
    pub defensive_contribution: i64,
    #[serde(default)]
    pub value: i64,
}

impl ApiHistoryItem {
    pub fn to_history_row(&self) -> HistoryRow {
        HistoryRow {
            player_id: self.element,
            gameweek: self.round,
            total_points: self.total_points,
            minutes: self.minutes,
            goals_scored: self.goals_scored,
            assists: self.assists,
            clean_sheets: self.clean_sheets,
            goals_conceded: self.goals_conceded,
            saves: self.saves,
            bonus: self.bonus,
            bps: self.bps,
            clearances_blocks_interceptions: self.clearances_blocks_interceptions,
            tackles: self.tackles,
            recoveries: self.recoveries,
            defensive_contribution: self.defensive_contribution,
            value: self.value,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiPastSeason {
    #[serde(default)]
    pub season_name: String,
    #[serde(default)]
    pub element_code: i64,
    #[serde(default)]
    pub total_points: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub end_cost: i64,
}

/// `leagues-classic/{id}/standings/` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeagueStandingsResponse {
    #[serde(default)]
    pub standings: StandingsPage,
}

impl LeagueStandingsResponse {
    pub fn is_empty(&self) -> bool {
        self.standings.results.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandingsPage {
    #[serde(default)]
    pub results: Vec<StandingEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandingEntry {
    pub entry: i64,
    pub rank: i64,
    pub total: i64,
    #[serde(default)]
    pub event_total: i64,
    #[serde(default)]
    pub entry_name: String,
}

/// `event/{gw}/live/` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveResponse {
    #[serde(default)]
    pub elements: Vec<LiveElement>,
}

impl LiveResponse {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveElement {
    pub id: i64,
    #[serde(default)]
    pub stats: LiveStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveStats {
    #[serde(default)]
    pub total_points: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub goals_scored: i64,
    #[serde(default)]
    pub assists: i64,
    #[serde(default)]
    pub clean_sheets: i64,
    #[serde(default)]
    pub goals_conceded: i64,
    #[serde(default)]
    pub saves: i64,
    #[serde(default)]
    pub bonus: i64,
    #[serde(default)]
    pub bps: i64,
    #[serde(default)]
    pub clearances_blocks_interceptions: i64,
    #[serde(default)]
    pub tackles: i64,
    #[serde(default)]
    pub recoveries: i64,
    #[serde(default)]
    pub defensive_contribution: i64,
}

impl LiveElement {
    pub fn to_history_row(&self, gameweek: i32) -> HistoryRow {
        HistoryRow {
            player_id: self.id,
            gameweek,
            total_points: self.stats.total_points,
            minutes: self.stats.minutes,
            goals_scored: self.stats.goals_scored,
            assists: self.stats.assists,
            clean_sheets: self.stats.clean_sheets,
            goals_conceded: self.stats.goals_conceded,
            saves: self.stats.saves,
            bonus: self.stats.bonus,
            bps: self.stats.bps,
            clearances_blocks_interceptions: self.stats.clearances_blocks_interceptions,
            tackles: self.stats.tackles,
            recoveries: self.stats.recoveries,
            defensive_contribution: self.stats.defensive_contribution,
            value: 0,
        }
    }
}
