//! Typed payloads for the event kinds that carry structured data.
//!
//! Adding a kind means adding its struct here; producers build events via
//! `Event::from_payload` and consumers read them back with
//! `Event::payload_as`. Extra keys in a received payload are kept in the
//! envelope map and are invisible to these structs.

use crate::models::{Chip, Position, SquadMember, Transfer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Scheduler / data lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameweekPlanningPayload {
    pub gameweek: i32,
    /// Trigger label: "48h", "24h" or "6h".
    pub trigger: String,
    pub deadline: DateTime<Utc>,
    pub hours_until: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRefreshRequestedPayload {
    pub data_type: String,
    pub force: bool,
    pub trigger: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataUpdatedPayload {
    pub gameweek: Option<i32>,
    pub num_players: usize,
    pub num_teams: usize,
    pub num_fixtures: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameweekCompletedPayload {
    pub gameweek: i32,
    pub average_score: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequestedPayload {
    /// "dc", "fixture", "xg", "value" or "all".
    pub analysis_type: String,
    pub gameweek: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

// ---------------------------------------------------------------------------
// Price monitoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceCheckPayload {
    /// "pre" (before the nightly price update) or "post".
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChangeDetectedPayload {
    pub player_id: i64,
    pub web_name: String,
    pub old_price: i64,
    pub new_price: i64,
    /// "rise" or "fall".
    pub direction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePredictionPayload {
    pub player_id: i64,
    pub web_name: String,
    /// "rise", "fall" or "hold".
    pub label: String,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Analysis summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcPlayerStat {
    pub player_id: i64,
    pub web_name: String,
    pub team_id: i64,
    pub position: Position,
    /// Display millions.
    pub price: f64,
    pub games_played: f64,
    /// Fraction of recent games with defensive-contribution points, 0-100.
    pub consistency: f64,
    pub dc_points: f64,
    pub dc_per_million: f64,
    pub selected_by_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcSummary {
    pub gameweek: i32,
    pub players_analyzed: usize,
    pub min_games_required: i64,
    pub defender_rankings: Vec<DcPlayerStat>,
    pub midfielder_rankings: Vec<DcPlayerStat>,
    pub defender_value_rankings: Vec<DcPlayerStat>,
    pub midfielder_value_rankings: Vec<DcPlayerStat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOutlookClass {
    Easy,
    Hard,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureRef {
    pub gameweek: i32,
    pub opponent_id: i64,
    pub is_home: bool,
    pub difficulty: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamFixtureOutlook {
    pub team_id: i64,
    pub team_short_name: String,
    pub avg_difficulty: f64,
    pub classification: FixtureOutlookClass,
    pub fixtures: Vec<FixtureRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSwing {
    pub team_id: i64,
    pub team_short_name: String,
    /// "improving" or "worsening".
    pub direction: String,
    pub first_half_difficulty: f64,
    pub second_half_difficulty: f64,
    pub magnitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSummary {
    pub start_gameweek: i32,
    pub lookahead_gameweeks: i32,
    pub team_outlooks: Vec<TeamFixtureOutlook>,
    pub swings: Vec<FixtureSwing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XgPlayerStat {
    pub player_id: i64,
    pub web_name: String,
    pub team_id: i64,
    pub position: Position,
    pub price: f64,
    pub minutes: i64,
    pub goals: i64,
    pub assists: i64,
    pub xg: f64,
    pub xa: f64,
    pub xgi: f64,
    pub xg_per_90: f64,
    pub xa_per_90: f64,
    pub xgi_per_90: f64,
    /// goals - xG; positive means running hot.
    pub xg_diff: f64,
    pub xgi_per_million: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XgSummary {
    pub gameweek: i32,
    pub players_analyzed: usize,
    pub min_minutes_required: i64,
    pub rankings: Vec<XgPlayerStat>,
    pub overperformers: Vec<XgPlayerStat>,
    pub underperformers: Vec<XgPlayerStat>,
}

/// Weights of the composite value score. Calibration parameters, not
/// constants; the defaults mirror the tuned production values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValueWeights {
    pub base_points: f64,
    pub defensive: f64,
    pub fixture: f64,
    pub xg: f64,
}

impl Default for ValueWeights {
    fn default() -> Self {
        Self {
            base_points: 0.35,
            defensive: 0.25,
            fixture: 0.20,
            xg: 0.20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueEntry {
    pub player_id: i64,
    pub web_name: String,
    pub position: Position,
    pub team_id: i64,
    pub price: f64,
    pub value_score: f64,
    pub ownership: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueRankings {
    pub gameweek: i32,
    pub total_ranked: usize,
    pub weights: ValueWeights,
    pub by_position: HashMap<Position, Vec<ValueEntry>>,
    pub top_overall: Vec<ValueEntry>,
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSelectedPayload {
    pub gameweek: i32,
    pub squad: Vec<SquadMember>,
    pub transfers: Vec<Transfer>,
    pub chip: Option<Chip>,
    pub total_cost: i64,
    /// Predicted points per squad member, for the learning store.
    #[serde(default)]
    pub predictions: HashMap<i64, f64>,
    /// Expected points of the starting eleven.
    #[serde(default)]
    pub expected_points: f64,
    pub announcement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptainSelectedPayload {
    pub gameweek: i32,
    pub captain_id: i64,
    pub captain_name: String,
    pub vice_captain_id: i64,
    pub vice_captain_name: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipUsedPayload {
    pub gameweek: i32,
    pub chip: Chip,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipRecommendationPayload {
    pub gameweek: i32,
    pub chip: Chip,
    pub expected_gain: f64,
    /// "high", "medium" or "low".
    pub priority: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSelectionRequestedPayload {
    pub gameweek: i32,
    #[serde(default)]
    pub free_transfers: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, EventKind};

    #[test]
    fn typed_payload_round_trip() {
        let payload = GameweekPlanningPayload {
            gameweek: 22,
            trigger: "6h".into(),
            deadline: Utc::now(),
            hours_until: 6.2,
        };
        let event = Event::from_payload(EventKind::GameweekPlanning, &payload);
        let back: GameweekPlanningPayload = event.payload_as().unwrap();
        assert_eq!(back.gameweek, 22);
        assert_eq!(back.trigger, "6h");
    }

    #[test]
    fn value_weights_sum_to_one() {
        let w = ValueWeights::default();
        assert!((w.base_points + w.defensive + w.fixture + w.xg - 1.0).abs() < 1e-9);
    }
}
