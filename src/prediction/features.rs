//! Feature assembly for the points models.
//!
//! Features are a named vector so model specs can reference columns by
//! name and survive column reordering.

use crate::models::Player;
use crate::storage::Database;
use anyhow::Result;
use std::collections::HashMap;

/// Columns every model spec may reference.
pub const FEATURE_COLUMNS: [&str; 10] = [
    "form",
    "points_per_game",
    "minutes_per_game",
    "goals_per_90",
    "assists_per_90",
    "xgi_per_90",
    "points_per_million",
    "fixture_difficulty",
    "recent_points_avg",
    "clean_sheet_rate",
];

/// Games of history folded into the recency features.
const RECENT_GAMES: i64 = 5;

#[derive(Debug, Clone, Default)]
pub struct Features {
    values: HashMap<String, f64>,
}

impl Features {
    pub fn get(&self, column: &str) -> f64 {
        self.values.get(column).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, column: &str, value: f64) {
        self.values.insert(column.to_string(), value);
    }

    /// Dense vector in [`FEATURE_COLUMNS`] order.
    pub fn vector(&self) -> Vec<f64> {
        FEATURE_COLUMNS.iter().map(|c| self.get(c)).collect()
    }

    pub fn as_map(&self) -> &HashMap<String, f64> {
        &self.values
    }
}

pub struct FeatureAssembler {
    db: Database,
}

impl FeatureAssembler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn assemble(&self, player: &Player, gameweek: i32) -> Result<Features> {
        let mut features = Features::default();

        let games = (player.minutes as f64 / 90.0).max(1.0);
        features.set("form", player.form);
        features.set("points_per_game", player.points_per_game);
        features.set("minutes_per_game", player.minutes as f64 / games);
        features.set("goals_per_90", player.goals_scored as f64 / games);
        features.set("assists_per_90", player.assists as f64 / games);
        features.set("xgi_per_90", player.expected_goal_involvements_per_90);
        features.set("points_per_million", player.points_per_million());
        features.set("clean_sheet_rate", player.clean_sheets as f64 / games);

        let recent = self.db.history_for_player(player.id, RECENT_GAMES)?;
        if !recent.is_empty() {
            let avg =
                recent.iter().map(|h| h.total_points as f64).sum::<f64>() / recent.len() as f64;
            features.set("recent_points_avg", avg);
        } else {
            features.set("recent_points_avg", player.points_per_game);
        }

        let difficulty = self
            .db
            .fixtures_in_range(gameweek, 1)?
            .iter()
            .filter_map(|f| f.difficulty_for(player.team_id))
            .min()
            .unwrap_or(3);
        features.set("fixture_difficulty", difficulty as f64);

        Ok(features)
    }
}
