//! SQLite-backed persistent store.
//!
//! One connection behind a mutex; WAL mode keeps readers cheap. All
//! entity access goes through this type so every table group has a
//! single writer: the gateway owns the catalog, the coordinator owns
//! drafts, the learning agent owns decisions and predictions, the price
//! monitor owns the price tables.

mod schema;

use crate::models::{
    Availability, Chip, DecisionRecord, Fixture, Gameweek, Player, Position, PredictionRecord,
    Squad, Team, Transfer,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub use schema::SCHEMA_SQL;

/// One per-gameweek performance row from the player detail endpoint.
#[derive(Debug, Clone, Default)]
pub struct HistoryRow {
    pub player_id: i64,
    pub gameweek: i32,
    pub total_points: i64,
    pub minutes: i64,
    pub goals_scored: i64,
    pub assists: i64,
    pub clean_sheets: i64,
    pub goals_conceded: i64,
    pub saves: i64,
    pub bonus: i64,
    pub bps: i64,
    pub clearances_blocks_interceptions: i64,
    pub tackles: i64,
    pub recoveries: i64,
    pub defensive_contribution: i64,
    pub value: i64,
}

/// The coordinator's working output for a gameweek, overwritten until the
/// deadline passes.
#[derive(Debug, Clone)]
pub struct DraftTeam {
    pub gameweek: i32,
    pub squad: Squad,
    pub transfers: Vec<Transfer>,
    pub chip: Option<Chip>,
    pub announcement: String,
}

/// Current held squad with its cash position.
#[derive(Debug, Clone)]
pub struct HeldTeam {
    pub gameweek: i32,
    pub squad: Squad,
    /// Bank in tenths.
    pub bank: i64,
    pub free_transfers: i64,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening database at {}", path.as_ref().display()))?;
        conn.execute_batch(SCHEMA_SQL).context("applying schema")?;
        info!("Database ready at {}", path.as_ref().display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // -----------------------------------------------------------------
    // Catalog (players / teams / gameweeks / fixtures / history)
    // -----------------------------------------------------------------

    pub fn upsert_players(&self, players: &[Player]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO players (
                    id, code, web_name, element_type, team_id, now_cost, status,
                    chance_of_playing_next_round, selected_by_percent, form,
                    points_per_game, total_points, minutes, goals_scored, assists,
                    clean_sheets, bps, transfers_in_event, transfers_out_event,
                    cost_change_event, cost_change_start, expected_goals,
                    expected_assists, expected_goal_involvements,
                    expected_goals_per_90, expected_assists_per_90,
                    expected_goal_involvements_per_90, updated_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,
                          ?17,?18,?19,?20,?21,?22,?23,?24,?25,?26,?27, datetime('now'))",
            )?;
            for p in players {
                stmt.execute(params![
                    p.id,
                    p.code,
                    p.web_name,
                    p.position.element_type(),
                    p.team_id,
                    p.now_cost,
                    p.status.code(),
                    p.chance_of_playing_next_round,
                    p.selected_by_percent,
                    p.form,
                    p.points_per_game,
                    p.total_points,
                    p.minutes,
                    p.goals_scored,
                    p.assists,
                    p.clean_sheets,
                    p.bps,
                    p.transfers_in_event,
                    p.transfers_out_event,
                    p.cost_change_event,
                    p.cost_change_start,
                    p.expected_goals,
                    p.expected_assists,
                    p.expected_goal_involvements,
                    p.expected_goals_per_90,
                    p.expected_assists_per_90,
                    p.expected_goal_involvements_per_90,
                ])?;
            }
        }
        tx.commit()?;
        Ok(players.len())
    }

    fn player_from_row(row: &Row<'_>) -> rusqlite::Result<Player> {
        let element_type: i64 = row.get("element_type")?;
        let status: String = row.get("status")?;
        Ok(Player {
            id: row.get("id")?,
            code: row.get("code")?,
            web_name: row.get("web_name")?,
            position: Position::from_element_type(element_type).unwrap_or(Position::Midfielder),
            team_id: row.get("team_id")?,
            now_cost: row.get("now_cost")?,
            status: Availability::from_code(&status),
            chance_of_playing_next_round: row.get("chance_of_playing_next_round")?,
            selected_by_percent: row.get("selected_by_percent")?,
            form: row.get("form")?,
            points_per_game: row.get("points_per_game")?,
            total_points: row.get("total_points")?,
            minutes: row.get("minutes")?,
            goals_scored: row.get("goals_scored")?,
            assists: row.get("assists")?,
            clean_sheets: row.get("clean_sheets")?,
            bps: row.get("bps")?,
            transfers_in_event: row.get("transfers_in_event")?,
            transfers_out_event: row.get("transfers_out_event")?,
            cost_change_event: row.get("cost_change_event")?,
            cost_change_start: row.get("cost_change_start")?,
            expected_goals: row.get("expected_goals")?,
            expected_assists: row.get("expected_assists")?,
            expected_goal_involvements: row.get("expected_goal_involvements")?,
            expected_goals_per_90: row.get("expected_goals_per_90")?,
            expected_assists_per_90: row.get("expected_assists_per_90")?,
            expected_goal_involvements_per_90: row.get("expected_goal_involvements_per_90")?,
        })
    }

    pub fn all_players(&self) -> Result<Vec<Player>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM players ORDER BY id")?;
        let rows = stmt.query_map([], Self::player_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn player(&self, id: i64) -> Result<Option<Player>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM players WHERE id = ?1")?;
        Ok(stmt.query_row([id], Self::player_from_row).optional()?)
    }

    pub fn players_by_position(&self, position: Position) -> Result<Vec<Player>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT * FROM players WHERE element_type = ?1 ORDER BY id")?;
        let rows = stmt.query_map([position.element_type()], Self::player_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn upsert_teams(&self, teams: &[Team]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO teams (
                    id, name, short_name, strength_attack_home, strength_attack_away,
                    strength_defence_home, strength_defence_away
                ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?;
            for t in teams {
                stmt.execute(params![
                    t.id,
                    t.name,
                    t.short_name,
                    t.strength_attack_home,
                    t.strength_attack_away,
                    t.strength_defence_home,
                    t.strength_defence_away,
                ])?;
            }
        }
        tx.commit()?;
        Ok(teams.len())
    }

    pub fn all_teams(&self) -> Result<Vec<Team>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM teams ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Team {
                id: row.get("id")?,
                name: row.get("name")?,
                short_name: row.get("short_name")?,
                strength_attack_home: row.get("strength_attack_home")?,
                strength_attack_away: row.get("strength_attack_away")?,
                strength_defence_home: row.get("strength_defence_home")?,
                strength_defence_away: row.get("strength_defence_away")?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn upsert_gameweeks(&self, gameweeks: &[Gameweek]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO gameweeks (
                    id, name, deadline_time, finished, is_current, is_next
                ) VALUES (?1,?2,?3,?4,?5,?6)",
            )?;
            for gw in gameweeks {
                stmt.execute(params![
                    gw.id,
                    gw.name,
                    gw.deadline_time.to_rfc3339(),
                    gw.finished,
                    gw.is_current,
                    gw.is_next,
                ])?;
            }
        }
        tx.commit()?;
        Ok(gameweeks.len())
    }

    fn gameweek_from_row(row: &Row<'_>) -> rusqlite::Result<Gameweek> {
        let deadline: String = row.get("deadline_time")?;
        Ok(Gameweek {
            id: row.get("id")?,
            name: row.get("name")?,
            deadline_time: DateTime::parse_from_rfc3339(&deadline)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            finished: row.get("finished")?,
            is_current: row.get("is_current")?,
            is_next: row.get("is_next")?,
        })
    }

    pub fn gameweeks(&self) -> Result<Vec<Gameweek>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM gameweeks ORDER BY id")?;
        let rows = stmt.query_map([], Self::gameweek_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn current_gameweek(&self) -> Result<Option<Gameweek>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT * FROM gameweeks WHERE is_current = 1 LIMIT 1")?;
        Ok(stmt.query_row([], Self::gameweek_from_row).optional()?)
    }

    pub fn next_gameweek(&self) -> Result<Option<Gameweek>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM gameweeks WHERE is_next = 1 LIMIT 1")?;
        Ok(stmt.query_row([], Self::gameweek_from_row).optional()?)
    }

    pub fn upsert_fixtures(&self, fixtures: &[Fixture]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO fixtures (
                    id, gameweek, team_h, team_a, team_h_difficulty,
                    team_a_difficulty, team_h_score, team_a_score, finished
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            )?;
            for f in fixtures {
                stmt.execute(params![
                    f.id,
                    f.gameweek,
                    f.team_h,
                    f.team_a,
                    f.team_h_difficulty,
                    f.team_a_difficulty,
                    f.team_h_score,
                    f.team_a_score,
                    f.finished,
                ])?;
            }
        }
        tx.commit()?;
        Ok(fixtures.len())
    }

    fn fixture_from_row(row: &Row<'_>) -> rusqlite::Result<Fixture> {
        Ok(Fixture {
            id: row.get("id")?,
            gameweek: row.get("gameweek")?,
            team_h: row.get("team_h")?,
            team_a: row.get("team_a")?,
            team_h_difficulty: row.get("team_h_difficulty")?,
            team_a_difficulty: row.get("team_a_difficulty")?,
            team_h_score: row.get("team_h_score")?,
            team_a_score: row.get("team_a_score")?,
            finished: row.get("finished")?,
        })
    }

    pub fn all_fixtures(&self) -> Result<Vec<Fixture>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM fixtures ORDER BY gameweek, id")?;
        let rows = stmt.query_map([], Self::fixture_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn fixtures_in_range(&self, start_gw: i32, count: i32) -> Result<Vec<Fixture>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM fixtures WHERE gameweek >= ?1 AND gameweek < ?2 ORDER BY gameweek, id",
        )?;
        let rows = stmt.query_map(params![start_gw, start_gw + count], Self::fixture_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn upsert_history(&self, rows: &[HistoryRow]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO player_gameweek_history (
                    player_id, gameweek, total_points, minutes, goals_scored,
                    assists, clean_sheets, goals_conceded, saves, bonus, bps,
                    clearances_blocks_interceptions, tackles, recoveries,
                    defensive_contribution, value
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            )?;
            for r in rows {
                stmt.execute(params![
                    r.player_id,
                    r.gameweek,
                    r.total_points,
                    r.minutes,
                    r.goals_scored,
                    r.assists,
                    r.clean_sheets,
                    r.goals_conceded,
                    r.saves,
                    r.bonus,
                    r.bps,
                    r.clearances_blocks_interceptions,
                    r.tackles,
                    r.recoveries,
                    r.defensive_contribution,
                    r.value,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn history_for_player(&self, player_id: i64, last_n: i64) -> Result<Vec<HistoryRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM player_gameweek_history
             WHERE player_id = ?1 ORDER BY gameweek DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![player_id, last_n], |row| {
            Ok(HistoryRow {
                player_id: row.get("player_id")?,
                gameweek: row.get("gameweek")?,
                total_points: row.get("total_points")?,
                minutes: row.get("minutes")?,
                goals_scored: row.get("goals_scored")?,
                assists: row.get("assists")?,
                clean_sheets: row.get("clean_sheets")?,
                goals_conceded: row.get("goals_conceded")?,
                saves: row.get("saves")?,
                bonus: row.get("bonus")?,
                bps: row.get("bps")?,
                clearances_blocks_interceptions: row.get("clearances_blocks_interceptions")?,
                tackles: row.get("tackles")?,
                recoveries: row.get("recoveries")?,
                defensive_contribution: row.get("defensive_contribution")?,
                value: row.get("value")?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Observed total points per player for a finished gameweek.
    pub fn points_for_gameweek(&self, gameweek: i32) -> Result<HashMap<i64, i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT player_id, total_points FROM player_gameweek_history WHERE gameweek = ?1",
        )?;
        let rows = stmt.query_map([gameweek], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // -----------------------------------------------------------------
    // Squad state
    // -----------------------------------------------------------------

    pub fn held_team(&self) -> Result<Option<HeldTeam>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT gameweek, squad_json, bank, free_transfers FROM my_team WHERE id = 1",
        )?;
        let row = stmt
            .query_row([], |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .optional()?;
        match row {
            Some((gameweek, squad_json, bank, free_transfers)) => Ok(Some(HeldTeam {
                gameweek,
                squad: serde_json::from_str(&squad_json).context("held squad json")?,
                bank,
                free_transfers,
            })),
            None => Ok(None),
        }
    }

    pub fn set_held_team(&self, team: &HeldTeam) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO my_team (id, gameweek, squad_json, bank, free_transfers, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, datetime('now'))",
            params![
                team.gameweek,
                serde_json::to_string(&team.squad)?,
                team.bank,
                team.free_transfers,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the draft for a gameweek. A single cell per gameweek:
    /// only the latest write before the deadline is authoritative.
    pub fn save_draft(&self, draft: &DraftTeam) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO draft_team
                (gameweek, squad_json, transfers_json, chip, announcement, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![
                draft.gameweek,
                serde_json::to_string(&draft.squad)?,
                serde_json::to_string(&draft.transfers)?,
                draft.chip.map(|c| c.as_str()),
                draft.announcement,
            ],
        )?;
        Ok(())
    }

    pub fn load_draft(&self, gameweek: i32) -> Result<Option<DraftTeam>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT squad_json, transfers_json, chip, announcement
             FROM draft_team WHERE gameweek = ?1",
        )?;
        let row = stmt
            .query_row([gameweek], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()?;
        match row {
            Some((squad_json, transfers_json, chip, announcement)) => Ok(Some(DraftTeam {
                gameweek,
                squad: serde_json::from_str(&squad_json).context("draft squad json")?,
                transfers: serde_json::from_str(&transfers_json).context("draft transfers json")?,
                chip: chip.as_deref().and_then(Chip::parse),
                announcement,
            })),
            None => Ok(None),
        }
    }

    pub fn record_transfer(&self, transfer: &Transfer) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO transfers
                (gameweek, player_out_id, player_in_id, transfer_cost,
                 is_free_transfer, reasoning, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
            params![
                transfer.gameweek,
                transfer.player_out_id,
                transfer.player_in_id,
                transfer.cost,
                transfer.is_free,
                transfer.reasoning,
            ],
        )?;
        Ok(())
    }

    pub fn record_chip(&self, chip: Chip, gameweek: i32) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chips_used (chip_name, gameweek, chip_half, used_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![chip.as_str(), gameweek, Chip::half_for(gameweek)],
        )?;
        Ok(())
    }

    pub fn chips_used(&self) -> Result<Vec<(Chip, i32, u8)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT chip_name, gameweek, chip_half FROM chips_used")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i32>(1)?,
                row.get::<_, u8>(2)?,
            ))
        })?;
        let mut used = Vec::new();
        for row in rows {
            let (name, gw, half) = row?;
            if let Some(chip) = Chip::parse(&name) {
                used.push((chip, gw, half));
            }
        }
        Ok(used)
    }

    // -----------------------------------------------------------------
    // Decision log and learning
    // -----------------------------------------------------------------

    pub fn record_decision(&self, decision: &DecisionRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO decisions
                (gameweek, decision_type, decision_data, reasoning,
                 expected_value, confidence, agent_source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                decision.gameweek,
                decision.kind,
                decision.data.to_string(),
                decision.reasoning,
                decision.expected_value,
                decision.confidence,
                decision.agent,
                decision.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn decisions_for(&self, gameweek: i32) -> Result<Vec<DecisionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT gameweek, decision_type, decision_data, reasoning, expected_value,
                    confidence, agent_source, created_at
             FROM decisions WHERE gameweek = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([gameweek], |row| {
            let data: String = row.get(2)?;
            let created: String = row.get(7)?;
            Ok(DecisionRecord {
                gameweek: row.get(0)?,
                kind: row.get(1)?,
                data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
                reasoning: row.get(3)?,
                expected_value: row.get(4)?,
                confidence: row.get(5)?,
                agent: row.get(6)?,
                created_at: DateTime::parse_from_rfc3339(&created)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Insert-or-replace keyed by (player code, gameweek): the most
    /// recent prediction for a cell wins.
    pub fn upsert_prediction(&self, prediction: &PredictionRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO player_predictions
                (player_code, player_id, gameweek, predicted_points,
                 prediction_confidence, model_version, created_at,
                 actual_points, prediction_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                prediction.player_code,
                prediction.player_id,
                prediction.gameweek,
                prediction.predicted_points,
                prediction.confidence,
                prediction.model_version,
                prediction.created_at.to_rfc3339(),
                prediction.actual_points,
                prediction.error,
            ],
        )?;
        Ok(())
    }

    pub fn predictions_for_gameweek(&self, gameweek: i32) -> Result<Vec<PredictionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT player_code, player_id, gameweek, predicted_points,
                    prediction_confidence, model_version, created_at,
                    actual_points, prediction_error
             FROM player_predictions WHERE gameweek = ?1",
        )?;
        let rows = stmt.query_map([gameweek], |row| {
            let created: String = row.get(6)?;
            Ok(PredictionRecord {
                player_code: row.get(0)?,
                player_id: row.get(1)?,
                gameweek: row.get(2)?,
                predicted_points: row.get(3)?,
                confidence: row.get(4)?,
                model_version: row.get(5)?,
                created_at: DateTime::parse_from_rfc3339(&created)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                actual_points: row.get(7)?,
                error: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn fill_prediction_outcome(
        &self,
        player_code: i64,
        gameweek: i32,
        actual_points: i64,
        error: f64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE player_predictions
             SET actual_points = ?1, prediction_error = ?2
             WHERE player_code = ?3 AND gameweek = ?4",
            params![actual_points, error, player_code, gameweek],
        )?;
        Ok(())
    }

    pub fn record_metric(&self, name: &str, gameweek: i32, value: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO learning_metrics (metric_name, gameweek, value, recorded_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![name, gameweek, value],
        )?;
        Ok(())
    }

    pub fn set_bias_correction(
        &self,
        bucket_kind: &str,
        bucket: &str,
        correction: f64,
        sample_size: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO bias_corrections
                (bucket_kind, bucket, correction, sample_size, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            params![bucket_kind, bucket, correction, sample_size],
        )?;
        Ok(())
    }

    /// All active corrections as (bucket_kind, bucket) -> correction.
    pub fn bias_corrections(&self) -> Result<HashMap<(String, String), f64>> {
        Ok(self
            .bias_corrections_with_samples()?
            .into_iter()
            .map(|(key, (correction, _))| (key, correction))
            .collect())
    }

    /// Corrections with their accumulated sample sizes, for incremental
    /// aggregation.
    pub fn bias_corrections_with_samples(
        &self,
    ) -> Result<HashMap<(String, String), (f64, i64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT bucket_kind, bucket, correction, sample_size FROM bias_corrections",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                (row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                (row.get::<_, f64>(2)?, row.get::<_, i64>(3)?),
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn record_agent_recommendation(
        &self,
        agent_name: &str,
        gameweek: i32,
        recommendation_type: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agent_performance
                (agent_name, gameweek, recommendation_type, recommendation_data, recorded_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            params![agent_name, gameweek, recommendation_type, data.to_string()],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Competitive context
    // -----------------------------------------------------------------

    pub fn upsert_standing(
        &self,
        league_id: i64,
        gameweek: i32,
        entry_id: i64,
        rank: i64,
        total_points: i64,
        event_points: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO league_standings_history
                (league_id, gameweek, entry_id, rank, total_points, event_points)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![league_id, gameweek, entry_id, rank, total_points, event_points],
        )?;
        Ok(())
    }

    /// (rank, points gap to leader) for an entry at the most recent
    /// recorded gameweek. Gap is my-total minus leader-total, so zero or
    /// positive means leading.
    pub fn competitive_gap(&self, league_id: i64, entry_id: i64) -> Result<Option<(i64, i64)>> {
        let conn = self.conn.lock();
        let latest_gw: Option<i32> = conn
            .query_row(
                "SELECT MAX(gameweek) FROM league_standings_history WHERE league_id = ?1",
                [league_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let Some(gw) = latest_gw else {
            return Ok(None);
        };

        let leader: i64 = conn.query_row(
            "SELECT MAX(total_points) FROM league_standings_history
             WHERE league_id = ?1 AND gameweek = ?2",
            params![league_id, gw],
            |row| row.get(0),
        )?;
        let mine = conn
            .query_row(
                "SELECT rank, total_points FROM league_standings_history
                 WHERE league_id = ?1 AND gameweek = ?2 AND entry_id = ?3",
                params![league_id, gw, entry_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(mine.map(|(rank, total)| (rank, total - leader)))
    }

    pub fn upsert_rival(&self, league_id: i64, entry_id: i64, entry_name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO league_rivals (league_id, entry_id, entry_name)
             VALUES (?1, ?2, ?3)",
            params![league_id, entry_id, entry_name],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Elo ratings
    // -----------------------------------------------------------------

    /// Current rating and matches played; fresh teams start at 1500.
    pub fn elo_rating(&self, team_id: i64) -> Result<(f64, i64)> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT rating, matches_played FROM elo_ratings WHERE team_id = ?1",
                [team_id],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.unwrap_or((1500.0, 0)))
    }

    pub fn set_elo_rating(&self, team_id: i64, rating: f64, matches_played: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO elo_ratings (team_id, rating, matches_played, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![team_id, rating, matches_played],
        )?;
        Ok(())
    }

    /// Record the before/after ratings of a processed fixture. The row
    /// doubles as the processed-set so replayed completion events do not
    /// double-apply.
    pub fn record_elo_match(
        &self,
        fixture_id: i64,
        home_before: f64,
        away_before: f64,
        home_after: f64,
        away_after: f64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO elo_match_results
                (fixture_id, home_rating_before, away_rating_before,
                 home_rating_after, away_rating_after, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![fixture_id, home_before, away_before, home_after, away_after],
        )?;
        Ok(())
    }

    pub fn elo_match_processed(&self, fixture_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let row: Option<i64> = conn
            .query_row(
                "SELECT fixture_id FROM elo_match_results WHERE fixture_id = ?1",
                [fixture_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    // -----------------------------------------------------------------
    // Price monitoring
    // -----------------------------------------------------------------

    pub fn record_price_prediction(
        &self,
        player_id: i64,
        label: &str,
        confidence: f64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO price_predictions (player_id, predicted_change, confidence, predicted_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![player_id, label, confidence],
        )?;
        Ok(())
    }

    pub fn open_price_predictions(&self, player_id: i64) -> Result<Vec<(i64, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, predicted_change FROM price_predictions
             WHERE player_id = ?1 AND resolved = 0",
        )?;
        let rows = stmt.query_map([player_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn resolve_price_prediction(&self, id: i64, was_correct: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE price_predictions SET resolved = 1, was_correct = ?1 WHERE id = ?2",
            params![was_correct, id],
        )?;
        Ok(())
    }

    pub fn record_price_change(
        &self,
        player_id: i64,
        old_price: i64,
        new_price: i64,
        direction: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO price_changes (player_id, old_price, new_price, direction, detected_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            params![player_id, old_price, new_price, direction],
        )?;
        Ok(())
    }

    pub fn record_transfer_snapshot(&self, player: &Player) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO player_transfer_snapshots
                (player_id, transfers_in_event, transfers_out_event,
                 selected_by_percent, now_cost, taken_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![
                player.id,
                player.transfers_in_event,
                player.transfers_out_event,
                player.selected_by_percent,
                player.now_cost,
            ],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Model registry
    // -----------------------------------------------------------------

    pub fn register_model(
        &self,
        model_kind: &str,
        target: &str,
        position: Position,
        version: &str,
        spec: &serde_json::Value,
        activate: bool,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if activate {
            tx.execute(
                "UPDATE model_registry SET is_active = 0
                 WHERE model_kind = ?1 AND target = ?2 AND position = ?3",
                params![model_kind, target, position.element_type()],
            )?;
        }
        tx.execute(
            "INSERT INTO model_registry
                (model_kind, target, position, version, spec_json, is_active, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
            params![
                model_kind,
                target,
                position.element_type(),
                version,
                spec.to_string(),
                activate,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Active model spec for a position, as (version, raw spec JSON).
    pub fn active_model_spec(
        &self,
        model_kind: &str,
        target: &str,
        position: Position,
    ) -> Result<Option<(String, serde_json::Value)>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT version, spec_json FROM model_registry
                 WHERE model_kind = ?1 AND target = ?2 AND position = ?3 AND is_active = 1
                 ORDER BY id DESC LIMIT 1",
                params![model_kind, target, position.element_type()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(version, spec)| {
            serde_json::from_str(&spec).ok().map(|v| (version, v))
        }))
    }

    pub fn record_model_performance(
        &self,
        model_version: &str,
        gameweek: i32,
        mean_abs_error: f64,
        sample_size: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO model_performance
                (model_version, gameweek, mean_abs_error, sample_size, recorded_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            params![model_version, gameweek, mean_abs_error, sample_size],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SquadMember;

    fn player(id: i64, position: Position, team_id: i64, cost: i64) -> Player {
        Player {
            id,
            code: 10_000 + id,
            web_name: format!("Player{id}"),
            position,
            team_id,
            now_cost: cost,
            status: Availability::Available,
            chance_of_playing_next_round: None,
            selected_by_percent: 10.0,
            form: 4.0,
            points_per_game: 3.5,
            total_points: 40,
            minutes: 900,
            goals_scored: 2,
            assists: 1,
            clean_sheets: 3,
            bps: 200,
            transfers_in_event: 1000,
            transfers_out_event: 400,
            cost_change_event: 0,
            cost_change_start: 1,
            expected_goals: 1.8,
            expected_assists: 0.9,
            expected_goal_involvements: 2.7,
            expected_goals_per_90: 0.18,
            expected_assists_per_90: 0.09,
            expected_goal_involvements_per_90: 0.27,
        }
    }

    #[test]
    fn player_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let players = vec![
            player(1, Position::Goalkeeper, 1, 45),
            player(2, Position::Forward, 2, 125),
        ];
        db.upsert_players(&players).unwrap();

        let loaded = db.all_players().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].position, Position::Forward);
        assert_eq!(loaded[1].now_cost, 125);

        // Update in place, no duplicate rows
        let mut updated = players.clone();
        updated[0].now_cost = 46;
        db.upsert_players(&updated).unwrap();
        assert_eq!(db.player(1).unwrap().unwrap().now_cost, 46);
        assert_eq!(db.all_players().unwrap().len(), 2);
    }

    #[test]
    fn squad_persistence_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let members: Vec<SquadMember> = (1..=15)
            .map(|id| {
                let mut m = SquadMember::from_player(&player(id, Position::Midfielder, id % 10, 50));
                m.purchase_price = 48;
                m.selling_price = 49;
                m
            })
            .collect();
        let held = HeldTeam {
            gameweek: 9,
            squad: Squad::new(members),
            bank: 15,
            free_transfers: 2,
        };
        db.set_held_team(&held).unwrap();

        let loaded = db.held_team().unwrap().unwrap();
        assert_eq!(loaded.bank, 15);
        assert_eq!(loaded.free_transfers, 2);
        assert_eq!(loaded.squad.len(), 15);
        let original: Vec<(i64, i64, i64)> = held
            .squad
            .members
            .iter()
            .map(|m| (m.player_id, m.purchase_price, m.selling_price))
            .collect();
        let reloaded: Vec<(i64, i64, i64)> = loaded
            .squad
            .members
            .iter()
            .map(|m| (m.player_id, m.purchase_price, m.selling_price))
            .collect();
        assert_eq!(original, reloaded);
    }

    #[test]
    fn draft_is_overwritten_per_gameweek() {
        let db = Database::open_in_memory().unwrap();
        let squad = Squad::new(vec![SquadMember::from_player(&player(
            1,
            Position::Defender,
            1,
            40,
        ))]);
        db.save_draft(&DraftTeam {
            gameweek: 12,
            squad: squad.clone(),
            transfers: vec![],
            chip: None,
            announcement: "first".into(),
        })
        .unwrap();
        db.save_draft(&DraftTeam {
            gameweek: 12,
            squad,
            transfers: vec![],
            chip: Some(Chip::Wildcard),
            announcement: "second".into(),
        })
        .unwrap();

        let draft = db.load_draft(12).unwrap().unwrap();
        assert_eq!(draft.announcement, "second");
        assert_eq!(draft.chip, Some(Chip::Wildcard));
        assert!(db.load_draft(13).unwrap().is_none());
    }

    #[test]
    fn prediction_upsert_latest_wins() {
        let db = Database::open_in_memory().unwrap();
        let mut record = PredictionRecord {
            player_code: 5001,
            player_id: 7,
            gameweek: 4,
            predicted_points: 5.5,
            confidence: 0.7,
            model_version: "v1".into(),
            created_at: Utc::now(),
            actual_points: None,
            error: None,
        };
        db.upsert_prediction(&record).unwrap();
        record.predicted_points = 6.1;
        db.upsert_prediction(&record).unwrap();

        let stored = db.predictions_for_gameweek(4).unwrap();
        assert_eq!(stored.len(), 1);
        assert!((stored[0].predicted_points - 6.1).abs() < 1e-9);

        db.fill_prediction_outcome(5001, 4, 8, 1.9).unwrap();
        let stored = db.predictions_for_gameweek(4).unwrap();
        assert_eq!(stored[0].actual_points, Some(8));
    }

    #[test]
    fn competitive_gap_sign() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_standing(77, 10, 1, 1, 600, 60).unwrap();
        db.upsert_standing(77, 10, 2, 2, 540, 55).unwrap();

        let (rank, gap) = db.competitive_gap(77, 2).unwrap().unwrap();
        assert_eq!(rank, 2);
        assert_eq!(gap, -60);

        let (rank, gap) = db.competitive_gap(77, 1).unwrap().unwrap();
        assert_eq!(rank, 1);
        assert_eq!(gap, 0);
    }

    #[test]
    fn bias_corrections_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.set_bias_correction("position", "DEF", -0.4, 120).unwrap();
        db.set_bias_correction("price_bracket", "premium", 0.8, 45)
            .unwrap();
        db.set_bias_correction("position", "DEF", -0.2, 140).unwrap();

        let corrections = db.bias_corrections().unwrap();
        assert_eq!(corrections.len(), 2);
        assert!(
            (corrections[&("position".to_string(), "DEF".to_string())] + 0.2).abs() < 1e-9
        );
    }

    #[test]
    fn model_registry_activation() {
        let db = Database::open_in_memory().unwrap();
        let spec = serde_json::json!({"intercept": 1.0, "coefficients": {"form": 0.5}});
        db.register_model("linear", "xp", Position::Forward, "v1", &spec, true)
            .unwrap();
        db.register_model("linear", "xp", Position::Forward, "v2", &spec, true)
            .unwrap();

        let (version, _) = db
            .active_model_spec("linear", "xp", Position::Forward)
            .unwrap()
            .unwrap();
        assert_eq!(version, "v2");
        assert!(db
            .active_model_spec("linear", "xp", Position::Defender)
            .unwrap()
            .is_none());
    }
}
