//! SQLite schema. Executed wholesale on open; every statement is
//! idempotent so opening an existing database is a no-op.

pub const SCHEMA_SQL: &str = r#"
-- WAL for concurrent reads during writes
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -32000;
PRAGMA temp_store = MEMORY;

-- ---------------------------------------------------------------------
-- Catalog: upstream entities, updated in place on each ingestion
-- ---------------------------------------------------------------------

CREATE TABLE IF NOT EXISTS players (
    id INTEGER PRIMARY KEY,
    code INTEGER NOT NULL,
    web_name TEXT NOT NULL,
    element_type INTEGER NOT NULL,
    team_id INTEGER NOT NULL,
    now_cost INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'a',
    chance_of_playing_next_round INTEGER,
    selected_by_percent REAL NOT NULL DEFAULT 0,
    form REAL NOT NULL DEFAULT 0,
    points_per_game REAL NOT NULL DEFAULT 0,
    total_points INTEGER NOT NULL DEFAULT 0,
    minutes INTEGER NOT NULL DEFAULT 0,
    goals_scored INTEGER NOT NULL DEFAULT 0,
    assists INTEGER NOT NULL DEFAULT 0,
    clean_sheets INTEGER NOT NULL DEFAULT 0,
    bps INTEGER NOT NULL DEFAULT 0,
    transfers_in_event INTEGER NOT NULL DEFAULT 0,
    transfers_out_event INTEGER NOT NULL DEFAULT 0,
    cost_change_event INTEGER NOT NULL DEFAULT 0,
    cost_change_start INTEGER NOT NULL DEFAULT 0,
    expected_goals REAL NOT NULL DEFAULT 0,
    expected_assists REAL NOT NULL DEFAULT 0,
    expected_goal_involvements REAL NOT NULL DEFAULT 0,
    expected_goals_per_90 REAL NOT NULL DEFAULT 0,
    expected_assists_per_90 REAL NOT NULL DEFAULT 0,
    expected_goal_involvements_per_90 REAL NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_players_position ON players(element_type);
CREATE INDEX IF NOT EXISTS idx_players_team ON players(team_id);
CREATE INDEX IF NOT EXISTS idx_players_code ON players(code);

CREATE TABLE IF NOT EXISTS teams (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    short_name TEXT NOT NULL,
    strength_attack_home INTEGER NOT NULL DEFAULT 0,
    strength_attack_away INTEGER NOT NULL DEFAULT 0,
    strength_defence_home INTEGER NOT NULL DEFAULT 0,
    strength_defence_away INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS gameweeks (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    deadline_time TEXT NOT NULL,
    finished INTEGER NOT NULL DEFAULT 0,
    is_current INTEGER NOT NULL DEFAULT 0,
    is_next INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS fixtures (
    id INTEGER PRIMARY KEY,
    gameweek INTEGER,
    team_h INTEGER NOT NULL,
    team_a INTEGER NOT NULL,
    team_h_difficulty INTEGER NOT NULL DEFAULT 3,
    team_a_difficulty INTEGER NOT NULL DEFAULT 3,
    team_h_score INTEGER,
    team_a_score INTEGER,
    finished INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_fixtures_gameweek ON fixtures(gameweek);

CREATE TABLE IF NOT EXISTS player_gameweek_history (
    player_id INTEGER NOT NULL,
    gameweek INTEGER NOT NULL,
    total_points INTEGER NOT NULL DEFAULT 0,
    minutes INTEGER NOT NULL DEFAULT 0,
    goals_scored INTEGER NOT NULL DEFAULT 0,
    assists INTEGER NOT NULL DEFAULT 0,
    clean_sheets INTEGER NOT NULL DEFAULT 0,
    goals_conceded INTEGER NOT NULL DEFAULT 0,
    saves INTEGER NOT NULL DEFAULT 0,
    bonus INTEGER NOT NULL DEFAULT 0,
    bps INTEGER NOT NULL DEFAULT 0,
    clearances_blocks_interceptions INTEGER NOT NULL DEFAULT 0,
    tackles INTEGER NOT NULL DEFAULT 0,
    recoveries INTEGER NOT NULL DEFAULT 0,
    defensive_contribution INTEGER NOT NULL DEFAULT 0,
    value INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (player_id, gameweek)
);

CREATE TABLE IF NOT EXISTS historical_players (
    player_code INTEGER NOT NULL,
    season TEXT NOT NULL,
    web_name TEXT NOT NULL,
    element_type INTEGER NOT NULL,
    total_points INTEGER NOT NULL DEFAULT 0,
    minutes INTEGER NOT NULL DEFAULT 0,
    end_cost INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (player_code, season)
);

CREATE TABLE IF NOT EXISTS historical_gameweek_data (
    player_code INTEGER NOT NULL,
    season TEXT NOT NULL,
    gameweek INTEGER NOT NULL,
    total_points INTEGER NOT NULL DEFAULT 0,
    minutes INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (player_code, season, gameweek)
);

-- ---------------------------------------------------------------------
-- Squad state
-- ---------------------------------------------------------------------

CREATE TABLE IF NOT EXISTS my_team (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    gameweek INTEGER NOT NULL,
    squad_json TEXT NOT NULL,
    bank INTEGER NOT NULL DEFAULT 0,
    free_transfers INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS draft_team (
    gameweek INTEGER PRIMARY KEY,
    squad_json TEXT NOT NULL,
    transfers_json TEXT NOT NULL DEFAULT '[]',
    chip TEXT,
    announcement TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS transfers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    gameweek INTEGER NOT NULL,
    player_out_id INTEGER NOT NULL,
    player_in_id INTEGER NOT NULL,
    transfer_cost INTEGER NOT NULL DEFAULT 0,
    is_free_transfer INTEGER NOT NULL DEFAULT 1,
    reasoning TEXT NOT NULL DEFAULT '',
    executed_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS chips_used (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chip_name TEXT NOT NULL,
    gameweek INTEGER NOT NULL,
    chip_half INTEGER NOT NULL,
    used_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ---------------------------------------------------------------------
-- Decision log and learning
-- ---------------------------------------------------------------------

CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    gameweek INTEGER NOT NULL,
    decision_type TEXT NOT NULL,
    decision_data TEXT NOT NULL,
    reasoning TEXT NOT NULL DEFAULT '',
    expected_value REAL NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 0,
    agent_source TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_decisions_gameweek ON decisions(gameweek, decision_type);

CREATE TABLE IF NOT EXISTS player_predictions (
    player_code INTEGER NOT NULL,
    player_id INTEGER NOT NULL,
    gameweek INTEGER NOT NULL,
    predicted_points REAL NOT NULL,
    prediction_confidence REAL NOT NULL DEFAULT 0.7,
    model_version TEXT NOT NULL DEFAULT 'fallback',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    actual_points INTEGER,
    prediction_error REAL,
    PRIMARY KEY (player_code, gameweek)
);

CREATE TABLE IF NOT EXISTS learning_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_name TEXT NOT NULL,
    gameweek INTEGER NOT NULL,
    value REAL NOT NULL,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS bias_corrections (
    bucket_kind TEXT NOT NULL,
    bucket TEXT NOT NULL,
    correction REAL NOT NULL,
    sample_size INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket_kind, bucket)
);

CREATE TABLE IF NOT EXISTS agent_performance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_name TEXT NOT NULL,
    gameweek INTEGER NOT NULL,
    recommendation_type TEXT NOT NULL,
    recommendation_data TEXT NOT NULL,
    was_followed INTEGER,
    accuracy_score REAL,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ---------------------------------------------------------------------
-- Rating and model registry
-- ---------------------------------------------------------------------

CREATE TABLE IF NOT EXISTS elo_ratings (
    team_id INTEGER PRIMARY KEY,
    rating REAL NOT NULL DEFAULT 1500,
    matches_played INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS elo_match_results (
    fixture_id INTEGER PRIMARY KEY,
    home_rating_before REAL NOT NULL,
    away_rating_before REAL NOT NULL,
    home_rating_after REAL NOT NULL,
    away_rating_after REAL NOT NULL,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS model_registry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_kind TEXT NOT NULL,
    target TEXT NOT NULL,
    position INTEGER NOT NULL,
    version TEXT NOT NULL,
    spec_json TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    registered_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_model_registry_active
    ON model_registry(model_kind, target, position, is_active);

CREATE TABLE IF NOT EXISTS model_predictions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_version TEXT NOT NULL,
    player_id INTEGER NOT NULL,
    gameweek INTEGER NOT NULL,
    predicted REAL NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS model_performance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_version TEXT NOT NULL,
    gameweek INTEGER NOT NULL,
    mean_abs_error REAL NOT NULL,
    sample_size INTEGER NOT NULL,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ---------------------------------------------------------------------
-- Competitive context
-- ---------------------------------------------------------------------

CREATE TABLE IF NOT EXISTS league_standings_history (
    league_id INTEGER NOT NULL,
    gameweek INTEGER NOT NULL,
    entry_id INTEGER NOT NULL,
    rank INTEGER NOT NULL,
    total_points INTEGER NOT NULL,
    event_points INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (league_id, gameweek, entry_id)
);

CREATE TABLE IF NOT EXISTS league_rivals (
    league_id INTEGER NOT NULL,
    entry_id INTEGER NOT NULL,
    entry_name TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (league_id, entry_id)
);

CREATE TABLE IF NOT EXISTS rival_chip_usage (
    league_id INTEGER NOT NULL,
    entry_id INTEGER NOT NULL,
    chip_name TEXT NOT NULL,
    gameweek INTEGER NOT NULL,
    PRIMARY KEY (league_id, entry_id, chip_name, gameweek)
);

CREATE TABLE IF NOT EXISTS rival_chip_status (
    league_id INTEGER NOT NULL,
    entry_id INTEGER NOT NULL,
    chip_name TEXT NOT NULL,
    remaining INTEGER NOT NULL DEFAULT 2,
    PRIMARY KEY (league_id, entry_id, chip_name)
);

-- ---------------------------------------------------------------------
-- Price monitoring
-- ---------------------------------------------------------------------

CREATE TABLE IF NOT EXISTS price_predictions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id INTEGER NOT NULL,
    predicted_change TEXT NOT NULL,
    confidence REAL NOT NULL,
    predicted_at TEXT NOT NULL DEFAULT (datetime('now')),
    resolved INTEGER NOT NULL DEFAULT 0,
    was_correct INTEGER
);

CREATE INDEX IF NOT EXISTS idx_price_predictions_open
    ON price_predictions(player_id, resolved);

CREATE TABLE IF NOT EXISTS player_transfer_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id INTEGER NOT NULL,
    transfers_in_event INTEGER NOT NULL,
    transfers_out_event INTEGER NOT NULL,
    selected_by_percent REAL NOT NULL,
    now_cost INTEGER NOT NULL,
    taken_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS price_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id INTEGER NOT NULL,
    old_price INTEGER NOT NULL,
    new_price INTEGER NOT NULL,
    direction TEXT NOT NULL,
    detected_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS price_model_performance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    predictions_made INTEGER NOT NULL,
    predictions_correct INTEGER NOT NULL,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
