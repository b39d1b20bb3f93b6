//! Application configuration
//!
//! Settings come from a JSON config file with environment variable
//! fallbacks. Missing optional entries degrade the matching feature to
//! disabled rather than failing startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/gafferbot.json";
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_API_BASE: &str = "https://fantasy.premierleague.com/api";
const DEFAULT_DATABASE_PATH: &str = "./gafferbot.db";
const DEFAULT_CHANNEL_PREFIX: &str = "gafferbot";

/// On-disk shape of the config file. All keys optional so a partial file
/// still loads; env vars fill the gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    team_id: Option<i64>,
    league_id: Option<i64>,
    redis_url: Option<String>,
    api_base_url: Option<String>,
    webhook_url: Option<String>,
    text_api_url: Option<String>,
    database_path: Option<String>,
    channel_prefix: Option<String>,
}

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Entry id of the managed team. None disables league-aware features.
    pub team_id: Option<i64>,
    /// Competitive mini-league id. None disables competitive context.
    pub league_id: Option<i64>,
    pub redis_url: String,
    pub api_base_url: String,
    /// Outbound webhook for announcements. None disables notifications.
    pub webhook_url: Option<String>,
    /// Text-generation endpoint. None forces the template fallback.
    pub text_api_url: Option<String>,
    pub database_path: String,
    /// Namespace prefix for broker channels and cache keys.
    pub channel_prefix: String,
}

impl Config {
    /// Load configuration from `path`, falling back to environment
    /// variables for anything the file does not set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let file = match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => serde_json::from_str::<ConfigFile>(&raw)
                .with_context(|| format!("malformed config file {}", path.as_ref().display()))?,
            Err(_) => {
                warn!(
                    "No config file at {}, using environment only",
                    path.as_ref().display()
                );
                ConfigFile::default()
            }
        };

        let config = Self {
            team_id: file.team_id.or_else(|| env_i64("TEAM_ID")),
            league_id: file.league_id.or_else(|| env_i64("LEAGUE_ID")),
            redis_url: file
                .redis_url
                .or_else(|| env::var("REDIS_URL").ok())
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            api_base_url: file
                .api_base_url
                .or_else(|| env::var("FPL_API_BASE").ok())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            webhook_url: file.webhook_url.or_else(|| env::var("WEBHOOK_URL").ok()),
            text_api_url: file.text_api_url.or_else(|| env::var("TEXT_API_URL").ok()),
            database_path: file
                .database_path
                .or_else(|| env::var("DATABASE_PATH").ok())
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            channel_prefix: file
                .channel_prefix
                .or_else(|| env::var("CHANNEL_PREFIX").ok())
                .unwrap_or_else(|| DEFAULT_CHANNEL_PREFIX.to_string()),
        };

        if config.team_id.is_none() {
            warn!("No team_id configured: competitive features disabled");
        }
        if config.webhook_url.is_none() {
            warn!("No webhook URL configured: notifications disabled");
        }

        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::load(DEFAULT_CONFIG_PATH)
    }
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"team_id": 424242, "league_id": 99}}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.team_id, Some(424242));
        assert_eq!(config.league_id, Some(99));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE);
        assert_eq!(config.channel_prefix, DEFAULT_CHANNEL_PREFIX);
    }

    #[test]
    fn missing_file_is_not_fatal() {
        let config = Config::load("definitely/not/here.json").unwrap();
        assert!(config.team_id.is_none() || config.team_id.is_some());
        assert_eq!(config.redis_url.starts_with("redis://"), true);
    }

    #[test]
    fn malformed_file_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
