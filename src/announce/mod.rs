//! Announcement text generation.
//!
//! The external endpoint is an opaque `prompt -> text` function; when it
//! is missing or fails, a deterministic template keeps the announcement
//! flowing.

use crate::models::{Chip, Squad, Transfer};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

const TEXT_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// POSTs `{prompt}` to the configured endpoint, expects `{text}` back.
pub struct HttpTextGenerator {
    http: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

impl HttpTextGenerator {
    pub fn new(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(TEXT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .context("text endpoint unreachable")?;
        if !response.status().is_success() {
            bail!("text endpoint returned HTTP {}", response.status());
        }
        let body: TextResponse = response
            .json()
            .await
            .context("text endpoint returned malformed body")?;
        Ok(body.text)
    }
}

/// Structured prompt for the weekly announcement.
pub fn build_prompt(
    gameweek: i32,
    squad: &Squad,
    transfers: &[Transfer],
    chip: Option<Chip>,
    rationale: &str,
) -> String {
    let starters: Vec<String> = squad
        .starting_eleven()
        .iter()
        .map(|m| m.web_name.clone())
        .collect();
    let captain = squad
        .captain()
        .map(|m| m.web_name.clone())
        .unwrap_or_default();
    let moves: Vec<String> = transfers
        .iter()
        .map(|t| format!("{} out, {} in", t.player_out_name, t.player_in_name))
        .collect();

    format!(
        "Write a short pre-deadline team announcement for gameweek {gameweek} in the voice of a \
         gruff old-school football manager. Starting eleven: {}. Captain: {captain}. \
         Transfers: {}. Chip played: {}. Selection reasoning: {rationale}. \
         Keep it under 120 words, no hashtags.",
        starters.join(", "),
        if moves.is_empty() {
            "none".to_string()
        } else {
            moves.join("; ")
        },
        chip.map(|c| c.as_str()).unwrap_or("none"),
    )
}

/// Deterministic announcement used when the text endpoint is missing or
/// fails.
pub fn fallback_announcement(
    gameweek: i32,
    squad: &Squad,
    transfers: &[Transfer],
    chip: Option<Chip>,
) -> String {
    let mut lines = vec![format!("Gameweek {gameweek} squad is in.")];

    if let Some(chip) = chip {
        lines.push(format!("Playing the {}.", chip.as_str().replace('_', " ")));
    }

    if transfers.is_empty() {
        lines.push("No changes this week; the squad holds.".to_string());
    } else {
        for transfer in transfers {
            let hit = if transfer.cost > 0 {
                format!(" (-{} points)", transfer.cost)
            } else {
                String::new()
            };
            lines.push(format!(
                "{} makes way for {}{hit}.",
                transfer.player_out_name, transfer.player_in_name
            ));
        }
    }

    if let (Some(captain), Some(vice)) = (squad.captain(), squad.vice_captain()) {
        lines.push(format!(
            "{} wears the armband, {} stands deputy.",
            captain.web_name, vice.web_name
        ));
    }

    lines.join(" ")
}

/// Generate via the endpoint with the template as a safety net.
pub async fn announce(
    generator: Option<&dyn TextGenerator>,
    gameweek: i32,
    squad: &Squad,
    transfers: &[Transfer],
    chip: Option<Chip>,
    rationale: &str,
) -> String {
    if let Some(generator) = generator {
        let prompt = build_prompt(gameweek, squad, transfers, chip, rationale);
        match generator.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => return text,
            Ok(_) => warn!("Text endpoint returned empty announcement, using template"),
            Err(e) => warn!("Text endpoint failed ({e:#}), using template"),
        }
    }
    fallback_announcement(gameweek, squad, transfers, chip)
}
