//! Outbound webhook notifications.
//!
//! Fire-and-forget JSON posts of `{text, blocks?}`; targets that do not
//! understand the block layout fall back to the plain text. Failures are
//! logged and swallowed, never propagated into a decision.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Webhook {
    http: reqwest::Client,
    url: Option<String>,
}

impl Webhook {
    pub fn new(url: Option<String>) -> Self {
        if url.is_none() {
            warn!("No webhook URL configured, notifications disabled");
        }
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, url }
    }

    pub fn enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Post a message. Returns whether the sink accepted it.
    pub async fn send(&self, text: &str, blocks: Option<Value>) -> bool {
        let Some(url) = &self.url else {
            debug!("Webhook disabled, dropping notification");
            return false;
        };

        let mut payload = json!({ "text": text });
        if let Some(blocks) = blocks {
            payload["blocks"] = blocks;
        }

        match self.http.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Webhook notification delivered");
                true
            }
            Ok(response) => {
                error!("Webhook rejected notification: HTTP {}", response.status());
                false
            }
            Err(e) => {
                error!("Webhook send failed: {e}");
                false
            }
        }
    }

    /// Pre-deadline squad announcement with rich-block formatting.
    pub async fn send_team_announcement(&self, announcement: &str, gameweek: i32) -> bool {
        let blocks = json!([
            {
                "type": "header",
                "text": { "type": "plain_text", "text": format!("SQUAD CALL - GAMEWEEK {gameweek}") }
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("```{announcement}```") }
            },
            {
                "type": "context",
                "elements": [{ "type": "mrkdwn", "text": "_gafferbot, fully automated dugout_" }]
            }
        ]);
        self.send(
            &format!("SQUAD CALL - GW{gameweek}\n\n{announcement}"),
            Some(blocks),
        )
        .await
    }

    /// Post-deadline transfer summary; `hit` is the points paid.
    pub async fn send_transfer_summary(&self, summary: &str, gameweek: i32, hit: i64) -> bool {
        let header = if hit > 0 {
            format!("TRANSFERS (-{hit}) - GW{gameweek}")
        } else {
            format!("TRANSFERS - GW{gameweek}")
        };
        let blocks = json!([
            { "type": "header", "text": { "type": "plain_text", "text": header } },
            { "type": "section", "text": { "type": "mrkdwn", "text": format!("```{summary}```") } }
        ]);
        self.send(&format!("{header}\n\n{summary}"), Some(blocks))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_webhook_drops_quietly() {
        let webhook = Webhook::new(None);
        assert!(!webhook.enabled());
        assert!(!webhook.send("hello", None).await);
    }

    #[tokio::test]
    async fn unreachable_sink_is_swallowed() {
        let webhook = Webhook::new(Some("http://127.0.0.1:9/hook".to_string()));
        assert!(webhook.enabled());
        assert!(!webhook.send_team_announcement("squad", 10).await);
    }
}
