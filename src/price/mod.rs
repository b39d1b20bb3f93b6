//! Price-change classification and monitoring.
//!
//! The classifier labels a player `rise`, `fall` or `hold` with a
//! confidence score from transfer momentum and ownership. The monitor
//! agent runs on the scheduler's pre/post price pulses: before the
//! nightly update it records predictions and transfer snapshots, after
//! it detects actual changes and resolves the open predictions.

use crate::agents::{Agent, AgentContext};
use crate::events::payloads::{PriceChangeDetectedPayload, PriceCheckPayload, PricePredictionPayload};
use crate::events::{Event, EventKind, EventPriority};
use crate::gateway::FplClient;
use crate::models::Player;
use crate::storage::Database;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Net transfers at which direction confidence saturates.
const NET_TRANSFER_SATURATION: f64 = 50_000.0;
/// Net transfers below which a player is an uninteresting `hold`.
const NET_TRANSFER_FLOOR: i64 = 1_000;
/// How many movers per direction get predictions recorded.
const TOP_MOVERS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceClassification {
    pub label: &'static str,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PriceChangeClassifier;

impl PriceChangeClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Direction and confidence from transfer momentum, damped for
    /// heavily-owned players whose thresholds scale with ownership.
    pub fn classify(&self, player: &Player) -> PriceClassification {
        let net = player.transfers_in_event - player.transfers_out_event;
        if net.abs() < NET_TRANSFER_FLOOR {
            return PriceClassification {
                label: "hold",
                confidence: 0.9,
            };
        }

        let ownership_damping = 1.0 + player.selected_by_percent / 100.0;
        let momentum = (net.abs() as f64 / NET_TRANSFER_SATURATION / ownership_damping).min(1.0);
        let confidence = 0.5 + momentum * 0.45;

        if momentum < 0.1 {
            PriceClassification {
                label: "hold",
                confidence: 1.0 - momentum,
            }
        } else if net > 0 {
            PriceClassification {
                label: "rise",
                confidence,
            }
        } else {
            PriceClassification {
                label: "fall",
                confidence,
            }
        }
    }
}

pub struct PriceMonitorAgent {
    db: Database,
    client: Arc<FplClient>,
    classifier: PriceChangeClassifier,
}

impl PriceMonitorAgent {
    pub fn new(db: Database, client: Arc<FplClient>) -> Self {
        Self {
            db,
            client,
            classifier: PriceChangeClassifier::new(),
        }
    }

    /// Fresh upstream prices, bypassing the cache. Empty on fetch
    /// failure, which skips the cycle.
    async fn fresh_players(&self) -> Vec<Player> {
        self.client
            .fetch_bootstrap(true)
            .await
            .elements
            .iter()
            .filter_map(|p| p.to_player())
            .collect()
    }

    async fn pre_update_pass(&self, ctx: &AgentContext) -> Result<()> {
        let fresh = self.fresh_players().await;
        if fresh.is_empty() {
            return Ok(());
        }

        let mut movers: Vec<&Player> = fresh
            .iter()
            .filter(|p| (p.transfers_in_event - p.transfers_out_event).abs() >= NET_TRANSFER_FLOOR)
            .collect();
        movers.sort_by_key(|p| -(p.transfers_in_event - p.transfers_out_event).abs());
        movers.truncate(TOP_MOVERS * 2);

        let mut predicted = 0usize;
        for player in movers {
            self.db.record_transfer_snapshot(player)?;
            let classification = self.classifier.classify(player);
            if classification.label == "hold" {
                continue;
            }
            self.db.record_price_prediction(
                player.id,
                classification.label,
                classification.confidence,
            )?;
            predicted += 1;

            let kind = if classification.label == "rise" {
                EventKind::PriceRisePredicted
            } else {
                EventKind::PriceFallPredicted
            };
            let payload = PricePredictionPayload {
                player_id: player.id,
                web_name: player.web_name.clone(),
                label: classification.label.to_string(),
                confidence: classification.confidence,
            };
            ctx.publish(Event::from_payload(kind, &payload)).await;
        }
        info!("Pre-update price pass: {predicted} predictions recorded");
        Ok(())
    }

    async fn post_update_pass(&self, ctx: &AgentContext) -> Result<()> {
        let fresh = self.fresh_players().await;
        if fresh.is_empty() {
            return Ok(());
        }
        let stored: HashMap<i64, Player> = self
            .db
            .all_players()?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut changes = 0usize;
        for player in &fresh {
            let Some(before) = stored.get(&player.id) else {
                continue;
            };
            let observed = match player.now_cost.cmp(&before.now_cost) {
                std::cmp::Ordering::Greater => "rise",
                std::cmp::Ordering::Less => "fall",
                std::cmp::Ordering::Equal => "hold",
            };

            if observed != "hold" {
                changes += 1;
                self.db
                    .record_price_change(player.id, before.now_cost, player.now_cost, observed)?;
                let payload = PriceChangeDetectedPayload {
                    player_id: player.id,
                    web_name: player.web_name.clone(),
                    old_price: before.now_cost,
                    new_price: player.now_cost,
                    direction: observed.to_string(),
                };
                ctx.publish(
                    Event::from_payload(EventKind::PriceChangeDetected, &payload)
                        .with_priority(EventPriority::High),
                )
                .await;
            }

            for (prediction_id, predicted) in self.db.open_price_predictions(player.id)? {
                self.db
                    .resolve_price_prediction(prediction_id, predicted == observed)?;
            }
        }
        info!("Post-update price pass: {changes} changes detected");
        Ok(())
    }
}

#[async_trait]
impl Agent for PriceMonitorAgent {
    fn name(&self) -> &str {
        "price_monitor"
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::PriceCheck]
    }

    async fn handle_event(&self, event: Event, ctx: AgentContext) -> Result<()> {
        let phase = event
            .payload_as::<PriceCheckPayload>()
            .map(|p| p.phase)
            .unwrap_or_else(|_| "pre".to_string());
        match phase.as_str() {
            "post" => self.post_update_pass(&ctx).await,
            _ => self.pre_update_pass(&ctx).await,
        }
    }
}
