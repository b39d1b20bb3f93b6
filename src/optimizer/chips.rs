//! Chip timing strategy.
//!
//! Window-based heuristics for when each one-shot chip earns its keep,
//! tracked against the two-instance-per-season inventory. The agent
//! reacts to planning triggers and publishes the strongest available
//! recommendation; the coordinator consults the same evaluation
//! synchronously during its weekly decision.

use crate::agents::{Agent, AgentContext};
use crate::events::payloads::{ChipRecommendationPayload, GameweekPlanningPayload};
use crate::events::{Event, EventKind, EventPriority};
use crate::models::Chip;
use crate::storage::Database;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Double-gameweek windows where bench boost and triple captain spike.
const DGW_WINDOWS: [(i32, i32); 2] = [(24, 26), (32, 34)];
/// Blank gameweeks where a free hit fields a full eleven.
const BLANK_GAMEWEEKS: [i32; 3] = [18, 29, 33];

/// Is the chip's instance for this half-season still unused?
pub fn instance_available(db: &Database, chip: Chip, gameweek: i32) -> Result<bool> {
    let half = Chip::half_for(gameweek);
    let used = db
        .chips_used()?
        .iter()
        .any(|(used_chip, _, used_half)| *used_chip == chip && *used_half == half);
    Ok(!used)
}

fn in_dgw_window(gameweek: i32) -> bool {
    DGW_WINDOWS
        .iter()
        .any(|(start, end)| gameweek >= *start && gameweek <= *end)
}

fn wildcard_window(gameweek: i32) -> Option<(f64, &'static str, &'static str)> {
    match gameweek {
        3..=5 => Some((8.0, "medium", "early correction window after real data arrived")),
        20..=22 => Some((12.0, "high", "mid-season overhaul window")),
        30..=32 => Some((10.0, "medium", "run-in restructure before the doubles")),
        _ => None,
    }
}

/// All chip recommendations worth surfacing for a gameweek, strongest
/// first. Chips outside their windows or already spent simply do not
/// appear.
pub fn recommendations(db: &Database, gameweek: i32) -> Result<Vec<ChipRecommendationPayload>> {
    let mut out = Vec::new();

    if instance_available(db, Chip::Wildcard, gameweek)? {
        if let Some((expected_gain, priority, reason)) = wildcard_window(gameweek) {
            out.push(ChipRecommendationPayload {
                gameweek,
                chip: Chip::Wildcard,
                expected_gain,
                priority: priority.into(),
                reasoning: format!("Wildcard GW{gameweek}: {reason}"),
            });
        }
    }

    if instance_available(db, Chip::BenchBoost, gameweek)? && in_dgw_window(gameweek) {
        out.push(ChipRecommendationPayload {
            gameweek,
            chip: Chip::BenchBoost,
            expected_gain: 15.0,
            priority: "high".into(),
            reasoning: format!("Bench boost GW{gameweek}: double-gameweek bench doubles up"),
        });
    }

    if instance_available(db, Chip::TripleCaptain, gameweek)? && in_dgw_window(gameweek) {
        out.push(ChipRecommendationPayload {
            gameweek,
            chip: Chip::TripleCaptain,
            expected_gain: 20.0,
            priority: "high".into(),
            reasoning: format!(
                "Triple captain GW{gameweek}: premium captain with two fixtures"
            ),
        });
    }

    if instance_available(db, Chip::FreeHit, gameweek)? && BLANK_GAMEWEEKS.contains(&gameweek) {
        out.push(ChipRecommendationPayload {
            gameweek,
            chip: Chip::FreeHit,
            expected_gain: 20.0,
            priority: "high".into(),
            reasoning: format!("Free hit GW{gameweek}: blank week, field a full eleven"),
        });
    }

    out.sort_by(|a, b| b.expected_gain.total_cmp(&a.expected_gain));
    Ok(out)
}

/// The single strongest recommendation, for transfer arbitration.
pub fn best_recommendation(
    db: &Database,
    gameweek: i32,
) -> Result<Option<ChipRecommendationPayload>> {
    Ok(recommendations(db, gameweek)?.into_iter().next())
}

pub struct ChipStrategist {
    db: Database,
}

impl ChipStrategist {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Agent for ChipStrategist {
    fn name(&self) -> &str {
        "chip_strategist"
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::GameweekPlanning, EventKind::ChipUsed]
    }

    async fn handle_event(&self, event: Event, ctx: AgentContext) -> Result<()> {
        match event.kind {
            EventKind::GameweekPlanning => {
                let gameweek = event
                    .payload_as::<GameweekPlanningPayload>()
                    .map(|p| p.gameweek)?;
                if let Some(recommendation) = best_recommendation(&self.db, gameweek)? {
                    info!(
                        "Chip outlook GW{gameweek}: {} ({:.1} expected)",
                        recommendation.chip.as_str(),
                        recommendation.expected_gain
                    );
                    ctx.publish(
                        Event::from_payload(EventKind::ChipRecommendation, &recommendation)
                            .with_priority(EventPriority::Normal)
                            .with_correlation(event.id.to_string()),
                    )
                    .await;
                }
            }
            EventKind::ChipUsed => {
                // Inventory is read from the store on demand; nothing to
                // do beyond acknowledging the spend.
                if let Some(chip) = event.payload_str("chip") {
                    info!("Chip spent: {chip}");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_gate_recommendations() {
        let db = Database::open_in_memory().unwrap();
        // GW4: early wildcard window only.
        let recs = recommendations(&db, 4).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].chip, Chip::Wildcard);

        // GW25: DGW window, bench boost + triple captain.
        let recs = recommendations(&db, 25).unwrap();
        let chips: Vec<Chip> = recs.iter().map(|r| r.chip).collect();
        assert!(chips.contains(&Chip::BenchBoost));
        assert!(chips.contains(&Chip::TripleCaptain));
        // Strongest first.
        assert_eq!(recs[0].chip, Chip::TripleCaptain);

        // GW13: quiet week.
        assert!(recommendations(&db, 13).unwrap().is_empty());
    }

    #[test]
    fn spent_instances_disappear_for_the_half() {
        let db = Database::open_in_memory().unwrap();
        db.record_chip(Chip::Wildcard, 4).unwrap();

        // First-half instance gone.
        assert!(!instance_available(&db, Chip::Wildcard, 5).unwrap());
        assert!(recommendations(&db, 5).unwrap().is_empty());

        // Second-half instance untouched.
        assert!(instance_available(&db, Chip::Wildcard, 21).unwrap());
        let recs = recommendations(&db, 21).unwrap();
        assert_eq!(recs[0].chip, Chip::Wildcard);
    }

    #[test]
    fn blank_week_frees_the_hit() {
        let db = Database::open_in_memory().unwrap();
        let recs = recommendations(&db, 29).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].chip, Chip::FreeHit);
        assert!((recs[0].expected_gain - 20.0).abs() < 1e-9);
    }
}
