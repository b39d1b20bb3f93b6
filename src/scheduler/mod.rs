//! Calendar-to-event conversion.
//!
//! The scheduler owns no domain state and never sleeps: an external
//! driver (the interval loops in `main`) calls these operations at the
//! appropriate wall-clock cadence. The ±1 h trigger windows mean a
//! trigger can fire on two successive invocations; consumers deduplicate
//! on (gameweek, trigger).

use crate::bus::EventBus;
use crate::events::payloads::{
    DataRefreshRequestedPayload, GameweekCompletedPayload, GameweekPlanningPayload,
    PriceCheckPayload,
};
use crate::events::{Event, EventKind, EventPriority};
use crate::gateway::FplClient;
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SOURCE: &str = "scheduler";
/// Planning triggers, hours before the deadline.
pub const TRIGGER_OFFSETS: [f64; 3] = [48.0, 24.0, 6.0];
/// Half-width of each trigger window.
const TRIGGER_WINDOW: f64 = 1.0;
/// Deadline lookups are answered from memory for this long.
const DEADLINE_CACHE_TTL: Duration = Duration::from_secs(6 * 3600);

#[derive(Debug, Clone)]
pub struct DeadlineInfo {
    pub gameweek: i32,
    pub deadline: DateTime<Utc>,
    pub hours_until: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PlanningStatus {
    pub next_deadline: Option<DeadlineInfo>,
    /// Active trigger labels ("48h", "24h", "6h").
    pub active_triggers: Vec<&'static str>,
    pub hours_to_next_trigger: f64,
}

fn trigger_label(offset: f64) -> &'static str {
    if offset == 48.0 {
        "48h"
    } else if offset == 24.0 {
        "24h"
    } else {
        "6h"
    }
}

/// Labels whose window contains `hours_until`.
fn active_triggers(hours_until: f64) -> Vec<&'static str> {
    TRIGGER_OFFSETS
        .iter()
        .filter(|offset| (hours_until - **offset).abs() <= TRIGGER_WINDOW)
        .map(|offset| trigger_label(*offset))
        .collect()
}

fn hours_to_next_trigger(hours_until: f64) -> f64 {
    for offset in TRIGGER_OFFSETS {
        if hours_until > offset + TRIGGER_WINDOW {
            return hours_until - offset;
        }
    }
    0.0
}

pub struct GameweekScheduler {
    client: Arc<FplClient>,
    bus: Arc<EventBus>,
    cached_deadline: Mutex<Option<(i32, DateTime<Utc>, Instant)>>,
}

impl GameweekScheduler {
    pub fn new(client: Arc<FplClient>, bus: Arc<EventBus>) -> Self {
        Self {
            client,
            bus,
            cached_deadline: Mutex::new(None),
        }
    }

    /// Next unfinished gameweek deadline, via a 6-hour in-memory cache
    /// over the (already cached) bootstrap fetch.
    pub async fn next_deadline(&self, now: DateTime<Utc>) -> Option<DeadlineInfo> {
        if let Some((gameweek, deadline, fetched)) = *self.cached_deadline.lock() {
            if fetched.elapsed() < DEADLINE_CACHE_TTL && deadline > now {
                return Some(DeadlineInfo {
                    gameweek,
                    deadline,
                    hours_until: hours_between(now, deadline),
                });
            }
        }

        let bootstrap = self.client.fetch_bootstrap(false).await;
        let upcoming = bootstrap
            .events
            .iter()
            .filter(|e| !e.finished)
            .filter_map(|e| e.deadline_time.map(|d| (e.id, d)))
            .find(|(_, deadline)| *deadline > now)?;

        *self.cached_deadline.lock() = Some((upcoming.0, upcoming.1, Instant::now()));
        Some(DeadlineInfo {
            gameweek: upcoming.0,
            deadline: upcoming.1,
            hours_until: hours_between(now, upcoming.1),
        })
    }

    pub async fn planning_status(&self, now: DateTime<Utc>) -> PlanningStatus {
        let Some(deadline) = self.next_deadline(now).await else {
            return PlanningStatus::default();
        };
        PlanningStatus {
            active_triggers: active_triggers(deadline.hours_until),
            hours_to_next_trigger: hours_to_next_trigger(deadline.hours_until),
            next_deadline: Some(deadline),
        }
    }

    /// Publish a `gameweek.planning` event for every active trigger
    /// window. Returns the fired labels.
    pub async fn check_deadlines(&self, now: DateTime<Utc>) -> Result<Vec<&'static str>> {
        let status = self.planning_status(now).await;
        let Some(deadline) = status.next_deadline else {
            info!("No upcoming gameweek deadline");
            return Ok(Vec::new());
        };

        for label in &status.active_triggers {
            let priority = if *label == "6h" {
                EventPriority::High
            } else {
                EventPriority::Normal
            };
            let payload = GameweekPlanningPayload {
                gameweek: deadline.gameweek,
                trigger: (*label).to_string(),
                deadline: deadline.deadline,
                hours_until: deadline.hours_until,
            };
            self.bus
                .publish(
                    &Event::from_payload(EventKind::GameweekPlanning, &payload)
                        .with_priority(priority)
                        .with_source(SOURCE),
                )
                .await?;
            info!(
                "Planning trigger {label} fired for GW{} ({:.1}h to deadline)",
                deadline.gameweek, deadline.hours_until
            );
        }

        if status.active_triggers.is_empty() {
            info!(
                "GW{}: {:.1}h until deadline, next trigger in {:.1}h",
                deadline.gameweek, deadline.hours_until, status.hours_to_next_trigger
            );
        }
        Ok(status.active_triggers)
    }

    /// Daily refresh request; analyzers run off the resulting
    /// `data.updated`.
    pub async fn daily_refresh(&self) -> Result<()> {
        let payload = DataRefreshRequestedPayload {
            data_type: "all".into(),
            force: false,
            trigger: "scheduled_daily_refresh".into(),
        };
        self.bus
            .publish(
                &Event::from_payload(EventKind::DataRefreshRequested, &payload)
                    .with_source(SOURCE),
            )
            .await?;
        Ok(())
    }

    /// Price pulse around the nightly price update; `phase` is "pre" or
    /// "post".
    pub async fn price_pulse(&self, phase: &str) -> Result<()> {
        let payload = PriceCheckPayload {
            phase: phase.to_string(),
        };
        self.bus
            .publish(&Event::from_payload(EventKind::PriceCheck, &payload).with_source(SOURCE))
            .await?;
        Ok(())
    }

    /// After a gameweek wraps up, announce its completion so learning
    /// and review consumers can run.
    pub async fn weekly_review(&self) -> Result<()> {
        let finished = self
            .client
            .db()
            .gameweeks()?
            .into_iter()
            .filter(|gw| gw.finished)
            .max_by_key(|gw| gw.id);

        let Some(gameweek) = finished else {
            warn!("Weekly review: no finished gameweek on record yet");
            return Ok(());
        };

        let payload = GameweekCompletedPayload {
            gameweek: gameweek.id,
            average_score: None,
        };
        self.bus
            .publish(
                &Event::from_payload(EventKind::GameweekCompleted, &payload).with_source(SOURCE),
            )
            .await?;
        info!("Published gameweek.completed for GW{}", gameweek.id);
        Ok(())
    }
}

fn hours_between(now: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - now).num_seconds() as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_plus_minus_one_hour() {
        assert_eq!(active_triggers(49.0), vec!["48h"]);
        assert_eq!(active_triggers(47.0), vec!["48h"]);
        assert_eq!(active_triggers(48.3), vec!["48h"]);
        assert!(active_triggers(50.1).is_empty());
        assert!(active_triggers(46.9).is_empty());

        assert_eq!(active_triggers(24.9), vec!["24h"]);
        assert_eq!(active_triggers(6.0), vec!["6h"]);
        assert_eq!(active_triggers(5.0), vec!["6h"]);
        assert!(active_triggers(3.0).is_empty());
    }

    #[test]
    fn next_trigger_distance() {
        assert!((hours_to_next_trigger(60.0) - 12.0).abs() < 1e-9);
        assert!((hours_to_next_trigger(30.0) - 6.0).abs() < 1e-9);
        assert!((hours_to_next_trigger(10.0) - 4.0).abs() < 1e-9);
        assert_eq!(hours_to_next_trigger(6.5), 0.0);
        assert_eq!(hours_to_next_trigger(2.0), 0.0);
    }

    #[test]
    fn hours_between_is_fractional() {
        let now = Utc::now();
        let later = now + chrono::Duration::minutes(90);
        assert!((hours_between(now, later) - 1.5).abs() < 1e-6);
    }
}
