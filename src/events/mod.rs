//! Typed event envelope and the closed set of event kinds.
//!
//! Events are the only communication mechanism between agents. The wire
//! form is self-describing JSON with fixed field order, ISO-8601 UTC
//! timestamps and canonical string tags for enums. Unknown payload keys
//! survive a decode/encode round trip untouched.

pub mod payloads;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Default retry budget for a freshly created event.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(String),
}

macro_rules! event_kinds {
    ($($variant:ident => $tag:literal),+ $(,)?) => {
        /// Closed set of event kinds. Each maps 1:1 to a broker channel
        /// `<prefix>:<tag>`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum EventKind {
            $(#[serde(rename = $tag)] $variant,)+
        }

        impl EventKind {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventKind::$variant => $tag,)+
                }
            }

            pub fn parse(tag: &str) -> Result<Self, EventError> {
                match tag {
                    $($tag => Ok(EventKind::$variant),)+
                    other => Err(EventError::Malformed(format!("unknown event kind '{other}'"))),
                }
            }
        }
    };
}

event_kinds! {
    // System
    SystemStartup => "system.startup",
    SystemShutdown => "system.shutdown",
    SystemHealthCheck => "system.health_check",
    // Gameweek
    GameweekDeadlineApproaching => "gameweek.deadline_approaching",
    GameweekPlanning => "gameweek.planning",
    GameweekStarted => "gameweek.started",
    GameweekCompleted => "gameweek.completed",
    // Data
    DataRefreshRequested => "data.refresh_requested",
    DataUpdated => "data.updated",
    PlayerDataUpdated => "data.player_updated",
    FixtureDataUpdated => "data.fixture_updated",
    // Price
    PriceCheck => "price.check",
    PriceChangeDetected => "price.change_detected",
    PriceRisePredicted => "price.rise_predicted",
    PriceFallPredicted => "price.fall_predicted",
    // Team
    TeamSelectionRequested => "team.selection_requested",
    TeamSelected => "team.selected",
    TransferRecommended => "team.transfer_recommended",
    TransferExecuted => "team.transfer_executed",
    CaptainSelected => "team.captain_selected",
    ChipUsed => "team.chip_used",
    // Player
    PlayerInjury => "player.injury",
    PlayerSuspended => "player.suspended",
    PlayerPriceLocked => "player.price_locked",
    PlayerReturning => "player.returning",
    // Analysis
    AnalysisRequested => "analysis.requested",
    AnalysisCompleted => "analysis.completed",
    FixtureAnalysisCompleted => "analysis.fixture_completed",
    ValuationAnalysisCompleted => "analysis.valuation_completed",
    DcAnalysisCompleted => "analysis.dc_completed",
    XgAnalysisCompleted => "analysis.xg_completed",
    ValueRankingsCompleted => "analysis.value_rankings_completed",
    // Decision
    DecisionRequired => "decision.required",
    DecisionMade => "decision.made",
    // Notification
    NotificationInfo => "notification.info",
    NotificationWarning => "notification.warning",
    NotificationError => "notification.error",
    // Intelligence
    IntelligenceDetected => "intelligence.detected",
    InjuryIntelligence => "intelligence.injury",
    RotationRisk => "intelligence.rotation_risk",
    SuspensionIntelligence => "intelligence.suspension",
    LineupLeak => "intelligence.lineup_leak",
    PressConferenceUpdate => "intelligence.press_conference",
    // Chip
    ChipRecommendation => "chip.recommendation",
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// The event envelope. Immutable after creation apart from the retry
/// counter, which is only ever advanced on a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub priority: EventPriority,
    pub source: Option<String>,
    pub correlation_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            priority: EventPriority::Normal,
            source: None,
            correlation_id: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            payload,
        }
    }

    /// Build an event from a typed payload struct.
    pub fn from_payload<T: Serialize>(kind: EventKind, payload: &T) -> Self {
        let map = match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self::new(kind, map)
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Deserialize the payload into a typed struct, ignoring keys the
    /// struct does not know about.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| EventError::Malformed(format!("payload for {}: {e}", self.kind.as_str())))
    }

    pub fn payload_i64(&self, key: &str) -> Option<i64> {
        self.payload.get(key).and_then(Value::as_i64)
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Copy of this event with the retry counter advanced. The original
    /// is untouched.
    pub fn with_retry_incremented(&self) -> Self {
        let mut next = self.clone();
        next.retry_count += 1;
        next
    }

    pub fn encode(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|e| EventError::Malformed(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, EventError> {
        serde_json::from_str(raw).map_err(|e| EventError::Malformed(e.to_string()))
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Event({}, source={}, id={})",
            self.kind.as_str(),
            self.source.as_deref().unwrap_or("-"),
            &self.id.to_string()[..8]
        )
    }
}

/// Convenience constructor for notification events with the level/priority
/// mapping used everywhere.
pub fn notification(level: &str, message: impl Into<String>, details: Value) -> Event {
    let (kind, priority) = match level {
        "warning" => (EventKind::NotificationWarning, EventPriority::Normal),
        "error" => (EventKind::NotificationError, EventPriority::High),
        _ => (EventKind::NotificationInfo, EventPriority::Low),
    };
    let mut payload = Map::new();
    payload.insert("level".into(), Value::String(level.to_string()));
    payload.insert("message".into(), Value::String(message.into()));
    payload.insert("details".into(), details);
    Event::new(kind, payload).with_priority(priority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Event {
        let mut payload = Map::new();
        payload.insert("gameweek".into(), json!(12));
        payload.insert("trigger".into(), json!("24h"));
        Event::new(EventKind::GameweekPlanning, payload)
            .with_priority(EventPriority::High)
            .with_source("scheduler")
            .with_correlation("corr-1")
    }

    #[test]
    fn encode_decode_round_trip() {
        let event = sample();
        let encoded = event.encode().unwrap();
        let decoded = Event::decode(&encoded).unwrap();
        assert_eq!(decoded, event);
        // Re-encoding a decoded event is stable.
        assert_eq!(decoded.encode().unwrap(), encoded);
    }

    #[test]
    fn unknown_kind_fails_decode() {
        let raw = r#"{"kind":"space.launch","id":"9f8e7d6c-5b4a-4f3e-8d2c-1b0a99887766",
            "timestamp":"2025-10-19T11:00:00Z","priority":"normal","source":null,
            "correlation_id":null,"retry_count":0,"max_retries":3,"payload":{}}"#;
        assert!(Event::decode(raw).is_err());
    }

    #[test]
    fn unknown_payload_keys_preserved() {
        let mut event = sample();
        event
            .payload
            .insert("from_the_future".into(), json!({"x": [1, 2, 3]}));
        let round = Event::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(round.payload.get("from_the_future"), event.payload.get("from_the_future"));
    }

    #[test]
    fn retry_budget() {
        let event = sample();
        assert!(event.can_retry());

        let mut current = event.clone();
        for step in 0..DEFAULT_MAX_RETRIES {
            assert_eq!(current.can_retry(), step < DEFAULT_MAX_RETRIES);
            current = current.with_retry_incremented();
        }
        assert!(!current.can_retry());
        // Original untouched.
        assert_eq!(event.retry_count, 0);
    }

    #[test]
    fn kind_tags_round_trip() {
        for kind in [
            EventKind::SystemStartup,
            EventKind::GameweekPlanning,
            EventKind::DataUpdated,
            EventKind::ValueRankingsCompleted,
            EventKind::ChipRecommendation,
            EventKind::PressConferenceUpdate,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(EventKind::parse("nope.nope").is_err());
    }

    #[test]
    fn notification_levels() {
        let err = notification("error", "boom", json!({}));
        assert_eq!(err.kind, EventKind::NotificationError);
        assert_eq!(err.priority, EventPriority::High);
        let info = notification("info", "hello", json!({}));
        assert_eq!(info.priority, EventPriority::Low);
    }
}
