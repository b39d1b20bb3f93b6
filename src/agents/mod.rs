//! Agent lifecycle plumbing.
//!
//! An agent is a long-running worker that subscribes to event kinds and
//! reacts to them. Concrete agents implement [`Agent`]; the [`AgentRunner`]
//! wrapper owns lifecycle, counters, error containment and the retry
//! policy, and is what actually gets registered with the bus. Handlers
//! receive an [`AgentContext`] for publishing; it is cheap to clone into
//! background tasks.

use crate::bus::{EventBus, EventHandler, HandlerId};
use crate::events::{self, Event, EventKind};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique agent name, also stamped as the source of published events.
    fn name(&self) -> &str;

    /// Event kinds this agent reacts to.
    fn subscriptions(&self) -> Vec<EventKind>;

    async fn handle_event(&self, event: Event, ctx: AgentContext) -> Result<()>;

    /// Initialization hook, called during start after subscriptions.
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    /// Cleanup hook, called during stop before unsubscribing.
    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Publishing handle shared between the runner and the agent's handlers.
#[derive(Clone)]
pub struct AgentContext {
    name: Arc<str>,
    bus: Arc<EventBus>,
    published: Arc<AtomicU64>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl AgentContext {
    /// Publish on behalf of the agent, stamping its name as the source
    /// when unset. Publish failures are logged, not propagated; the next
    /// scheduled cycle retries naturally.
    pub async fn publish(&self, mut event: Event) {
        if event.source.is_none() {
            event.source = Some(self.name.to_string());
        }
        match self.bus.publish(&event).await {
            Ok(_) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!("{} failed to publish {event}: {e}", self.name);
                *self.last_error.lock() = Some(e.to_string());
            }
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub running: bool,
    pub events_processed: u64,
    pub events_published: u64,
    pub subscriptions: Vec<String>,
    pub uptime_seconds: Option<i64>,
    pub last_error: Option<String>,
}

/// Lifecycle wrapper around a concrete agent.
pub struct AgentRunner {
    agent: Arc<dyn Agent>,
    bus: Arc<EventBus>,
    context: AgentContext,
    running: AtomicBool,
    events_processed: AtomicU64,
    started_at: Mutex<Option<DateTime<Utc>>>,
    registrations: Mutex<Vec<(EventKind, HandlerId)>>,
}

impl AgentRunner {
    pub fn new(agent: Arc<dyn Agent>, bus: Arc<EventBus>) -> Arc<Self> {
        let context = AgentContext {
            name: Arc::from(agent.name()),
            bus: Arc::clone(&bus),
            published: Arc::new(AtomicU64::new(0)),
            last_error: Arc::new(Mutex::new(None)),
        };
        Arc::new(Self {
            agent,
            bus,
            context,
            running: AtomicBool::new(false),
            events_processed: AtomicU64::new(0),
            started_at: Mutex::new(None),
            registrations: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        self.agent.name()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn context(&self) -> AgentContext {
        self.context.clone()
    }

    /// Connect the bus if needed, register subscriptions, ensure the
    /// listener runs and announce the startup. A second start on a
    /// running agent warns and returns without re-subscribing.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("{} is already running", self.name());
            return Ok(());
        }

        if let Err(e) = self.bus.connect().await {
            self.running.store(false, Ordering::SeqCst);
            *self.context.last_error.lock() = Some(e.to_string());
            return Err(e.into());
        }

        let kinds = self.agent.subscriptions();
        {
            let mut registrations = self.registrations.lock();
            for kind in &kinds {
                let id = self
                    .bus
                    .subscribe(*kind, Arc::clone(self) as Arc<dyn EventHandler>);
                registrations.push((*kind, id));
            }
        }
        self.bus.start_listening();

        self.agent.on_start().await?;
        *self.started_at.lock() = Some(Utc::now());

        let subscribed: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        info!(
            "{} started, subscribed to {} event kinds",
            self.name(),
            subscribed.len()
        );
        self.context
            .publish(events::notification(
                "info",
                format!("{} started", self.name()),
                json!({ "subscriptions": subscribed }),
            ))
            .await;

        Ok(())
    }

    /// Unsubscribe everything and announce the shutdown. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.agent.on_stop().await {
            error!("{} on_stop hook failed: {e:#}", self.name());
        }

        let registrations: Vec<(EventKind, HandlerId)> =
            std::mem::take(&mut *self.registrations.lock());
        for (kind, id) in registrations {
            self.bus.unsubscribe(kind, Some(id));
        }

        info!(
            "{} stopped. Processed {} events, published {}.",
            self.name(),
            self.events_processed.load(Ordering::Relaxed),
            self.context.published.load(Ordering::Relaxed)
        );
        self.context
            .publish(events::notification(
                "info",
                format!("{} stopped", self.name()),
                json!({
                    "events_processed": self.events_processed.load(Ordering::Relaxed),
                    "events_published": self.context.published.load(Ordering::Relaxed),
                }),
            ))
            .await;
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            name: self.name().to_string(),
            running: self.is_running(),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_published: self.context.published.load(Ordering::Relaxed),
            subscriptions: self
                .registrations
                .lock()
                .iter()
                .map(|(k, _)| k.as_str().to_string())
                .collect(),
            uptime_seconds: self
                .started_at
                .lock()
                .map(|t| (Utc::now() - t).num_seconds()),
            last_error: self.context.last_error.lock().clone(),
        }
    }
}

#[async_trait]
impl EventHandler for AgentRunner {
    /// Containment wrapper around the agent's handler: errors are
    /// swallowed, reported as a `notification.error`, and the offending
    /// event is re-published with its retry counter advanced until the
    /// budget runs out.
    async fn handle(&self, event: Event) -> Result<()> {
        debug!("{} received {event}", self.name());

        match self
            .agent
            .handle_event(event.clone(), self.context.clone())
            .await
        {
            Ok(()) => {
                self.events_processed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                error!("{} error handling {event}: {e:#}", self.name());
                *self.context.last_error.lock() = Some(format!("{e:#}"));

                self.context
                    .publish(events::notification(
                        "error",
                        format!("{} failed to process event", self.name()),
                        json!({
                            "event_kind": event.kind.as_str(),
                            "event_id": event.id,
                            "error": format!("{e:#}"),
                        }),
                    ))
                    .await;

                if event.can_retry() {
                    let retry = event.with_retry_incremented();
                    info!(
                        "Retrying {event} (attempt {} of {})",
                        retry.retry_count, retry.max_retries
                    );
                    if let Err(pub_err) = self.bus.publish(&retry).await {
                        error!("Retry publish for {event} failed: {pub_err}");
                    }
                } else {
                    warn!("Dropping {event}: retry budget exhausted");
                }
                Ok(())
            }
        }
    }
}

/// Registry that starts and stops a fleet of agents together.
#[derive(Default)]
pub struct AgentOrchestrator {
    runners: Vec<Arc<AgentRunner>>,
}

impl AgentOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>, bus: Arc<EventBus>) -> Arc<AgentRunner> {
        let runner = AgentRunner::new(agent, bus);
        self.runners.push(Arc::clone(&runner));
        runner
    }

    pub async fn start_all(&self) {
        info!("Starting {} agents", self.runners.len());
        for runner in &self.runners {
            if let Err(e) = runner.start().await {
                error!("Failed to start {}: {e:#}", runner.name());
            }
        }
    }

    pub async fn stop_all(&self) {
        info!("Stopping {} agents", self.runners.len());
        for runner in &self.runners {
            runner.stop().await;
        }
    }

    pub fn statuses(&self) -> HashMap<String, AgentStatus> {
        self.runners
            .iter()
            .map(|r| (r.name().to_string(), r.status()))
            .collect()
    }
}
