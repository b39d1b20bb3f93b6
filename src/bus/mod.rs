//! Redis-backed pub/sub event bus.
//!
//! One broker channel per event kind (`<prefix>:<tag>`). Every published
//! event is also appended to a sorted-set audit ring capped at
//! [`HISTORY_CAP`] entries. Delivery is at-least-once: handlers must be
//! idempotent or deduplicate on the event id.

use crate::events::{Event, EventKind};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Audit ring size; older entries are trimmed on every write.
pub const HISTORY_CAP: i64 = 10_000;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
    #[error("event bus not connected")]
    NotConnected,
}

/// A subscriber callback. Agents register through their runner wrapper,
/// which adds containment and retry on top of this.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<()>;
}

pub type HandlerId = u64;

struct Registration {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
}

enum ListenerCommand {
    Subscribe(String),
    Unsubscribe(String),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BusHealth {
    pub connected: bool,
    pub subscription_count: usize,
    pub listening: bool,
}

pub struct EventBus {
    redis_url: String,
    prefix: String,
    client: Mutex<Option<redis::Client>>,
    manager: Mutex<Option<ConnectionManager>>,
    subscriptions: RwLock<HashMap<EventKind, Vec<Registration>>>,
    next_handler_id: AtomicU64,
    control_tx: Mutex<Option<mpsc::UnboundedSender<ListenerCommand>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    listening: AtomicBool,
}

impl EventBus {
    pub fn new(redis_url: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            prefix: prefix.into(),
            client: Mutex::new(None),
            manager: Mutex::new(None),
            subscriptions: RwLock::new(HashMap::new()),
            next_handler_id: AtomicU64::new(1),
            control_tx: Mutex::new(None),
            listener: Mutex::new(None),
            listening: AtomicBool::new(false),
        }
    }

    pub fn channel_name(&self, kind: EventKind) -> String {
        format!("{}:{}", self.prefix, kind.as_str())
    }

    fn history_key(&self) -> String {
        format!("{}:events:history", self.prefix)
    }

    /// Establish the broker connection and verify it with a ping.
    /// Idempotent: an already-connected bus returns immediately.
    pub async fn connect(&self) -> Result<(), BusError> {
        if self.manager.lock().is_some() {
            return Ok(());
        }

        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        let mut manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        debug!("Broker ping: {pong}");

        *self.client.lock() = Some(client);
        *self.manager.lock() = Some(manager);
        info!("Connected to broker at {}", self.redis_url);
        Ok(())
    }

    /// Tear down the listener and the connection. Subsequent publishes
    /// fail with [`BusError::NotConnected`].
    pub async fn disconnect(&self) {
        self.stop_listening();
        *self.manager.lock() = None;
        *self.client.lock() = None;
        info!("Disconnected from broker");
    }

    fn connection(&self) -> Result<ConnectionManager, BusError> {
        self.manager.lock().clone().ok_or(BusError::NotConnected)
    }

    /// Publish an event to its kind channel. Returns the number of
    /// broker-level subscribers that received it. The audit-ring write is
    /// best-effort and never fails the publish.
    pub async fn publish(&self, event: &Event) -> Result<u32, BusError> {
        let mut conn = self.connection()?;
        let encoded = event
            .encode()
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        let channel = self.channel_name(event.kind);

        let receivers: i64 = conn
            .publish(&channel, &encoded)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        debug!("Published {event} to '{channel}' ({receivers} subscribers)");

        if let Err(e) = self.store_history(&mut conn, &encoded, event).await {
            warn!("Failed to store {event} in history: {e}");
        }

        Ok(receivers.max(0) as u32)
    }

    async fn store_history(
        &self,
        conn: &mut ConnectionManager,
        encoded: &str,
        event: &Event,
    ) -> Result<()> {
        let key = self.history_key();
        let score = event.timestamp.timestamp_millis() as f64 / 1000.0;
        let _: i64 = conn.zadd(&key, encoded, score).await?;
        let _: i64 = conn
            .zremrangebyrank(&key, 0, -(HISTORY_CAP + 1) as isize)
            .await?;
        Ok(())
    }

    /// Register a handler for a kind. The first handler for a kind
    /// subscribes the broker channel; later handlers share it.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscriptions.write();
        let entries = subs.entry(kind).or_default();
        let first = entries.is_empty();
        entries.push(Registration { id, handler });
        drop(subs);

        if first {
            self.send_control(ListenerCommand::Subscribe(self.channel_name(kind)));
            info!("Subscribed to {}", kind.as_str());
        }
        id
    }

    /// Remove one handler (by id) or all handlers for a kind. Removing
    /// the last one releases the broker channel. No-op when nothing
    /// matches.
    pub fn unsubscribe(&self, kind: EventKind, handler: Option<HandlerId>) {
        let mut subs = self.subscriptions.write();
        let Some(entries) = subs.get_mut(&kind) else {
            return;
        };
        match handler {
            Some(id) => entries.retain(|r| r.id != id),
            None => entries.clear(),
        }
        let released = entries.is_empty();
        if released {
            subs.remove(&kind);
        }
        drop(subs);

        if released {
            self.send_control(ListenerCommand::Unsubscribe(self.channel_name(kind)));
            info!("Unsubscribed from {}", kind.as_str());
        }
    }

    fn send_control(&self, command: ListenerCommand) {
        if let Some(tx) = self.control_tx.lock().as_ref() {
            let _ = tx.send(command);
        }
    }

    /// Spawn the background listener task. Idempotent.
    pub fn start_listening(self: &Arc<Self>) {
        if self.listening.swap(true, Ordering::SeqCst) {
            warn!("Already listening for events");
            return;
        }

        let Some(client) = self.client.lock().clone() else {
            self.listening.store(false, Ordering::SeqCst);
            error!("Cannot start listening: bus not connected");
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        *self.control_tx.lock() = Some(tx);

        let channels: Vec<String> = self
            .subscriptions
            .read()
            .keys()
            .map(|k| self.channel_name(*k))
            .collect();

        let bus = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(e) = bus.listen_loop(client, rx, channels).await {
                error!("Listener loop terminated: {e}");
            }
            bus.listening.store(false, Ordering::SeqCst);
        });
        *self.listener.lock() = Some(handle);
        info!("Started listening for events");
    }

    /// Cancel the listener task. Idempotent.
    pub fn stop_listening(&self) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.control_tx.lock() = None;
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        info!("Stopped listening for events");
    }

    async fn listen_loop(
        self: &Arc<Self>,
        client: redis::Client,
        mut control_rx: mpsc::UnboundedReceiver<ListenerCommand>,
        initial_channels: Vec<String>,
    ) -> Result<()> {
        enum Step {
            Control(Option<ListenerCommand>),
            Message(Option<redis::Msg>),
        }

        let mut pubsub = client.get_async_pubsub().await?;
        for channel in &initial_channels {
            pubsub.subscribe(channel).await?;
        }

        loop {
            // The message stream borrows the pubsub connection, so the
            // select is scoped and the winning step is applied after the
            // borrow ends.
            let step = {
                let messages = pubsub.on_message();
                tokio::pin!(messages);
                tokio::select! {
                    cmd = control_rx.recv() => Step::Control(cmd),
                    msg = messages.next() => Step::Message(msg),
                }
            };

            match step {
                Step::Control(None) => break,
                Step::Control(Some(ListenerCommand::Subscribe(channel))) => {
                    if let Err(e) = pubsub.subscribe(&channel).await {
                        warn!("Channel subscribe '{channel}' failed: {e}");
                    }
                }
                Step::Control(Some(ListenerCommand::Unsubscribe(channel))) => {
                    if let Err(e) = pubsub.unsubscribe(&channel).await {
                        warn!("Channel unsubscribe '{channel}' failed: {e}");
                    }
                }
                Step::Message(None) => {
                    warn!("Broker message stream closed");
                    break;
                }
                Step::Message(Some(msg)) => {
                    let raw: String = match msg.get_payload() {
                        Ok(raw) => raw,
                        Err(e) => {
                            error!("Unreadable broker message: {e}");
                            continue;
                        }
                    };
                    match Event::decode(&raw) {
                        Ok(event) => self.dispatch(event).await,
                        Err(e) => error!("Dropping undecodable event: {e}"),
                    }
                }
            }
        }
        Ok(())
    }

    /// Invoke every registered handler for the event's kind. Handler
    /// errors are logged and never terminate the loop; retry publication
    /// is the responsibility of the agent wrapper.
    async fn dispatch(&self, event: Event) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subs = self.subscriptions.read();
            subs.get(&event.kind)
                .map(|entries| entries.iter().map(|r| Arc::clone(&r.handler)).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if let Err(e) = handler.handle(event.clone()).await {
                error!("Handler error for {event}: {e:#}");
            }
        }
    }

    /// Most recent events from the audit ring, newest first, optionally
    /// filtered by kind. Read errors yield an empty list.
    pub async fn history(&self, limit: usize, kind: Option<EventKind>) -> Vec<Event> {
        let Ok(mut conn) = self.connection() else {
            return Vec::new();
        };

        let raw: Vec<String> = match conn
            .zrevrange(self.history_key(), 0, limit.saturating_sub(1) as isize)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to read event history: {e}");
                return Vec::new();
            }
        };

        raw.iter()
            .filter_map(|entry| Event::decode(entry).ok())
            .filter(|event| kind.map_or(true, |k| event.kind == k))
            .collect()
    }

    /// Connectivity snapshot. `connected` reflects a live ping, not
    /// subscriber liveness.
    pub async fn health(&self) -> BusHealth {
        let connected = match self.connection() {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        };
        BusHealth {
            connected,
            subscription_count: self.subscriptions.read().len(),
            listening: self.listening.load(Ordering::SeqCst),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    #[cfg(test)]
    fn handler_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .get(&kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}
