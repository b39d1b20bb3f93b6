//! Read-through cache interface for the data gateway.
//!
//! The broker doubles as a cross-process cache. Failures on either path
//! degrade to a miss (reads) or a no-op (writes) so a flaky cache never
//! takes the gateway down.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl: Duration);
    async fn health(&self) -> bool;
}

/// Redis-backed cache; keys are namespaced `<prefix>:cache:<key>`.
pub struct RedisCache {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisCache {
    pub fn new(manager: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            manager,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:cache:{}", self.prefix, key)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.manager.clone();
        match conn.get::<_, Option<String>>(self.full_key(key)).await {
            Ok(Some(value)) => {
                debug!("Cache HIT for {key}");
                Some(value)
            }
            Ok(None) => {
                debug!("Cache MISS for {key}");
                None
            }
            Err(e) => {
                warn!("Cache read error for {key}: {e}");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let mut conn = self.manager.clone();
        let result: Result<(), redis::RedisError> = conn
            .set_ex(self.full_key(key), value, ttl.as_secs())
            .await;
        if let Err(e) = result {
            warn!("Cache write error for {key}: {e}");
        }
    }

    async fn health(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

/// In-process cache for tests and broker-less operation.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
    }

    async fn health(&self) -> bool {
        true
    }
}
