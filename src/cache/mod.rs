//! Schema Cache
//!
//! Holds one time-limited snapshot of the database layout so that neither the
//! pipeline nor the generator pays for introspection on every request.
//!
//! # Lock Discipline
//! - `entry` (`RwLock`): readers take the shared lock and clone the `Arc`;
//!   the only writer replaces the whole entry, so nobody sees a partial value.
//! - `populate` (`Mutex`): held for the duration of a fetch. Callers that miss
//!   queue here and re-check `entry` once they get the lock, so one fetch
//!   serves all of them.
//!
//! Failed fetches store nothing. A caller dropped mid-fetch releases
//! `populate` without touching `entry`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::SchemaDefinition;
use crate::error::Result;

/// Absolute lifetime of a cached snapshot
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Longest lifetime actually applied; larger TTLs are treated as "never expires"
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Key of the process-wide schema snapshot
pub const SCHEMA_CACHE_KEY: &str = "DbSchemaDefinition";

#[derive(Debug)]
struct CacheEntry {
    key: String,
    value: Arc<SchemaDefinition>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Single-flight, time-limited cache for the schema snapshot
#[derive(Debug)]
pub struct SchemaCache {
    key: String,
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
    populate: Mutex<()>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SchemaCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_key(SCHEMA_CACHE_KEY, ttl)
    }

    pub fn with_key(key: impl Into<String>, ttl: Duration) -> Self {
        Self { key: key.into(), ttl, entry: RwLock::new(None), populate: Mutex::new(()) }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached snapshot, fetching it first if missing or expired.
    ///
    /// At most one `fetch` runs at a time; callers arriving during a fetch
    /// wait for it and share its result.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Arc<SchemaDefinition>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SchemaDefinition>>,
    {
        if let Some(value) = self.fresh_value().await {
            debug!(key = %self.key, "Schema cache hit");
            return Ok(value);
        }

        let _populating = self.populate.lock().await;

        // Another caller may have populated while we waited
        if let Some(value) = self.fresh_value().await {
            debug!(key = %self.key, "Schema cache populated by concurrent caller");
            return Ok(value);
        }

        info!(key = %self.key, "Schema cache miss: fetching schema from database");
        let schema = match fetch().await {
            Ok(schema) => schema,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Schema fetch failed, cache left unchanged");
                return Err(e);
            }
        };

        let value = Arc::new(schema);
        let now = Instant::now();
        let expires_at = now.checked_add(self.ttl).unwrap_or_else(|| now + MAX_TTL);
        *self.entry.write().await =
            Some(CacheEntry { key: self.key.clone(), value: Arc::clone(&value), expires_at });

        info!(key = %self.key, tables = value.tables.len(), ttl_secs = self.ttl.as_secs(), "Schema cached");
        Ok(value)
    }

    /// Cached snapshot if present and unexpired, without fetching
    pub async fn peek(&self) -> Option<Arc<SchemaDefinition>> {
        self.fresh_value().await
    }

    /// Drop the current snapshot so the next call fetches
    pub async fn invalidate(&self) {
        if let Some(old) = self.entry.write().await.take() {
            debug!(key = %old.key, "Schema cache invalidated");
        }
    }

    async fn fresh_value(&self) -> Option<Arc<SchemaDefinition>> {
        let now = Instant::now();
        self.entry
            .read()
            .await
            .as_ref()
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| Arc::clone(&entry.value))
    }
}
