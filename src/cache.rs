//! Two-tier TTL cache: process memory in front of a persisted store.
//!
//! A value is served only while `expires_at > now`. Both tiers are written with
//! the same stamp so memory is never older than the persisted copy. Failures of
//! the persisted tier are logged and otherwise ignored.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::dto::CatalogEntry;
use crate::clock::Clock;
use crate::creatures::dto::CreatureCard;
use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::news::dto::NewsItem;

pub const CATALOG_TTL_MS: i64 = 10 * 60 * 1000;
pub const CREATURES_TTL_MS: i64 = 10 * 60 * 1000;
pub const NEWS_TTL_MS: i64 = 8 * 60 * 1000;
/// An empty news list may be a hiccup; don't trust it for long.
pub const EMPTY_NEWS_TTL_MS: i64 = 25 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub expires_at: i64,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Memory,
    Persisted,
    Network,
}

impl DataSource {
    pub fn is_cached(self) -> bool {
        !matches!(self, DataSource::Network)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub data: Vec<T>,
    pub source: DataSource,
}

/// Outcome of a read at the data-access boundary. Views render `Fallback` with a retry.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<T> {
    Ready { items: Vec<T>, source: DataSource },
    Fallback {
        reason: String,
        not_configured: bool,
        auth_expired: bool,
    },
}

impl<T> Loaded<T> {
    pub fn from_result(res: Result<Cached<T>>) -> Self {
        match res {
            Ok(hit) => Loaded::Ready {
                items: hit.data,
                source: hit.source,
            },
            Err(e) => {
                warn!(error = %e, "read failed; serving fallback");
                Loaded::Fallback {
                    not_configured: e.is_not_configured(),
                    auth_expired: e.is_auth_expired(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Loaded items; empty for a fallback.
    pub fn items(&self) -> &[T] {
        match self {
            Loaded::Ready { items, .. } => items,
            Loaded::Fallback { .. } => &[],
        }
    }

    pub fn source(&self) -> Option<DataSource> {
        match self {
            Loaded::Ready { source, .. } => Some(*source),
            Loaded::Fallback { .. } => None,
        }
    }
}

/// Clears the in-flight mark when dropped.
pub struct RevalidationGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for RevalidationGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.key);
        }
    }
}

pub struct ResourceCache<T> {
    namespace: &'static str,
    memory: Mutex<HashMap<String, CacheEntry<T>>>,
    persisted: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl<T> ResourceCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn new(namespace: &'static str, persisted: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            namespace,
            memory: Mutex::new(HashMap::new()),
            persisted,
            clock,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn storage_key(&self, key: &str) -> String {
        format!("sleepdex.cache.{}.{}", self.namespace, key)
    }

    /// Fresh data from memory, else from the persisted tier (promoted into memory).
    pub fn read(&self, key: &str) -> Option<Cached<T>> {
        let now = self.clock.now_ms();

        if let Ok(mut memory) = self.memory.lock() {
            let fresh = memory
                .get(key)
                .map(|entry| (entry.expires_at > now).then(|| entry.data.clone()));
            match fresh {
                Some(Some(data)) => {
                    return Some(Cached {
                        data,
                        source: DataSource::Memory,
                    });
                }
                Some(None) => {
                    memory.remove(key);
                }
                None => {}
            }
        }

        let storage_key = self.storage_key(key);
        let raw = match self.persisted.get(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "persisted cache read failed");
                return None;
            }
        };
        let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "discarding unreadable cache entry");
                let _ = self.persisted.remove(&storage_key);
                return None;
            }
        };
        if entry.expires_at <= now {
            let _ = self.persisted.remove(&storage_key);
            return None;
        }

        let data = entry.data.clone();
        if let Ok(mut memory) = self.memory.lock() {
            memory.insert(key.to_string(), entry);
        }
        Some(Cached {
            data,
            source: DataSource::Persisted,
        })
    }

    /// Stamps `now + ttl_ms` and writes through both tiers.
    pub fn write(&self, key: &str, data: Vec<T>, ttl_ms: i64) {
        let entry = CacheEntry {
            expires_at: self.clock.now_ms() + ttl_ms,
            data,
        };
        let storage_key = self.storage_key(key);
        match serde_json::to_string(&entry) {
            Ok(raw) => {
                if let Err(e) = self.persisted.set(&storage_key, &raw) {
                    warn!(key = %storage_key, error = %e, "persisted cache write failed");
                }
            }
            Err(e) => warn!(key = %storage_key, error = %e, "cache entry not serializable"),
        }
        if let Ok(mut memory) = self.memory.lock() {
            memory.insert(key.to_string(), entry);
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.remove(key);
        }
        let storage_key = self.storage_key(key);
        if let Err(e) = self.persisted.remove(&storage_key) {
            warn!(key = %storage_key, error = %e, "persisted cache invalidation failed");
        }
        debug!(namespace = self.namespace, key, "cache invalidated");
    }

    /// Marks `key` as being revalidated; `None` if a revalidation is already running.
    pub fn try_begin_revalidation(&self, key: &str) -> Option<RevalidationGuard> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(key.to_string()) {
            return None;
        }
        Some(RevalidationGuard {
            in_flight: self.in_flight.clone(),
            key: key.to_string(),
        })
    }

    /// Serves a fresh cached value or runs `fetch` and stores its result.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, ttl_ms: impl Fn(&[T]) -> i64, fetch: F) -> Result<Cached<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        if let Some(hit) = self.read(key) {
            debug!(namespace = self.namespace, key, source = ?hit.source, "cache hit");
            return Ok(hit);
        }
        self.refresh(key, ttl_ms, fetch).await
    }

    /// Always fetches; writes through on success.
    pub async fn refresh<F, Fut>(&self, key: &str, ttl_ms: impl Fn(&[T]) -> i64, fetch: F) -> Result<Cached<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let data = fetch().await?;
        self.write(key, data.clone(), ttl_ms(&data));
        Ok(Cached {
            data,
            source: DataSource::Network,
        })
    }
}

/// One cache per resource family, built once and shared through `AppState`.
pub struct Caches {
    pub catalogs: ResourceCache<CatalogEntry>,
    pub creatures: ResourceCache<CreatureCard>,
    pub news: ResourceCache<NewsItem>,
}

impl Caches {
    pub fn new(persisted: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalogs: ResourceCache::new("catalog", persisted.clone(), clock.clone()),
            creatures: ResourceCache::new("creatures", persisted.clone(), clock.clone()),
            news: ResourceCache::new("news", persisted, clock),
        }
    }
}
