//! Thin async client over a Redis-compatible shared key-value store.
//!
//! Every router replica uses one [`SharedStore`] to mirror routing rules,
//! service endpoints, circuit-breaker state, and health status under the
//! `taxpoynt:message_router` (and sibling `taxpoynt:circuit_breaker`,
//! `taxpoynt:health_status`, `taxpoynt:scaling_coordinator`) key prefixes.
//! Callers own their own key names; this crate only wraps the primitive
//! hash/sorted-set/TTL operations those callers compose.

pub mod keys;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SharedStoreError {
    #[error("shared store connection error: {0}")]
    Connection(String),
    #[error("shared store command error: {0}")]
    Command(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SharedStoreError>;

/// Capability surface the rest of the fabric programs against. Implemented
/// by [`RedisStore`]; a fake/in-memory implementation can stand in for
/// tests that should not require a live Redis instance.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>>;
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<()>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn del(&self, key: &str) -> Result<()>;
}

/// Helper for callers that serialize structs through the store as JSON, the
/// way §6 specifies ("all enums as their string name" via `serde`'s
/// `rename_all = "snake_case"` on each enum, handled at the type level).
#[async_trait]
pub trait SharedStoreJsonExt: SharedStore {
    async fn hset_json<T: serde::Serialize + Sync>(&self, key: &str, field: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.hset(key, field, &encoded).await
    }

    async fn hget_json<T: serde::de::DeserializeOwned>(&self, key: &str, field: &str) -> Result<Option<T>> {
        match self.hget(key, field).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn hgetall_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<HashMap<String, T>> {
        let raw = self.hgetall(key).await?;
        let mut out = HashMap::with_capacity(raw.len());
        for (field, value) in raw {
            match serde_json::from_str::<T>(&value) {
                Ok(decoded) => {
                    out.insert(field, decoded);
                }
                Err(err) => warn!(field = %field, error = %err, "dropping undeserializable shared-store entry"),
            }
        }
        Ok(out)
    }
}

impl<T: SharedStore + ?Sized> SharedStoreJsonExt for T {}

/// Redis-backed implementation built on a `ConnectionManager`, which
/// transparently reconnects and pipelines requests the way the rest of the
/// ecosystem's Redis-reliant services do.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SharedStoreError::Connection(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| SharedStoreError::Connection(e.to_string()))?;
        debug!(url, "connected to shared store");
        Ok(Self { manager })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.manager.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.hdel::<_, _, ()>(key, field).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.zrangebyscore(key, min, max).await?)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zrembyscore::<_, _, _, ()>(key, min, max).await?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

/// In-memory stand-in for tests and single-replica deployments that don't
/// want a live Redis dependency. Keeps the same hash/sorted-set semantics.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    hashes: std::sync::Arc<dashmap::DashMap<String, HashMap<String, String>>>,
    strings: std::sync::Arc<dashmap::DashMap<String, String>>,
    sorted_sets: std::sync::Arc<dashmap::DashMap<String, Vec<(String, f64)>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.hashes.get(key).and_then(|m| m.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.hashes.get(key).map(|m| m.clone()).unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        if let Some(mut m) = self.hashes.get_mut(key) {
            m.remove(field);
        }
        Ok(())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<()> {
        // TTLs are a no-op for the in-memory fake; tests assert behavior
        // within a single run, not real expiry.
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut set = self.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        Ok(self
            .sorted_sets
            .get(key)
            .map(|set| {
                let mut matches: Vec<(String, f64)> = set
                    .iter()
                    .filter(|(_, score)| *score >= min && *score <= max)
                    .cloned()
                    .collect();
                matches.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
                matches.into_iter().map(|(m, _)| m).collect()
            })
            .unwrap_or_default())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<()> {
        if let Some(mut set) = self.sorted_sets.get_mut(key) {
            set.retain(|(_, score)| !(*score >= min && *score <= max));
        }
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, _ttl: Duration) -> Result<()> {
        self.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.strings.get(key).map(|v| v.clone()))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .strings
            .iter()
            .map(|e| e.key().clone())
            .chain(self.hashes.iter().map(|e| e.key().clone()))
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.hashes.remove(key);
        self.strings.remove(key);
        self.sorted_sets.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_hash_round_trip() {
        let store = InMemoryStore::new();
        store.hset("k", "f", "v").await.unwrap();
        assert_eq!(store.hget("k", "f").await.unwrap(), Some("v".to_string()));
        store.hdel("k", "f").await.unwrap();
        assert_eq!(store.hget("k", "f").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_sorted_set_range_and_prune() {
        let store = InMemoryStore::new();
        store.zadd("z", "a", 1.0).await.unwrap();
        store.zadd("z", "b", 2.0).await.unwrap();
        store.zadd("z", "c", 3.0).await.unwrap();

        let in_range = store.zrangebyscore("z", 1.5, 3.0).await.unwrap();
        assert_eq!(in_range, vec!["b".to_string(), "c".to_string()]);

        store.zremrangebyscore("z", 0.0, 1.5).await.unwrap();
        let remaining = store.zrangebyscore("z", 0.0, 10.0).await.unwrap();
        assert_eq!(remaining, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Demo {
            n: u32,
        }
        let store = InMemoryStore::new();
        store.hset_json("k", "f", &Demo { n: 7 }).await.unwrap();
        let decoded: Option<Demo> = store.hget_json("k", "f").await.unwrap();
        assert_eq!(decoded, Some(Demo { n: 7 }));
    }
}
