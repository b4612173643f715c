//! Key/value backends for scope persistence: blobs plus a set primitive.
//!
//! Value and index writes are separate commands with no transaction between
//! them; readers of the index must tolerate dangling entries.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::errors::AppError;

#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool, AppError>;
    async fn set_add(&self, set: &str, member: &str) -> Result<(), AppError>;
    async fn set_remove(&self, set: &str, member: &str) -> Result<(), AppError>;
    async fn set_members(&self, set: &str) -> Result<Vec<String>, AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Redis
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RedisKeyValueBackend {
    conn: MultiplexedConnection,
}

impl RedisKeyValueBackend {
    pub async fn connect(client: &redis::Client) -> Result<Self, AppError> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueBackend for RedisKeyValueBackend {
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(set, member).await?;
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(set, member).await?;
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(set).await?;
        Ok(members)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryKeyValueBackend {
    values: RwLock<HashMap<String, String>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
    writes: AtomicUsize,
}

impl InMemoryKeyValueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating operations served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl KeyValueBackend for InMemoryKeyValueBackend {
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.record_write();
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        self.record_write();
        Ok(self.values.write().await.remove(key).is_some())
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<(), AppError> {
        self.record_write();
        self.sets
            .write()
            .await
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), AppError> {
        self.record_write();
        if let Some(members) = self.sets.write().await.get_mut(set) {
            members.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, AppError> {
        Ok(self
            .sets
            .read()
            .await
            .get(set)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_values_and_sets() {
        let kv = InMemoryKeyValueBackend::new();
        kv.set("a", "1").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(kv.delete("a").await.unwrap());
        assert!(!kv.delete("a").await.unwrap());
        assert_eq!(kv.get("a").await.unwrap(), None);

        kv.set_add("s", "x").await.unwrap();
        kv.set_add("s", "x").await.unwrap();
        kv.set_add("s", "y").await.unwrap();
        assert_eq!(kv.set_members("s").await.unwrap(), vec!["x", "y"]);
        kv.set_remove("s", "x").await.unwrap();
        kv.set_remove("missing", "x").await.unwrap();
        assert_eq!(kv.set_members("s").await.unwrap(), vec!["y"]);
    }
}
