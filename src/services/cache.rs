use anyhow::Result;
use moka::future::Cache;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Prefix for every key this service writes.
const NAMESPACE: &str = "invoice-pay";

/// Two-tier TTL cache: in-process moka, mirrored to Redis when reachable.
/// Both tiers share one TTL, fixed at construction.
pub struct CacheService {
    local: Cache<String, String>,
    redis: Option<ConnectionManager>,
    ttl: Duration,
}

impl CacheService {
    pub async fn new(redis_url: Option<&str>, ttl: Duration) -> Result<Self> {
        let redis = match redis_url {
            Some(url) => connect_redis(url).await,
            None => {
                tracing::info!("REDIS_URL not set, caching in process only");
                None
            }
        };
        Ok(Self::with_backend(redis, ttl))
    }

    pub fn memory_only(ttl: Duration) -> Self {
        Self::with_backend(None, ttl)
    }

    fn with_backend(redis: Option<ConnectionManager>, ttl: Duration) -> Self {
        Self {
            local: Cache::builder().max_capacity(256).time_to_live(ttl).build(),
            redis,
            ttl,
        }
    }

    pub fn has_redis(&self) -> bool {
        self.redis.is_some()
    }

    /// Undecodable entries count as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let key = namespaced(key);

        if let Some(value) = self.local.get(&key).await.and_then(|raw| decode(&key, &raw)) {
            return Some(value);
        }

        let raw = self.redis_get(&key).await?;
        let value = decode(&key, &raw)?;
        // warm the local tier for the next reader
        self.local.insert(key, raw).await;
        Some(value)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let key = namespaced(key);
        let raw = serde_json::to_string(value)?;
        self.local.insert(key.clone(), raw.clone()).await;
        self.redis_put(&key, raw).await;
        Ok(())
    }

    pub async fn ping(&self) -> bool {
        let Some(mut redis) = self.redis.clone() else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<_, String>(&mut redis)
            .await
            .is_ok()
    }

    async fn redis_get(&self, key: &str) -> Option<String> {
        let mut redis = self.redis.clone()?;
        match redis.get::<_, Option<String>>(key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "Redis read failed");
                None
            }
        }
    }

    async fn redis_put(&self, key: &str, raw: String) {
        let Some(mut redis) = self.redis.clone() else {
            return;
        };
        let secs = self.ttl.as_secs().max(1);
        if let Err(e) = redis.set_ex::<_, _, ()>(key, raw, secs).await {
            tracing::warn!(key, error = %e, "Redis write failed");
        }
    }
}

async fn connect_redis(url: &str) -> Option<ConnectionManager> {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Invalid REDIS_URL: {}, caching in process only", e);
            return None;
        }
    };
    match client.get_connection_manager().await {
        Ok(conn) => {
            tracing::info!("Redis connected");
            Some(conn)
        }
        Err(e) => {
            tracing::warn!("Redis unreachable: {}, caching in process only", e);
            None
        }
    }
}

fn namespaced(key: &str) -> String {
    format!("{}:{}", NAMESPACE, key)
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(key, error = %e, "Discarding undecodable cache entry");
            None
        }
    }
}
