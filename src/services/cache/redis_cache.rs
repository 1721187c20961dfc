use std::future::Future;
use std::time::Duration as StdDuration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};

use super::CacheService;

/// Redis-backed registry. Uses a pooled `ConnectionManager`, cloned per call.
///
/// Every command is bounded by `timeout`. Checkout holds the database lock
/// while it allocates, so a hung Redis must surface as an error, not a stall.
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
    timeout: StdDuration,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, timeout: StdDuration) -> anyhow::Result<Self> {
        let client = Client::open(redis_url).context("failed to create Redis client")?;
        let conn_manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("timed out connecting to Redis after {timeout:?}"))?
            .context("failed to connect to Redis")?;
        Ok(Self {
            conn_manager,
            timeout,
        })
    }

    async fn bounded<T>(
        &self,
        command: &'static str,
        fut: impl Future<Output = RedisResult<T>> + Send,
    ) -> anyhow::Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.with_context(|| format!("{command} failed")),
            Err(_) => anyhow::bail!("{command} timed out after {:?}", self.timeout),
        }
    }
}

#[async_trait]
impl CacheService for RedisCache {
    async fn contains(&self, key: &str, member: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn_manager.clone();
        let found: bool = self
            .bounded("SISMEMBER", conn.sismember(key, member))
            .await?;
        Ok(found)
    }

    async fn insert_until(
        &self,
        key: &str,
        member: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut conn = self.conn_manager.clone();

        // SADD and EXPIREAT in one MULTI/EXEC: the set never exists without a
        // deadline, and every racer writes the same absolute deadline.
        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(key, member)
            .expire_at(key, expires_at.timestamp())
            .ignore();
        let (added,): (i64,) = self
            .bounded("SADD/EXPIREAT pipeline", pipe.query_async(&mut conn))
            .await?;

        Ok(added == 1)
    }

    async fn expires_at(&self, key: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let mut conn = self.conn_manager.clone();
        let ttl: i64 = self.bounded("TTL", conn.ttl(key)).await?;
        // -2: missing key, -1: no expiry
        if ttl < 0 {
            return Ok(None);
        }
        Ok(Some(Utc::now() + Duration::seconds(ttl)))
    }

    async fn len(&self, key: &str) -> anyhow::Result<usize> {
        let mut conn = self.conn_manager.clone();
        let count: usize = self.bounded("SCARD", conn.scard(key)).await?;
        Ok(count)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
