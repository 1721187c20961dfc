pub mod memory;
pub mod redis_cache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Set-valued cache used for the per-day code suffix registry.
///
/// `insert_until` must add the member and set the key's absolute expiry in a
/// single atomic step, and report whether this call was the one that added
/// it. Allocation correctness rests on that return value, not on
/// `contains`.
#[async_trait]
pub trait CacheService: Send + Sync {
    async fn contains(&self, key: &str, member: &str) -> anyhow::Result<bool>;

    async fn insert_until(
        &self,
        key: &str,
        member: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// `None` when the key is missing or has no expiry.
    async fn expires_at(&self, key: &str) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn len(&self, key: &str) -> anyhow::Result<usize>;

    async fn ping(&self) -> anyhow::Result<()>;
}
