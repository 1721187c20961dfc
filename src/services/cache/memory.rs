use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::CacheService;
use crate::services::clock::Clock;

struct Entry {
    members: HashSet<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process registry for single-node runs and tests. Expiry follows the
/// injected clock, so a day rollover empties yesterday's set.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> anyhow::Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory cache lock poisoned"))?;

        let now = self.clock.now().with_timezone(&Utc);
        entries.retain(|_, e| e.expires_at.map(|at| at > now).unwrap_or(true));

        Ok(f(&mut entries))
    }
}

#[async_trait]
impl CacheService for MemoryCache {
    async fn contains(&self, key: &str, member: &str) -> anyhow::Result<bool> {
        self.with_entries(|entries| {
            entries
                .get(key)
                .map(|e| e.members.contains(member))
                .unwrap_or(false)
        })
    }

    async fn insert_until(
        &self,
        key: &str,
        member: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                members: HashSet::new(),
                expires_at: None,
            });
            entry.expires_at = Some(expires_at);
            entry.members.insert(member.to_string())
        })
    }

    async fn expires_at(&self, key: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.with_entries(|entries| entries.get(key).and_then(|e| e.expires_at))
    }

    async fn len(&self, key: &str) -> anyhow::Result<usize> {
        self.with_entries(|entries| entries.get(key).map(|e| e.members.len()).unwrap_or(0))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.with_entries(|_| ())
    }
}
