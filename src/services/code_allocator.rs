use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::errors::AppError;
use crate::services::cache::CacheService;
use crate::services::clock::{end_of_local_day, Clock};

/// Characters used for suffixes; 0/O and 1/I are left out so codes survive
/// being read over the phone.
const SUFFIX_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// What a code is being issued for.
#[derive(Debug, Clone, Copy)]
pub enum CodeScope<'a> {
    Booking(&'a str),
    Detail(&'a str),
}

impl CodeScope<'_> {
    pub fn prefix(&self) -> &'static str {
        match self {
            CodeScope::Booking(_) => "BK",
            CodeScope::Detail(_) => "RS",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            CodeScope::Booking(id) | CodeScope::Detail(id) => id,
        }
    }
}

impl fmt::Display for CodeScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeScope::Booking(id) => write!(f, "booking {id}"),
            CodeScope::Detail(id) => write!(f, "line item {id}"),
        }
    }
}

pub fn registry_key(date: chrono::NaiveDate) -> String {
    format!("booking_code:{}", date.format("%Y%m%d"))
}

/// Issues short, day-scoped codes that are unique across every process
/// sharing the same cache.
pub struct CodeAllocator {
    cache: Arc<dyn CacheService>,
    clock: Arc<dyn Clock>,
    suffix_length: usize,
    max_attempts: u32,
}

impl CodeAllocator {
    pub fn new(
        cache: Arc<dyn CacheService>,
        clock: Arc<dyn Clock>,
        suffix_length: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            cache,
            clock,
            suffix_length: suffix_length.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheService> {
        &self.cache
    }

    pub async fn allocate(&self, scope: CodeScope<'_>) -> Result<String, AppError> {
        let now = self.clock.now();
        let date = now.date_naive();
        let key = registry_key(date);
        let expires_at = end_of_local_day(now);

        let mut last_cache_error: Option<anyhow::Error> = None;

        for attempt in 1..=self.max_attempts {
            let suffix = random_suffix(self.suffix_length);

            match self.cache.contains(&key, &suffix).await {
                Ok(true) => {
                    tracing::debug!(%scope, attempt, suffix = %suffix, "code suffix taken, retrying");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(%scope, attempt, error = %e, "code registry lookup failed");
                    last_cache_error = Some(e);
                    continue;
                }
            }

            match self.cache.insert_until(&key, &suffix, expires_at).await {
                Ok(true) => {
                    let code = format!("{}{}{}", scope.prefix(), date.format("%y%m%d"), suffix);
                    tracing::debug!(%scope, attempt, code = %code, "allocated code");
                    return Ok(code);
                }
                Ok(false) => {
                    tracing::debug!(%scope, attempt, suffix = %suffix, "lost code suffix race, retrying");
                }
                Err(e) => {
                    tracing::warn!(%scope, attempt, error = %e, "code registry insert failed");
                    last_cache_error = Some(e);
                }
            }
        }

        if let Some(e) = last_cache_error {
            tracing::error!(%scope, error = %e, "code allocation failed, cache unavailable");
            return Err(AppError::CacheUnavailable(e.to_string()));
        }

        tracing::error!(%scope, date = %date, attempts = self.max_attempts, "code suffix space exhausted");
        Err(AppError::AllocationExhausted {
            date: date.to_string(),
            attempts: self.max_attempts,
        })
    }
}

fn random_suffix(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}
