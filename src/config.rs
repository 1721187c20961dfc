use std::env;

use chrono::{FixedOffset, Offset, Utc};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    /// Empty means the suffix registry lives in process memory.
    pub redis_url: String,
    /// Upper bound for a single Redis command, in milliseconds.
    pub redis_timeout_ms: u64,
    /// Offset of the business timezone; code dates and registry expiry follow it.
    pub utc_offset_minutes: i32,
    pub code_suffix_length: usize,
    pub code_max_attempts: u32,
    pub notify_webhook_url: String,
    pub notify_webhook_secret: String,
    pub notify_queue_capacity: usize,
    pub notify_max_attempts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "roombook.db".to_string(),
            redis_url: String::new(),
            redis_timeout_ms: 500,
            utc_offset_minutes: 0,
            code_suffix_length: 4,
            code_max_attempts: 5,
            notify_webhook_url: String::new(),
            notify_webhook_secret: String::new(),
            notify_queue_capacity: 256,
            notify_max_attempts: 3,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            redis_url: env::var("REDIS_URL").unwrap_or_default(),
            redis_timeout_ms: parse_var("REDIS_TIMEOUT_MS")
                .filter(|n: &u64| *n > 0)
                .unwrap_or(defaults.redis_timeout_ms),
            utc_offset_minutes: parse_var("BOOKING_UTC_OFFSET_MINUTES")
                .filter(|m: &i32| m.abs() < 24 * 60)
                .unwrap_or(defaults.utc_offset_minutes),
            code_suffix_length: parse_var("CODE_SUFFIX_LENGTH")
                .filter(|n: &usize| (1..=12).contains(n))
                .unwrap_or(defaults.code_suffix_length),
            code_max_attempts: parse_var("CODE_MAX_ATTEMPTS")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.code_max_attempts),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default(),
            notify_webhook_secret: env::var("NOTIFY_WEBHOOK_SECRET").unwrap_or_default(),
            notify_queue_capacity: parse_var("NOTIFY_QUEUE_CAPACITY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.notify_queue_capacity),
            notify_max_attempts: parse_var("NOTIFY_MAX_ATTEMPTS")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.notify_max_attempts),
        }
    }

    pub fn redis_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.redis_timeout_ms)
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
