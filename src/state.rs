use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::services::cache::CacheService;
use crate::services::clock::Clock;
use crate::services::code_allocator::CodeAllocator;
use crate::services::notification::NotificationQueue;

/// Everything the cart, checkout and status services need.
///
/// The connection sits behind an async mutex because checkout keeps its
/// transaction open across cache round-trips. Every other read and write
/// waits for the lock meanwhile, so checkout latency includes the cache's;
/// cache implementations bound each call.
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub allocator: CodeAllocator,
    pub notifications: NotificationQueue,
}

impl AppState {
    pub fn new(
        conn: Connection,
        config: AppConfig,
        cache: Arc<dyn CacheService>,
        clock: Arc<dyn Clock>,
        notifications: NotificationQueue,
    ) -> Self {
        let allocator = CodeAllocator::new(
            cache,
            clock.clone(),
            config.code_suffix_length,
            config.code_max_attempts,
        );
        Self {
            db: Arc::new(Mutex::new(conn)),
            config,
            clock,
            allocator,
            notifications,
        }
    }
}
