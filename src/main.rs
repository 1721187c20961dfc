use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use roombook::config::AppConfig;
use roombook::db;
use roombook::services::cache::memory::MemoryCache;
use roombook::services::cache::redis_cache::RedisCache;
use roombook::services::cache::CacheService;
use roombook::services::clock::{Clock, SystemClock};
use roombook::services::code_allocator::registry_key;
use roombook::services::notification::webhook::WebhookNotifier;
use roombook::services::notification::{self, LogNotifier, NotificationQueue, Notifier};
use roombook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;
    tracing::info!("database ready at {}", config.database_url);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.utc_offset()));

    let cache: Arc<dyn CacheService> = if config.redis_url.is_empty() {
        tracing::warn!("REDIS_URL not set, code registry is process-local");
        Arc::new(MemoryCache::new(clock.clone()))
    } else {
        tracing::info!("using Redis code registry");
        Arc::new(RedisCache::connect(&config.redis_url, config.redis_timeout()).await?)
    };
    cache.ping().await?;

    let notifier: Arc<dyn Notifier> = if config.notify_webhook_url.is_empty() {
        Arc::new(LogNotifier)
    } else {
        tracing::info!("sending notifications to {}", config.notify_webhook_url);
        Arc::new(WebhookNotifier::new(
            config.notify_webhook_url.clone(),
            config.notify_webhook_secret.clone(),
        ))
    };
    let (notifications, rx) = NotificationQueue::channel(config.notify_queue_capacity);
    let worker = notification::spawn_worker(rx, notifier, config.notify_max_attempts);

    let state = AppState::new(conn, config, cache, clock, notifications);

    let today = state.clock.today();
    let key = registry_key(today);
    let issued = state.allocator.cache().len(&key).await?;
    let expires_at = state.allocator.cache().expires_at(&key).await?;
    tracing::info!(
        date = %today,
        issued,
        expires_at = ?expires_at,
        "code registry status"
    );

    // closing the queue lets the worker finish what is left
    drop(state);
    worker.await?;

    Ok(())
}
