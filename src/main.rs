use anyhow::{Context, Result};
use std::sync::Arc;
use throttler::clock::SystemClock;
use throttler::config::Config;
use throttler::key_generator::HeaderKeyExtractor;
use throttler::memory_store::MemoryStore;
use throttler::rate_limiter::RateLimiter;
use throttler::redis::RedisStore;
use throttler::server::{create_app, Server};
use throttler::store::CounterStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("throttler={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting throttler service");

    let store: Arc<dyn CounterStore> = if config.uses_redis() {
        Arc::new(
            RedisStore::connect(&config.redis_url)
                .await
                .context("Failed to connect to Redis")?,
        )
    } else {
        tracing::warn!("REDIS_URL is empty, limits are enforced per process only");
        Arc::new(MemoryStore::new())
    };

    let settings = config.limiter_settings();
    let limiter = RateLimiter::from_settings(store.clone(), &settings, Arc::new(SystemClock))
        .context("Invalid rate limit settings")?
        .with_timeout(config.store_timeout);
    let extractor = HeaderKeyExtractor::new(config.key_headers.clone())
        .context("Invalid key headers")?;

    tracing::info!(
        algorithm = %settings.algorithm,
        request_limit = settings.request_limit(),
        store = store.name(),
        key_headers = ?extractor.headers(),
        "Configuration: bind_addr={}",
        config.bind_addr
    );

    let app = create_app(store, settings, Arc::new(limiter), Arc::new(extractor));
    Server::new(app, config.bind_addr)
        .run()
        .await
        .context("Server error")?;

    Ok(())
}
