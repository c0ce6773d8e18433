//! Runs a small cat registry through the cache.
//!
//! ```sh
//! RUST_LOG=wp_cache=debug,cats=info cargo run --example cats --features demo
//! RUST_LOG=info cargo run --example cats --features demo,redis -- --redis-url redis://127.0.0.1:6379
//! ```
//!
//! After the scripted round it keeps the workers running until Ctrl-C.

use anyhow::Context;
use chrono::TimeZone;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing::warn;
use wp_cache::config::CacheConfig;
use wp_cache::model::Cat;
use wp_cache::model::CatPatch;
use wp_cache::service::CachedService;
use wp_cache::service::MemoryRepository;
use wp_cache::stream::MemoryLog;
use wp_cache::DurableLog;
use wp_cache::StreamCache;

fn setup_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    info!("Tracing initialized");
    Ok(())
}

async fn settle() {
    // Propagation is asynchronous; give the workers a moment.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn run<L: DurableLog>(log: Arc<L>, config: &CacheConfig) -> anyhow::Result<()> {
    let cache = Arc::new(StreamCache::<L, Cat>::from_config(log, config)?);
    let status = cache.start().await?;
    info!(?status, stream = %config.stream_name(), workers = config.workers(), "cache started");

    let service = CachedService::new(Arc::new(MemoryRepository::<Cat>::new()), cache.clone());

    let born = Utc
        .with_ymd_and_hms(2019, 3, 14, 0, 0, 0)
        .single()
        .context("bad birth date")?;
    let tom = Cat::new("c1", "Tom").born(born);
    let id = service.create(tom).await?;
    service.create(Cat::new("c2", "Felix").vaccinated(true)).await?;
    settle().await;
    info!(cat = ?service.get(&id).await?, "created");

    let patch = CatPatch {
        name: Some("Tomcat".to_string()),
        vaccinated: Some(true),
        ..Default::default()
    };
    service.update(&id, patch).await?;
    settle().await;
    info!(cat = ?service.get(&id).await?, "updated");

    service.delete(&"c2".to_string()).await?;
    settle().await;
    info!(cached = cache.read(&"c2".to_string()).is_some(), "deleted c2");
    info!(
        cached = cache.state().len(),
        repository_reads = service.repository().reads(),
        "scripted round done, press Ctrl-C to stop"
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "can't listen for Ctrl-C, stopping right away");
    }

    cache.shutdown().await;
    info!(status = ?cache.status(), "cache stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing()?;
    let config = CacheConfig::from_env().context("bad cache configuration")?;

    #[cfg(feature = "redis")]
    if let Some(url) = config.redis_url() {
        let log = wp_cache::stream::RedisLog::connect(&url)
            .await
            .with_context(|| format!("connecting to {url}"))?;
        return run(Arc::new(log), &config).await;
    }

    #[cfg(not(feature = "redis"))]
    if config.redis_url().is_some() {
        warn!("built without the 'redis' feature, using the in-process log");
    }

    run(Arc::new(MemoryLog::new()), &config).await
}
