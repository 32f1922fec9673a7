//! # wiki-server
//!
//! Assembles the review core from configuration and runs the review deadline
//! scheduler until Ctrl-C. Adapters are picked by compile-time features.

use std::sync::Arc;

use anyhow::Context;
use configs::{LogFormat, Settings};
use domains::{Clock, LockStore, ReviewRepository, SystemClock};
use services::{
    LockConfig, LockManager, ReviewDeadlineScheduler, ReviewService, SchedulerConfig, SnowflakeGenerator,
};
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(settings: &Settings) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[cfg(feature = "redis")]
fn lock_store(settings: &Settings) -> anyhow::Result<Arc<dyn LockStore>> {
    use secrecy::ExposeSecret;
    use storage_adapters::redis::RedisLockStore;

    let store = RedisLockStore::connect(settings.redis.url.expose_secret()).context("configuring redis pool")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
fn lock_store(_settings: &Settings) -> anyhow::Result<Arc<dyn LockStore>> {
    tracing::warn!("built without `redis`: locks only exclude tasks inside this process");
    Ok(Arc::new(storage_adapters::memory::InMemoryLockStore::new()))
}

#[cfg(feature = "db-postgres")]
async fn review_repository(settings: &Settings) -> anyhow::Result<Arc<dyn ReviewRepository>> {
    use secrecy::ExposeSecret;
    use storage_adapters::postgres::PgReviewRepository;

    let repo = PgReviewRepository::connect(settings.database.url.expose_secret(), settings.database.max_connections)
        .await
        .context("connecting to postgres")?;
    repo.migrate().await.context("running migrations")?;
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "db-postgres"))]
async fn review_repository(_settings: &Settings) -> anyhow::Result<Arc<dyn ReviewRepository>> {
    tracing::warn!("built without `db-postgres`: reviews are kept in memory");
    Ok(Arc::new(storage_adapters::memory::InMemoryReviewRepository::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings);

    // 1. Identity: an invalid node id or a clock before the epoch stops us here.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids = Arc::new(
        SnowflakeGenerator::with_epoch(settings.node.id, settings.node.epoch_ms, Arc::clone(&clock))
            .context("configuring id generator")?,
    );

    // 2. Adapters
    let repo = review_repository(&settings).await?;
    let locks = Arc::new(LockManager::new(
        lock_store(&settings)?,
        LockConfig {
            key_prefix: settings.lock.key_prefix.clone(),
            retry_interval: settings.lock_retry_interval(),
        },
    ));

    // 3. Review engine
    let reviews = Arc::new(ReviewService::new(Arc::clone(&repo), ids, Arc::clone(&clock)));
    info!(node_id = settings.node.id, "wiki review core ready");

    if !settings.scheduler.enabled {
        info!("review deadline scheduler disabled on this instance");
        tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
        return Ok(());
    }

    // 4. Deadline scheduler
    let scheduler = Arc::new(ReviewDeadlineScheduler::new(
        repo,
        reviews,
        locks,
        clock,
        SchedulerConfig {
            interval: settings.scheduler_interval(),
            lease: settings.scheduler_lease(),
        },
    ));
    let shutdown = Arc::new(Notify::new());
    let worker = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let shutdown = Arc::clone(&shutdown);
        async move { scheduler.run(shutdown).await }
    });

    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    info!("shutdown requested");
    shutdown.notify_one();
    worker.await.context("scheduler task failed")?;
    Ok(())
}
