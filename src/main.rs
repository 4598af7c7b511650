use std::sync::Arc;

use tracing::info;

use staybook::clock::SystemClock;
use staybook::config::Config;
use staybook::engine::Engine;
use staybook::notify::{self, LogMailer, NotifyHub, RetryPolicy};
use staybook::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    staybook::observability::init(config.metrics_port)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let notify_hub = Arc::new(NotifyHub::new());
    let outbox = notify_hub.subscribe();
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        notify_hub,
        config.engine.clone(),
        Arc::new(SystemClock),
    )?);

    info!("staybook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  bookings: {}", engine.booking_count());
    info!("  cleanup: {:?} daily at {:02}:00", config.engine.cleanup, config.cleanup_hour);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let dispatcher = tokio::spawn(notify::run_dispatcher(
        outbox,
        Arc::new(LogMailer),
        RetryPolicy::default(),
    ));
    let scheduler = tokio::spawn(reaper::run_cleanup_scheduler(
        engine.clone(),
        config.cleanup_hour,
    ));
    let compactor = tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c: stop background work, compact once.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    info!("shutdown signal received");

    scheduler.abort();
    compactor.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }

    // Give queued notifications a moment to drain.
    drop(engine);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), dispatcher).await;

    info!("staybook stopped");
    Ok(())
}
