use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use waitlist::scheduler;
use waitlist::{Engine, LocalStore};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("WAITLIST_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    waitlist::observability::init(metrics_port)?;

    let data_dir = std::env::var("WAITLIST_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let sweep_secs: u64 = env_or("WAITLIST_SWEEP_INTERVAL_SECS", 60);
    let compact_threshold: u64 = env_or("WAITLIST_COMPACT_THRESHOLD", 1000);

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("waitlist.wal");
    let store = Arc::new(LocalStore::open(&wal_path)?);
    let engine = Arc::new(Engine::with_system_clock(store.clone()));

    info!("waitlistd started");
    info!("  wal: {}", wal_path.display());
    info!("  sweep interval: {sweep_secs}s");
    info!("  compact threshold: {compact_threshold}");
    let metrics_url = metrics_port.map_or("disabled".to_string(), |p| {
        format!("http://0.0.0.0:{p}/metrics")
    });
    info!("  metrics: {metrics_url}");

    let sweeper = tokio::spawn(scheduler::run_sweeper(
        engine.clone(),
        Duration::from_secs(sweep_secs.max(1)),
    ));
    let compactor = tokio::spawn(scheduler::run_compactor(
        store.clone(),
        compact_threshold,
        Duration::from_secs(30),
    ));

    // Stop on SIGTERM/ctrl-c.
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
    sweeper.abort();
    compactor.abort();
    // Leave a compact log behind so the next start replays quickly.
    if let Err(e) = store.compact().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("waitlistd stopped");
    Ok(())
}
