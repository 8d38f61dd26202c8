use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::store::LocalStore;

/// Sweep every site the store knows about. Returns the number of entries
/// expired in total; a failing site is logged and skipped.
pub async fn sweep_all_sites(engine: &Engine) -> Result<usize, EngineError> {
    let sites = engine.store().site_ids().await?;
    metrics::gauge!(crate::observability::SITES_ACTIVE).set(sites.len() as f64);
    let mut total = 0;
    for site_id in sites {
        match engine.sweep_expired(site_id).await {
            Ok(report) => total += report.expired_count,
            Err(e) => warn!("sweep failed for site {site_id}: {e}"),
        }
    }
    Ok(total)
}

/// Background task that periodically expires stale entries across all sites.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match sweep_all_sites(&engine).await {
            Ok(0) => debug!("sweep: nothing to expire"),
            Ok(n) => info!("sweep: expired {n} entries"),
            Err(e) => warn!("sweep skipped: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<LocalStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
