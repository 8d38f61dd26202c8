use std::net::SocketAddr;

// ── Engine activity ─────────────────────────────────────────────

/// Counter: waiting-list entries created.
pub const ENTRIES_CREATED_TOTAL: &str = "waitlist_entries_created_total";

/// Counter: entries moved to `Expired` by sweeps.
pub const ENTRIES_EXPIRED_TOTAL: &str = "waitlist_entries_expired_total";

/// Counter: range matches computed.
pub const RANGE_MATCHES_TOTAL: &str = "waitlist_range_matches_total";

/// Histogram: range match latency in seconds, sweep included.
pub const MATCH_DURATION_SECONDS: &str = "waitlist_match_duration_seconds";

/// Counter: match windows cut down to the maximum width.
pub const WINDOW_CLAMPS_TOTAL: &str = "waitlist_window_clamps_total";

/// Counter: stored entries ignored during matching because their rule is invalid.
pub const INVALID_RULES_SKIPPED_TOTAL: &str = "waitlist_invalid_rules_skipped_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "waitlist_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "waitlist_wal_flush_batch_size";

/// Gauge: sites known to the store.
pub const SITES_ACTIVE: &str = "waitlist_sites_active";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
