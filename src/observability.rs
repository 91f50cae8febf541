use std::net::SocketAddr;

// ── Engine operations ───────────────────────────────────────────

/// Counter: availability searches. Labels: scope (room, all_rooms), status.
pub const AVAILABILITY_SEARCHES_TOTAL: &str = "innkeep_availability_searches_total";

/// Histogram: availability search latency in seconds. Labels: scope.
pub const AVAILABILITY_SEARCH_DURATION_SECONDS: &str = "innkeep_availability_search_duration_seconds";

/// Counter: month views built (one per room).
pub const CALENDAR_VIEWS_TOTAL: &str = "innkeep_calendar_views_total";

/// Counter: reconciliations. Labels: status (ok, stale, invalid, failed).
pub const RECONCILIATIONS_TOTAL: &str = "innkeep_reconciliations_total";

/// Counter: blocks deleted by reconciliation.
pub const BLOCKS_REMOVED_TOTAL: &str = "innkeep_blocks_removed_total";

/// Counter: blocks inserted by reconciliation.
pub const BLOCKS_ADDED_TOTAL: &str = "innkeep_blocks_added_total";

/// Counter: bookings. Labels: status (confirmed, unavailable, failed).
pub const BOOKINGS_TOTAL: &str = "innkeep_bookings_total";

/// Counter: store calls that failed or timed out. Labels: op.
pub const STORE_ERRORS_TOTAL: &str = "innkeep_store_errors_total";

// ── Resources ───────────────────────────────────────────────────

/// Gauge: live admin sessions holding calendar snapshots.
pub const SESSIONS_ACTIVE: &str = "innkeep_sessions_active";

/// Counter: sessions dropped after their lifetime elapsed.
pub const SESSIONS_EXPIRED_TOTAL: &str = "innkeep_sessions_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "innkeep_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short status label for a finished engine call.
pub fn status_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "ok" } else { "error" }
}
