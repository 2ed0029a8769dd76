use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: operations executed by the worker. Labels: kind, status.
pub const OPERATIONS_TOTAL: &str = "hotelplan_operations_total";

/// Histogram: batch execution time in seconds, commit included.
pub const BATCH_DURATION_SECONDS: &str = "hotelplan_batch_duration_seconds";

/// Histogram: operations per committed batch.
pub const BATCH_SIZE: &str = "hotelplan_batch_size";

/// Counter: differentials drained from the change queue.
pub const DIFFERENTIALS_INTEGRATED_TOTAL: &str = "hotelplan_differentials_integrated_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: connected data streams, canonical streams excluded.
pub const STREAMS_ACTIVE: &str = "hotelplan_streams_active";

/// Gauge: open client sessions.
pub const SESSIONS_ACTIVE: &str = "hotelplan_sessions_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "hotelplan_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hotelplan_connections_rejected_total";

/// Counter: malformed client messages.
pub const PROTOCOL_ERRORS_TOTAL: &str = "hotelplan_protocol_errors_total";

/// Histogram: journal append + fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hotelplan_wal_flush_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
