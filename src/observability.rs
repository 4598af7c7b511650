use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking flow ────────────────────────────────────────────────

/// Counter: bookings accepted by `create_booking`.
pub const BOOKINGS_CREATED_TOTAL: &str = "staybook_bookings_created_total";

/// Counter: approver decisions recorded. Labels: decision.
pub const DECISIONS_TOTAL: &str = "staybook_decisions_total";

/// Counter: status changes. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "staybook_transitions_total";

/// Counter: requests rejected because the dates were taken.
pub const CONFLICTS_TOTAL: &str = "staybook_conflicts_total";

/// Counter: stale bookings swept by auto-cleanup.
pub const CLEANUP_TOTAL: &str = "staybook_cleanup_total";

/// Histogram: engine operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "staybook_operation_duration_seconds";

/// Gauge: bookings rebuilt from the WAL at startup.
pub const BOOKINGS_LOADED: &str = "staybook_bookings_loaded";

// ── Notifications ───────────────────────────────────────────────

pub const NOTIFICATIONS_SENT_TOTAL: &str = "staybook_notifications_sent_total";

/// Counter: notifications abandoned after the last retry.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "staybook_notifications_failed_total";

/// Counter: notifications lost because the dispatcher lagged.
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "staybook_notifications_dropped_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staybook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
