use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tally_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tally_query_duration_seconds";

/// Counter: successful availability decrements.
pub const DECREMENTS_TOTAL: &str = "tally_decrements_total";

/// Counter: decrements refused because the slot was sold out.
pub const DECREMENTS_SOLD_OUT_TOTAL: &str = "tally_decrements_sold_out_total";

/// Counter: successful availability increments.
pub const INCREMENTS_TOTAL: &str = "tally_increments_total";

/// Counter: audit entries that could not be persisted (best-effort channel).
pub const AUDIT_FAILURES_TOTAL: &str = "tally_audit_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tally_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tally_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tally_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "tally_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tally_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tally_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSlot { .. } => "insert_slot",
        Command::InsertBulkSlots { .. } => "insert_bulk_slots",
        Command::UpdateSlot { .. } => "update_slot",
        Command::DeleteSlot { .. } => "delete_slot",
        Command::BlockSlot { .. } => "block_slot",
        Command::UnblockSlot { .. } => "unblock_slot",
        Command::Decrement { .. } => "decrement",
        Command::DecrementWithLock { .. } => "decrement_with_lock",
        Command::Increment { .. } => "increment",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlotById { .. } => "select_slot_by_id",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectAuditByEntity { .. } => "select_audit_by_entity",
        Command::SelectAuditByActor { .. } => "select_audit_by_actor",
        Command::SelectAuditByRange { .. } => "select_audit_by_range",
        Command::Listen { .. } => "listen",
    }
}
