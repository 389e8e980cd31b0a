use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "pitchbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "pitchbook_query_duration_seconds";

/// Counter: bookings that passed the conflict guard.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "pitchbook_bookings_committed_total";

/// Counter: commits rejected because the facility was already occupied.
pub const BOOKING_CONFLICTS_TOTAL: &str = "pitchbook_booking_conflicts_total";

/// Counter: scheduling runs. Labels: mode, status.
pub const SOLVER_RUNS_TOTAL: &str = "pitchbook_solver_runs_total";

/// Histogram: time spent in formulation and search, in seconds.
pub const SOLVER_DURATION_SECONDS: &str = "pitchbook_solver_duration_seconds";

/// Gauge: 1 when the last periodic check found the schedule feasible.
pub const SCHEDULE_FEASIBLE: &str = "pitchbook_schedule_feasible";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "pitchbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "pitchbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "pitchbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "pitchbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "pitchbook_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertFacility { .. } => "insert_facility",
        Command::RenameFacility { .. } => "rename_facility",
        Command::DeleteFacility { .. } => "delete_facility",
        Command::InsertTeam { .. } => "insert_team",
        Command::UpdateTeam { .. } => "update_team",
        Command::DeleteTeam { .. } => "delete_team",
        Command::InsertEvent { .. } => "insert_event",
        Command::BatchInsertEvents { .. } => "batch_insert_events",
        Command::UpdateEvent { .. } => "update_event",
        Command::DeleteEvent { .. } => "delete_event",
        Command::InsertRequest { .. } => "insert_request",
        Command::UpdateRequest { .. } => "update_request",
        Command::DeleteRequest { .. } => "delete_request",
        Command::SelectFacilities => "select_facilities",
        Command::SelectTeams => "select_teams",
        Command::SelectRequests => "select_requests",
        Command::SelectEvents { .. } => "select_events",
        Command::SelectAvailability { .. } => "select_availability",
        Command::ScheduleSolve { .. } => "schedule_solve",
        Command::ScheduleAllocate { .. } => "schedule_allocate",
    }
}
