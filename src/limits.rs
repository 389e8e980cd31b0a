use crate::model::{DAY_MS, Ms};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single booking may not run longer than a week.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * DAY_MS;
/// Overlap and availability queries are capped at roughly two years.
pub const MAX_QUERY_WINDOW_MS: Ms = 731 * DAY_MS;
/// Allocation horizons are capped at a year.
pub const MAX_HORIZON_MS: Ms = 366 * DAY_MS;

pub const MAX_FACILITIES: usize = 1_000;
pub const MAX_TEAMS: usize = 10_000;
pub const MAX_PENDING_REQUESTS: usize = 10_000;
pub const MAX_BOOKINGS_PER_FACILITY: usize = 100_000;
pub const MAX_BATCH_SIZE: usize = 1_000;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_TITLE_LEN: usize = 200;

/// Candidate placements kept per request after ranking.
pub const MAX_CANDIDATES_PER_REQUEST: usize = 2_048;
/// Search nodes explored before the solver gives up as if out of time.
pub const MAX_SOLVER_NODES: u64 = 2_000_000;
/// Upper bound on the solver budget a caller may ask for.
pub const MAX_SOLVER_BUDGET_MS: u64 = 60_000;

pub const MAX_CONNECTIONS: usize = 4_096;
