//! Constraint formulation, search, and reporting for facility schedules.
//!
//! The pipeline is pure: [`formulate`] turns a [`Snapshot`] of committed
//! bookings and pending requests into a [`ProblemModel`], [`solve`] searches
//! it under a [`Budget`], and [`report`] maps the outcome to a
//! [`ScheduleDecision`]. Nothing here touches engine state; persisting a
//! decision is `Engine::apply_decision`.

mod formulate;
mod report;
mod solve;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use ulid::Ulid;

use crate::model::{Booking, Facility, Ms, Request, UnknownTag};

pub use formulate::{
    Candidate, FixedInterval, Item, ItemKind, ProblemModel, formulate, priority_weight,
    minutes_to_ms, ms_to_minutes,
};
pub use report::{ConflictReport, Placement, RequestResolution, ScheduleDecision, report};
pub use solve::{Budget, ConflictPair, SolveOutcome, SolverStatus, solve};

/// What the solver is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SolveMode {
    /// Verify committed bookings coexist. Requests are ignored.
    Feasibility,
    /// Place pending requests around every committed booking.
    Allocation,
    /// Like allocation, but movable bookings may be displaced.
    Replan,
}

impl SolveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolveMode::Feasibility => "feasibility",
            SolveMode::Allocation => "allocation",
            SolveMode::Replan => "replan",
        }
    }
}

impl fmt::Display for SolveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolveMode {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feasibility" | "check" => Ok(SolveMode::Feasibility),
            "allocation" | "allocate" => Ok(SolveMode::Allocation),
            "replan" => Ok(SolveMode::Replan),
            _ => Err(UnknownTag {
                what: "solve mode",
                tag: s.to_string(),
            }),
        }
    }
}

/// Consistent read of everything the formulation needs.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub taken_at: Ms,
    pub facilities: Vec<Facility>,
    /// Non-cancelled bookings only.
    pub bookings: Vec<Booking>,
    /// Pending requests only.
    pub requests: Vec<Request>,
    pub team_flexibility: HashMap<Ulid, bool>,
}
