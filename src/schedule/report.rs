use std::time::Duration;

use serde::Serialize;
use ulid::Ulid;

use crate::model::{RejectionReason, RequestStatus, Span};

use super::SolveMode;
use super::formulate::{ItemKind, ProblemModel, minutes_to_ms};
use super::solve::{SolveOutcome, SolverStatus};

/// The two bookings that make a schedule infeasible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub facility_id: Ulid,
    pub facility_name: String,
    pub first: Ulid,
    pub first_title: String,
    pub first_span: Span,
    pub second: Ulid,
    pub second_title: String,
    pub second_span: Span,
}

/// Where a request landed. Spans in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub facility_id: Ulid,
    pub facility_name: String,
    pub occurrences: Vec<Span>,
    pub dropped_occurrences: usize,
    pub penalty: i64,
    pub substituted_facility: bool,
    pub off_day: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestResolution {
    pub request_id: Ulid,
    /// Revision of the request this verdict was computed for.
    pub revision: u64,
    pub status: RequestStatus,
    pub placement: Option<Placement>,
    pub reason: Option<RejectionReason>,
}

/// Outcome of one scheduling run, ready to show or to apply.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleDecision {
    pub mode: SolveMode,
    pub feasible: bool,
    pub status: SolverStatus,
    pub message: String,
    pub checked: usize,
    pub objective: i64,
    pub nodes: u64,
    pub elapsed_ms: u64,
    pub conflict: Option<ConflictReport>,
    /// In request creation order.
    pub resolutions: Vec<RequestResolution>,
    /// Movable bookings the replan leaves out.
    pub displaced: Vec<Ulid>,
}

impl ScheduleDecision {
    pub fn resolution(&self, request: Ulid) -> Option<&RequestResolution> {
        self.resolutions.iter().find(|r| r.request_id == request)
    }

    pub fn placed(&self) -> usize {
        self.resolutions
            .iter()
            .filter(|r| r.placement.is_some())
            .count()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Turn a solver outcome into per-request verdicts and a message.
pub fn report(model: &ProblemModel, outcome: &SolveOutcome) -> ScheduleDecision {
    let mut decision = ScheduleDecision {
        mode: model.mode,
        feasible: false,
        status: outcome.status,
        message: String::new(),
        checked: model.checked(),
        objective: outcome.objective,
        nodes: outcome.nodes,
        elapsed_ms: millis(outcome.elapsed),
        conflict: None,
        resolutions: Vec::new(),
        displaced: Vec::new(),
    };

    if let Some(pair) = &outcome.conflict {
        let (a, b) = (&model.mandatory[pair.first], &model.mandatory[pair.second]);
        let facility = &model.facilities[pair.facility];
        let conflict = ConflictReport {
            facility_id: facility.id,
            facility_name: facility.name.clone(),
            first: a.owner,
            first_title: a.label.clone(),
            first_span: minutes_to_ms(&a.span),
            second: b.owner,
            second_title: b.label.clone(),
            second_span: minutes_to_ms(&b.span),
        };
        decision.message = format!(
            "Schedule is infeasible: '{}' ({}) and '{}' ({}) overlap on {}",
            conflict.first_title,
            conflict.first_span,
            conflict.second_title,
            conflict.second_span,
            conflict.facility_name,
        );
        decision.conflict = Some(conflict);
        return decision;
    }

    let mut resolutions: Vec<(u64, RequestResolution)> = Vec::new();
    for (i, item) in model.items.iter().enumerate() {
        let choice = outcome.assignment.as_ref().and_then(|a| a[i]);
        match item.kind {
            ItemKind::Movable { booking } => {
                if outcome.assignment.is_some() && choice.is_none() {
                    decision.displaced.push(booking);
                }
            }
            ItemKind::Request { request } => {
                let resolution = match choice {
                    Some(c) => {
                        let candidate = &item.candidates[c];
                        let facility = &model.facilities[candidate.facility];
                        RequestResolution {
                            request_id: request,
                            revision: item.revision,
                            status: if candidate.dropped > 0 {
                                RequestStatus::PartiallyScheduled
                            } else {
                                RequestStatus::Scheduled
                            },
                            placement: Some(Placement {
                                facility_id: facility.id,
                                facility_name: facility.name.clone(),
                                occurrences: candidate
                                    .occurrences
                                    .iter()
                                    .map(minutes_to_ms)
                                    .collect(),
                                dropped_occurrences: candidate.dropped,
                                penalty: candidate.penalty,
                                substituted_facility: candidate.substituted,
                                off_day: candidate.off_day,
                            }),
                            reason: None,
                        }
                    }
                    None => RequestResolution {
                        request_id: request,
                        revision: item.revision,
                        status: RequestStatus::Rejected,
                        placement: None,
                        reason: Some(if outcome.assignment.is_none() {
                            RejectionReason::SearchIncomplete
                        } else if item.had_geometry {
                            RejectionReason::ResourceSaturated
                        } else {
                            RejectionReason::NoSlotWithinPreferences
                        }),
                    },
                };
                resolutions.push((item.seq, resolution));
            }
        }
    }
    resolutions.sort_by_key(|(seq, r)| (*seq, r.request_id));
    decision.resolutions = resolutions.into_iter().map(|(_, r)| r).collect();
    decision.feasible = outcome.assignment.is_some();

    let total = decision.resolutions.len();
    let placed = decision.placed();
    let partial = decision
        .resolutions
        .iter()
        .filter(|r| r.status == RequestStatus::PartiallyScheduled)
        .count();

    decision.message = match (model.mode, outcome.status) {
        (SolveMode::Feasibility, _) => {
            format!("Schedule is feasible: {} bookings checked", model.checked_bookings)
        }
        (_, SolverStatus::TimedOut) if outcome.assignment.is_none() => {
            "Search did not finish within the budget and found no valid assignment".to_string()
        }
        (mode, status) => {
            let mut message = format!("Placed {placed} of {total} requests");
            if partial > 0 {
                message.push_str(&format!(" ({partial} partially)"));
            }
            if mode == SolveMode::Replan {
                message.push_str(&format!(
                    ", displaced {} movable bookings",
                    decision.displaced.len()
                ));
            }
            if status == SolverStatus::TimedOut {
                message.push_str("; search stopped at the budget, best assignment so far");
            }
            message
        }
    };
    decision
}
