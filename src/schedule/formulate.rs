use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Datelike, Weekday};
use tracing::warn;
use ulid::Ulid;

use crate::config::ScheduleConfig;
use crate::engine::{merge_overlapping, overlaps_any};
use crate::limits::MAX_CANDIDATES_PER_REQUEST;
use crate::model::*;

use super::solve::Budget;
use super::{SolveMode, Snapshot};

// ── Objective weights ────────────────────────────────────────────
//
// Every penalty a single placement can accrue sums to less than the lowest
// priority weight, so placing a request always beats rejecting it.

pub const WEIGHT_LOW: i64 = 1_000;
pub const WEIGHT_MEDIUM: i64 = 4_000;
pub const WEIGHT_HIGH: i64 = 16_000;

pub const PENALTY_SUBSTITUTE_FACILITY: i64 = 150;
pub const PENALTY_OFF_DAY: i64 = 100;
/// Charged pro rata for weekly occurrences dropped because of fixed bookings.
pub const PENALTY_DROPPED_OCCURRENCES: i64 = 500;
/// One point per slot step after the preferred window opens.
pub const PENALTY_LATENESS_CAP: i64 = 99;

/// Candidate slots examined between budget checks.
const BUDGET_CHECK_EVERY: u64 = 1024;

/// Keep-weights for movable bookings in replan mode.
pub const KEEP_RIGID_TEAM: i64 = 1_000_000;
pub const KEEP_FLEXIBLE: i64 = 20_000;

pub fn priority_weight(priority: Priority) -> i64 {
    match priority {
        Priority::Low => WEIGHT_LOW,
        Priority::Medium => WEIGHT_MEDIUM,
        Priority::High => WEIGHT_HIGH,
    }
}

/// Truncate both ends to whole minutes.
pub fn ms_to_minutes(span: &Span) -> Span {
    Span::new(span.start.div_euclid(MINUTE_MS), span.end.div_euclid(MINUTE_MS))
}

pub fn minutes_to_ms(span: &Span) -> Span {
    Span::new(span.start * MINUTE_MS, span.end * MINUTE_MS)
}

/// An interval that must hold in every solution. Minute units.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    pub owner: Ulid,
    pub label: String,
    pub facility: usize,
    pub span: Span,
    pub is_fixed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A movable booking that replan mode may displace.
    Movable { booking: Ulid },
    Request { request: Ulid },
}

/// One way to satisfy an item: a facility plus one or more occurrences
/// (one for one-time requests, one per week for weekly ones). Minute units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub facility: usize,
    pub occurrences: Vec<Span>,
    /// Weekly occurrences dropped because a fixed booking blocks them.
    pub dropped: usize,
    pub penalty: i64,
    pub substituted: bool,
    pub off_day: bool,
}

/// A decision: pick one candidate or leave the item out.
#[derive(Debug, Clone)]
pub struct Item {
    pub kind: ItemKind,
    pub label: String,
    pub weight: i64,
    pub schedule_from: Ms,
    pub seq: u64,
    /// The request revision the candidates were built from.
    pub revision: u64,
    /// Ranked best first.
    pub candidates: Vec<Candidate>,
    /// Whether any slot fit the preferences before obstacles were applied.
    pub had_geometry: bool,
}

impl Item {
    /// A request item with no candidates yet.
    fn for_request(request: &Request) -> Self {
        Item {
            kind: ItemKind::Request {
                request: request.id,
            },
            label: format!("{} request", request.kind),
            weight: priority_weight(request.priority),
            schedule_from: request.schedule.start,
            seq: request.seq,
            revision: request.revision,
            candidates: Vec::new(),
            had_geometry: false,
        }
    }

    pub fn net_value(&self, candidate: usize) -> i64 {
        self.weight - self.candidates[candidate].penalty
    }

    pub fn best_value(&self) -> i64 {
        self.candidates
            .first()
            .map_or(0, |c| (self.weight - c.penalty).max(0))
    }
}

/// Everything the solver sees. Times are minutes since the epoch.
#[derive(Debug, Clone)]
pub struct ProblemModel {
    pub mode: SolveMode,
    pub horizon: Option<Span>,
    pub facilities: Vec<Facility>,
    pub mandatory: Vec<FixedInterval>,
    /// In search order.
    pub items: Vec<Item>,
    pub checked_bookings: usize,
    pub checked_requests: usize,
    /// False when the budget ran out before every request got its
    /// candidates.
    pub complete: bool,
}

impl ProblemModel {
    pub fn checked(&self) -> usize {
        self.checked_bookings + self.checked_requests
    }
}

struct Context<'a> {
    cfg: &'a ScheduleConfig,
    facilities: &'a [Facility],
    /// Per facility, sorted disjoint minute spans nothing else may use.
    obstacles: Vec<Vec<Span>>,
    budget: &'a Budget,
    examined: u64,
    expired: bool,
}

/// Build the problem for `mode` from a snapshot. `horizon` (milliseconds)
/// limits which bookings matter and clips every request's period.
///
/// Candidate generation stops when `budget` expires; the model is then
/// marked incomplete and the remaining requests carry no candidates.
pub fn formulate(
    snapshot: &Snapshot,
    mode: SolveMode,
    horizon: Option<Span>,
    cfg: &ScheduleConfig,
    budget: &Budget,
) -> ProblemModel {
    let mut facilities = snapshot.facilities.clone();
    facilities.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    let index: HashMap<Ulid, usize> = facilities
        .iter()
        .enumerate()
        .map(|(i, f)| (f.id, i))
        .collect();

    let mut mandatory = Vec::new();
    let mut items = Vec::new();
    let mut checked_bookings = 0;

    for booking in &snapshot.bookings {
        if !booking.occupies() || horizon.is_some_and(|h| !h.overlaps(&booking.span)) {
            continue;
        }
        let Some(&facility) = index.get(&booking.facility_id) else {
            warn!(booking = %booking.id, "booking references unknown facility, skipped");
            continue;
        };
        checked_bookings += 1;
        let span = ms_to_minutes(&booking.span);
        if span.is_empty() {
            continue;
        }

        if booking.is_fixed || mode != SolveMode::Replan {
            mandatory.push(FixedInterval {
                owner: booking.id,
                label: booking.title.clone(),
                facility,
                span,
                is_fixed: booking.is_fixed,
            });
        } else {
            let rigid = booking
                .team_id
                .and_then(|t| snapshot.team_flexibility.get(&t))
                .is_some_and(|flexible| !flexible);
            items.push(Item {
                kind: ItemKind::Movable {
                    booking: booking.id,
                },
                label: booking.title.clone(),
                weight: if rigid { KEEP_RIGID_TEAM } else { KEEP_FLEXIBLE },
                schedule_from: booking.span.start,
                seq: 0,
                revision: 0,
                candidates: vec![Candidate {
                    facility,
                    occurrences: vec![span],
                    dropped: 0,
                    penalty: 0,
                    substituted: false,
                    off_day: false,
                }],
                had_geometry: true,
            });
        }
    }

    let mut obstacles = vec![Vec::new(); facilities.len()];
    for interval in &mandatory {
        obstacles[interval.facility].push(interval.span);
    }
    for list in &mut obstacles {
        list.sort_by_key(|s| s.start);
        *list = merge_overlapping(list);
    }

    let mut checked_requests = 0;
    let mut complete = true;
    if mode != SolveMode::Feasibility {
        let mut ctx = Context {
            cfg,
            facilities: &facilities,
            obstacles,
            budget,
            examined: 0,
            expired: false,
        };
        for request in &snapshot.requests {
            if request.status != RequestStatus::Pending {
                continue;
            }
            checked_requests += 1;
            if !complete {
                items.push(Item::for_request(request));
                continue;
            }
            match ctx.request_item(request, horizon) {
                Some(item) => items.push(item),
                None => {
                    warn!(request = %request.id, "budget ran out while formulating");
                    complete = false;
                    items.push(Item::for_request(request));
                }
            }
        }
    }

    items.sort_by_key(|item| {
        (
            Reverse(item.weight),
            item.schedule_from,
            item.seq,
            match item.kind {
                ItemKind::Movable { booking } => booking,
                ItemKind::Request { request } => request,
            },
        )
    });

    ProblemModel {
        mode,
        horizon,
        facilities,
        mandatory,
        items,
        checked_bookings,
        checked_requests,
        complete,
    }
}

/// Weekday of a local day number (days since the epoch).
fn weekday_of(day: i64) -> Weekday {
    DateTime::from_timestamp_millis(day * DAY_MS).map_or(Weekday::Thu, |d| d.weekday())
}

fn rank(c: &Candidate) -> (i64, i64, usize) {
    (
        c.penalty,
        c.occurrences.first().map_or(0, |o| o.start),
        c.facility,
    )
}

/// Drop all but the best `MAX_CANDIDATES_PER_REQUEST` once twice that many
/// have piled up, so memory stays bounded while generating.
fn keep_best(candidates: &mut Vec<Candidate>) {
    if candidates.len() >= 2 * MAX_CANDIDATES_PER_REQUEST {
        candidates.select_nth_unstable_by_key(MAX_CANDIDATES_PER_REQUEST, rank);
        candidates.truncate(MAX_CANDIDATES_PER_REQUEST);
    }
}

impl Context<'_> {
    /// True once the budget has run out. Polls the clock every
    /// `BUDGET_CHECK_EVERY` calls.
    fn out_of_budget(&mut self) -> bool {
        if !self.expired && self.examined % BUDGET_CHECK_EVERY == 0 {
            self.expired = self.budget.expired();
        }
        self.examined += 1;
        self.expired
    }

    /// Ranked candidates for one request, or `None` if the budget ran out.
    fn request_item(&mut self, request: &Request, horizon: Option<Span>) -> Option<Item> {
        let mut item = Item::for_request(request);

        let duration = request.duration_minutes;
        let window = request.preferred_window;
        if duration <= 0 || !window.is_valid() {
            warn!(request = %request.id, "malformed request left unplaced");
            return Some(item);
        }
        let period = match horizon {
            Some(h) => request.schedule.intersect(&h),
            None => Some(request.schedule),
        };
        let Some(period) = period else {
            return Some(item);
        };
        // Occurrences must lie inside the period, so round its start up.
        let period = Span::new(
            period.start.div_euclid(MINUTE_MS) + i64::from(period.start.rem_euclid(MINUTE_MS) != 0),
            period.end.div_euclid(MINUTE_MS),
        );
        if period.is_empty() {
            return Some(item);
        }

        let offset = self.cfg.utc_offset_minutes;
        let first_day = (period.start + offset).div_euclid(MINUTES_PER_DAY);
        let last_day = (period.end - 1 + offset).div_euclid(MINUTES_PER_DAY);
        let step = self.cfg.slot_step_minutes.max(1);
        let starts: Vec<i64> = (window.earliest_start..)
            .step_by(step as usize)
            .take_while(|s| s + duration <= window.latest_end)
            .collect();
        let facilities: Vec<usize> = self
            .facilities
            .iter()
            .enumerate()
            .filter(|(_, f)| request.preferred_facility == Some(f.id) || request.kind.suits(f.kind))
            .map(|(i, _)| i)
            .collect();
        let occurrence = |day: i64, start: i64| {
            let s = day * MINUTES_PER_DAY - offset + start;
            Span::new(s, s + duration)
        };

        match request.recurrence {
            Recurrence::OneTime => {
                for day in first_day..=last_day {
                    let weekday = weekday_of(day);
                    for &start in &starts {
                        if self.out_of_budget() {
                            return None;
                        }
                        let occ = occurrence(day, start);
                        if !period.contains_span(&occ) {
                            continue;
                        }
                        for &f in &facilities {
                            if self.out_of_budget() {
                                return None;
                            }
                            item.had_geometry = true;
                            if overlaps_any(&self.obstacles[f], &occ) {
                                continue;
                            }
                            item.candidates.push(self.candidate(
                                request,
                                f,
                                weekday,
                                start,
                                vec![occ],
                                0,
                            ));
                            keep_best(&mut item.candidates);
                        }
                    }
                }
            }
            Recurrence::Weekly => {
                for first in first_day..(first_day + 7).min(last_day + 1) {
                    let weekday = weekday_of(first);
                    for &start in &starts {
                        if self.out_of_budget() {
                            return None;
                        }
                        let occs: Vec<Span> = (first..=last_day)
                            .step_by(7)
                            .map(|day| occurrence(day, start))
                            .filter(|occ| period.contains_span(occ))
                            .collect();
                        if occs.is_empty() {
                            continue;
                        }
                        for &f in &facilities {
                            if self.out_of_budget() {
                                return None;
                            }
                            item.had_geometry = true;
                            let total = occs.len();
                            let kept: Vec<Span> = occs
                                .iter()
                                .copied()
                                .filter(|occ| !overlaps_any(&self.obstacles[f], occ))
                                .collect();
                            if kept.is_empty() {
                                continue;
                            }
                            let dropped = total - kept.len();
                            let mut candidate =
                                self.candidate(request, f, weekday, start, kept, dropped);
                            candidate.penalty +=
                                PENALTY_DROPPED_OCCURRENCES * dropped as i64 / total as i64;
                            item.candidates.push(candidate);
                            keep_best(&mut item.candidates);
                        }
                    }
                }
            }
        }

        item.candidates.sort_by_key(rank);
        item.candidates.truncate(MAX_CANDIDATES_PER_REQUEST);
        item.candidates.shrink_to_fit();
        Some(item)
    }

    fn candidate(
        &self,
        request: &Request,
        facility: usize,
        weekday: Weekday,
        start: i64,
        occurrences: Vec<Span>,
        dropped: usize,
    ) -> Candidate {
        let substituted = request
            .preferred_facility
            .is_some_and(|pf| self.facilities[facility].id != pf);
        let off_day = !request.preferred_days.is_empty() && !request.preferred_days.contains(weekday);
        let step = self.cfg.slot_step_minutes.max(1);
        let lateness = ((start - request.preferred_window.earliest_start) / step).min(PENALTY_LATENESS_CAP);

        let mut penalty = lateness;
        if substituted {
            penalty += PENALTY_SUBSTITUTE_FACILITY;
        }
        if off_day {
            penalty += PENALTY_OFF_DAY;
        }
        Candidate {
            facility,
            occurrences,
            dropped,
            penalty,
            substituted,
            off_day,
        }
    }
}
