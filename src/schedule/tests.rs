use std::time::{Duration, Instant};

use chrono::Weekday;
use ulid::Ulid;

use super::formulate::{KEEP_FLEXIBLE, PENALTY_OFF_DAY, PENALTY_SUBSTITUTE_FACILITY, WEIGHT_HIGH};
use super::*;
use crate::config::ScheduleConfig;
use crate::limits::MAX_CANDIDATES_PER_REQUEST;
use crate::model::*;

/// 2026-03-02T00:00Z, a Monday.
const MON: Ms = 1_772_409_600_000;

fn at(day: i64, hour: i64, minute: i64) -> Ms {
    MON + day * DAY_MS + hour * HOUR_MS + minute * MINUTE_MS
}

fn facility(name: &str, kind: FacilityKind) -> Facility {
    Facility {
        id: Ulid::new(),
        name: name.into(),
        kind,
    }
}

fn booking(facility: &Facility, title: &str, start: Ms, end: Ms, is_fixed: bool) -> Booking {
    Booking {
        id: Ulid::new(),
        title: title.into(),
        facility_id: facility.id,
        span: Span::new(start, end),
        is_fixed,
        kind: EventKind::AdultTraining,
        status: BookingStatus::Published,
        team_id: None,
        request_id: None,
    }
}

fn request(seq: u64, priority: Priority, duration: i64, window: (i64, i64), days: (i64, i64)) -> Request {
    Request {
        id: Ulid::new(),
        seq,
        revision: seq,
        team_id: Ulid::new(),
        kind: EventKind::AdultTraining,
        duration_minutes: duration,
        recurrence: Recurrence::OneTime,
        preferred_facility: None,
        preferred_days: DaySet::EMPTY,
        preferred_window: TimeWindow::new(window.0 * 60, window.1 * 60),
        priority,
        schedule: Span::new(at(days.0, 0, 0), at(days.1, 0, 0)),
        status: RequestStatus::Pending,
        booking_id: None,
        rejection_reason: None,
    }
}

fn snapshot(facilities: &[&Facility], bookings: Vec<Booking>, requests: Vec<Request>) -> Snapshot {
    Snapshot {
        taken_at: MON,
        facilities: facilities.iter().map(|f| (*f).clone()).collect(),
        bookings,
        requests,
        team_flexibility: Default::default(),
    }
}

fn run_with(snap: &Snapshot, mode: SolveMode, cfg: &ScheduleConfig) -> ScheduleDecision {
    let budget = Budget::new(Duration::from_secs(10));
    let model = formulate(snap, mode, None, cfg, &budget);
    let outcome = solve(&model, &budget);
    report(&model, &outcome)
}

fn run(snap: &Snapshot, mode: SolveMode) -> ScheduleDecision {
    run_with(snap, mode, &ScheduleConfig::default())
}

// ── Feasibility ──────────────────────────────────────────────────

#[test]
fn disjoint_bookings_are_feasible() {
    let pitch = facility("Training Pitch", FacilityKind::Pitch);
    let snap = snapshot(
        &[&pitch],
        vec![
            booking(&pitch, "U14 Boys", at(0, 18, 0), at(0, 19, 0), false),
            booking(&pitch, "U12 Girls", at(0, 19, 0), at(0, 20, 0), true),
        ],
        vec![],
    );
    let decision = run(&snap, SolveMode::Feasibility);
    assert!(decision.feasible);
    assert_eq!(decision.status, SolverStatus::Feasible);
    assert_eq!(decision.checked, 2);
    assert!(decision.message.contains("2 bookings checked"));
}

#[test]
fn overlapping_bookings_are_infeasible_with_both_named() {
    let pitch = facility("Training Pitch", FacilityKind::Pitch);
    let a = booking(&pitch, "U14 Boys Training", at(0, 18, 0), at(0, 19, 30), false);
    let b = booking(&pitch, "U12 Girls Training", at(0, 19, 0), at(0, 20, 0), true);
    let (a_id, b_id) = (a.id, b.id);
    let snap = snapshot(&[&pitch], vec![a, b], vec![]);

    let decision = run(&snap, SolveMode::Feasibility);
    assert!(!decision.feasible);
    assert_eq!(decision.status, SolverStatus::Infeasible);
    let conflict = decision.conflict.unwrap();
    assert_eq!(conflict.facility_id, pitch.id);
    let mut pair = [conflict.first, conflict.second];
    pair.sort();
    let mut expected = [a_id, b_id];
    expected.sort();
    assert_eq!(pair, expected);
    assert!(decision.message.contains("U14 Boys Training"));
    assert!(decision.message.contains("U12 Girls Training"));
    assert!(decision.message.contains("Training Pitch"));
}

#[test]
fn same_time_on_different_facilities_is_fine() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let gym = facility("Gym", FacilityKind::Gym);
    let snap = snapshot(
        &[&pitch, &gym],
        vec![
            booking(&pitch, "Seniors", at(0, 18, 0), at(0, 20, 0), true),
            booking(&gym, "Strength", at(0, 18, 0), at(0, 20, 0), true),
        ],
        vec![],
    );
    assert!(run(&snap, SolveMode::Feasibility).feasible);
}

#[test]
fn sub_minute_overlap_is_truncated_away() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    // Ends 30s into the next booking's first minute.
    let a = booking(&pitch, "A", at(0, 18, 0), at(0, 19, 0) + 30_000, false);
    let b = booking(&pitch, "B", at(0, 19, 0), at(0, 20, 0), false);
    let snap = snapshot(&[&pitch], vec![a, b], vec![]);
    assert!(run(&snap, SolveMode::Feasibility).feasible);
}

#[test]
fn cancelled_bookings_are_ignored() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let mut cancelled = booking(&pitch, "Old", at(0, 18, 0), at(0, 20, 0), true);
    cancelled.status = BookingStatus::Cancelled;
    let snap = snapshot(
        &[&pitch],
        vec![
            cancelled,
            booking(&pitch, "New", at(0, 18, 0), at(0, 20, 0), true),
        ],
        vec![],
    );
    let decision = run(&snap, SolveMode::Feasibility);
    assert!(decision.feasible);
    assert_eq!(decision.checked, 1);
}

#[test]
fn horizon_limits_checked_bookings() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let snap = snapshot(
        &[&pitch],
        vec![
            booking(&pitch, "A", at(10, 18, 0), at(10, 20, 0), true),
            booking(&pitch, "B", at(10, 19, 0), at(10, 21, 0), true),
        ],
        vec![],
    );
    let cfg = ScheduleConfig::default();
    let horizon = Span::new(at(0, 0, 0), at(7, 0, 0));
    let budget = Budget::new(Duration::from_secs(1));
    let model = formulate(&snap, SolveMode::Feasibility, Some(horizon), &cfg, &budget);
    let outcome = solve(&model, &budget);
    assert_eq!(outcome.status, SolverStatus::Feasible);
    assert_eq!(model.checked(), 0);
}

// ── Allocation ───────────────────────────────────────────────────

#[test]
fn higher_priority_wins_the_only_slot() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let low = request(1, Priority::Low, 120, (18, 20), (0, 1));
    let high = request(2, Priority::High, 120, (18, 20), (0, 1));
    let (low_id, high_id) = (low.id, high.id);
    let snap = snapshot(&[&pitch], vec![], vec![low, high]);

    let decision = run(&snap, SolveMode::Allocation);
    assert!(decision.feasible);
    assert_eq!(decision.status, SolverStatus::Optimal);

    let won = decision.resolution(high_id).unwrap();
    assert_eq!(won.status, RequestStatus::Scheduled);
    let placement = won.placement.as_ref().unwrap();
    assert_eq!(placement.occurrences, vec![Span::new(at(0, 18, 0), at(0, 20, 0))]);

    let lost = decision.resolution(low_id).unwrap();
    assert_eq!(lost.status, RequestStatus::Rejected);
    assert_eq!(lost.reason, Some(RejectionReason::ResourceSaturated));
    // Reported in creation order.
    assert_eq!(decision.resolutions[0].request_id, low_id);
}

#[test]
fn window_too_short_means_no_slot_within_preferences() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let r = request(1, Priority::High, 180, (18, 20), (0, 7));
    let id = r.id;
    let snap = snapshot(&[&pitch], vec![], vec![r]);
    let decision = run(&snap, SolveMode::Allocation);
    let res = decision.resolution(id).unwrap();
    assert_eq!(res.status, RequestStatus::Rejected);
    assert_eq!(res.reason, Some(RejectionReason::NoSlotWithinPreferences));
}

#[test]
fn fixed_booking_blocks_slot_in_allocation() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let fixed = booking(&pitch, "County Final", at(0, 18, 0), at(0, 20, 0), true);
    let r = request(1, Priority::High, 60, (18, 20), (0, 1));
    let id = r.id;
    let snap = snapshot(&[&pitch], vec![fixed], vec![r]);
    let res = run(&snap, SolveMode::Allocation).resolution(id).cloned().unwrap();
    assert_eq!(res.reason, Some(RejectionReason::ResourceSaturated));
}

#[test]
fn earliest_start_on_earliest_day_is_preferred() {
    let hall = facility("Hall", FacilityKind::Hall);
    let r = request(1, Priority::Medium, 60, (17, 21), (0, 3));
    let id = r.id;
    let snap = snapshot(&[&hall], vec![], vec![r]);
    let placement = run(&snap, SolveMode::Allocation)
        .resolution(id)
        .unwrap()
        .placement
        .clone()
        .unwrap();
    assert_eq!(placement.occurrences, vec![Span::new(at(0, 17, 0), at(0, 18, 0))]);
    assert_eq!(placement.penalty, 0);
}

#[test]
fn lateness_is_penalized_per_slot_step() {
    let hall = facility("Hall", FacilityKind::Hall);
    let r = request(1, Priority::Medium, 60, (17, 21), (0, 1));
    let id = r.id;
    let busy = booking(&hall, "Busy", at(0, 17, 0), at(0, 18, 0), false);
    let snap = snapshot(&[&hall], vec![busy], vec![r]);
    let placement = run(&snap, SolveMode::Allocation)
        .resolution(id)
        .unwrap()
        .placement
        .clone()
        .unwrap();
    assert_eq!(placement.occurrences, vec![Span::new(at(0, 18, 0), at(0, 19, 0))]);
    // Four 15-minute steps after the window opens.
    assert_eq!(placement.penalty, 4);
}

#[test]
fn preferred_facility_is_used_and_substituted_when_blocked() {
    let a = facility("Pitch A", FacilityKind::Pitch);
    let b = facility("Pitch B", FacilityKind::Pitch);

    let mut r = request(1, Priority::Medium, 60, (18, 19), (0, 1));
    r.preferred_facility = Some(b.id);
    let id = r.id;
    let snap = snapshot(&[&a, &b], vec![], vec![r.clone()]);
    let placement = run(&snap, SolveMode::Allocation)
        .resolution(id)
        .unwrap()
        .placement
        .clone()
        .unwrap();
    assert_eq!(placement.facility_id, b.id);
    assert!(!placement.substituted_facility);

    let blocked = booking(&b, "Fixture", at(0, 18, 0), at(0, 19, 0), true);
    let snap = snapshot(&[&a, &b], vec![blocked], vec![r]);
    let placement = run(&snap, SolveMode::Allocation)
        .resolution(id)
        .unwrap()
        .placement
        .clone()
        .unwrap();
    assert_eq!(placement.facility_id, a.id);
    assert!(placement.substituted_facility);
    assert_eq!(placement.penalty, PENALTY_SUBSTITUTE_FACILITY);
}

#[test]
fn unsuitable_facilities_are_not_candidates() {
    let gym = facility("Gym", FacilityKind::Gym);
    let mut r = request(1, Priority::High, 120, (18, 21), (0, 7));
    r.kind = EventKind::Match;
    let id = r.id;
    let snap = snapshot(&[&gym], vec![], vec![r]);
    let res = run(&snap, SolveMode::Allocation).resolution(id).cloned().unwrap();
    assert_eq!(res.reason, Some(RejectionReason::NoSlotWithinPreferences));
}

#[test]
fn off_day_is_penalized_but_allowed() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let mut r = request(1, Priority::Medium, 60, (18, 19), (0, 2));
    r.preferred_days = [Weekday::Mon].into_iter().collect();
    let id = r.id;
    let fixed = booking(&pitch, "Monday fixture", at(0, 18, 0), at(0, 19, 0), true);
    let snap = snapshot(&[&pitch], vec![fixed], vec![r]);
    let placement = run(&snap, SolveMode::Allocation)
        .resolution(id)
        .unwrap()
        .placement
        .clone()
        .unwrap();
    assert!(placement.off_day);
    assert_eq!(placement.penalty, PENALTY_OFF_DAY);
    assert_eq!(placement.occurrences[0].start, at(1, 18, 0));
}

#[test]
fn utc_offset_shifts_local_window() {
    let hall = facility("Hall", FacilityKind::Hall);
    let r = request(1, Priority::Medium, 60, (18, 19), (0, 2));
    let id = r.id;
    let snap = snapshot(&[&hall], vec![], vec![r]);
    let cfg = ScheduleConfig {
        utc_offset_minutes: 60,
        ..ScheduleConfig::default()
    };
    let decision = run_with(&snap, SolveMode::Allocation, &cfg);
    let placement = decision.resolution(id).unwrap().placement.clone().unwrap();
    // 18:00 at UTC+1 is 17:00 UTC.
    assert_eq!(placement.occurrences[0].start, at(0, 17, 0));
}

#[test]
fn search_beats_greedy_when_it_pays() {
    let hall = facility("Hall", FacilityKind::Hall);
    let cfg = ScheduleConfig {
        slot_step_minutes: 60,
        ..ScheduleConfig::default()
    };
    // Greedy gives `a` 18:00 and leaves `b` nowhere to go.
    let a = request(1, Priority::High, 60, (18, 20), (0, 1));
    let b = request(2, Priority::Low, 60, (18, 19), (0, 1));
    let (a_id, b_id) = (a.id, b.id);
    let snap = snapshot(&[&hall], vec![], vec![a, b]);

    let decision = run_with(&snap, SolveMode::Allocation, &cfg);
    assert_eq!(decision.status, SolverStatus::Optimal);
    let pa = decision.resolution(a_id).unwrap().placement.clone().unwrap();
    let pb = decision.resolution(b_id).unwrap().placement.clone().unwrap();
    assert_eq!(pa.occurrences[0].start, at(0, 19, 0));
    assert_eq!(pb.occurrences[0].start, at(0, 18, 0));
    assert_eq!(decision.objective, WEIGHT_HIGH - 1 + 1_000);
}

#[test]
fn weekly_request_drops_blocked_weeks() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let mut r = request(1, Priority::Medium, 60, (18, 19), (0, 22));
    r.recurrence = Recurrence::Weekly;
    r.preferred_days = [Weekday::Mon].into_iter().collect();
    let id = r.id;

    // Every evening except Mondays is taken, plus the second Monday.
    let mut bookings: Vec<Booking> = (0..22)
        .filter(|day| day % 7 != 0)
        .map(|day| booking(&pitch, "Fixture", at(day, 18, 0), at(day, 19, 0), true))
        .collect();
    bookings.push(booking(&pitch, "Cup Tie", at(7, 18, 0), at(7, 19, 0), true));

    let snap = snapshot(&[&pitch], bookings, vec![r]);
    let decision = run(&snap, SolveMode::Allocation);
    let res = decision.resolution(id).unwrap();
    assert_eq!(res.status, RequestStatus::PartiallyScheduled);
    let placement = res.placement.as_ref().unwrap();
    assert_eq!(
        placement.occurrences,
        vec![
            Span::new(at(0, 18, 0), at(0, 19, 0)),
            Span::new(at(14, 18, 0), at(14, 19, 0)),
            Span::new(at(21, 18, 0), at(21, 19, 0)),
        ]
    );
    assert_eq!(placement.dropped_occurrences, 1);
    assert!(decision.message.contains("1 partially"));
}

#[test]
fn weekly_request_keeps_every_week_when_free() {
    let hall = facility("Hall", FacilityKind::Hall);
    let mut r = request(1, Priority::Low, 90, (19, 21), (0, 28));
    r.recurrence = Recurrence::Weekly;
    r.preferred_days = [Weekday::Wed].into_iter().collect();
    let id = r.id;
    let snap = snapshot(&[&hall], vec![], vec![r]);
    let decision = run(&snap, SolveMode::Allocation);
    let res = decision.resolution(id).unwrap();
    assert_eq!(res.status, RequestStatus::Scheduled);
    let starts: Vec<Ms> = res
        .placement
        .as_ref()
        .unwrap()
        .occurrences
        .iter()
        .map(|o| o.start)
        .collect();
    assert_eq!(
        starts,
        vec![at(2, 19, 0), at(9, 19, 0), at(16, 19, 0), at(23, 19, 0)]
    );
}

#[test]
fn allocation_is_deterministic() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let hall = facility("Hall", FacilityKind::Hall);
    let requests: Vec<Request> = (0..6)
        .map(|i| request(i, Priority::Medium, 60, (18, 20), (0, 2)))
        .collect();
    let snap = snapshot(&[&pitch, &hall], vec![], requests);
    let first = run(&snap, SolveMode::Allocation);
    let second = run(&snap, SolveMode::Allocation);
    assert_eq!(first.resolutions, second.resolutions);
    assert_eq!(first.placed(), 6);
}

// ── Replan ───────────────────────────────────────────────────────

fn replan_fixture(team_flexible: Option<bool>) -> (Snapshot, Ulid, [Ulid; 2]) {
    let hall = facility("Hall", FacilityKind::Hall);
    let mut movable = booking(&hall, "Committee", at(0, 18, 0), at(0, 20, 0), false);
    let mut snap = snapshot(&[&hall], vec![], vec![]);
    if let Some(flexible) = team_flexible {
        let team = Ulid::new();
        movable.team_id = Some(team);
        snap.team_flexibility.insert(team, flexible);
    }
    let a = request(1, Priority::High, 60, (18, 19), (0, 1));
    let b = request(2, Priority::High, 60, (19, 20), (0, 1));
    let ids = [a.id, b.id];
    let booking_id = movable.id;
    snap.bookings.push(movable);
    snap.requests = vec![a, b];
    (snap, booking_id, ids)
}

#[test]
fn replan_displaces_flexible_booking_for_more_value() {
    let (snap, booking_id, [a, b]) = replan_fixture(None);
    let decision = run(&snap, SolveMode::Replan);
    assert_eq!(decision.displaced, vec![booking_id]);
    assert!(decision.resolution(a).unwrap().placement.is_some());
    assert!(decision.resolution(b).unwrap().placement.is_some());
    assert!(2 * WEIGHT_HIGH > KEEP_FLEXIBLE);
}

#[test]
fn replan_keeps_rigid_team_booking() {
    let (snap, _, [a, b]) = replan_fixture(Some(false));
    let decision = run(&snap, SolveMode::Replan);
    assert!(decision.displaced.is_empty());
    assert_eq!(
        decision.resolution(a).unwrap().reason,
        Some(RejectionReason::ResourceSaturated)
    );
    assert!(decision.resolution(b).unwrap().placement.is_none());
}

#[test]
fn allocation_never_displaces() {
    let (snap, _, [a, _]) = replan_fixture(None);
    let decision = run(&snap, SolveMode::Allocation);
    assert!(decision.displaced.is_empty());
    assert_eq!(decision.placed(), 0);
    assert_eq!(
        decision.resolution(a).unwrap().reason,
        Some(RejectionReason::ResourceSaturated)
    );
}

// ── Budget ───────────────────────────────────────────────────────

#[test]
fn exhausted_budget_without_solution_reports_timed_out() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let r = request(1, Priority::High, 60, (18, 20), (0, 1));
    let id = r.id;
    let snap = snapshot(&[&pitch], vec![], vec![r]);
    let budget = Budget::new(Duration::ZERO);
    let model = formulate(&snap, SolveMode::Allocation, None, &ScheduleConfig::default(), &budget);
    assert!(!model.complete);
    let outcome = solve(&model, &budget);
    let decision = report(&model, &outcome);

    assert_eq!(decision.status, SolverStatus::TimedOut);
    assert!(!decision.feasible);
    assert_eq!(
        decision.resolution(id).unwrap().reason,
        Some(RejectionReason::SearchIncomplete)
    );
}

#[test]
fn cancelled_search_stops() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let snap = snapshot(&[&pitch], vec![], vec![request(1, Priority::Low, 60, (8, 22), (0, 7))]);
    let budget = Budget::new(Duration::from_secs(30));
    let model = formulate(&snap, SolveMode::Allocation, None, &ScheduleConfig::default(), &budget);
    budget.cancel.cancel();
    assert_eq!(solve(&model, &budget).status, SolverStatus::TimedOut);
}

#[test]
fn node_limit_keeps_best_assignment_so_far() {
    let pitch = facility("Main Pitch", FacilityKind::Pitch);
    let hall = facility("Hall", FacilityKind::Hall);
    let requests: Vec<Request> = (0..40)
        .map(|i| request(i, Priority::Medium, 60, (17, 22), (0, 1)))
        .collect();
    let snap = snapshot(&[&pitch, &hall], vec![], requests);
    let mut budget = Budget::new(Duration::from_secs(30));
    budget.node_limit = 5_000;
    let model = formulate(&snap, SolveMode::Allocation, None, &ScheduleConfig::default(), &budget);
    let outcome = solve(&model, &budget);
    assert_eq!(outcome.status, SolverStatus::TimedOut);
    let decision = report(&model, &outcome);
    assert!(decision.feasible);
    // Two facilities, five free hours each.
    assert_eq!(decision.placed(), 10);
}

fn halls(n: usize) -> Vec<Facility> {
    (0..n)
        .map(|i| facility(&format!("Hall {i}"), FacilityKind::Hall))
        .collect()
}

#[test]
fn formulation_stops_at_the_budget() {
    let halls = halls(10);
    let refs: Vec<&Facility> = halls.iter().collect();
    let requests: Vec<Request> = (0..50)
        .map(|i| request(i, Priority::Medium, 60, (0, 24), (0, 365)))
        .collect();
    let snap = snapshot(&refs, vec![], requests);

    let started = Instant::now();
    let budget = Budget::new(Duration::from_millis(50));
    let model = formulate(&snap, SolveMode::Allocation, None, &ScheduleConfig::default(), &budget);
    let outcome = solve(&model, &budget);
    let decision = report(&model, &outcome);

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!model.complete);
    assert_eq!(model.checked_requests, 50);
    assert_eq!(decision.status, SolverStatus::TimedOut);
    assert!(!decision.feasible);
    // Formulation time is part of the reported run.
    assert!(decision.elapsed_ms >= 50);
    assert!(
        decision
            .resolutions
            .iter()
            .all(|r| r.reason == Some(RejectionReason::SearchIncomplete))
    );
}

#[test]
fn candidates_are_capped_while_generating() {
    let halls = halls(10);
    let refs: Vec<&Facility> = halls.iter().collect();
    let snap = snapshot(&refs, vec![], vec![request(1, Priority::Medium, 60, (0, 24), (0, 365))]);

    let budget = Budget::new(Duration::from_secs(60));
    let model = formulate(&snap, SolveMode::Allocation, None, &ScheduleConfig::default(), &budget);
    assert!(model.complete);
    let candidates = &model.items[0].candidates;
    assert_eq!(candidates.len(), MAX_CANDIDATES_PER_REQUEST);
    assert!(candidates.capacity() <= 2 * MAX_CANDIDATES_PER_REQUEST);

    let key = |c: &Candidate| (c.penalty, c.occurrences[0].start, c.facility);
    assert!(candidates.windows(2).all(|w| key(&w[0]) <= key(&w[1])));
    // The best slot survives: first day, window opening, first facility.
    assert_eq!(candidates[0].penalty, 0);
    assert_eq!(candidates[0].occurrences[0], ms_to_minutes(&Span::new(at(0, 0, 0), at(0, 1, 0))));
    assert_eq!(candidates[0].facility, 0);
}
