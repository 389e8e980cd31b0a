use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::limits::MAX_SOLVER_NODES;
use crate::model::Span;

use super::SolveMode;
use super::formulate::ProblemModel;

/// Solver verdict, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SolverStatus {
    /// Search completed; the assignment maximizes the objective.
    Optimal,
    /// Constraints hold; nothing was optimized.
    Feasible,
    /// Mandatory bookings overlap.
    Infeasible,
    /// Budget ran out before the search completed.
    TimedOut,
}

impl SolverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverStatus::Optimal => "OPTIMAL",
            SolverStatus::Feasible => "FEASIBLE",
            SolverStatus::Infeasible => "INFEASIBLE",
            SolverStatus::TimedOut => "TIMED_OUT",
        }
    }
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two mandatory intervals on one facility that cannot coexist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPair {
    pub facility: usize,
    pub first: usize,
    pub second: usize,
}

/// Limits on one run, formulation included. Whichever trips first stops it.
#[derive(Debug, Clone)]
pub struct Budget {
    pub started: Instant,
    pub deadline: Instant,
    pub node_limit: u64,
    pub cancel: CancellationToken,
}

impl Budget {
    pub fn new(time: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + time,
            node_limit: MAX_SOLVER_NODES,
            cancel: CancellationToken::new(),
        }
    }

    /// Out of wall-clock time or cancelled.
    pub fn expired(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    fn exhausted(&self, nodes: u64) -> bool {
        nodes >= self.node_limit || self.expired()
    }
}

#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub status: SolverStatus,
    /// Chosen candidate per item, in model item order. `None` when the
    /// search stopped before finding any assignment or the model is infeasible.
    pub assignment: Option<Vec<Option<usize>>>,
    pub objective: i64,
    pub conflict: Option<ConflictPair>,
    pub nodes: u64,
    /// Since the budget started, so formulation is counted too.
    pub elapsed: Duration,
}

/// First overlapping pair of mandatory intervals, facility by facility.
fn mandatory_conflict(model: &ProblemModel) -> Option<ConflictPair> {
    let mut order: Vec<usize> = (0..model.mandatory.len()).collect();
    order.sort_by_key(|&i| {
        let m = &model.mandatory[i];
        (m.facility, m.span.start, m.span.end, m.owner)
    });

    // Until the first overlap everything seen is disjoint, so the previous
    // interval on the same facility is the one reaching furthest.
    order.windows(2).find_map(|pair| {
        let (a, b) = (&model.mandatory[pair[0]], &model.mandatory[pair[1]]);
        (a.facility == b.facility && b.span.start < a.span.end).then(|| ConflictPair {
            facility: a.facility,
            first: pair[0],
            second: pair[1],
        })
    })
}

/// Per-facility occupancy keyed by start. Entries never overlap.
struct Occupancy {
    facilities: Vec<BTreeMap<i64, i64>>,
}

impl Occupancy {
    fn new(model: &ProblemModel) -> Self {
        let mut facilities = vec![BTreeMap::new(); model.facilities.len()];
        for m in &model.mandatory {
            facilities[m.facility].insert(m.span.start, m.span.end);
        }
        Self { facilities }
    }

    fn is_free(&self, facility: usize, span: &Span) -> bool {
        match self.facilities[facility].range(..span.end).next_back() {
            Some((_, &end)) => end <= span.start,
            None => true,
        }
    }

    /// Occupy every span or none of them.
    fn try_place(&mut self, facility: usize, spans: &[Span]) -> bool {
        if !spans.iter().all(|s| self.is_free(facility, s)) {
            return false;
        }
        for s in spans {
            self.facilities[facility].insert(s.start, s.end);
        }
        true
    }

    fn release(&mut self, facility: usize, spans: &[Span]) {
        for s in spans {
            self.facilities[facility].remove(&s.start);
        }
    }
}

/// Search the model. Deterministic for a given model and budget outcome.
///
/// Mandatory intervals are checked first; an overlap is reported as
/// infeasible with the offending pair. Otherwise items are explored depth
/// first in model order, each trying its ranked candidates before rejection,
/// so the first leaf reached is the greedy priority-ordered placement.
/// Branches whose optimistic value cannot beat the incumbent are pruned.
pub fn solve(model: &ProblemModel, budget: &Budget) -> SolveOutcome {
    if let Some(conflict) = mandatory_conflict(model) {
        return SolveOutcome {
            status: SolverStatus::Infeasible,
            assignment: None,
            objective: 0,
            conflict: Some(conflict),
            nodes: 0,
            elapsed: budget.started.elapsed(),
        };
    }
    if !model.complete {
        // Formulation stopped at the budget.
        return SolveOutcome {
            status: SolverStatus::TimedOut,
            assignment: None,
            objective: 0,
            conflict: None,
            nodes: 0,
            elapsed: budget.started.elapsed(),
        };
    }
    if model.mode == SolveMode::Feasibility {
        return SolveOutcome {
            status: SolverStatus::Feasible,
            assignment: Some(Vec::new()),
            objective: 0,
            conflict: None,
            nodes: 0,
            elapsed: budget.started.elapsed(),
        };
    }

    let items = &model.items;
    let n = items.len();

    // suffix[i]: optimistic value of items i.. ignoring interactions.
    let mut suffix = vec![0i64; n + 1];
    for i in (0..n).rev() {
        suffix[i] = suffix[i + 1] + items[i].best_value();
    }

    let mut occupancy = Occupancy::new(model);
    let mut chosen: Vec<Option<usize>> = vec![None; n];
    // Next option per depth: 0..len are candidates, len is rejection.
    let mut cursor = vec![0usize; n + 1];
    let mut value = 0i64;
    let mut best: Option<(i64, Vec<Option<usize>>)> = None;
    let mut nodes = 0u64;
    let mut complete = true;
    let mut depth = 0usize;

    loop {
        if nodes % 1024 == 0 && budget.exhausted(nodes) {
            complete = false;
            break;
        }
        nodes += 1;

        let mut backtrack = false;
        if depth == n {
            if best.as_ref().is_none_or(|(b, _)| value > *b) {
                best = Some((value, chosen.clone()));
            }
            backtrack = true;
        } else {
            let item = &items[depth];
            let option = cursor[depth];
            cursor[depth] += 1;
            let incumbent = best.as_ref().map(|(b, _)| *b);
            let len = item.candidates.len();

            if option < len {
                let net = item.net_value(option);
                if incumbent.is_some_and(|b| value + net + suffix[depth + 1] <= b) {
                    // Candidates are ranked, so the rest are no better.
                    cursor[depth] = len + 1;
                } else {
                    let candidate = &item.candidates[option];
                    if occupancy.try_place(candidate.facility, &candidate.occurrences) {
                        chosen[depth] = Some(option);
                        value += net;
                        depth += 1;
                        cursor[depth] = 0;
                    }
                }
            } else if option == len {
                if incumbent.is_some_and(|b| value + suffix[depth + 1] <= b) {
                    backtrack = true;
                } else {
                    chosen[depth] = None;
                    depth += 1;
                    cursor[depth] = 0;
                }
            } else {
                backtrack = true;
            }
        }

        if backtrack {
            if depth == 0 {
                break;
            }
            depth -= 1;
            if let Some(option) = chosen[depth].take() {
                let candidate = &items[depth].candidates[option];
                occupancy.release(candidate.facility, &candidate.occurrences);
                value -= items[depth].net_value(option);
            }
        }
    }

    let (status, objective, assignment) = match best {
        Some((objective, assignment)) if complete => {
            (SolverStatus::Optimal, objective, Some(assignment))
        }
        Some((objective, assignment)) => (SolverStatus::TimedOut, objective, Some(assignment)),
        None => (SolverStatus::TimedOut, 0, None),
    };

    SolveOutcome {
        status,
        assignment,
        objective,
        conflict: None,
        nodes,
        elapsed: budget.started.elapsed(),
    }
}
