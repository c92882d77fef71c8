//! Route simulation shared by every solver.
//!
//! Walks an ordered job sequence for one vehicle through travel times,
//! waiting, service and break rules, producing either a feasibility
//! evaluation (for construction and fitness scoring) or a fully timestamped
//! [`Route`] (for solution assembly). Keeping this in one place guarantees
//! all solvers price a sequence identically.

use std::collections::HashSet;

use crate::model::{Demand, Problem, Route, Step, StepKind, Solution};
use crate::solver::SolverKind;

/// Outcome of simulating one vehicle over a job sequence.
#[derive(Debug, Clone)]
pub(crate) struct RouteEval {
    /// Every leg was reachable in the matrix.
    pub reachable: bool,
    /// Pickup precedes its paired delivery, both on this route.
    pub precedence_ok: bool,
    /// Peak load stayed within capacity on both dimensions.
    pub capacity_ok: bool,
    /// Total minutes of lateness across visit windows and the work window.
    pub lateness_min: f64,
    /// Effective visit-start minute per job in the sequence.
    pub starts_min: Vec<f64>,
    /// End-of-route minute (back at the depot).
    pub end_min: f64,
    /// Whole-route duration in seconds (depot departure to depot return).
    pub total_seconds: f64,
    pub total_meters: f64,
}

impl RouteEval {
    pub fn feasible(&self) -> bool {
        self.reachable && self.precedence_ok && self.capacity_ok && self.lateness_min == 0.0
    }
}

/// Job ids that appear as the delivery half of a pickup pair.
pub(crate) fn paired_delivery_ids(problem: &Problem) -> HashSet<String> {
    problem
        .jobs
        .iter()
        .filter_map(|j| j.pickup_pair_id.clone())
        .collect()
}

/// Initial depot load for a sequence: everything delivered from the depot
/// (plain jobs), excluding goods picked up en route.
fn initial_load(problem: &Problem, sequence: &[usize], deliveries: &HashSet<String>) -> Demand {
    let mut load = Demand::default();
    for &j in sequence {
        let job = &problem.jobs[j];
        if job.pickup_pair_id.is_none() && !deliveries.contains(&job.id) {
            load = load.add(&job.demand);
        }
    }
    load
}

/// Simulate `sequence` (job indices) on `vehicle_idx`. Does not allocate a
/// route; use [`build_route`] for that.
pub(crate) fn simulate(problem: &Problem, vehicle_idx: usize, sequence: &[usize]) -> RouteEval {
    let vehicle = &problem.vehicles[vehicle_idx];
    let matrix = &problem.matrix;
    let deliveries = paired_delivery_ids(problem);

    let mut reachable = true;
    let mut lateness_min = 0.0_f64;
    let mut starts_min = Vec::with_capacity(sequence.len());
    let mut total_meters = 0.0;

    let mut load = initial_load(problem, sequence, &deliveries);
    let mut capacity_ok = load.fits_within(&vehicle.capacity);

    let mut precedence_ok = true;
    let mut seen: HashSet<&str> = HashSet::new();

    let start_min = f64::from(vehicle.work_window.earliest_min);
    let mut now_min = start_min;
    let mut prev = problem.depot_index(vehicle_idx);

    for &j in sequence {
        let job = &problem.jobs[j];
        let idx = problem.job_index(j);

        if matrix.is_unreachable(prev, idx) {
            reachable = false;
        }
        now_min += matrix.seconds_at(prev, idx).min(crate::model::UNREACHABLE) / 60.0;
        total_meters += matrix.meters_at(prev, idx);

        if let Some(window) = &job.location.time_window {
            if now_min < f64::from(window.earliest_min) {
                now_min = f64::from(window.earliest_min);
            }
        }
        now_min = vehicle.next_start_minute(now_min);
        starts_min.push(now_min);

        if let Some(window) = &job.location.time_window {
            if now_min > f64::from(window.latest_min) {
                lateness_min += now_min - f64::from(window.latest_min);
            }
        }

        // Pickup adds goods, deliveries shed them.
        if job.pickup_pair_id.is_some() {
            load = load.add(&job.demand);
        } else {
            load = load.sub(&job.demand);
        }
        if !load.fits_within(&vehicle.capacity) {
            capacity_ok = false;
        }

        // Precedence: this job's paired delivery must not already be done,
        // and a paired delivery requires its pickup earlier on this route.
        if let Some(pair) = &job.pickup_pair_id {
            if seen.contains(pair.as_str()) {
                precedence_ok = false;
            }
        }
        if deliveries.contains(&job.id) {
            let pickup_seen = problem
                .jobs
                .iter()
                .any(|p| p.pickup_pair_id.as_deref() == Some(job.id.as_str()) && seen.contains(p.id.as_str()));
            if !pickup_seen {
                precedence_ok = false;
            }
        }
        seen.insert(job.id.as_str());

        now_min += f64::from(job.location.service_minutes);
        prev = idx;
    }

    // Return leg.
    let depot = problem.depot_index(vehicle_idx);
    if !sequence.is_empty() {
        if matrix.is_unreachable(prev, depot) {
            reachable = false;
        }
        now_min += matrix.seconds_at(prev, depot).min(crate::model::UNREACHABLE) / 60.0;
        total_meters += matrix.meters_at(prev, depot);
    }
    if now_min > f64::from(vehicle.work_window.latest_min) {
        lateness_min += now_min - f64::from(vehicle.work_window.latest_min);
    }

    RouteEval {
        reachable,
        precedence_ok,
        capacity_ok,
        lateness_min,
        starts_min,
        end_min: now_min,
        total_seconds: (now_min - start_min) * 60.0,
        total_meters,
    }
}

/// Build a timestamped [`Route`] for a sequence, inserting `Break` steps
/// where a break rule delayed a visit start.
pub(crate) fn build_route(problem: &Problem, vehicle_idx: usize, sequence: &[usize]) -> Route {
    let vehicle = &problem.vehicles[vehicle_idx];
    let matrix = &problem.matrix;
    let deliveries = paired_delivery_ids(problem);

    let mut steps = Vec::with_capacity(sequence.len() + 2);
    let mut load = initial_load(problem, sequence, &deliveries);
    let mut total_meters = 0.0;

    let start_min = f64::from(vehicle.work_window.earliest_min);
    let mut now_min = start_min;
    let mut prev = problem.depot_index(vehicle_idx);
    let mut prev_pos = vehicle.depot.coordinate;

    steps.push(Step {
        kind: StepKind::DepotStart,
        job_id: None,
        lat: prev_pos.lat,
        lon: prev_pos.lon,
        arrival: problem.minute_to_datetime(now_min),
        departure: problem.minute_to_datetime(now_min),
        load_after: load,
    });

    for &j in sequence {
        let job = &problem.jobs[j];
        let idx = problem.job_index(j);
        now_min += matrix.seconds_at(prev, idx).min(crate::model::UNREACHABLE) / 60.0;
        total_meters += matrix.meters_at(prev, idx);

        let mut visit_start = now_min;
        if let Some(window) = &job.location.time_window {
            visit_start = visit_start.max(f64::from(window.earliest_min));
        }
        let shifted = vehicle.next_start_minute(visit_start);
        if shifted > visit_start {
            // The visit start crossed a break; surface it as its own step at
            // the previous position.
            steps.push(Step {
                kind: StepKind::Break,
                job_id: None,
                lat: prev_pos.lat,
                lon: prev_pos.lon,
                arrival: problem.minute_to_datetime(visit_start),
                departure: problem.minute_to_datetime(shifted),
                load_after: load,
            });
            visit_start = shifted;
        }

        if job.pickup_pair_id.is_some() {
            load = load.add(&job.demand);
        } else {
            load = load.sub(&job.demand);
        }
        let departure = visit_start + f64::from(job.location.service_minutes);
        steps.push(Step {
            kind: StepKind::Visit,
            job_id: Some(job.id.clone()),
            lat: job.location.coordinate.lat,
            lon: job.location.coordinate.lon,
            arrival: problem.minute_to_datetime(visit_start),
            departure: problem.minute_to_datetime(departure),
            load_after: load,
        });

        now_min = departure;
        prev = idx;
        prev_pos = job.location.coordinate;
    }

    let depot = problem.depot_index(vehicle_idx);
    if !sequence.is_empty() {
        now_min += matrix.seconds_at(prev, depot).min(crate::model::UNREACHABLE) / 60.0;
        total_meters += matrix.meters_at(prev, depot);
    }
    steps.push(Step {
        kind: StepKind::DepotEnd,
        job_id: None,
        lat: vehicle.depot.coordinate.lat,
        lon: vehicle.depot.coordinate.lon,
        arrival: problem.minute_to_datetime(now_min),
        departure: problem.minute_to_datetime(now_min),
        load_after: load,
    });

    Route {
        vehicle_id: vehicle.id.clone(),
        steps,
        total_meters,
        total_seconds: (now_min - start_min) * 60.0,
    }
}

/// Assemble a [`Solution`] from per-vehicle job sequences.
pub(crate) fn assemble_solution(
    problem: &Problem,
    assignments: &[Vec<usize>],
    unassigned: &[usize],
    kind: SolverKind,
    elapsed_ms: u64,
    quality_note: Option<String>,
) -> Solution {
    let mut routes = Vec::new();
    let mut total_meters = 0.0;
    let mut total_seconds = 0.0;
    for (v, sequence) in assignments.iter().enumerate() {
        if sequence.is_empty() {
            continue;
        }
        let route = build_route(problem, v, sequence);
        total_meters += route.total_meters;
        total_seconds += route.total_seconds;
        routes.push(route);
    }
    Solution {
        routes,
        unassigned_job_ids: unassigned
            .iter()
            .map(|&j| problem.jobs[j].id.clone())
            .collect(),
        total_meters,
        total_seconds,
        solver_kind: kind,
        elapsed_ms,
        quality_note,
    }
}
