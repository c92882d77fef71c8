//! Post-solve verification.
//!
//! Independent re-check of a solution against its problem: capacity per
//! dimension, time-window respect, pickup-before-delivery pairing, and job
//! accounting (every job either visited once or listed unassigned). The
//! registry uses this to decide whether a returned solution is usable.

use std::collections::{HashMap, HashSet};

use crate::model::{Problem, Solution, StepKind};

/// One verification finding.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    CapacityExceeded { vehicle_id: String },
    TimeWindowViolated { job_id: String },
    PickupDeliverySplit { pickup_id: String, delivery_id: String },
    DeliveryBeforePickup { pickup_id: String, delivery_id: String },
    JobMissing { job_id: String },
    JobDuplicated { job_id: String },
    UnknownJob { job_id: String },
}

/// Check `solution` against `problem`; empty means clean.
pub fn verify_solution(problem: &Problem, solution: &Solution) -> Vec<Violation> {
    let mut violations = Vec::new();

    let jobs_by_id: HashMap<&str, &crate::model::Job> =
        problem.jobs.iter().map(|j| (j.id.as_str(), j)).collect();
    let vehicles_by_id: HashMap<&str, &crate::model::Vehicle> =
        problem.vehicles.iter().map(|v| (v.id.as_str(), v)).collect();

    let mut seen: HashMap<String, usize> = HashMap::new();
    // Route index of each visited job, for pairing checks.
    let mut route_of: HashMap<String, usize> = HashMap::new();
    let mut order_in_route: HashMap<String, usize> = HashMap::new();

    for (r, route) in solution.routes.iter().enumerate() {
        let Some(vehicle) = vehicles_by_id.get(route.vehicle_id.as_str()) else {
            continue;
        };
        let mut capacity_hit = false;

        for (position, step) in route.steps.iter().enumerate() {
            if step.kind != StepKind::Visit {
                continue;
            }
            let Some(job_id) = step.job_id.as_deref() else {
                continue;
            };
            let Some(job) = jobs_by_id.get(job_id) else {
                violations.push(Violation::UnknownJob { job_id: job_id.to_string() });
                continue;
            };

            *seen.entry(job_id.to_string()).or_insert(0) += 1;
            route_of.insert(job_id.to_string(), r);
            order_in_route.insert(job_id.to_string(), position);

            if problem.flags.has_time_windows {
                if let Some(window) = &job.location.time_window {
                    let latest = problem.minute_to_datetime(f64::from(window.latest_min));
                    let earliest = problem.minute_to_datetime(f64::from(window.earliest_min));
                    if step.arrival > latest || step.departure < earliest {
                        violations.push(Violation::TimeWindowViolated {
                            job_id: job_id.to_string(),
                        });
                    }
                }
            }

            if !step.load_after.fits_within(&vehicle.capacity) {
                capacity_hit = true;
            }
        }

        // Initial load (depot start) counts too.
        if let Some(first) = route.steps.first() {
            if !first.load_after.fits_within(&vehicle.capacity) {
                capacity_hit = true;
            }
        }
        if capacity_hit {
            violations.push(Violation::CapacityExceeded {
                vehicle_id: route.vehicle_id.clone(),
            });
        }
    }

    // Accounting: visited exactly once or explicitly unassigned.
    let unassigned: HashSet<&str> = solution
        .unassigned_job_ids
        .iter()
        .map(String::as_str)
        .collect();
    for job in &problem.jobs {
        match seen.get(job.id.as_str()) {
            None => {
                if !unassigned.contains(job.id.as_str()) {
                    violations.push(Violation::JobMissing { job_id: job.id.clone() });
                }
            }
            Some(1) => {}
            Some(_) => violations.push(Violation::JobDuplicated { job_id: job.id.clone() }),
        }
    }

    // Pickup/delivery pairing.
    if problem.flags.has_pickup_delivery {
        for pickup in problem.jobs.iter().filter(|j| j.pickup_pair_id.is_some()) {
            let delivery_id = pickup.pickup_pair_id.as_deref().unwrap_or_default();
            let (Some(&pr), Some(&dr)) = (
                route_of.get(pickup.id.as_str()),
                route_of.get(delivery_id),
            ) else {
                // One half unassigned: only a violation when the other half
                // was scheduled.
                if route_of.contains_key(pickup.id.as_str()) != route_of.contains_key(delivery_id) {
                    violations.push(Violation::PickupDeliverySplit {
                        pickup_id: pickup.id.clone(),
                        delivery_id: delivery_id.to_string(),
                    });
                }
                continue;
            };
            if pr != dr {
                violations.push(Violation::PickupDeliverySplit {
                    pickup_id: pickup.id.clone(),
                    delivery_id: delivery_id.to_string(),
                });
            } else if order_in_route[pickup.id.as_str()] > order_in_route[delivery_id] {
                violations.push(Violation::DeliveryBeforePickup {
                    pickup_id: pickup.id.clone(),
                    delivery_id: delivery_id.to_string(),
                });
            }
        }
    }

    violations
}

/// A solution the registry should not hand back: everything unassigned when
/// the caller forbade it, or hard window violations.
pub fn is_unusable(problem: &Problem, solution: &Solution) -> bool {
    if !problem.flags.allow_unassigned
        && !problem.jobs.is_empty()
        && solution.assigned_count() == 0
    {
        return true;
    }
    if problem.flags.has_time_windows {
        let violations = verify_solution(problem, solution);
        if violations
            .iter()
            .any(|v| matches!(v, Violation::TimeWindowViolated { .. }))
        {
            return true;
        }
    }
    false
}
