//! Solver registry, fallback chain and feature-based selection.
//!
//! The registry is built once at startup and read-only afterwards.
//! `solve_with_fallback` walks the chain from the preferred entry, advancing
//! only on unavailability (or a timeout, which counts as unavailability) or
//! on a solution that fails verification; cancellation and input errors
//! propagate immediately.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::model::{Problem, Solution};

use super::verify::is_unusable;
use super::{Solver, SolverKind};

/// Default fallback order: fast external, rich external, then local.
pub const DEFAULT_CHAIN: [SolverKind; 4] = [
    SolverKind::ExternalFast,
    SolverKind::ExternalRich,
    SolverKind::Genetic,
    SolverKind::Greedy,
];

pub struct SolverRegistry {
    solvers: HashMap<SolverKind, Arc<dyn Solver>>,
    chain: Vec<SolverKind>,
}

impl SolverRegistry {
    pub fn new() -> Self {
        Self {
            solvers: HashMap::new(),
            chain: DEFAULT_CHAIN.to_vec(),
        }
    }

    pub fn register(&mut self, solver: Arc<dyn Solver>) {
        self.solvers.insert(solver.kind(), solver);
    }

    pub fn with_chain(mut self, chain: Vec<SolverKind>) -> Self {
        self.chain = chain;
        self
    }

    pub fn get(&self, kind: SolverKind) -> Option<Arc<dyn Solver>> {
        self.solvers.get(&kind).cloned()
    }

    pub fn chain(&self) -> &[SolverKind] {
        &self.chain
    }

    /// Chain rotated to start at `preferred`. A preferred kind outside the
    /// chain is tried first, then the whole chain.
    fn attempt_order(&self, preferred: Option<SolverKind>) -> Vec<SolverKind> {
        let Some(preferred) = preferred else {
            return self.chain.clone();
        };
        match self.chain.iter().position(|&k| k == preferred) {
            Some(at) => self.chain[at..].to_vec(),
            None => {
                let mut order = vec![preferred];
                order.extend_from_slice(&self.chain);
                order
            }
        }
    }

    /// Solve with `preferred` first, falling back along the chain on
    /// unavailability or unusable output.
    pub async fn solve_with_fallback(
        &self,
        problem: &Problem,
        preferred: Option<SolverKind>,
        cancel: &CancellationToken,
    ) -> Result<Solution, CoreError> {
        problem.validate()?;
        let mut last_error: Option<CoreError> = None;

        for kind in self.attempt_order(preferred) {
            let Some(solver) = self.get(kind) else {
                continue;
            };
            match solver.solve(problem, cancel).await {
                Ok(solution) => {
                    if is_unusable(problem, &solution) {
                        warn!(solver = %kind, "solution failed verification, trying next");
                        last_error = Some(CoreError::InfeasibleProblem(format!(
                            "{kind} produced an unusable solution"
                        )));
                        continue;
                    }
                    info!(
                        solver = %kind,
                        routes = solution.routes.len(),
                        unassigned = solution.unassigned_job_ids.len(),
                        elapsed_ms = solution.elapsed_ms,
                        "solve complete"
                    );
                    return Ok(solution);
                }
                Err(err) if err.triggers_fallback() => {
                    warn!(solver = %kind, error = %err, "solver unavailable, trying next");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CoreError::BackendUnavailable("no solver in the chain is registered".into())
        }))
    }
}

impl Default for SolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Smart selection
// ---------------------------------------------------------------------------

/// A full working day in seconds; windows at or above this are "loose".
const FULL_DAY_SECONDS: f64 = 28_800.0;

/// Features extracted from a problem for rule-based selection.
#[derive(Debug, Clone, Copy)]
pub struct ProblemFeatures {
    pub n_jobs: usize,
    pub n_vehicles: usize,
    pub has_time_windows: bool,
    /// 1 − min(1, mean window seconds / 8 h); 0 = loose, → 1 = tight.
    pub tightness: f64,
    pub has_pickup_delivery: bool,
    /// Std deviation of job coordinates in degrees (lat + lon combined).
    pub dispersion_deg: f64,
    /// Rough count of active constraint families.
    pub constraint_complexity: u32,
}

impl ProblemFeatures {
    pub fn extract(problem: &Problem) -> Self {
        let tightness = problem
            .mean_window_seconds()
            .map(|mean| 1.0 - (mean / FULL_DAY_SECONDS).min(1.0))
            .unwrap_or(0.0);

        let dispersion_deg = {
            let n = problem.jobs.len().max(1) as f64;
            let (mut lat_sum, mut lon_sum) = (0.0, 0.0);
            for job in &problem.jobs {
                lat_sum += job.location.coordinate.lat;
                lon_sum += job.location.coordinate.lon;
            }
            let (lat_mean, lon_mean) = (lat_sum / n, lon_sum / n);
            let mut var = 0.0;
            for job in &problem.jobs {
                let dlat = job.location.coordinate.lat - lat_mean;
                let dlon = job.location.coordinate.lon - lon_mean;
                var += dlat * dlat + dlon * dlon;
            }
            (var / n).sqrt()
        };

        let has_breaks = problem.vehicles.iter().any(|v| !v.breaks.is_empty());
        let mut constraint_complexity = 0;
        if problem.flags.has_time_windows {
            constraint_complexity += 1;
        }
        if problem.flags.has_capacity {
            constraint_complexity += 1;
        }
        if problem.flags.has_pickup_delivery {
            constraint_complexity += 2;
        }
        if has_breaks {
            constraint_complexity += 1;
        }

        Self {
            n_jobs: problem.jobs.len(),
            n_vehicles: problem.vehicles.len(),
            has_time_windows: problem.flags.has_time_windows,
            tightness,
            has_pickup_delivery: problem.flags.has_pickup_delivery,
            dispersion_deg,
            constraint_complexity,
        }
    }
}

/// Rule-based solver selection over [`ProblemFeatures`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SmartSelector;

impl SmartSelector {
    /// Decision rules, first match wins.
    pub fn select(&self, problem: &Problem) -> SolverKind {
        let f = ProblemFeatures::extract(problem);
        let choice = if f.has_pickup_delivery && f.n_jobs > 500 {
            SolverKind::Genetic
        } else if f.has_pickup_delivery {
            SolverKind::ExternalRich
        } else if f.n_jobs > 1000 {
            SolverKind::Genetic
        } else if f.n_jobs > 200 || f.tightness > 0.8 || f.constraint_complexity > 3 {
            SolverKind::ExternalRich
        } else if f.n_jobs < 150 && f.constraint_complexity <= 1 {
            SolverKind::ExternalFast
        } else {
            SolverKind::ExternalRich
        };
        info!(
            n_jobs = f.n_jobs,
            tightness = f.tightness,
            complexity = f.constraint_complexity,
            selected = %choice,
            "smart selector decision"
        );
        choice
    }
}
