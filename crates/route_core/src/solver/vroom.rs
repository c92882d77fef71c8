//! Fast external adapter: VROOM over HTTP.
//!
//! Translates the problem into VROOM's request shape (explicit matrix via
//! `location_index`), posts it, and maps the returned step sequences back
//! into routes. No optimization happens here; connectivity failures and
//! malformed responses surface as `BackendUnavailable` so the registry can
//! fall back.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{Problem, Solution};

use super::schedule::assemble_solution;
use super::{Solver, SolverKind};

pub const DEFAULT_TIMEOUT_S: u64 = 30;

pub struct VroomSolver {
    client: Client,
    endpoint: String,
}

impl VroomSolver {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// VROOM wire format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct VroomRequest {
    vehicles: Vec<VroomVehicle>,
    jobs: Vec<VroomJob>,
    matrices: VroomMatrices,
}

#[derive(Serialize)]
struct VroomVehicle {
    id: u64,
    start_index: usize,
    end_index: usize,
    capacity: Vec<i64>,
    time_window: [i64; 2],
}

#[derive(Serialize)]
struct VroomJob {
    id: u64,
    location_index: usize,
    service: i64,
    delivery: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_windows: Option<Vec<[i64; 2]>>,
    priority: u32,
}

#[derive(Serialize)]
struct VroomMatrices {
    driving: VroomMatrix,
}

#[derive(Serialize)]
struct VroomMatrix {
    durations: Vec<Vec<u32>>,
    distances: Vec<Vec<u32>>,
}

#[derive(Deserialize)]
struct VroomResponse {
    code: i32,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    routes: Vec<VroomRoute>,
    #[serde(default)]
    unassigned: Vec<VroomUnassigned>,
}

#[derive(Deserialize)]
struct VroomRoute {
    vehicle: u64,
    steps: Vec<VroomStep>,
}

#[derive(Deserialize)]
struct VroomStep {
    #[serde(rename = "type")]
    step_type: String,
    #[serde(default)]
    job: Option<u64>,
}

#[derive(Deserialize)]
struct VroomUnassigned {
    id: u64,
}

/// Capacities/demands scaled to integer grams / liters for VROOM.
fn scaled(value: f64) -> i64 {
    (value * 1000.0).round() as i64
}

fn build_request(problem: &Problem) -> VroomRequest {
    let vehicles = problem
        .vehicles
        .iter()
        .enumerate()
        .map(|(v, vehicle)| VroomVehicle {
            id: v as u64,
            start_index: problem.depot_index(v),
            end_index: problem.depot_index(v),
            capacity: vec![scaled(vehicle.capacity.weight_kg), scaled(vehicle.capacity.volume_m3)],
            time_window: [
                i64::from(vehicle.work_window.earliest_min) * 60,
                i64::from(vehicle.work_window.latest_min) * 60,
            ],
        })
        .collect();

    let jobs = problem
        .jobs
        .iter()
        .enumerate()
        .map(|(j, job)| VroomJob {
            id: j as u64,
            location_index: problem.job_index(j),
            service: i64::from(job.location.service_minutes) * 60,
            delivery: vec![scaled(job.demand.weight_kg), scaled(job.demand.volume_m3)],
            time_windows: job.location.time_window.as_ref().map(|w| {
                vec![[
                    i64::from(w.earliest_min) * 60,
                    i64::from(w.latest_min) * 60,
                ]]
            }),
            priority: u32::from(job.priority),
        })
        .collect();

    let n = problem.matrix.len();
    let mut durations = Vec::with_capacity(n);
    let mut distances = Vec::with_capacity(n);
    for i in 0..n {
        let mut drow = Vec::with_capacity(n);
        let mut mrow = Vec::with_capacity(n);
        for j in 0..n {
            drow.push(problem.matrix.seconds_at(i, j).min(f64::from(u32::MAX)) as u32);
            mrow.push(problem.matrix.meters_at(i, j).min(f64::from(u32::MAX)) as u32);
        }
        durations.push(drow);
        distances.push(mrow);
    }

    VroomRequest {
        vehicles,
        jobs,
        matrices: VroomMatrices {
            driving: VroomMatrix { durations, distances },
        },
    }
}

/// Map VROOM's routes back into per-vehicle job-index sequences.
fn parse_assignments(
    problem: &Problem,
    response: &VroomResponse,
) -> Result<(Vec<Vec<usize>>, Vec<usize>), CoreError> {
    let mut assignments: Vec<Vec<usize>> = vec![Vec::new(); problem.vehicles.len()];
    for route in &response.routes {
        let v = route.vehicle as usize;
        if v >= assignments.len() {
            return Err(CoreError::BackendUnavailable(format!(
                "vroom referenced unknown vehicle {v}"
            )));
        }
        for step in &route.steps {
            if step.step_type != "job" {
                continue;
            }
            let Some(id) = step.job else {
                return Err(CoreError::BackendUnavailable("vroom job step without id".into()));
            };
            let j = id as usize;
            if j >= problem.jobs.len() {
                return Err(CoreError::BackendUnavailable(format!(
                    "vroom referenced unknown job {j}"
                )));
            }
            assignments[v].push(j);
        }
    }

    let mut unassigned: Vec<usize> = response
        .unassigned
        .iter()
        .map(|u| u.id as usize)
        .filter(|&j| j < problem.jobs.len())
        .collect();
    // Defensive: anything the engine forgot entirely counts unassigned.
    let mentioned: std::collections::HashSet<usize> = assignments
        .iter()
        .flatten()
        .copied()
        .chain(unassigned.iter().copied())
        .collect();
    for j in 0..problem.jobs.len() {
        if !mentioned.contains(&j) {
            unassigned.push(j);
        }
    }
    unassigned.sort_unstable();
    unassigned.dedup();
    Ok((assignments, unassigned))
}

#[async_trait]
impl Solver for VroomSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::ExternalFast
    }

    async fn solve(
        &self,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<Solution, CoreError> {
        problem.validate()?;
        let started = Instant::now();
        let request = build_request(problem);
        let url = format!("{}/", self.endpoint);

        let send = self.client.post(&url).json(&request).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            response = send => response,
        }
        .map_err(|e| {
            if e.is_timeout() {
                CoreError::TimedOut(Duration::from_secs(DEFAULT_TIMEOUT_S))
            } else {
                CoreError::BackendUnavailable(format!("vroom request failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(CoreError::BackendUnavailable(format!(
                "vroom returned {}",
                response.status()
            )));
        }
        let parsed: VroomResponse = response
            .json()
            .await
            .map_err(|e| CoreError::BackendUnavailable(format!("malformed vroom body: {e}")))?;
        if parsed.code != 0 {
            return Err(CoreError::BackendUnavailable(format!(
                "vroom error code {}: {}",
                parsed.code,
                parsed.error.as_deref().unwrap_or("unknown")
            )));
        }

        let (assignments, unassigned) = parse_assignments(problem, &parsed)?;
        if !problem.flags.allow_unassigned && !unassigned.is_empty() {
            let ids: Vec<&str> = unassigned
                .iter()
                .map(|&j| problem.jobs[j].id.as_str())
                .collect();
            return Err(CoreError::InfeasibleProblem(format!(
                "engine left jobs unassigned: {}",
                ids.join(", ")
            )));
        }

        debug!(
            routes = assignments.iter().filter(|a| !a.is_empty()).count(),
            unassigned = unassigned.len(),
            "vroom solve complete"
        );
        Ok(assemble_solution(
            problem,
            &assignments,
            &unassigned,
            SolverKind::ExternalFast,
            started.elapsed().as_millis() as u64,
            Some("vroom".into()),
        ))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.endpoint);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
