//! Rich external adapter: an OR-Tools-based solver service.
//!
//! Carries the full constraint surface (pickup/delivery pairs, break
//! rules, priorities) to a service that runs OR-Tools' CP-SAT routing
//! model, and maps returned visit sequences back into routes. Like the fast
//! adapter it performs no optimization itself and reports
//! `BackendUnavailable` on any connectivity or decoding failure.

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

pub struct OrToolsSolver {
    client: Client,
    endpoint: String,
}

impl OrToolsSolver {
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
// Service wire format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SolveRequest {
    vehicles: Vec<WireVehicle>,
    jobs: Vec<WireJob>,
    durations: Vec<Vec<u32>>,
    distances: Vec<Vec<u32>>,
    allow_unassigned: bool,
}

#[derive(Serialize)]
struct WireVehicle {
    id: String,
    start_index: usize,
    end_index: usize,
    capacity: [f64; 2],
    time_window: [u32; 2],
    breaks: Vec<[u32; 2]>,
}

#[derive(Serialize)]
struct WireJob {
    id: String,
    location_index: usize,
    service_min: u32,
    amount: [f64; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    time_window: Option<[u32; 2]>,
    priority: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pickup_pair_id: Option<String>,
}

#[derive(Deserialize)]
struct SolveResponse {
    status: String,
    #[serde(default)]
    routes: Vec<WireRoute>,
    #[serde(default)]
    unassigned_job_ids: Vec<String>,
}

#[derive(Deserialize)]
struct WireRoute {
    vehicle_id: String,
    job_ids: Vec<String>,
}

fn build_request(problem: &Problem) -> SolveRequest {
    let vehicles = problem
        .vehicles
        .iter()
        .enumerate()
        .map(|(v, vehicle)| WireVehicle {
            id: vehicle.id.clone(),
            start_index: problem.depot_index(v),
            end_index: problem.depot_index(v),
            capacity: [vehicle.capacity.weight_kg, vehicle.capacity.volume_m3],
            time_window: [vehicle.work_window.earliest_min, vehicle.work_window.latest_min],
            breaks: vehicle
                .breaks
                .iter()
                .map(|b| [b.earliest_min, b.latest_min])
                .collect(),
        })
        .collect();

    let jobs = problem
        .jobs
        .iter()
        .enumerate()
        .map(|(j, job)| WireJob {
            id: job.id.clone(),
            location_index: problem.job_index(j),
            service_min: job.location.service_minutes,
            amount: [job.demand.weight_kg, job.demand.volume_m3],
            time_window: job
                .location
                .time_window
                .as_ref()
                .map(|w| [w.earliest_min, w.latest_min]),
            priority: job.priority,
            pickup_pair_id: job.pickup_pair_id.clone(),
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

    SolveRequest {
        vehicles,
        jobs,
        durations,
        distances,
        allow_unassigned: problem.flags.allow_unassigned,
    }
}

fn parse_assignments(
    problem: &Problem,
    response: &SolveResponse,
) -> Result<(Vec<Vec<usize>>, Vec<usize>), CoreError> {
    let job_index = |id: &str| problem.jobs.iter().position(|j| j.id == id);
    let vehicle_index = |id: &str| problem.vehicles.iter().position(|v| v.id == id);

    let mut assignments: Vec<Vec<usize>> = vec![Vec::new(); problem.vehicles.len()];
    for route in &response.routes {
        let Some(v) = vehicle_index(&route.vehicle_id) else {
            return Err(CoreError::BackendUnavailable(format!(
                "solver referenced unknown vehicle {}",
                route.vehicle_id
            )));
        };
        for id in &route.job_ids {
            let Some(j) = job_index(id) else {
                return Err(CoreError::BackendUnavailable(format!(
                    "solver referenced unknown job {id}"
                )));
            };
            assignments[v].push(j);
        }
    }

    let mut unassigned: Vec<usize> = response
        .unassigned_job_ids
        .iter()
        .filter_map(|id| job_index(id))
        .collect();
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
impl Solver for OrToolsSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::ExternalRich
    }

    async fn solve(
        &self,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<Solution, CoreError> {
        problem.validate()?;
        let started = Instant::now();
        let request = build_request(problem);
        let url = format!("{}/v1/solve", self.endpoint);

        let send = self.client.post(&url).json(&request).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            response = send => response,
        }
        .map_err(|e| {
            if e.is_timeout() {
                CoreError::TimedOut(Duration::from_secs(DEFAULT_TIMEOUT_S))
            } else {
                CoreError::BackendUnavailable(format!("solver request failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(CoreError::BackendUnavailable(format!(
                "solver service returned {}",
                response.status()
            )));
        }
        let parsed: SolveResponse = response
            .json()
            .await
            .map_err(|e| CoreError::BackendUnavailable(format!("malformed solver body: {e}")))?;
        match parsed.status.as_str() {
            "ok" => {}
            "infeasible" => {
                return Err(CoreError::InfeasibleProblem(
                    "engine found no assignment under hard constraints".into(),
                ))
            }
            other => {
                return Err(CoreError::BackendUnavailable(format!(
                    "solver service status: {other}"
                )))
            }
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
            "or-tools solve complete"
        );
        Ok(assemble_solution(
            problem,
            &assignments,
            &unassigned,
            SolverKind::ExternalRich,
            started.elapsed().as_millis() as u64,
            Some("or-tools service".into()),
        ))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/health", self.endpoint);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
