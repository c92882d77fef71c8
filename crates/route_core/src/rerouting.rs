//! Predictive rerouting: catch schedule slips before they happen.
//!
//! For an agent mid-day, the engine projects the remainder of the planned
//! route from the live GPS position, inflating travel times with the
//! traffic model. When the total predicted delay crosses the auto-reroute
//! threshold it re-solves the remaining visits anchored at the current
//! position and publishes `ROUTE_UPDATED`; below the threshold it publishes
//! warnings. If every solver fails the existing route is kept and
//! `REROUTE_FAILED` goes out instead; the schedule is never deleted.
//!
//! A per-agent single-flight guard keeps concurrent checks from issuing
//! duplicate solver calls.

use std::sync::Arc;

use chrono::Timelike;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::ReroutingConfig;
use crate::error::CoreError;
use crate::events::{EventSink, OutboundEvent};
use crate::geo::Coordinate;
use crate::matrix::parallel::ParallelMatrix;
use crate::model::{
    ConstraintFlags, Demand, DistanceMatrix, Job, Location, Problem, Solution, TimeWindow, Vehicle,
};
use crate::repository::{Agent, PlannedVisit, Repository};
use crate::solver::registry::SolverRegistry;
use crate::traffic::TrafficModel;

// ---------------------------------------------------------------------------
// Delay prediction
// ---------------------------------------------------------------------------

/// Risk classification for one projected visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitRisk {
    OnTime,
    AtRisk,
    Critical,
}

#[derive(Debug, Clone)]
pub struct VisitProjection {
    pub client_id: String,
    /// Projected arrival, minutes from midnight.
    pub arrival_min: f64,
    /// Minutes past the visit's `latest`; zero when on time.
    pub delay_min: f64,
    pub risk: VisitRisk,
}

#[derive(Debug, Clone, Default)]
pub struct Projection {
    pub visits: Vec<VisitProjection>,
    pub total_delay_min: f64,
}

impl Projection {
    pub fn ids_with_risk(&self, risk: VisitRisk) -> Vec<String> {
        self.visits
            .iter()
            .filter(|v| v.risk == risk)
            .map(|v| v.client_id.clone())
            .collect()
    }
}

/// Pluggable arrival projection. The learning side is out of scope; the
/// default implementation walks the plan with traffic multipliers.
pub trait DelayPredictor: Send + Sync {
    /// Project the remaining visits. `matrix` covers
    /// `[position, visit_0, .., visit_{n-1}]` in that order; `now_min` is
    /// the current minute of day.
    fn project(
        &self,
        agent: &Agent,
        now_min: f64,
        remaining: &[&PlannedVisit],
        matrix: &DistanceMatrix,
        config: &ReroutingConfig,
    ) -> Projection;
}

/// Traffic-multiplier walk over the planned sequence.
pub struct HeuristicDelayPredictor {
    traffic: Arc<TrafficModel>,
}

impl HeuristicDelayPredictor {
    pub fn new(traffic: Arc<TrafficModel>) -> Self {
        Self { traffic }
    }
}

impl DelayPredictor for HeuristicDelayPredictor {
    fn project(
        &self,
        agent: &Agent,
        now_min: f64,
        remaining: &[&PlannedVisit],
        matrix: &DistanceMatrix,
        config: &ReroutingConfig,
    ) -> Projection {
        let mut visits = Vec::with_capacity(remaining.len());
        let mut total_delay_min = 0.0;
        let mut clock_min = now_min;
        let mut prev = 0usize; // matrix slot of the live position

        for (i, visit) in remaining.iter().enumerate() {
            let hour = ((clock_min / 60.0) as u32) % 24;
            let multiplier = self.traffic.multiplier(&agent.region, hour);
            let travel_min = matrix.seconds_at(prev, i + 1) / 60.0 * multiplier;
            let mut arrival_min = clock_min + travel_min;

            let mut delay_min = 0.0;
            if let Some(window) = &visit.time_window {
                if arrival_min < f64::from(window.earliest_min) {
                    arrival_min = f64::from(window.earliest_min);
                }
                delay_min = (arrival_min - f64::from(window.latest_min)).max(0.0);
            }
            let risk = if delay_min > config.critical_min as f64 {
                VisitRisk::Critical
            } else if delay_min > config.warning_min as f64 {
                VisitRisk::AtRisk
            } else {
                VisitRisk::OnTime
            };
            total_delay_min += delay_min;
            visits.push(VisitProjection {
                client_id: visit.client_id.clone(),
                arrival_min,
                delay_min,
                risk,
            });

            clock_min = arrival_min + f64::from(visit.service_minutes);
            prev = i + 1;
        }

        Projection {
            visits,
            total_delay_min,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Outcome of one agent check.
#[derive(Debug)]
pub enum CheckOutcome {
    /// No active route or nothing left to visit.
    Idle,
    /// Another check for this agent is already running.
    AlreadyInFlight,
    OnSchedule,
    Warned { total_delay_min: i64 },
    Rerouted { solution: Solution },
    /// All solvers failed; the existing route was kept.
    RerouteFailed,
}

pub struct PredictiveReroutingEngine {
    repository: Arc<dyn Repository>,
    matrix: Arc<ParallelMatrix>,
    registry: Arc<SolverRegistry>,
    predictor: Arc<dyn DelayPredictor>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: ReroutingConfig,
    in_flight: DashMap<String, ()>,
}

/// Removes the single-flight marker when a check finishes, error or not.
struct FlightGuard<'a> {
    map: &'a DashMap<String, ()>,
    key: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

impl PredictiveReroutingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn Repository>,
        matrix: Arc<ParallelMatrix>,
        registry: Arc<SolverRegistry>,
        predictor: Arc<dyn DelayPredictor>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: ReroutingConfig,
    ) -> Self {
        Self {
            repository,
            matrix,
            registry,
            predictor,
            sink,
            clock,
            config,
            in_flight: DashMap::new(),
        }
    }

    /// Feasibility check and, past the threshold, a proactive re-solve.
    pub async fn check_agent(
        &self,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<CheckOutcome, CoreError> {
        if self.in_flight.insert(agent_id.to_string(), ()).is_some() {
            debug!(agent_id, "reroute check already in flight, skipping");
            return Ok(CheckOutcome::AlreadyInFlight);
        }
        let _guard = FlightGuard {
            map: &self.in_flight,
            key: agent_id.to_string(),
        };

        let agent = self.repository.agent(agent_id).await?;
        let Some(route) = self.repository.active_route(agent_id).await? else {
            return Ok(CheckOutcome::Idle);
        };
        let remaining = route.remaining_visits();
        if remaining.is_empty() {
            return Ok(CheckOutcome::Idle);
        }

        let position = match self.repository.last_position(agent_id).await? {
            Some(fix) => fix.position,
            None => agent.depot.coordinate,
        };

        let mut coords = Vec::with_capacity(1 + remaining.len());
        coords.push(position);
        coords.extend(remaining.iter().map(|v| v.position));
        let matrix = self.matrix.compute(agent_id, &coords, cancel).await?;

        let now = self.clock.now();
        let now_min = f64::from(now.time().hour() * 60 + now.time().minute());
        let projection = self
            .predictor
            .project(&agent, now_min, &remaining, &matrix, &self.config);
        let total = projection.total_delay_min;
        debug!(agent_id, total_delay_min = total, "feasibility projection");

        if total > self.config.auto_min as f64 {
            return self
                .reroute(&agent, position, &remaining, matrix, now_min, total, cancel)
                .await;
        }

        let critical = projection.ids_with_risk(VisitRisk::Critical);
        let at_risk = projection.ids_with_risk(VisitRisk::AtRisk);
        if !critical.is_empty() {
            self.sink
                .publish(OutboundEvent::DelayCritical {
                    agent_id: agent.id.clone(),
                    total_predicted_delay_min: total as i64,
                    critical_client_ids: critical,
                })
                .await;
            return Ok(CheckOutcome::Warned {
                total_delay_min: total as i64,
            });
        }
        if !at_risk.is_empty() {
            self.sink
                .publish(OutboundEvent::DelayWarning {
                    agent_id: agent.id.clone(),
                    total_predicted_delay_min: total as i64,
                    at_risk_client_ids: at_risk,
                })
                .await;
            return Ok(CheckOutcome::Warned {
                total_delay_min: total as i64,
            });
        }
        Ok(CheckOutcome::OnSchedule)
    }

    /// Re-solve the remaining visits anchored at the live position. The
    /// replanned route starts now, not at the agent's morning window.
    #[allow(clippy::too_many_arguments)]
    async fn reroute(
        &self,
        agent: &Agent,
        position: Coordinate,
        remaining: &[&PlannedVisit],
        matrix: DistanceMatrix,
        now_min: f64,
        total_delay_min: f64,
        cancel: &CancellationToken,
    ) -> Result<CheckOutcome, CoreError> {
        let start_min = (now_min as u32).max(agent.work_window.earliest_min);
        let vehicle = Vehicle::new(
            agent.id.clone(),
            Location::new(position).with_service_minutes(0),
            Demand::new(f64::MAX / 4.0, f64::MAX / 4.0),
        )
        .with_work_window(TimeWindow::new(
            start_min,
            agent.work_window.latest_min.max(start_min),
        ));

        let jobs: Vec<Job> = remaining
            .iter()
            .map(|visit| {
                let mut location = Location::new(visit.position)
                    .with_service_minutes(visit.service_minutes);
                location.time_window = visit.time_window;
                Job::new(visit.client_id.clone(), location, Demand::default())
            })
            .collect();

        let problem = Problem {
            day: self.clock.now().date_naive(),
            jobs,
            vehicles: vec![vehicle],
            matrix,
            flags: ConstraintFlags {
                has_time_windows: true,
                allow_unassigned: true,
                ..ConstraintFlags::default()
            },
        };

        match self.registry.solve_with_fallback(&problem, None, cancel).await {
            Ok(solution) => {
                info!(
                    agent_id = %agent.id,
                    total_delay_min,
                    "proactive reroute applied"
                );
                self.sink
                    .publish(OutboundEvent::RouteUpdated {
                        agent_id: agent.id.clone(),
                        reason: "predicted_delay".into(),
                        total_predicted_delay_min: total_delay_min as i64,
                    })
                    .await;
                Ok(CheckOutcome::Rerouted { solution })
            }
            Err(CoreError::Cancelled) => Err(CoreError::Cancelled),
            Err(err) => {
                // Keep the existing schedule; never delete it.
                error!(agent_id = %agent.id, error = %err, "all solvers failed, keeping route");
                self.sink
                    .publish(OutboundEvent::RerouteFailed {
                        agent_id: agent.id.clone(),
                        error: err.to_string(),
                    })
                    .await;
                Ok(CheckOutcome::RerouteFailed)
            }
        }
    }

    /// One fleet-wide pass. Per-agent failures are isolated.
    pub async fn sweep_fleet(&self, cancel: &CancellationToken) -> usize {
        let agents = match self.repository.active_agents().await {
            Ok(agents) => agents,
            Err(err) => {
                error!(error = %err, "fleet sweep could not list agents");
                return 0;
            }
        };
        let mut checked = 0;
        for agent in agents {
            if cancel.is_cancelled() {
                break;
            }
            match self.check_agent(&agent.id, cancel).await {
                Ok(_) => checked += 1,
                Err(CoreError::Cancelled) => break,
                Err(err) => {
                    warn!(agent_id = %agent.id, error = %err, "agent check failed, continuing sweep");
                }
            }
            tokio::task::yield_now().await;
        }
        checked
    }

    /// Periodic monitor; returns when cancelled.
    pub async fn run_monitor(self: Arc<Self>, cancel: CancellationToken) {
        let interval = std::time::Duration::from_secs(self.config.sweep_min * 60);
        loop {
            let checked = self.sweep_fleet(&cancel).await;
            debug!(checked, "fleet sweep complete");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
