//! Problem and solution model for the VRP core.
//!
//! A [`Problem`] is a transient, per-request value: jobs, vehicles, the
//! duration/distance matrix over their locations, and constraint flags.
//! Solvers borrow it immutably and return a [`Solution`].
//!
//! Matrix indexing convention: row/column `0..V` are the vehicle depots in
//! vehicle order, `V..V+J` are the jobs in job order.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geo::Coordinate;
use crate::solver::SolverKind;

/// Sentinel for unreachable matrix cells: finite, serializable, and larger
/// than any real road value (~136 years in seconds).
pub const UNREACHABLE: f64 = u32::MAX as f64;

// ---------------------------------------------------------------------------
// Locations, demand, jobs, vehicles
// ---------------------------------------------------------------------------

/// Visit time window in minutes from midnight of the plan day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest_min: u32,
    pub latest_min: u32,
}

impl TimeWindow {
    pub fn new(earliest_min: u32, latest_min: u32) -> Self {
        Self { earliest_min, latest_min }
    }

    pub fn width_secs(&self) -> f64 {
        f64::from(self.latest_min.saturating_sub(self.earliest_min)) * 60.0
    }

    pub fn contains_min(&self, minute: u32) -> bool {
        (self.earliest_min..=self.latest_min).contains(&minute)
    }
}

/// A stop on the map: coordinate plus service time and optional window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub coordinate: Coordinate,
    /// On-site service time; defaults to 15 minutes.
    pub service_minutes: u32,
    pub time_window: Option<TimeWindow>,
}

impl Location {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            service_minutes: 15,
            time_window: None,
        }
    }

    pub fn with_service_minutes(mut self, minutes: u32) -> Self {
        self.service_minutes = minutes;
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }
}

/// Two-dimensional demand / capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub weight_kg: f64,
    pub volume_m3: f64,
}

impl Demand {
    pub fn new(weight_kg: f64, volume_m3: f64) -> Self {
        Self { weight_kg, volume_m3 }
    }

    pub fn add(&self, other: &Demand) -> Demand {
        Demand {
            weight_kg: self.weight_kg + other.weight_kg,
            volume_m3: self.volume_m3 + other.volume_m3,
        }
    }

    pub fn sub(&self, other: &Demand) -> Demand {
        Demand {
            weight_kg: self.weight_kg - other.weight_kg,
            volume_m3: self.volume_m3 - other.volume_m3,
        }
    }

    /// True when both dimensions fit within `capacity`.
    pub fn fits_within(&self, capacity: &Demand) -> bool {
        self.weight_kg <= capacity.weight_kg && self.volume_m3 <= capacity.volume_m3
    }

    pub fn is_negative(&self) -> bool {
        self.weight_kg < 0.0 || self.volume_m3 < 0.0
    }
}

/// A delivery or visit task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub location: Location,
    pub demand: Demand,
    /// 1 (lowest) ..= 10 (highest).
    pub priority: u8,
    /// When set, this job and the referenced job must land on the same
    /// route, with the pickup preceding the delivery.
    pub pickup_pair_id: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, location: Location, demand: Demand) -> Self {
        Self {
            id: id.into(),
            location,
            demand,
            priority: 5,
            pickup_pair_id: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// A vehicle (or field agent) with a depot and working hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub depot: Location,
    pub capacity: Demand,
    /// Working hours, minutes from midnight.
    pub work_window: TimeWindow,
    /// Intervals during which no visit may start (lunch, prayer).
    pub breaks: Vec<TimeWindow>,
}

impl Vehicle {
    pub fn new(id: impl Into<String>, depot: Location, capacity: Demand) -> Self {
        Self {
            id: id.into(),
            depot,
            capacity,
            work_window: TimeWindow::new(0, 24 * 60),
            breaks: Vec::new(),
        }
    }

    pub fn with_work_window(mut self, window: TimeWindow) -> Self {
        self.work_window = window;
        self
    }

    pub fn with_breaks(mut self, breaks: Vec<TimeWindow>) -> Self {
        self.breaks = breaks;
        self
    }

    /// Earliest minute at or after `minute` not covered by a break. A visit
    /// may not start inside a break interval.
    pub fn next_start_minute(&self, minute: f64) -> f64 {
        let mut m = minute;
        // Breaks are few (<=3); a linear rescan after each shift is fine.
        let mut shifted = true;
        while shifted {
            shifted = false;
            for b in &self.breaks {
                if m >= f64::from(b.earliest_min) && m < f64::from(b.latest_min) {
                    m = f64::from(b.latest_min);
                    shifted = true;
                }
            }
        }
        m
    }
}

// ---------------------------------------------------------------------------
// Distance matrix
// ---------------------------------------------------------------------------

/// Row-major NxN grids of travel seconds and meters. Diagonal is zero;
/// unreachable pairs hold [`UNREACHABLE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceMatrix {
    n: usize,
    seconds: Vec<f64>,
    meters: Vec<f64>,
}

impl DistanceMatrix {
    /// All-sentinel matrix with a zero diagonal.
    pub fn filled_unreachable(n: usize) -> Self {
        let mut m = Self {
            n,
            seconds: vec![UNREACHABLE; n * n],
            meters: vec![UNREACHABLE; n * n],
        };
        for i in 0..n {
            m.set(i, i, 0.0, 0.0);
        }
        m
    }

    /// Build from pre-computed row-major grids.
    pub fn from_grids(seconds: Vec<Vec<f64>>, meters: Vec<Vec<f64>>) -> Result<Self, CoreError> {
        let n = seconds.len();
        if meters.len() != n || seconds.iter().any(|r| r.len() != n) || meters.iter().any(|r| r.len() != n) {
            return Err(CoreError::InvalidInput("matrix grids are not square".into()));
        }
        Ok(Self {
            n,
            seconds: seconds.into_iter().flatten().collect(),
            meters: meters.into_iter().flatten().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    pub fn seconds_at(&self, from: usize, to: usize) -> f64 {
        self.seconds[from * self.n + to]
    }

    #[inline]
    pub fn meters_at(&self, from: usize, to: usize) -> f64 {
        self.meters[from * self.n + to]
    }

    pub fn set(&mut self, from: usize, to: usize, seconds: f64, meters: f64) {
        self.seconds[from * self.n + to] = seconds;
        self.meters[from * self.n + to] = meters;
    }

    pub fn is_unreachable(&self, from: usize, to: usize) -> bool {
        self.seconds_at(from, to) >= UNREACHABLE
    }

    /// Mean of the reachable off-diagonal durations; 0 when none exist.
    pub fn mean_seconds(&self) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..self.n {
            for j in 0..self.n {
                if i != j && !self.is_unreachable(i, j) {
                    sum += self.seconds_at(i, j);
                    count += 1;
                }
            }
        }
        if count == 0 { 0.0 } else { sum / count as f64 }
    }
}

// ---------------------------------------------------------------------------
// Problem
// ---------------------------------------------------------------------------

/// Which constraint families a problem activates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConstraintFlags {
    pub has_time_windows: bool,
    pub has_capacity: bool,
    pub has_pickup_delivery: bool,
    /// When false, a solution leaving jobs unassigned is infeasible.
    pub allow_unassigned: bool,
}

/// One optimization request. Solvers treat it as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    /// Plan day; minute-of-day windows are anchored at its UTC midnight.
    pub day: NaiveDate,
    pub jobs: Vec<Job>,
    pub vehicles: Vec<Vehicle>,
    pub matrix: DistanceMatrix,
    pub flags: ConstraintFlags,
}

impl Problem {
    /// Matrix index of vehicle `v`'s depot.
    #[inline]
    pub fn depot_index(&self, vehicle: usize) -> usize {
        vehicle
    }

    /// Matrix index of job `j`.
    #[inline]
    pub fn job_index(&self, job: usize) -> usize {
        self.vehicles.len() + job
    }

    /// UTC midnight of the plan day.
    pub fn time_zero(&self) -> DateTime<Utc> {
        self.day
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc()
    }

    /// Convert a minutes-from-midnight offset (fractional) to a timestamp.
    pub fn minute_to_datetime(&self, minute: f64) -> DateTime<Utc> {
        self.time_zero() + chrono::Duration::seconds((minute * 60.0).round() as i64)
    }

    /// Structural validation; returns the first offending id.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.vehicles.is_empty() {
            return Err(CoreError::InvalidInput("no vehicles".into()));
        }
        let expected = self.vehicles.len() + self.jobs.len();
        if self.matrix.len() != expected {
            return Err(CoreError::InvalidInput(format!(
                "matrix is {}x{0}, expected {expected}x{expected}",
                self.matrix.len()
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(CoreError::InvalidInput(format!("duplicate job id: {}", job.id)));
            }
            if job.demand.is_negative() {
                return Err(CoreError::InvalidInput(format!("negative demand on job {}", job.id)));
            }
            if !(1..=10).contains(&job.priority) {
                return Err(CoreError::InvalidInput(format!(
                    "priority {} out of range on job {}",
                    job.priority, job.id
                )));
            }
            if let Some(tw) = &job.location.time_window {
                if tw.earliest_min > tw.latest_min {
                    return Err(CoreError::InvalidInput(format!(
                        "impossible time window on job {}",
                        job.id
                    )));
                }
            }
            if let Some(pair) = &job.pickup_pair_id {
                if pair == &job.id {
                    return Err(CoreError::InvalidInput(format!(
                        "job {} pickup-pairs with itself",
                        job.id
                    )));
                }
                if !self.jobs.iter().any(|j| &j.id == pair) {
                    return Err(CoreError::InvalidInput(format!(
                        "job {} pickup-pairs with unknown job {pair}",
                        job.id
                    )));
                }
            }
        }

        let mut vehicle_ids = std::collections::HashSet::new();
        for vehicle in &self.vehicles {
            if !vehicle_ids.insert(vehicle.id.as_str()) {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate vehicle id: {}",
                    vehicle.id
                )));
            }
            if vehicle.work_window.earliest_min > vehicle.work_window.latest_min {
                return Err(CoreError::InvalidInput(format!(
                    "impossible work window on vehicle {}",
                    vehicle.id
                )));
            }
        }
        Ok(())
    }

    /// Mean time-window width in seconds across windowed jobs; `None` when
    /// no job carries a window.
    pub fn mean_window_seconds(&self) -> Option<f64> {
        let widths: Vec<f64> = self
            .jobs
            .iter()
            .filter_map(|j| j.location.time_window.as_ref().map(TimeWindow::width_secs))
            .collect();
        if widths.is_empty() {
            return None;
        }
        Some(widths.iter().sum::<f64>() / widths.len() as f64)
    }
}

// ---------------------------------------------------------------------------
// Routes and solutions
// ---------------------------------------------------------------------------

/// Step discriminant, serialized in snake case for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    DepotStart,
    Visit,
    Break,
    DepotEnd,
}

/// One stop on a planned route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "arrival_iso")]
    pub arrival: DateTime<Utc>,
    #[serde(rename = "departure_iso")]
    pub departure: DateTime<Utc>,
    /// Remaining load after this stop.
    pub load_after: Demand,
}

/// A vehicle's planned day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub vehicle_id: String,
    pub steps: Vec<Step>,
    pub total_meters: f64,
    pub total_seconds: f64,
}

impl Route {
    /// Job ids visited on this route, in order.
    pub fn visit_ids(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Visit)
            .filter_map(|s| s.job_id.as_deref())
            .collect()
    }
}

/// Solver output: routes plus what could not be assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub routes: Vec<Route>,
    pub unassigned_job_ids: Vec<String>,
    pub total_meters: f64,
    pub total_seconds: f64,
    pub solver_kind: SolverKind,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_note: Option<String>,
}

impl Solution {
    pub fn assigned_count(&self) -> usize {
        self.routes.iter().map(|r| r.visit_ids().len()).sum()
    }
}
