//! Deterministic fakes for tests and examples (feature `test-helpers`).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::events::{EventSink, OutboundEvent};
use crate::geo::Coordinate;
use crate::matrix::{MatrixBackend, Overview, RouteGeometry, TableSlice};

/// Meters per degree used by the fake backend's flat geometry.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Fake travel speed in meters per second.
const SPEED_MPS: f64 = 10.0;

/// Deterministic matrix backend: Manhattan distance on a flat degree grid.
/// Can be switched into outage mode to script `BackendUnavailable` paths.
pub struct StaticMatrixBackend {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl StaticMatrixBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Number of `table` calls served (including failed ones).
    pub fn table_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Toggle outage mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn pair(from: &Coordinate, to: &Coordinate) -> (f64, f64) {
        let meters =
            ((from.lat - to.lat).abs() + (from.lon - to.lon).abs()) * METERS_PER_DEGREE;
        (meters / SPEED_MPS, meters)
    }
}

impl Default for StaticMatrixBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MatrixBackend for StaticMatrixBackend {
    async fn table(
        &self,
        coords: &[Coordinate],
        sources: Option<&[usize]>,
        destinations: Option<&[usize]>,
    ) -> Result<TableSlice, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::BackendUnavailable("scripted outage".into()));
        }
        let all: Vec<usize> = (0..coords.len()).collect();
        let sources = sources.unwrap_or(&all);
        let destinations = destinations.unwrap_or(&all);

        let mut durations = Vec::with_capacity(sources.len());
        let mut distances = Vec::with_capacity(sources.len());
        for &s in sources {
            let mut drow = Vec::with_capacity(destinations.len());
            let mut mrow = Vec::with_capacity(destinations.len());
            for &d in destinations {
                let (secs, meters) = Self::pair(&coords[s], &coords[d]);
                drow.push(secs);
                mrow.push(meters);
            }
            durations.push(drow);
            distances.push(mrow);
        }
        Ok(TableSlice { durations, distances })
    }

    async fn route(
        &self,
        coords: &[Coordinate],
        _overview: Overview,
    ) -> Result<RouteGeometry, CoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::BackendUnavailable("scripted outage".into()));
        }
        let mut distance_m = 0.0;
        for pair in coords.windows(2) {
            distance_m += Self::pair(&pair[0], &pair[1]).1;
        }
        Ok(RouteGeometry {
            points: coords.to_vec(),
            distance_m,
            duration_s: distance_m / SPEED_MPS,
        })
    }

    fn profile(&self) -> &str {
        "static"
    }
}

/// Event sink that records everything published.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: OutboundEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
