//! Haversine estimator backend.
//!
//! Used when the road-network engine is unreachable: distances are
//! great-circle meters, durations derive from a configured average speed.
//! Estimates undershoot road distance in dense street grids; callers opt in
//! explicitly.

use async_trait::async_trait;

use crate::config::EstimatorConfig;
use crate::error::CoreError;
use crate::geo::Coordinate;

use super::{MatrixBackend, Overview, RouteGeometry, TableSlice};

pub struct HaversineMatrixBackend {
    config: EstimatorConfig,
}

impl HaversineMatrixBackend {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    fn pair(&self, from: &Coordinate, to: &Coordinate) -> (f64, f64) {
        let meters = from.haversine_m(to);
        (meters / self.config.average_speed_mps, meters)
    }
}

impl Default for HaversineMatrixBackend {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

#[async_trait]
impl MatrixBackend for HaversineMatrixBackend {
    async fn table(
        &self,
        coords: &[Coordinate],
        sources: Option<&[usize]>,
        destinations: Option<&[usize]>,
    ) -> Result<TableSlice, CoreError> {
        let all: Vec<usize> = (0..coords.len()).collect();
        let sources = sources.unwrap_or(&all);
        let destinations = destinations.unwrap_or(&all);
        for &i in sources.iter().chain(destinations) {
            if i >= coords.len() {
                return Err(CoreError::InvalidInput(format!("index {i} out of range")));
            }
        }

        let mut durations = Vec::with_capacity(sources.len());
        let mut distances = Vec::with_capacity(sources.len());
        for &s in sources {
            let mut drow = Vec::with_capacity(destinations.len());
            let mut mrow = Vec::with_capacity(destinations.len());
            for &d in destinations {
                let (secs, meters) = self.pair(&coords[s], &coords[d]);
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
        if coords.len() < 2 {
            return Err(CoreError::InvalidInput("route needs at least 2 coordinates".into()));
        }
        let mut distance_m = 0.0;
        for pair in coords.windows(2) {
            distance_m += pair[0].haversine_m(&pair[1]);
        }
        Ok(RouteGeometry {
            points: coords.to_vec(),
            distance_m,
            duration_s: distance_m / self.config.average_speed_mps,
        })
    }

    fn profile(&self) -> &str {
        "haversine"
    }
}
