//! Distance/duration matrices: backend port, OSRM client, Haversine
//! estimator, content-addressed caching and the parallel fan-out builder.
//!
//! - [`MatrixBackend`]: road-network table/route queries.
//! - [`osrm::OsrmMatrixBackend`]: HTTP client with retry + backoff.
//! - [`haversine::HaversineMatrixBackend`]: degraded-mode estimator.
//! - [`cache::MatrixCache`]: TTL cache keyed by content digest.
//! - [`parallel::ParallelMatrix`]: batched NxN computation.
//! - [`geometry::GeometryService`]: route geometries behind a two-level
//!   cache.

pub mod cache;
pub mod geometry;
pub mod haversine;
pub mod osrm;
pub mod parallel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geo::Coordinate;

/// Result of a `table` query: row-major `durations[source][dest]` seconds and
/// `distances` meters over the requested source × destination slice.
/// Unreachable pairs hold [`crate::model::UNREACHABLE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSlice {
    pub durations: Vec<Vec<f64>>,
    pub distances: Vec<Vec<f64>>,
}

impl TableSlice {
    pub fn rows(&self) -> usize {
        self.durations.len()
    }

    pub fn cols(&self) -> usize {
        self.durations.first().map_or(0, Vec::len)
    }
}

/// Geometry detail requested from the route endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overview {
    Full,
    Simplified,
}

impl Overview {
    pub fn as_str(&self) -> &'static str {
        match self {
            Overview::Full => "full",
            Overview::Simplified => "simplified",
        }
    }
}

/// A road-network route with its geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteGeometry {
    /// Polyline as (lat, lon) points.
    pub points: Vec<Coordinate>,
    pub distance_m: f64,
    pub duration_s: f64,
}

/// Road-network query port.
///
/// `sources`/`destinations` are indices into `coords`; `None` means all.
/// Implementations retry transient failures internally and surface
/// `BackendUnavailable` once retries are exhausted.
#[async_trait]
pub trait MatrixBackend: Send + Sync {
    async fn table(
        &self,
        coords: &[Coordinate],
        sources: Option<&[usize]>,
        destinations: Option<&[usize]>,
    ) -> Result<TableSlice, CoreError>;

    async fn route(
        &self,
        coords: &[Coordinate],
        overview: Overview,
    ) -> Result<RouteGeometry, CoreError>;

    /// Routing profile this backend answers for (e.g. "driving").
    fn profile(&self) -> &str;
}
