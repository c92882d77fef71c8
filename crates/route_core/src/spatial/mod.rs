//! Spatial indexing: radius and k-nearest queries over moving entities.
//!
//! Two implementations share one contract:
//!
//! - [`h3::H3SpatialIndex`]: Uber H3 cells (default resolution 9, ~175 m
//!   edge), candidate lookup via grid-disk rings.
//! - [`grid::GridSpatialIndex`]: fixed angular-step lat/lon buckets, for
//!   deployments without H3 data.
//!
//! Both filter candidates by exact Haversine distance, so `radius` results
//! are identical across implementations; `k_nearest` distance ties are
//! broken by entity id and otherwise undefined.

pub mod grid;
pub mod h3;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geo::Coordinate;

/// An indexed entity: id, position, opaque payload reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialEntity {
    pub id: String,
    pub position: Coordinate,
    pub payload: Option<String>,
}

impl SpatialEntity {
    pub fn new(id: impl Into<String>, position: Coordinate) -> Self {
        Self {
            id: id.into(),
            position,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// A query hit with its exact distance from the query center.
pub type Hit = (SpatialEntity, f64);

/// Radius / k-nearest index. Implementations take interior locks; reads
/// never block other reads.
pub trait SpatialIndex: Send + Sync {
    /// Insert or replace by id.
    fn add(&self, entity: SpatialEntity) -> Result<(), CoreError>;

    /// Remove by id; false when absent.
    fn remove(&self, id: &str) -> bool;

    /// Replace an entity's position (same as `add` for a known id).
    fn update(&self, entity: SpatialEntity) -> Result<(), CoreError> {
        self.add(entity)
    }

    /// All entities within `meters` of the center, nearest first.
    fn radius(&self, center: Coordinate, meters: f64) -> Vec<Hit>;

    /// The `k` nearest entities, nearest first. Fewer when the index holds
    /// fewer than `k`.
    fn k_nearest(&self, center: Coordinate, k: usize) -> Vec<Hit>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sort hits nearest-first, breaking distance ties by id so results are
/// stable across implementations.
pub(crate) fn sort_hits(hits: &mut [Hit]) {
    hits.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
}
