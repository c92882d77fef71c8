//! Route-geometry lookups with a two-level cache.
//!
//! Geometry requests are read-heavy and repetitive (the same agent routes
//! get redrawn all day), so an in-process LRU sits in front of the shared
//! TTL cache, which sits in front of the backend.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::debug;

use crate::error::CoreError;
use crate::geo::Coordinate;

use super::cache::MatrixCache;
use super::{MatrixBackend, Overview, RouteGeometry};

const DEFAULT_HOT_CAPACITY: usize = 2048;

/// Backend + shared cache + in-process LRU for route geometries.
pub struct GeometryService {
    backend: Arc<dyn MatrixBackend>,
    cache: Option<Arc<MatrixCache>>,
    hot: Mutex<LruCache<String, RouteGeometry>>,
}

impl GeometryService {
    pub fn new(backend: Arc<dyn MatrixBackend>) -> Self {
        Self::with_capacity(backend, DEFAULT_HOT_CAPACITY)
    }

    pub fn with_capacity(backend: Arc<dyn MatrixBackend>, capacity: usize) -> Self {
        Self {
            backend,
            cache: None,
            hot: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity is clamped above zero"),
            )),
        }
    }

    pub fn with_cache(mut self, cache: Arc<MatrixCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fetch the geometry for `coords`, consulting the hot LRU, then the
    /// shared cache, then the backend (writing through on success).
    pub async fn route(
        &self,
        scope: &str,
        coords: &[Coordinate],
        overview: Overview,
    ) -> Result<RouteGeometry, CoreError> {
        let key = MatrixCache::geometry_key(scope, self.backend.profile(), coords);

        if let Ok(mut hot) = self.hot.lock() {
            if let Some(geometry) = hot.get(&key) {
                return Ok(geometry.clone());
            }
        }

        if let Some(cache) = &self.cache {
            if let Some(geometry) = cache.get_geometry(&key).await {
                if let Ok(mut hot) = self.hot.lock() {
                    hot.put(key, geometry.clone());
                }
                return Ok(geometry);
            }
        }

        let geometry = self.backend.route(coords, overview).await?;
        debug!(points = geometry.points.len(), "geometry fetched from backend");
        if let Some(cache) = &self.cache {
            cache.put_geometry(&key, &geometry).await;
        }
        if let Ok(mut hot) = self.hot.lock() {
            hot.put(key, geometry.clone());
        }
        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::clock::ManualClock;
    use crate::config::{CacheTtlConfig, EstimatorConfig};
    use crate::matrix::haversine::HaversineMatrixBackend;
    use chrono::{TimeZone, Utc};

    fn coords() -> Vec<Coordinate> {
        vec![
            Coordinate::new(41.30, 69.24).unwrap(),
            Coordinate::new(41.32, 69.28).unwrap(),
        ]
    }

    #[tokio::test]
    async fn round_trips_through_hot_cache() {
        let service = GeometryService::new(Arc::new(HaversineMatrixBackend::new(
            EstimatorConfig::default(),
        )));
        let first = service.route("a1", &coords(), Overview::Full).await.unwrap();
        let second = service.route("a1", &coords(), Overview::Full).await.unwrap();
        assert_eq!(first.distance_m, second.distance_m);
        assert_eq!(first.points.len(), 2);
    }

    #[tokio::test]
    async fn shared_cache_survives_hot_eviction() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap(),
        ));
        let shared = Arc::new(MatrixCache::new(
            Arc::new(InMemoryCache::new(clock)),
            CacheTtlConfig::default(),
        ));
        // Hot capacity 1 so the second lookup evicts the first.
        let service = GeometryService::with_capacity(
            Arc::new(HaversineMatrixBackend::new(EstimatorConfig::default())),
            1,
        )
        .with_cache(shared.clone());

        let a = coords();
        let b = vec![
            Coordinate::new(41.28, 69.20).unwrap(),
            Coordinate::new(41.29, 69.21).unwrap(),
        ];
        service.route("a1", &a, Overview::Full).await.unwrap();
        service.route("a1", &b, Overview::Full).await.unwrap();

        let key = MatrixCache::geometry_key("a1", "haversine", &a);
        assert!(shared.get_geometry(&key).await.is_some());
    }
}
