//! Lat/lon bucket fallback index.
//!
//! Same contract as the H3 index, no H3 dependency at query time: entities
//! land in square buckets at a fixed angular step and queries scan the
//! bucket window covering the search disc, then filter by exact Haversine
//! distance.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::error::CoreError;
use crate::geo::Coordinate;

use super::{sort_hits, Hit, SpatialEntity, SpatialIndex};

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Default angular step: ~220 m of latitude, comparable to H3 resolution 9.
const DEFAULT_STEP_DEG: f64 = 0.002;

type BucketKey = (i32, i32);

struct Inner {
    buckets: HashMap<BucketKey, HashSet<String>>,
    entities: HashMap<String, (BucketKey, SpatialEntity)>,
}

/// Many-readers-one-writer grid index.
pub struct GridSpatialIndex {
    step_deg: f64,
    inner: RwLock<Inner>,
}

impl GridSpatialIndex {
    pub fn new() -> Self {
        Self::with_step(DEFAULT_STEP_DEG)
    }

    pub fn with_step(step_deg: f64) -> Self {
        Self {
            step_deg: step_deg.max(1e-6),
            inner: RwLock::new(Inner {
                buckets: HashMap::new(),
                entities: HashMap::new(),
            }),
        }
    }

    fn bucket_of(&self, position: &Coordinate) -> BucketKey {
        (
            (position.lat / self.step_deg).floor() as i32,
            (position.lon / self.step_deg).floor() as i32,
        )
    }

    /// Entities in the bucket window `radius_buckets` around the center.
    fn window_candidates(&self, center: &Coordinate, lat_buckets: i32, lon_buckets: i32) -> Vec<SpatialEntity> {
        let (clat, clon) = self.bucket_of(center);
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for dlat in -lat_buckets..=lat_buckets {
            for dlon in -lon_buckets..=lon_buckets {
                if let Some(ids) = inner.buckets.get(&(clat + dlat, clon + dlon)) {
                    for id in ids {
                        if let Some((_, entity)) = inner.entities.get(id) {
                            out.push(entity.clone());
                        }
                    }
                }
            }
        }
        out
    }

    fn buckets_for_meters(&self, center: &Coordinate, meters: f64) -> (i32, i32) {
        let lat_deg = meters / METERS_PER_DEGREE;
        let cos_lat = center.lat.to_radians().cos().abs().max(0.01);
        let lon_deg = meters / (METERS_PER_DEGREE * cos_lat);
        (
            (lat_deg / self.step_deg).ceil() as i32 + 1,
            (lon_deg / self.step_deg).ceil() as i32 + 1,
        )
    }
}

impl Default for GridSpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex for GridSpatialIndex {
    fn add(&self, entity: SpatialEntity) -> Result<(), CoreError> {
        let bucket = self.bucket_of(&entity.position);
        let mut inner = self.inner.write().unwrap();
        if let Some((old_bucket, _)) = inner.entities.remove(&entity.id) {
            if let Some(ids) = inner.buckets.get_mut(&old_bucket) {
                ids.remove(&entity.id);
                if ids.is_empty() {
                    inner.buckets.remove(&old_bucket);
                }
            }
        }
        inner
            .buckets
            .entry(bucket)
            .or_default()
            .insert(entity.id.clone());
        inner.entities.insert(entity.id.clone(), (bucket, entity));
        Ok(())
    }

    fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some((bucket, _)) = inner.entities.remove(id) else {
            return false;
        };
        if let Some(ids) = inner.buckets.get_mut(&bucket) {
            ids.remove(id);
            if ids.is_empty() {
                inner.buckets.remove(&bucket);
            }
        }
        true
    }

    fn radius(&self, center: Coordinate, meters: f64) -> Vec<Hit> {
        let (lat_buckets, lon_buckets) = self.buckets_for_meters(&center, meters);
        let mut hits: Vec<Hit> = self
            .window_candidates(&center, lat_buckets, lon_buckets)
            .into_iter()
            .map(|e| {
                let d = center.haversine_m(&e.position);
                (e, d)
            })
            .filter(|(_, d)| *d <= meters)
            .collect();
        sort_hits(&mut hits);
        hits
    }

    fn k_nearest(&self, center: Coordinate, k: usize) -> Vec<Hit> {
        if k == 0 {
            return Vec::new();
        }
        let total = self.len();
        let mut meters = self.step_deg * METERS_PER_DEGREE;
        loop {
            let (lat_buckets, lon_buckets) = self.buckets_for_meters(&center, meters);
            let candidates = self.window_candidates(&center, lat_buckets, lon_buckets);
            if candidates.len() >= k || candidates.len() == total {
                // Widen once: the window is square, distances are not.
                let (lat_buckets, lon_buckets) = self.buckets_for_meters(&center, meters * 1.5);
                let mut hits: Vec<Hit> = self
                    .window_candidates(&center, lat_buckets, lon_buckets)
                    .into_iter()
                    .map(|e| {
                        let d = center.haversine_m(&e.position);
                        (e, d)
                    })
                    .collect();
                sort_hits(&mut hits);
                hits.truncate(k);
                return hits;
            }
            meters *= 2.0;
        }
    }

    fn len(&self) -> usize {
        self.inner.read().unwrap().entities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, lat: f64, lon: f64) -> SpatialEntity {
        SpatialEntity::new(id, Coordinate::new(lat, lon).unwrap())
    }

    #[test]
    fn radius_matches_exact_filter() {
        let idx = GridSpatialIndex::new();
        let center = Coordinate::new(41.311, 69.279).unwrap();
        idx.add(entity("near", 41.3115, 69.2795)).unwrap();
        idx.add(entity("edge", 41.3155, 69.279)).unwrap(); // ~500 m north
        idx.add(entity("far", 41.33, 69.30)).unwrap();
        let hits = idx.radius(center, 520.0);
        let ids: Vec<&str> = hits.iter().map(|(e, _)| e.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "edge"]);
    }

    #[test]
    fn k_nearest_orders_and_truncates() {
        let idx = GridSpatialIndex::new();
        let center = Coordinate::new(41.311, 69.279).unwrap();
        idx.add(entity("a", 41.3111, 69.2791)).unwrap();
        idx.add(entity("b", 41.3150, 69.2850)).unwrap();
        idx.add(entity("c", 41.3200, 69.2900)).unwrap();
        let hits = idx.k_nearest(center, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.id, "a");
        assert_eq!(hits[1].0.id, "b");
    }

    #[test]
    fn empty_index_returns_nothing() {
        let idx = GridSpatialIndex::new();
        let center = Coordinate::new(41.311, 69.279).unwrap();
        assert!(idx.radius(center, 1000.0).is_empty());
        assert!(idx.k_nearest(center, 3).is_empty());
    }

    #[test]
    fn update_moves_entity_between_buckets() {
        let idx = GridSpatialIndex::new();
        idx.add(entity("e", 41.311, 69.279)).unwrap();
        idx.update(entity("e", 41.40, 69.40)).unwrap();
        assert_eq!(idx.len(), 1);
        assert!(idx
            .radius(Coordinate::new(41.311, 69.279).unwrap(), 500.0)
            .is_empty());
        assert_eq!(
            idx.radius(Coordinate::new(41.40, 69.40).unwrap(), 500.0).len(),
            1
        );
    }
}
