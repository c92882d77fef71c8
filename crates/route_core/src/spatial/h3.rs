//! H3-backed spatial index.
//!
//! Entities map to H3 cells at a fixed resolution; radius queries cover the
//! search disc with `grid_disk(center, k)` where `k` derives from the mean
//! hexagon edge length, then filter candidates by exact Haversine distance.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use h3o::{CellIndex, LatLng, Resolution};

use crate::config::SpatialConfig;
use crate::error::CoreError;
use crate::geo::Coordinate;

use super::{sort_hits, Hit, SpatialEntity, SpatialIndex};

/// Mean hexagon edge length in meters per H3 resolution (0–15).
const AVG_EDGE_M: [f64; 16] = [
    1_107_712.6, 418_676.0, 158_244.7, 59_810.9, 22_606.4, 8_544.4, 3_229.5, 1_220.6, 461.4,
    174.4, 65.9, 24.9, 9.4, 3.6, 1.3, 0.5,
];

struct Inner {
    cell_to_ids: HashMap<CellIndex, HashSet<String>>,
    entities: HashMap<String, (CellIndex, SpatialEntity)>,
}

/// Many-readers-one-writer H3 index.
pub struct H3SpatialIndex {
    resolution: Resolution,
    inner: RwLock<Inner>,
}

impl H3SpatialIndex {
    pub fn new(config: SpatialConfig) -> Result<Self, CoreError> {
        let resolution = Resolution::try_from(config.h3_resolution).map_err(|_| {
            CoreError::InvalidInput(format!("invalid H3 resolution {}", config.h3_resolution))
        })?;
        Ok(Self {
            resolution,
            inner: RwLock::new(Inner {
                cell_to_ids: HashMap::new(),
                entities: HashMap::new(),
            }),
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn edge_m(&self) -> f64 {
        AVG_EDGE_M[u8::from(self.resolution) as usize]
    }

    fn cell_of(&self, position: &Coordinate) -> Result<CellIndex, CoreError> {
        let latlng = LatLng::new(position.lat, position.lon)
            .map_err(|e| CoreError::InvalidInput(format!("invalid coordinate: {e}")))?;
        Ok(latlng.to_cell(self.resolution))
    }

    /// Collect candidate entities from `k` rings around the center cell.
    fn candidates(&self, center_cell: CellIndex, k: u32) -> Vec<SpatialEntity> {
        let cells: Vec<CellIndex> = center_cell.grid_disk::<Vec<_>>(k);
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for cell in cells {
            if let Some(ids) = inner.cell_to_ids.get(&cell) {
                for id in ids {
                    if let Some((_, entity)) = inner.entities.get(id) {
                        out.push(entity.clone());
                    }
                }
            }
        }
        out
    }
}

impl SpatialIndex for H3SpatialIndex {
    fn add(&self, entity: SpatialEntity) -> Result<(), CoreError> {
        let cell = self.cell_of(&entity.position)?;
        let mut inner = self.inner.write().unwrap();
        if let Some((old_cell, _)) = inner.entities.remove(&entity.id) {
            if let Some(ids) = inner.cell_to_ids.get_mut(&old_cell) {
                ids.remove(&entity.id);
                if ids.is_empty() {
                    inner.cell_to_ids.remove(&old_cell);
                }
            }
        }
        inner
            .cell_to_ids
            .entry(cell)
            .or_default()
            .insert(entity.id.clone());
        inner.entities.insert(entity.id.clone(), (cell, entity));
        Ok(())
    }

    fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some((cell, _)) = inner.entities.remove(id) else {
            return false;
        };
        if let Some(ids) = inner.cell_to_ids.get_mut(&cell) {
            ids.remove(id);
            if ids.is_empty() {
                inner.cell_to_ids.remove(&cell);
            }
        }
        true
    }

    fn radius(&self, center: Coordinate, meters: f64) -> Vec<Hit> {
        let Ok(center_cell) = self.cell_of(&center) else {
            return Vec::new();
        };
        // One extra ring guards against points near a cell border.
        let k = (meters / self.edge_m()).ceil() as u32 + 1;
        let mut hits: Vec<Hit> = self
            .candidates(center_cell, k)
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
        let Ok(center_cell) = self.cell_of(&center) else {
            return Vec::new();
        };
        let total = self.len();
        // Ring growth cap keeps a query against a far-away, sparse index from
        // expanding past city scale (~350 km at resolution 9).
        const MAX_RING: u32 = 2048;
        let mut ring = 1u32;
        loop {
            let candidates = self.candidates(center_cell, ring);
            // One extra ring once enough candidates exist: hex rings are not
            // strictly distance-ordered.
            if candidates.len() >= k || candidates.len() == total || ring >= MAX_RING {
                let mut hits: Vec<Hit> = self
                    .candidates(center_cell, ring + 1)
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
            ring += 1;
        }
    }

    fn len(&self) -> usize {
        self.inner.read().unwrap().entities.len()
    }
}
