//! Content-addressed TTL caching for matrices and route geometries.
//!
//! Keys are `matrix:{scope}:{sha256-digest}` where the digest covers the
//! sorted coordinate list, routing profile and source/destination index
//! slices. The scope (usually an agent id) exists so event-driven
//! invalidation can drop everything an agent depends on by prefix.
//!
//! Both levels of granularity go through here: full NxN matrices and BxB
//! batch slices, written through on success.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::config::CacheTtlConfig;
use crate::geo::Coordinate;

use super::{RouteGeometry, TableSlice};

/// Scope used when a matrix belongs to no particular agent.
pub const GLOBAL_SCOPE: &str = "global";

/// Cache-invalidation triggers, mapped from inbound domain events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTrigger {
    /// Client master data changed: matrices and schedules are stale.
    ClientUpdated { agent_id: String },
    /// Agent moved: live-position lookups are stale.
    AgentLocationChanged { agent_id: String },
    /// A route finished: active-route snapshot and day plan are stale.
    RouteCompleted { agent_id: String },
}

/// TTL cache for matrix artifacts over the shared [`Cache`] port.
pub struct MatrixCache {
    cache: Arc<dyn Cache>,
    ttl: CacheTtlConfig,
}

impl MatrixCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: CacheTtlConfig) -> Self {
        Self { cache, ttl }
    }

    /// Deterministic digest of a table request. Coordinates are sorted
    /// before hashing so permutations of the same point set share a key;
    /// the index slices keep batch keys distinct.
    pub fn table_key(
        scope: &str,
        profile: &str,
        coords: &[Coordinate],
        sources: Option<&[usize]>,
        destinations: Option<&[usize]>,
    ) -> String {
        let mut sorted: Vec<String> = coords.iter().map(Coordinate::to_lon_lat).collect();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(profile.as_bytes());
        for coord in &sorted {
            hasher.update(b"|");
            hasher.update(coord.as_bytes());
        }
        hasher.update(b"#s");
        if let Some(sources) = sources {
            for i in sources {
                hasher.update(i.to_le_bytes());
            }
        }
        hasher.update(b"#d");
        if let Some(destinations) = destinations {
            for i in destinations {
                hasher.update(i.to_le_bytes());
            }
        }
        format!("matrix:{scope}:{}", hex_digest(&hasher.finalize()))
    }

    pub fn geometry_key(scope: &str, profile: &str, coords: &[Coordinate]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(profile.as_bytes());
        for coord in coords {
            hasher.update(b"|");
            hasher.update(coord.to_lon_lat().as_bytes());
        }
        format!("geometry:{scope}:{}", hex_digest(&hasher.finalize()))
    }

    pub async fn get_table(&self, key: &str) -> Option<TableSlice> {
        let bytes = self.cache.get(key).await?;
        match bincode::deserialize(&bytes) {
            Ok(slice) => {
                debug!(key, "matrix cache hit");
                Some(slice)
            }
            Err(e) => {
                warn!(key, error = %e, "undecodable matrix cache entry dropped");
                None
            }
        }
    }

    pub async fn put_table(&self, key: &str, slice: &TableSlice) {
        match bincode::serialize(slice) {
            Ok(bytes) => {
                self.cache
                    .set(key, bytes, Duration::from_secs(self.ttl.matrix_s))
                    .await;
            }
            Err(e) => warn!(key, error = %e, "failed to encode matrix for cache"),
        }
    }

    pub async fn get_geometry(&self, key: &str) -> Option<RouteGeometry> {
        let bytes = self.cache.get(key).await?;
        bincode::deserialize(&bytes).ok()
    }

    pub async fn put_geometry(&self, key: &str, geometry: &RouteGeometry) {
        if let Ok(bytes) = bincode::serialize(geometry) {
            self.cache
                .set(key, bytes, Duration::from_secs(self.ttl.geometry_s))
                .await;
        }
    }

    /// Apply an event-driven invalidation: prefix deletes per trigger.
    pub async fn invalidate(&self, trigger: &InvalidationTrigger) -> usize {
        let prefixes: Vec<String> = match trigger {
            InvalidationTrigger::ClientUpdated { agent_id } => vec![
                format!("matrix:{agent_id}:"),
                format!("ref:clients:{agent_id}"),
                format!("schedule:{agent_id}:"),
            ],
            InvalidationTrigger::AgentLocationChanged { agent_id } => {
                vec![format!("live:{agent_id}"), format!("gps:{agent_id}")]
            }
            InvalidationTrigger::RouteCompleted { agent_id } => vec![
                format!("route:active:{agent_id}"),
                format!("matrix:{agent_id}:"),
                format!("schedule:{agent_id}:"),
            ],
        };
        let mut removed = 0;
        for prefix in prefixes {
            removed += self.cache.delete_prefix(&prefix).await;
        }
        debug!(?trigger, removed, "cache invalidation applied");
        removed
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
