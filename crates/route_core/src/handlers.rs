//! Domain handlers wired into the event pipeline.
//!
//! One handler per [`EventKind`]:
//!
//! - GPS: refresh the agent's spatial-index entry, cache the fix, and drop
//!   stale live-location keys.
//! - TRAFFIC: apply a live multiplier override to the traffic model.
//! - ORDER_CANCEL: invalidate the agent's matrices and schedule.
//! - VISIT_COMPLETE: invalidate the active-route snapshot and day plan.
//!
//! Handlers reference services, never the pipeline; the rerouting monitor
//! reads the refreshed state on its next sweep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::Cache;
use crate::config::CacheTtlConfig;
use crate::error::CoreError;
use crate::events::{EventPayload, PipelineEvent};
use crate::matrix::cache::{InvalidationTrigger, MatrixCache};
use crate::pipeline::EventHandler;
use crate::spatial::{SpatialEntity, SpatialIndex};
use crate::traffic::TrafficModel;

/// GPS fixes: spatial index + short-TTL position cache.
pub struct GpsHandler {
    index: Arc<dyn SpatialIndex>,
    cache: Arc<dyn Cache>,
    matrix_cache: Arc<MatrixCache>,
    ttl: CacheTtlConfig,
}

impl GpsHandler {
    pub fn new(
        index: Arc<dyn SpatialIndex>,
        cache: Arc<dyn Cache>,
        matrix_cache: Arc<MatrixCache>,
        ttl: CacheTtlConfig,
    ) -> Self {
        Self {
            index,
            cache,
            matrix_cache,
            ttl,
        }
    }
}

#[async_trait]
impl EventHandler for GpsHandler {
    async fn handle(&self, event: &PipelineEvent) -> Result<(), CoreError> {
        let EventPayload::Gps {
            agent_id,
            position,
            recorded_at,
        } = &event.payload
        else {
            return Err(CoreError::Internal("gps handler got non-gps payload".into()));
        };

        self.index
            .update(SpatialEntity::new(agent_id.clone(), *position).with_payload("agent"))?;

        let value = serde_json::to_vec(&(position, recorded_at))
            .map_err(|e| CoreError::Internal(format!("gps encode: {e}")))?;
        self.cache
            .set(
                &format!("gps:{agent_id}"),
                value,
                Duration::from_secs(self.ttl.gps_s),
            )
            .await;
        self.matrix_cache
            .invalidate(&InvalidationTrigger::AgentLocationChanged {
                agent_id: agent_id.clone(),
            })
            .await;
        debug!(agent_id = %agent_id, "gps fix applied");
        Ok(())
    }
}

/// TRAFFIC updates: live multiplier overrides.
pub struct TrafficHandler {
    traffic: Arc<TrafficModel>,
}

impl TrafficHandler {
    pub fn new(traffic: Arc<TrafficModel>) -> Self {
        Self { traffic }
    }
}

#[async_trait]
impl EventHandler for TrafficHandler {
    async fn handle(&self, event: &PipelineEvent) -> Result<(), CoreError> {
        let EventPayload::Traffic { region, multiplier } = &event.payload else {
            return Err(CoreError::Internal("traffic handler got non-traffic payload".into()));
        };
        self.traffic.set_live_multiplier(region, *multiplier);
        debug!(region = %region, multiplier, "live traffic multiplier applied");
        Ok(())
    }
}

/// ORDER_CANCEL: the agent's planned day is stale.
pub struct OrderCancelHandler {
    matrix_cache: Arc<MatrixCache>,
}

impl OrderCancelHandler {
    pub fn new(matrix_cache: Arc<MatrixCache>) -> Self {
        Self { matrix_cache }
    }
}

#[async_trait]
impl EventHandler for OrderCancelHandler {
    async fn handle(&self, event: &PipelineEvent) -> Result<(), CoreError> {
        let EventPayload::OrderCancel { order_id, agent_id } = &event.payload else {
            return Err(CoreError::Internal("cancel handler got wrong payload".into()));
        };
        let removed = self
            .matrix_cache
            .invalidate(&InvalidationTrigger::ClientUpdated {
                agent_id: agent_id.clone(),
            })
            .await;
        debug!(order_id = %order_id, agent_id = %agent_id, removed, "order cancelled, caches dropped");
        Ok(())
    }
}

/// VISIT_COMPLETE: refresh route-derived caches.
pub struct VisitCompleteHandler {
    matrix_cache: Arc<MatrixCache>,
}

impl VisitCompleteHandler {
    pub fn new(matrix_cache: Arc<MatrixCache>) -> Self {
        Self { matrix_cache }
    }
}

#[async_trait]
impl EventHandler for VisitCompleteHandler {
    async fn handle(&self, event: &PipelineEvent) -> Result<(), CoreError> {
        let EventPayload::VisitComplete {
            agent_id,
            client_id,
            ..
        } = &event.payload
        else {
            return Err(CoreError::Internal("visit handler got wrong payload".into()));
        };
        self.matrix_cache
            .invalidate(&InvalidationTrigger::RouteCompleted {
                agent_id: agent_id.clone(),
            })
            .await;
        debug!(agent_id = %agent_id, client_id = %client_id, "visit completion applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::clock::ManualClock;
    use crate::config::SpatialConfig;
    use crate::events::EventPriority;
    use crate::geo::Coordinate;
    use crate::spatial::h3::H3SpatialIndex;
    use chrono::{TimeZone, Utc};

    fn event(payload: EventPayload) -> PipelineEvent {
        PipelineEvent {
            priority: EventPriority::Normal,
            seq: 0,
            payload,
        }
    }

    fn shared_cache() -> (Arc<InMemoryCache>, Arc<MatrixCache>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryCache::new(clock));
        let matrix_cache = Arc::new(MatrixCache::new(store.clone(), CacheTtlConfig::default()));
        (store, matrix_cache)
    }

    #[tokio::test]
    async fn gps_updates_index_and_caches_fix() {
        let (store, matrix_cache) = shared_cache();
        let index = Arc::new(H3SpatialIndex::new(SpatialConfig::default()).unwrap());
        let handler = GpsHandler::new(
            index.clone(),
            store.clone(),
            matrix_cache,
            CacheTtlConfig::default(),
        );

        let position = Coordinate::new(41.311, 69.279).unwrap();
        handler
            .handle(&event(EventPayload::Gps {
                agent_id: "a1".into(),
                position,
                recorded_at: Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
            }))
            .await
            .unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.radius(position, 50.0).len(), 1);
        assert!(store.get("gps:a1").await.is_some());
    }

    #[tokio::test]
    async fn traffic_event_overrides_multiplier() {
        let traffic = Arc::new(TrafficModel::default());
        let handler = TrafficHandler::new(traffic.clone());
        handler
            .handle(&event(EventPayload::Traffic {
                region: "almaty".into(),
                multiplier: 2.4,
            }))
            .await
            .unwrap();
        assert_eq!(traffic.multiplier("almaty", 3), 2.4);
    }

    #[tokio::test]
    async fn order_cancel_drops_agent_caches() {
        let (store, matrix_cache) = shared_cache();
        store
            .set("matrix:a1:abc", b"x".to_vec(), Duration::from_secs(600))
            .await;
        store
            .set("schedule:a1:2025-06-02", b"y".to_vec(), Duration::from_secs(600))
            .await;

        OrderCancelHandler::new(matrix_cache)
            .handle(&event(EventPayload::OrderCancel {
                order_id: "o1".into(),
                agent_id: "a1".into(),
            }))
            .await
            .unwrap();
        assert!(store.get("matrix:a1:abc").await.is_none());
        assert!(store.get("schedule:a1:2025-06-02").await.is_none());
    }

    #[tokio::test]
    async fn wrong_payload_is_internal_error() {
        let (_store, matrix_cache) = shared_cache();
        let err = VisitCompleteHandler::new(matrix_cache)
            .handle(&event(EventPayload::Traffic {
                region: "almaty".into(),
                multiplier: 1.0,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }
}
