//! Event types: inbound pipeline events and outbound notifications.
//!
//! Inbound events flow through the [`crate::pipeline::EventPipeline`];
//! outbound events leave through the [`EventSink`] port (webhooks,
//! WebSocket fan-out; the transport is not this crate's concern).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

// ---------------------------------------------------------------------------
// Inbound pipeline events
// ---------------------------------------------------------------------------

/// Dispatch priority. Ordered so that `Critical > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Inbound event discriminant; one registered handler per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Gps,
    Traffic,
    OrderCancel,
    VisitComplete,
}

/// Kind-specific payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Gps {
        agent_id: String,
        position: Coordinate,
        recorded_at: DateTime<Utc>,
    },
    Traffic {
        region: String,
        multiplier: f64,
    },
    OrderCancel {
        order_id: String,
        agent_id: String,
    },
    VisitComplete {
        agent_id: String,
        client_id: String,
        completed_at: DateTime<Utc>,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Gps { .. } => EventKind::Gps,
            EventPayload::Traffic { .. } => EventKind::Traffic,
            EventPayload::OrderCancel { .. } => EventKind::OrderCancel,
            EventPayload::VisitComplete { .. } => EventKind::VisitComplete,
        }
    }

    /// Agent the event concerns, when there is one (used for per-agent
    /// ordering diagnostics and cache invalidation).
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            EventPayload::Gps { agent_id, .. }
            | EventPayload::OrderCancel { agent_id, .. }
            | EventPayload::VisitComplete { agent_id, .. } => Some(agent_id),
            EventPayload::Traffic { .. } => None,
        }
    }
}

/// An event accepted by the pipeline. `seq` is assigned monotonically at
/// submission and orders events FIFO within one priority class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub priority: EventPriority,
    pub seq: u64,
    pub payload: EventPayload,
}

// ---------------------------------------------------------------------------
// Outbound events
// ---------------------------------------------------------------------------

/// Fire-and-forget notifications for downstream transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEvent {
    RouteUpdated {
        agent_id: String,
        reason: String,
        total_predicted_delay_min: i64,
    },
    DelayWarning {
        agent_id: String,
        total_predicted_delay_min: i64,
        at_risk_client_ids: Vec<String>,
    },
    DelayCritical {
        agent_id: String,
        total_predicted_delay_min: i64,
        critical_client_ids: Vec<String>,
    },
    RerouteFailed {
        agent_id: String,
        error: String,
    },
}

impl OutboundEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            OutboundEvent::RouteUpdated { agent_id, .. }
            | OutboundEvent::DelayWarning { agent_id, .. }
            | OutboundEvent::DelayCritical { agent_id, .. }
            | OutboundEvent::RerouteFailed { agent_id, .. } => agent_id,
        }
    }
}

/// Outbound publication port. Delivery reliability is the sink's problem.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: OutboundEvent);
}
