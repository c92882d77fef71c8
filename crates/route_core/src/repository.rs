//! Read-only entity snapshots consumed through the `Repository` port.
//!
//! The core never owns persistence: planning and rerouting read immutable
//! snapshots of agents, clients, orders and active routes, and write nothing
//! back (updated routes leave through the event sink).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geo::Coordinate;
use crate::model::{Demand, Location, TimeWindow, Vehicle};

/// SFA visit-frequency category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientCategory {
    A,
    B,
    C,
}

impl ClientCategory {
    /// Long-run target visits per week.
    pub fn target_visits_per_week(&self) -> f64 {
        match self {
            ClientCategory::A => 2.5,
            ClientCategory::B => 1.0,
            ClientCategory::C => 0.5,
        }
    }
}

/// A field-sales agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub depot: Location,
    /// Traffic region key (e.g. "almaty", "tashkent").
    pub region: String,
    pub active: bool,
    /// Working hours, minutes from midnight.
    pub work_window: TimeWindow,
}

/// A client (outlet) served by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub agent_id: String,
    pub location: Location,
    pub category: ClientCategory,
    pub active: bool,
}

/// An open delivery order feeding demand into daily problems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOrder {
    pub id: String,
    pub agent_id: String,
    pub client_id: String,
    pub demand: Demand,
}

/// One not-yet-completed stop on an active route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedVisit {
    pub client_id: String,
    pub position: Coordinate,
    pub time_window: Option<TimeWindow>,
    pub service_minutes: u32,
    pub completed: bool,
}

/// Snapshot of an agent's route for one day, as the rerouting engine reads
/// it back from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRoute {
    pub agent_id: String,
    pub day: NaiveDate,
    pub visits: Vec<PlannedVisit>,
}

impl ActiveRoute {
    pub fn remaining_visits(&self) -> Vec<&PlannedVisit> {
        self.visits.iter().filter(|v| !v.completed).collect()
    }
}

/// Latest GPS fix for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPosition {
    pub agent_id: String,
    pub position: Coordinate,
    pub recorded_at: DateTime<Utc>,
}

/// Read-only access to persisted entities.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn active_agents(&self) -> Result<Vec<Agent>, CoreError>;

    /// `NotFound` when the id is unknown.
    async fn agent(&self, agent_id: &str) -> Result<Agent, CoreError>;

    async fn clients_for_agent(&self, agent_id: &str) -> Result<Vec<Client>, CoreError>;

    async fn vehicles(&self) -> Result<Vec<Vehicle>, CoreError>;

    async fn orders_for_agent(&self, agent_id: &str) -> Result<Vec<DeliveryOrder>, CoreError>;

    async fn active_route(&self, agent_id: &str) -> Result<Option<ActiveRoute>, CoreError>;

    async fn last_position(&self, agent_id: &str) -> Result<Option<AgentPosition>, CoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Map-backed repository for tests and single-node runs.
#[derive(Default)]
pub struct InMemoryRepository {
    agents: DashMap<String, Agent>,
    clients: DashMap<String, Client>,
    vehicles: DashMap<String, Vehicle>,
    orders: DashMap<String, DeliveryOrder>,
    routes: DashMap<String, ActiveRoute>,
    positions: DashMap<String, AgentPosition>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_agent(&self, agent: Agent) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn upsert_client(&self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn upsert_vehicle(&self, vehicle: Vehicle) {
        self.vehicles.insert(vehicle.id.clone(), vehicle);
    }

    pub fn upsert_order(&self, order: DeliveryOrder) {
        self.orders.insert(order.id.clone(), order);
    }

    pub fn upsert_route(&self, route: ActiveRoute) {
        self.routes.insert(route.agent_id.clone(), route);
    }

    pub fn upsert_position(&self, position: AgentPosition) {
        self.positions.insert(position.agent_id.clone(), position);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn active_agents(&self) -> Result<Vec<Agent>, CoreError> {
        let mut agents: Vec<Agent> = self
            .agents
            .iter()
            .filter(|a| a.active)
            .map(|a| a.clone())
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn agent(&self, agent_id: &str) -> Result<Agent, CoreError> {
        self.agents
            .get(agent_id)
            .map(|a| a.clone())
            .ok_or_else(|| CoreError::NotFound(format!("agent {agent_id}")))
    }

    async fn clients_for_agent(&self, agent_id: &str) -> Result<Vec<Client>, CoreError> {
        let mut clients: Vec<Client> = self
            .clients
            .iter()
            .filter(|c| c.agent_id == agent_id && c.active)
            .map(|c| c.clone())
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clients)
    }

    async fn vehicles(&self) -> Result<Vec<Vehicle>, CoreError> {
        let mut vehicles: Vec<Vehicle> = self.vehicles.iter().map(|v| v.clone()).collect();
        vehicles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(vehicles)
    }

    async fn orders_for_agent(&self, agent_id: &str) -> Result<Vec<DeliveryOrder>, CoreError> {
        let mut orders: Vec<DeliveryOrder> = self
            .orders
            .iter()
            .filter(|o| o.agent_id == agent_id)
            .map(|o| o.clone())
            .collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(orders)
    }

    async fn active_route(&self, agent_id: &str) -> Result<Option<ActiveRoute>, CoreError> {
        Ok(self.routes.get(agent_id).map(|r| r.clone()))
    }

    async fn last_position(&self, agent_id: &str) -> Result<Option<AgentPosition>, CoreError> {
        Ok(self.positions.get(agent_id).map(|p| p.clone()))
    }
}
