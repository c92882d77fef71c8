//! VRP solvers: a closed set of strategies behind one contract.
//!
//! - [`greedy::GreedySolver`]: nearest-neighbor construction + 2-opt.
//! - [`genetic::GeneticSolver`]: permutation GA with seeded determinism.
//! - [`vroom::VroomSolver`]: fast external engine adapter.
//! - [`ortools::OrToolsSolver`]: rich external engine adapter
//!   (pickup/delivery and break aware).
//!
//! [`registry::SolverRegistry`] owns the instances and the fallback chain;
//! [`registry::SmartSelector`] picks a starting point from problem features.

pub mod genetic;
pub mod greedy;
pub mod ortools;
pub mod registry;
pub(crate) mod schedule;
pub mod verify;
pub mod vroom;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::model::{Problem, Solution};

/// Solver variants known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Greedy,
    Genetic,
    ExternalFast,
    ExternalRich,
}

impl SolverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverKind::Greedy => "greedy",
            SolverKind::Genetic => "genetic",
            SolverKind::ExternalFast => "external_fast",
            SolverKind::ExternalRich => "external_rich",
        }
    }
}

impl std::fmt::Display for SolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common solver contract. Implementations never mutate the problem and
/// either return a solution (possibly with unassigned jobs) or fail with
/// `InfeasibleProblem` / `BackendUnavailable`.
#[async_trait]
pub trait Solver: Send + Sync {
    fn kind(&self) -> SolverKind;

    async fn solve(
        &self,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<Solution, CoreError>;

    /// Cheap liveness probe; local solvers are always healthy.
    async fn health_check(&self) -> bool;
}
