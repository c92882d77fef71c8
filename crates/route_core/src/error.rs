//! Error taxonomy shared across the optimization core.
//!
//! One enum covers every failure a caller can observe. Subsystems map their
//! internal failures onto it at the boundary (e.g. an OSRM connect error that
//! survives all retries becomes [`CoreError::BackendUnavailable`]).

use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the optimization core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input: duplicate ids, negative demands, inverted windows.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No valid assignment exists under the hard constraints and
    /// `allow_unassigned = false`.
    #[error("infeasible problem: {0}")]
    InfeasibleProblem(String),

    /// Matrix backend or external solver unreachable after retries.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A per-call deadline elapsed.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// Upstream cancellation; short-circuits without fallback.
    #[error("operation cancelled")]
    Cancelled,

    /// Event pipeline back-pressure; the event was not accepted.
    #[error("event queue full")]
    QueueFull,

    /// A referenced entity is missing from the repository.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invariant violation inside the core itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether a solver registry should try the next entry in the fallback
    /// chain. Timeouts count as unavailability for fallback purposes.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            CoreError::BackendUnavailable(_) | CoreError::TimedOut(_)
        )
    }
}
