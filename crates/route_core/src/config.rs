//! Typed configuration for every subsystem.
//!
//! One struct per concern, each with a `Default` carrying the documented
//! value and unit. Hosts deserialize these from their own config source; the
//! core never reads files or environment variables itself.

use serde::{Deserialize, Serialize};

/// Matrix computation: backend calls, batching, retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Side length of one fan-out batch (coordinates per table call axis).
    pub batch_size: usize,
    /// Maximum concurrent backend calls per matrix request.
    pub max_concurrent: usize,
    /// Per-attempt backend timeout in seconds.
    pub backend_timeout_s: u64,
    /// Retry attempts for transient backend failures.
    pub retry_attempts: u32,
    /// Base backoff delay in seconds (doubles per attempt, ±20% jitter).
    pub retry_base_s: f64,
    /// When true, any failed batch fails the whole matrix instead of
    /// degrading its cells to the unreachable sentinel.
    pub require_full_matrix: bool,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrent: 4,
            backend_timeout_s: 30,
            retry_attempts: 3,
            retry_base_s: 2.0,
            require_full_matrix: false,
        }
    }
}

/// Spatial index tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpatialConfig {
    /// H3 resolution for the primary index (9 ≈ 175 m edge).
    pub h3_resolution: u8,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self { h3_resolution: 9 }
    }
}

/// Genetic solver parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeneticConfig {
    pub population: usize,
    pub generations: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    /// Individuals preserved verbatim each generation.
    pub elite: usize,
    /// Stop after this many generations without fitness improvement.
    pub early_stop: usize,
    /// Seed for reproducible runs. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population: 100,
            generations: 500,
            mutation_rate: 0.1,
            crossover_rate: 0.8,
            elite: 10,
            early_stop: 50,
            seed: None,
        }
    }
}

/// Greedy + 2-opt solver parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GreedyConfig {
    /// 2-opt passes per route before giving up on convergence.
    pub max_2opt_iterations: usize,
    /// Minimum relative duration improvement to accept a 2-opt move.
    pub min_improvement: f64,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            max_2opt_iterations: 100,
            min_improvement: 0.001,
        }
    }
}

/// Predictive rerouting thresholds, all in minutes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReroutingConfig {
    /// Projected lateness beyond which a visit is at risk.
    pub warning_min: i64,
    /// Projected lateness beyond which a visit is critical.
    pub critical_min: i64,
    /// Total predicted delay that triggers an automatic re-solve.
    pub auto_min: i64,
    /// Fleet sweep interval.
    pub sweep_min: u64,
}

impl Default for ReroutingConfig {
    fn default() -> Self {
        Self {
            warning_min: 15,
            critical_min: 30,
            auto_min: 20,
            sweep_min: 30,
        }
    }
}

/// Event pipeline sizing and handler policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bounded priority queue capacity; submissions beyond it fail.
    pub queue_size: usize,
    /// Worker task count.
    pub workers: usize,
    /// Per-handler execution timeout in seconds.
    pub handler_timeout_s: u64,
    /// Handler retries before an event is dead-lettered.
    pub max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            workers: 8,
            handler_timeout_s: 10,
            max_retries: 3,
        }
    }
}

/// Cache TTLs in seconds, by payload class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    /// Full and batch distance matrices: 7 days.
    pub matrix_s: u64,
    /// Route geometries: 1 day.
    pub geometry_s: u64,
    /// Reference lookups (client/vehicle lists): 1 hour.
    pub reference_s: u64,
    /// Agent daily schedule: 30 minutes.
    pub schedule_s: u64,
    /// Agent live location: 1 minute.
    pub live_location_s: u64,
    /// Active routes: 5 minutes.
    pub active_route_s: u64,
    /// Raw GPS position: 10 seconds.
    pub gps_s: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            matrix_s: 7 * 24 * 3600,
            geometry_s: 24 * 3600,
            reference_s: 3600,
            schedule_s: 30 * 60,
            live_location_s: 60,
            active_route_s: 5 * 60,
            gps_s: 10,
        }
    }
}

/// Weekly planner knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Hard cap on visits scheduled for one agent-day.
    pub max_visits_per_day: usize,
    /// Default per-visit service time when the client has none.
    pub default_service_minutes: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_visits_per_day: 12,
            default_service_minutes: 15,
        }
    }
}

/// Haversine estimator speed used when the road backend is unreachable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Average speed in meters per second (8.33 ≈ 30 km/h).
    pub average_speed_mps: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self { average_speed_mps: 8.33 }
    }
}

/// Cache warmer schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WarmerConfig {
    /// Local wall-clock hour at which the daily pass runs.
    pub run_at_hour: u32,
    /// Agents with more active clients than this get a matrix pre-build.
    pub min_clients_for_matrix: usize,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            run_at_hour: 5,
            min_clients_for_matrix: 5,
        }
    }
}

/// Root configuration handed to the core at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    pub matrix: MatrixConfig,
    pub spatial: SpatialConfig,
    pub genetic: GeneticConfig,
    pub greedy: GreedyConfig,
    pub rerouting: ReroutingConfig,
    pub pipeline: PipelineConfig,
    pub cache_ttl: CacheTtlConfig,
    pub planner: PlannerConfig,
    pub estimator: EstimatorConfig,
    pub warmer: WarmerConfig,
}
