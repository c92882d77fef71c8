//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use route_core::config::MatrixConfig;
use route_core::geo::Coordinate;
use route_core::matrix::parallel::ParallelMatrix;
use route_core::model::{
    ConstraintFlags, Demand, DistanceMatrix, Job, Location, Problem, TimeWindow, Vehicle,
};
use route_core::repository::{Agent, Client, ClientCategory};
use route_core::solver::greedy::GreedySolver;
use route_core::solver::registry::SolverRegistry;
use route_core::test_helpers::StaticMatrixBackend;

/// Route test logs through the captured test writer; safe to call from
/// every test, only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn coord(lat: f64, lon: f64) -> Coordinate {
    Coordinate::new(lat, lon).unwrap()
}

pub fn monday() -> NaiveDate {
    // 2025-06-02, ISO week 23.
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

pub fn agent(id: &str) -> Agent {
    Agent {
        id: id.into(),
        name: id.to_uppercase(),
        depot: Location::new(coord(41.30, 69.24)),
        region: "tashkent".into(),
        active: true,
        work_window: TimeWindow::new(9 * 60, 19 * 60),
    }
}

pub fn client(id: &str, agent_id: &str, category: ClientCategory, lat: f64, lon: f64) -> Client {
    Client {
        id: id.into(),
        agent_id: agent_id.into(),
        location: Location::new(coord(lat, lon)),
        category,
        active: true,
    }
}

/// Parallel matrix over the deterministic Manhattan backend.
pub fn static_parallel_matrix(config: MatrixConfig) -> (Arc<ParallelMatrix>, Arc<StaticMatrixBackend>) {
    let backend = Arc::new(StaticMatrixBackend::new());
    let matrix = Arc::new(ParallelMatrix::new(backend.clone(), config));
    (matrix, backend)
}

/// Registry with only the local greedy solver.
pub fn greedy_registry() -> Arc<SolverRegistry> {
    let mut registry = SolverRegistry::new();
    registry.register(Arc::new(GreedySolver::default()));
    Arc::new(registry)
}

/// Single-vehicle problem over `n_jobs` points on a line; 600 s / 1000 m
/// per hop.
pub fn line_problem(n_jobs: usize) -> Problem {
    let vehicle = Vehicle::new(
        "v1",
        Location::new(coord(41.0, 69.0)),
        Demand::new(1e6, 1e5),
    );
    let jobs: Vec<Job> = (0..n_jobs)
        .map(|i| {
            Job::new(
                format!("j{i}"),
                Location::new(coord(41.0 + 0.01 * i as f64, 69.0)).with_service_minutes(0),
                Demand::new(1.0, 0.1),
            )
        })
        .collect();
    let n = 1 + n_jobs;
    let pos = |idx: usize| if idx == 0 { 0.0 } else { (idx - 1) as f64 };
    let mut matrix = DistanceMatrix::filled_unreachable(n);
    for i in 0..n {
        for j in 0..n {
            if i != j {
                let hops = (pos(i) - pos(j)).abs();
                matrix.set(i, j, hops * 600.0, hops * 1000.0);
            }
        }
    }
    Problem {
        day: monday(),
        jobs,
        vehicles: vec![vehicle],
        matrix,
        flags: ConstraintFlags {
            has_capacity: true,
            allow_unassigned: true,
            ..ConstraintFlags::default()
        },
    }
}
