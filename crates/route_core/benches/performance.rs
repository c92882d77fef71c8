use criterion::{criterion_group, criterion_main, Criterion};

use route_core::config::{GreedyConfig, SpatialConfig};
use route_core::geo::Coordinate;
use route_core::model::{
    ConstraintFlags, Demand, DistanceMatrix, Job, Location, Problem, Vehicle,
};
use route_core::solver::greedy::GreedySolver;
use route_core::solver::Solver;
use route_core::spatial::h3::H3SpatialIndex;
use route_core::spatial::{SpatialEntity, SpatialIndex};
use tokio_util::sync::CancellationToken;

fn grid_problem(n_jobs: usize) -> Problem {
    let coord = |x: f64, y: f64| Coordinate::new(41.0 + x * 0.01, 69.0 + y * 0.01).unwrap();
    let vehicle = Vehicle::new("v1", Location::new(coord(0.0, 0.0)), Demand::new(1e6, 1e5));
    let jobs: Vec<Job> = (0..n_jobs)
        .map(|i| {
            Job::new(
                format!("j{i}"),
                Location::new(coord((i % 6) as f64, (i / 6) as f64)).with_service_minutes(5),
                Demand::new(1.0, 0.1),
            )
        })
        .collect();
    let n = 1 + n_jobs;
    let pos = |idx: usize| -> (f64, f64) {
        if idx == 0 {
            (0.0, 0.0)
        } else {
            (((idx - 1) % 6) as f64, ((idx - 1) / 6) as f64)
        }
    };
    let mut matrix = DistanceMatrix::filled_unreachable(n);
    for i in 0..n {
        for j in 0..n {
            if i != j {
                let (xi, yi) = pos(i);
                let (xj, yj) = pos(j);
                let d = ((xi - xj).abs() + (yi - yj).abs()) * 1100.0;
                matrix.set(i, j, d / 8.0, d);
            }
        }
    }
    Problem {
        day: chrono::NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
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

fn bench_greedy(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let solver = GreedySolver::new(GreedyConfig::default());
    let problem = grid_problem(24);
    let cancel = CancellationToken::new();

    c.bench_function("greedy_solve_24_jobs", |b| {
        b.iter(|| {
            rt.block_on(async { solver.solve(&problem, &cancel).await.unwrap() })
        })
    });
}

fn bench_spatial(c: &mut Criterion) {
    let index = H3SpatialIndex::new(SpatialConfig::default()).unwrap();
    for i in 0..1000 {
        let lat = 41.26 + (i % 40) as f64 * 0.002;
        let lon = 69.20 + (i / 40) as f64 * 0.004;
        index
            .add(SpatialEntity::new(
                format!("e{i}"),
                Coordinate::new(lat, lon).unwrap(),
            ))
            .unwrap();
    }
    let center = Coordinate::new(41.30, 69.25).unwrap();

    c.bench_function("h3_radius_500m_1000_entities", |b| {
        b.iter(|| index.radius(center, 500.0))
    });
    c.bench_function("h3_k_nearest_10_1000_entities", |b| {
        b.iter(|| index.k_nearest(center, 10))
    });
}

criterion_group!(benches, bench_greedy, bench_spatial);
criterion_main!(benches);
