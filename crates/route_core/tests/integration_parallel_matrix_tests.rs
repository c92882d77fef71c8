//! Parallel matrix stitching and cache behavior end to end.

mod support;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use route_core::cache::{Cache, InMemoryCache};
use route_core::clock::ManualClock;
use route_core::config::{CacheTtlConfig, MatrixConfig};
use route_core::geo::Coordinate;
use route_core::matrix::cache::{InvalidationTrigger, MatrixCache};
use route_core::matrix::parallel::ParallelMatrix;
use route_core::matrix::MatrixBackend;
use route_core::test_helpers::StaticMatrixBackend;
use tokio_util::sync::CancellationToken;

use support::{coord, static_parallel_matrix};

/// S1: four Tashkent coordinates, batch size 2, concurrency 2, Manhattan
/// backend. The stitched result matches a single whole-table call.
#[tokio::test]
async fn stitched_matrix_equals_single_call() {
    let coords = vec![
        coord(41.30, 69.24),
        coord(41.32, 69.28),
        coord(41.28, 69.32),
        coord(41.34, 69.22),
    ];
    let backend = Arc::new(StaticMatrixBackend::new());
    let single = backend.table(&coords, None, None).await.unwrap();

    let parallel = ParallelMatrix::new(
        backend,
        MatrixConfig {
            batch_size: 2,
            max_concurrent: 2,
            ..MatrixConfig::default()
        },
    );
    let stitched = parallel
        .compute("global", &coords, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stitched.len(), 4);
    for i in 0..4 {
        assert_eq!(stitched.seconds_at(i, i), 0.0, "diagonal must be zero");
        for j in 0..4 {
            if i != j {
                assert!(
                    (stitched.seconds_at(i, j) - single.durations[i][j]).abs() < 1e-9,
                    "cell ({i},{j}) diverged"
                );
                assert!((stitched.meters_at(i, j) - single.distances[i][j]).abs() < 1e-9);
            }
        }
    }
    // Corner cell singled out by the scenario.
    assert!((stitched.seconds_at(0, 3) - single.durations[0][3]).abs() < 1e-9);
}

fn cached_setup() -> (Arc<ParallelMatrix>, Arc<StaticMatrixBackend>, Arc<InMemoryCache>, Arc<MatrixCache>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap(),
    ));
    let store = Arc::new(InMemoryCache::new(clock));
    let matrix_cache = Arc::new(MatrixCache::new(store.clone(), CacheTtlConfig::default()));
    let backend = Arc::new(StaticMatrixBackend::new());
    let parallel = Arc::new(
        ParallelMatrix::new(
            backend.clone(),
            MatrixConfig {
                batch_size: 2,
                max_concurrent: 2,
                ..MatrixConfig::default()
            },
        )
        .with_cache(matrix_cache.clone()),
    );
    (parallel, backend, store, matrix_cache)
}

/// A second computation over the same coordinates is a pure cache hit.
#[tokio::test]
async fn recompute_hits_cache_instead_of_backend() {
    let (parallel, backend, _store, _mc) = cached_setup();
    let coords: Vec<Coordinate> = (0..5)
        .map(|i| coord(41.30 + 0.01 * f64::from(i), 69.24))
        .collect();

    let first = parallel
        .compute("a1", &coords, &CancellationToken::new())
        .await
        .unwrap();
    let calls_after_first = backend.table_calls();
    assert!(calls_after_first > 0);

    let second = parallel
        .compute("a1", &coords, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(backend.table_calls(), calls_after_first, "no new backend calls");
    assert_eq!(first, second);
}

/// Invalidation by agent prefix forces a rebuild; other agents keep theirs.
#[tokio::test]
async fn agent_invalidation_forces_rebuild() {
    let (parallel, backend, _store, matrix_cache) = cached_setup();
    let coords: Vec<Coordinate> = (0..4)
        .map(|i| coord(41.30 + 0.01 * f64::from(i), 69.24))
        .collect();

    parallel.compute("a1", &coords, &CancellationToken::new()).await.unwrap();
    parallel.compute("a2", &coords, &CancellationToken::new()).await.unwrap();
    let calls_before = backend.table_calls();

    matrix_cache
        .invalidate(&InvalidationTrigger::ClientUpdated { agent_id: "a1".into() })
        .await;

    parallel.compute("a2", &coords, &CancellationToken::new()).await.unwrap();
    assert_eq!(backend.table_calls(), calls_before, "a2 still cached");

    parallel.compute("a1", &coords, &CancellationToken::new()).await.unwrap();
    assert!(backend.table_calls() > calls_before, "a1 must recompute");
}

/// TTL expiry produces a miss at the shared-cache level.
#[tokio::test]
async fn matrix_entries_expire_with_ttl() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap(),
    ));
    let store = Arc::new(InMemoryCache::new(clock.clone()));
    let matrix_cache = MatrixCache::new(store.clone(), CacheTtlConfig::default());

    let coords = vec![coord(41.30, 69.24), coord(41.32, 69.28)];
    let key = MatrixCache::table_key("a1", "static", &coords, None, None);
    let slice = route_core::matrix::TableSlice {
        durations: vec![vec![0.0, 9.0], vec![9.0, 0.0]],
        distances: vec![vec![0.0, 90.0], vec![90.0, 0.0]],
    };
    matrix_cache.put_table(&key, &slice).await;
    assert!(matrix_cache.get_table(&key).await.is_some());

    // Past the 7-day matrix TTL.
    clock.advance_secs(7 * 24 * 3600 + 1);
    assert!(matrix_cache.get_table(&key).await.is_none());
    assert_eq!(store.get(&key).await, None);
}

/// When every batch fails and a full matrix is not required, all
/// off-diagonal cells degrade to the sentinel.
#[tokio::test]
async fn backend_outage_degrades_cells_to_sentinel() {
    let (matrix, backend) = static_parallel_matrix(MatrixConfig {
        batch_size: 2,
        ..MatrixConfig::default()
    });
    backend.set_failing(true);
    let coords: Vec<Coordinate> = (0..4)
        .map(|i| coord(41.30 + 0.01 * f64::from(i), 69.24))
        .collect();

    let degraded = matrix
        .compute("global", &coords, &CancellationToken::new())
        .await
        .unwrap();
    for i in 0..4 {
        for j in 0..4 {
            if i == j {
                assert_eq!(degraded.seconds_at(i, j), 0.0);
            } else {
                assert!(degraded.is_unreachable(i, j));
            }
        }
    }
}

/// With `require_full_matrix`, the same outage propagates as an error.
#[tokio::test]
async fn require_full_matrix_propagates_batch_failure() {
    let (matrix, backend) = static_parallel_matrix(MatrixConfig {
        batch_size: 2,
        require_full_matrix: true,
        ..MatrixConfig::default()
    });
    backend.set_failing(true);
    let coords: Vec<Coordinate> = (0..4)
        .map(|i| coord(41.30 + 0.01 * f64::from(i), 69.24))
        .collect();

    let err = matrix
        .compute("global", &coords, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.triggers_fallback(), "got {err:?}");
}
