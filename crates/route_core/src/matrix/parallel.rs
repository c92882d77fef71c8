//! Parallel NxN matrix computation.
//!
//! Decomposes a coordinate list into BxB batches, issues `table` calls
//! concurrently under a semaphore, and stitches the slices back together by
//! chunk offset. A failed batch degrades its cells to the unreachable
//! sentinel; other batches are unaffected. With `require_full_matrix` set,
//! any batch failure fails the whole request instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MatrixConfig;
use crate::error::CoreError;
use crate::geo::Coordinate;
use crate::model::DistanceMatrix;

use super::cache::MatrixCache;
use super::{MatrixBackend, TableSlice};

/// Batched, semaphore-limited matrix builder in front of a [`MatrixBackend`].
pub struct ParallelMatrix {
    backend: Arc<dyn MatrixBackend>,
    cache: Option<Arc<MatrixCache>>,
    config: MatrixConfig,
}

struct BatchOutcome {
    source_offset: usize,
    dest_offset: usize,
    result: Result<TableSlice, CoreError>,
}

impl ParallelMatrix {
    pub fn new(backend: Arc<dyn MatrixBackend>, config: MatrixConfig) -> Self {
        Self {
            backend,
            cache: None,
            config,
        }
    }

    /// Enable cache-through at both full-matrix and batch granularity.
    pub fn with_cache(mut self, cache: Arc<MatrixCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Compute the full NxN duration/distance matrix over `coords`.
    ///
    /// `scope` namespaces cache keys (agent id, or
    /// [`super::cache::GLOBAL_SCOPE`]).
    pub async fn compute(
        &self,
        scope: &str,
        coords: &[Coordinate],
        cancel: &CancellationToken,
    ) -> Result<DistanceMatrix, CoreError> {
        let n = coords.len();
        if n == 0 {
            return Ok(DistanceMatrix::filled_unreachable(0));
        }
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let profile = self.backend.profile().to_string();
        let full_key = self
            .cache
            .as_ref()
            .map(|_| MatrixCache::table_key(scope, &profile, coords, None, None));
        if let (Some(cache), Some(key)) = (&self.cache, &full_key) {
            if let Some(slice) = cache.get_table(key).await {
                if let Some(matrix) = matrix_from_full_slice(&slice, n) {
                    return Ok(matrix);
                }
            }
        }

        let batch = self.config.batch_size.max(1);
        let chunks: Vec<Vec<usize>> = (0..n)
            .collect::<Vec<_>>()
            .chunks(batch)
            .map(<[usize]>::to_vec)
            .collect();
        let n_batches = chunks.len() * chunks.len();
        debug!(n, batch, n_batches, "dispatching matrix batches");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let shared_coords: Arc<Vec<Coordinate>> = Arc::new(coords.to_vec());
        let mut tasks: JoinSet<BatchOutcome> = JoinSet::new();

        for sources in &chunks {
            for dests in &chunks {
                let semaphore = Arc::clone(&semaphore);
                let backend = Arc::clone(&self.backend);
                let cache = self.cache.clone();
                let coords = Arc::clone(&shared_coords);
                let sources = sources.clone();
                let dests = dests.clone();
                let cancel = cancel.clone();
                let scope = scope.to_string();
                let profile = profile.clone();

                tasks.spawn(async move {
                    let source_offset = sources[0];
                    let dest_offset = dests[0];
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return BatchOutcome {
                                source_offset,
                                dest_offset,
                                result: Err(CoreError::Cancelled),
                            }
                        }
                    };
                    if cancel.is_cancelled() {
                        return BatchOutcome {
                            source_offset,
                            dest_offset,
                            result: Err(CoreError::Cancelled),
                        };
                    }

                    let batch_key = cache.as_ref().map(|_| {
                        MatrixCache::table_key(
                            &scope,
                            &profile,
                            &coords,
                            Some(&sources),
                            Some(&dests),
                        )
                    });
                    if let (Some(cache), Some(key)) = (&cache, &batch_key) {
                        if let Some(slice) = cache.get_table(key).await {
                            return BatchOutcome {
                                source_offset,
                                dest_offset,
                                result: Ok(slice),
                            };
                        }
                    }

                    let result = backend.table(&coords, Some(&sources), Some(&dests)).await;
                    if let (Ok(slice), Some(cache), Some(key)) = (&result, &cache, &batch_key) {
                        cache.put_table(key, slice).await;
                    }
                    BatchOutcome {
                        source_offset,
                        dest_offset,
                        result,
                    }
                });
            }
        }

        // Overall stitch budget: 2 × per-call timeout × batch rounds.
        let rounds = n.div_ceil(batch) as u64;
        let budget = Duration::from_secs(2 * self.config.backend_timeout_s * rounds.max(1));

        let mut matrix = DistanceMatrix::filled_unreachable(n);
        let mut failed_batches = 0usize;
        let mut timed_out = false;
        let deadline = tokio::time::Instant::now() + budget;

        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(CoreError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tasks.abort_all();
                    if self.config.require_full_matrix {
                        return Err(CoreError::TimedOut(budget));
                    }
                    warn!(budget_s = budget.as_secs(), "matrix stitch budget elapsed, degrading remaining batches");
                    timed_out = true;
                    break;
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            let outcome = joined.map_err(|e| CoreError::Internal(format!("batch task panicked: {e}")))?;

            match outcome.result {
                Ok(slice) => {
                    stitch(&mut matrix, &slice, outcome.source_offset, outcome.dest_offset);
                }
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(err) => {
                    failed_batches += 1;
                    if self.config.require_full_matrix {
                        tasks.abort_all();
                        return Err(err);
                    }
                    warn!(
                        source_offset = outcome.source_offset,
                        dest_offset = outcome.dest_offset,
                        error = %err,
                        "matrix batch failed, cells degraded to sentinel"
                    );
                }
            }
        }

        if failed_batches > 0 || timed_out {
            info!(failed_batches, n_batches, "matrix completed with degraded batches");
        } else if let (Some(cache), Some(key)) = (&self.cache, &full_key) {
            cache.put_table(key, &full_slice_from_matrix(&matrix)).await;
        }
        Ok(matrix)
    }
}

/// Copy a batch slice into the full matrix at the given offsets. Chunks are
/// contiguous index ranges, so offsets fully determine cell placement.
fn stitch(matrix: &mut DistanceMatrix, slice: &TableSlice, source_offset: usize, dest_offset: usize) {
    for (i, (drow, mrow)) in slice.durations.iter().zip(&slice.distances).enumerate() {
        for (j, (&secs, &meters)) in drow.iter().zip(mrow).enumerate() {
            let (from, to) = (source_offset + i, dest_offset + j);
            if from == to {
                continue; // diagonal stays zero
            }
            matrix.set(from, to, secs, meters);
        }
    }
}

fn matrix_from_full_slice(slice: &TableSlice, n: usize) -> Option<DistanceMatrix> {
    if slice.rows() != n || slice.cols() != n {
        return None;
    }
    let mut matrix = DistanceMatrix::filled_unreachable(n);
    stitch(&mut matrix, slice, 0, 0);
    Some(matrix)
}

fn full_slice_from_matrix(matrix: &DistanceMatrix) -> TableSlice {
    let n = matrix.len();
    let mut durations = Vec::with_capacity(n);
    let mut distances = Vec::with_capacity(n);
    for i in 0..n {
        let mut drow = Vec::with_capacity(n);
        let mut mrow = Vec::with_capacity(n);
        for j in 0..n {
            drow.push(matrix.seconds_at(i, j));
            mrow.push(matrix.meters_at(i, j));
        }
        durations.push(drow);
        distances.push(mrow);
    }
    TableSlice { durations, distances }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::haversine::HaversineMatrixBackend;

    fn coords(n: usize) -> Vec<Coordinate> {
        (0..n)
            .map(|i| Coordinate::new(41.30 + 0.01 * i as f64, 69.24 + 0.005 * i as f64).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn batched_equals_single_call() {
        let backend = Arc::new(HaversineMatrixBackend::default());
        let coords = coords(7);
        let single = backend.table(&coords, None, None).await.unwrap();

        let pm = ParallelMatrix::new(
            backend,
            MatrixConfig {
                batch_size: 3,
                max_concurrent: 2,
                ..MatrixConfig::default()
            },
        );
        let stitched = pm
            .compute("global", &coords, &CancellationToken::new())
            .await
            .unwrap();

        for i in 0..7 {
            for j in 0..7 {
                if i == j {
                    assert_eq!(stitched.seconds_at(i, j), 0.0);
                } else {
                    assert!((stitched.seconds_at(i, j) - single.durations[i][j]).abs() < 1e-9);
                    assert!((stitched.meters_at(i, j) - single.distances[i][j]).abs() < 1e-9);
                }
            }
        }
    }

    #[tokio::test]
    async fn empty_input_yields_empty_matrix() {
        let pm = ParallelMatrix::new(
            Arc::new(HaversineMatrixBackend::default()),
            MatrixConfig::default(),
        );
        let m = pm
            .compute("global", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(m.is_empty());
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let pm = ParallelMatrix::new(
            Arc::new(HaversineMatrixBackend::default()),
            MatrixConfig::default(),
        );
        let token = CancellationToken::new();
        token.cancel();
        let err = pm.compute("global", &coords(4), &token).await.unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }
}
