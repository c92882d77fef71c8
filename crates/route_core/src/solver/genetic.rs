//! Genetic solver: permutation chromosomes over job indices.
//!
//! Decoding splits a permutation across vehicles greedily (append while
//! feasible, overflow to the next vehicle, leftovers unassigned). Fitness is
//! the negated total duration plus a penalty far above any realistic
//! duration per unassigned job, so assignment always dominates tour length.
//!
//! Tournament selection, order crossover (OX), mutation choosing uniformly
//! among swap / insert / segment-reverse, elitism. With a seed the run is
//! bit-identical for an identical matrix; the cancellation token is checked
//! between generations.

use std::time::Instant;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GeneticConfig;
use crate::error::CoreError;
use crate::model::{Problem, Solution};

use super::schedule::{assemble_solution, paired_delivery_ids, simulate};
use super::{Solver, SolverKind};

const TOURNAMENT_SIZE: usize = 5;

/// Penalty scale: multiplied by the mean matrix duration per violation.
const PENALTY_FACTOR: f64 = 10_000.0;

pub struct GeneticSolver {
    config: GeneticConfig,
}

impl GeneticSolver {
    pub fn new(config: GeneticConfig) -> Self {
        Self { config }
    }
}

impl Default for GeneticSolver {
    fn default() -> Self {
        Self::new(GeneticConfig::default())
    }
}

#[async_trait]
impl Solver for GeneticSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::Genetic
    }

    async fn solve(
        &self,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<Solution, CoreError> {
        problem.validate()?;
        let started = Instant::now();

        let owned = problem.clone();
        let config = self.config;
        let cancel = cancel.clone();
        let mut solution =
            tokio::task::spawn_blocking(move || run_evolution(&owned, &config, &cancel))
                .await
                .map_err(|e| CoreError::Internal(format!("genetic task failed: {e}")))??;
        solution.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(solution)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Decoded chromosome: per-vehicle sequences, unassigned leftovers, cost.
struct Decoded {
    assignments: Vec<Vec<usize>>,
    unassigned: Vec<usize>,
    cost: f64,
}

fn run_evolution(
    problem: &Problem,
    config: &GeneticConfig,
    cancel: &CancellationToken,
) -> Result<Solution, CoreError> {
    let n = problem.jobs.len();
    if n == 0 {
        return Ok(assemble_solution(
            problem,
            &vec![Vec::new(); problem.vehicles.len()],
            &[],
            SolverKind::Genetic,
            0,
            None,
        ));
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let penalty = PENALTY_FACTOR * problem.matrix.mean_seconds().max(1.0);

    // Initial population: identity plus shuffles.
    let identity: Vec<usize> = (0..n).collect();
    let mut population: Vec<Vec<usize>> = Vec::with_capacity(config.population);
    population.push(identity.clone());
    while population.len() < config.population.max(2) {
        let mut perm = identity.clone();
        perm.shuffle(&mut rng);
        population.push(perm);
    }

    let mut costs: Vec<f64> = population
        .iter()
        .map(|p| decode(problem, p, penalty).cost)
        .collect();
    let mut best_cost = f64::INFINITY;
    let mut stagnant = 0usize;
    let mut generations_run = 0usize;

    for generation in 0..config.generations {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        generations_run = generation + 1;

        // Elitism: carry the best E forward untouched.
        let mut ranked: Vec<usize> = (0..population.len()).collect();
        ranked.sort_by(|&a, &b| costs[a].partial_cmp(&costs[b]).unwrap_or(std::cmp::Ordering::Equal));
        let mut next: Vec<Vec<usize>> = ranked
            .iter()
            .take(config.elite.min(population.len()))
            .map(|&i| population[i].clone())
            .collect();

        while next.len() < population.len() {
            let a = tournament(&costs, &mut rng);
            let b = tournament(&costs, &mut rng);
            let mut child = if rng.gen::<f64>() < config.crossover_rate {
                order_crossover(&population[a], &population[b], &mut rng)
            } else {
                population[a].clone()
            };
            if rng.gen::<f64>() < config.mutation_rate {
                mutate(&mut child, &mut rng);
            }
            next.push(child);
        }

        population = next;
        costs = population
            .iter()
            .map(|p| decode(problem, p, penalty).cost)
            .collect();

        let generation_best = costs.iter().copied().fold(f64::INFINITY, f64::min);
        if generation_best < best_cost - 1e-9 {
            best_cost = generation_best;
            stagnant = 0;
        } else {
            stagnant += 1;
            if stagnant >= config.early_stop {
                debug!(generation, stagnant, "genetic early stop");
                break;
            }
        }
    }

    let best_idx = (0..population.len())
        .min_by(|&a, &b| costs[a].partial_cmp(&costs[b]).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or(0);
    let decoded = decode(problem, &population[best_idx], penalty);

    if !problem.flags.allow_unassigned && !decoded.unassigned.is_empty() {
        let ids: Vec<&str> = decoded
            .unassigned
            .iter()
            .map(|&j| problem.jobs[j].id.as_str())
            .collect();
        return Err(CoreError::InfeasibleProblem(format!(
            "jobs fit no vehicle: {}",
            ids.join(", ")
        )));
    }

    Ok(assemble_solution(
        problem,
        &decoded.assignments,
        &decoded.unassigned,
        SolverKind::Genetic,
        0,
        Some(format!("genetic, {generations_run} generations")),
    ))
}

/// Pick the lowest-cost index among `TOURNAMENT_SIZE` random entrants.
fn tournament(costs: &[f64], rng: &mut StdRng) -> usize {
    let mut best = rng.gen_range(0..costs.len());
    for _ in 1..TOURNAMENT_SIZE {
        let challenger = rng.gen_range(0..costs.len());
        if costs[challenger] < costs[best] {
            best = challenger;
        }
    }
    best
}

/// Order crossover: keep a slice of `a`, fill the rest in `b`'s order.
fn order_crossover(a: &[usize], b: &[usize], rng: &mut StdRng) -> Vec<usize> {
    let n = a.len();
    if n < 2 {
        return a.to_vec();
    }
    let mut i = rng.gen_range(0..n);
    let mut j = rng.gen_range(0..n);
    if i > j {
        std::mem::swap(&mut i, &mut j);
    }
    let kept: std::collections::HashSet<usize> = a[i..=j].iter().copied().collect();
    let mut child = Vec::with_capacity(n);
    let mut fill = b.iter().filter(|&g| !kept.contains(g));
    for position in 0..n {
        if position >= i && position <= j {
            child.push(a[position]);
        } else {
            child.push(*fill.next().expect("OX fill exhausted"));
        }
    }
    child
}

/// One of swap / insert / segment-reverse, uniformly.
fn mutate(perm: &mut Vec<usize>, rng: &mut StdRng) {
    let n = perm.len();
    if n < 2 {
        return;
    }
    match rng.gen_range(0..3) {
        0 => {
            let a = rng.gen_range(0..n);
            let b = rng.gen_range(0..n);
            perm.swap(a, b);
        }
        1 => {
            let from = rng.gen_range(0..n);
            let gene = perm.remove(from);
            let to = rng.gen_range(0..n);
            perm.insert(to, gene);
        }
        _ => {
            let mut a = rng.gen_range(0..n);
            let mut b = rng.gen_range(0..n);
            if a > b {
                std::mem::swap(&mut a, &mut b);
            }
            perm[a..=b].reverse();
        }
    }
}

/// Greedy split of a permutation across vehicles. Paired deliveries ride
/// with their pickup; leftovers go unassigned at a heavy penalty.
fn decode(problem: &Problem, perm: &[usize], penalty: f64) -> Decoded {
    let deliveries = paired_delivery_ids(problem);
    let mut assignments: Vec<Vec<usize>> = vec![Vec::new(); problem.vehicles.len()];
    let mut unassigned: Vec<usize> = Vec::new();
    let mut placed = vec![false; problem.jobs.len()];

    for &j in perm {
        if placed[j] || deliveries.contains(&problem.jobs[j].id) {
            continue;
        }
        let pair = problem.jobs[j]
            .pickup_pair_id
            .as_ref()
            .and_then(|id| problem.jobs.iter().position(|x| &x.id == id));

        let mut done = false;
        for v in 0..problem.vehicles.len() {
            let mut attempt = assignments[v].clone();
            attempt.push(j);
            if let Some(d) = pair {
                attempt.push(d);
            }
            if simulate(problem, v, &attempt).feasible() {
                assignments[v] = attempt;
                placed[j] = true;
                if let Some(d) = pair {
                    placed[d] = true;
                }
                done = true;
                break;
            }
        }
        if !done {
            unassigned.push(j);
            placed[j] = true;
            if let Some(d) = pair {
                unassigned.push(d);
                placed[d] = true;
            }
        }
    }
    // Paired deliveries whose pickup never appeared (defensive; validate
    // catches dangling pairs earlier).
    for j in 0..problem.jobs.len() {
        if !placed[j] {
            unassigned.push(j);
        }
    }
    unassigned.sort_unstable();

    let mut cost = 0.0;
    for (v, sequence) in assignments.iter().enumerate() {
        if !sequence.is_empty() {
            cost += simulate(problem, v, sequence).total_seconds;
        }
    }
    cost += penalty * unassigned.len() as f64;

    Decoded {
        assignments,
        unassigned,
        cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::model::{ConstraintFlags, Demand, DistanceMatrix, Job, Location, Vehicle};
    use chrono::NaiveDate;

    fn problem(n_jobs: usize) -> Problem {
        let coord = |x: f64, y: f64| Coordinate::new(41.0 + x * 0.01, 69.0 + y * 0.01).unwrap();
        let vehicle = Vehicle::new(
            "v1",
            Location::new(coord(0.0, 0.0)),
            Demand::new(1000.0, 100.0),
        );
        let jobs: Vec<Job> = (0..n_jobs)
            .map(|i| {
                Job::new(
                    format!("j{i}"),
                    Location::new(coord((i % 3) as f64 + 1.0, (i / 3) as f64))
                        .with_service_minutes(5),
                    Demand::new(1.0, 0.1),
                )
            })
            .collect();
        let n = 1 + n_jobs;
        let pos = |idx: usize| -> (f64, f64) {
            if idx == 0 {
                (0.0, 0.0)
            } else {
                (((idx - 1) % 3) as f64 + 1.0, ((idx - 1) / 3) as f64)
            }
        };
        let mut matrix = DistanceMatrix::filled_unreachable(n);
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    let (xi, yi) = pos(i);
                    let (xj, yj) = pos(j);
                    let d = ((xi - xj).abs() + (yi - yj).abs()) * 1000.0;
                    matrix.set(i, j, d * 0.6, d);
                }
            }
        }
        Problem {
            day: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
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

    fn quick_config(seed: u64) -> GeneticConfig {
        GeneticConfig {
            population: 30,
            generations: 60,
            early_stop: 20,
            seed: Some(seed),
            ..GeneticConfig::default()
        }
    }

    #[tokio::test]
    async fn assigns_all_jobs_when_capacity_allows() {
        let p = problem(6);
        let solution = GeneticSolver::new(quick_config(42))
            .solve(&p, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(solution.assigned_count(), 6);
        assert!(solution.unassigned_job_ids.is_empty());
        assert_eq!(solution.solver_kind, SolverKind::Genetic);
    }

    #[tokio::test]
    async fn seeded_runs_reproduce_identical_totals() {
        let p = problem(8);
        let a = GeneticSolver::new(quick_config(7))
            .solve(&p, &CancellationToken::new())
            .await
            .unwrap();
        let b = GeneticSolver::new(quick_config(7))
            .solve(&p, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(a.total_seconds, b.total_seconds);
        assert_eq!(a.total_meters, b.total_meters);
        let routes_a: Vec<Vec<&str>> = a.routes.iter().map(|r| r.visit_ids()).collect();
        let routes_b: Vec<Vec<&str>> = b.routes.iter().map(|r| r.visit_ids()).collect();
        assert_eq!(routes_a, routes_b);
    }

    #[tokio::test]
    async fn cancelled_between_generations() {
        let p = problem(8);
        let token = CancellationToken::new();
        token.cancel();
        let err = GeneticSolver::new(quick_config(1))
            .solve(&p, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[test]
    fn order_crossover_preserves_permutation() {
        let mut rng = StdRng::seed_from_u64(3);
        let a: Vec<usize> = (0..10).collect();
        let mut b: Vec<usize> = (0..10).collect();
        b.reverse();
        for _ in 0..50 {
            let child = order_crossover(&a, &b, &mut rng);
            let mut sorted = child.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn mutate_preserves_permutation() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let mut perm: Vec<usize> = (0..8).collect();
            mutate(&mut perm, &mut rng);
            let mut sorted = perm.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..8).collect::<Vec<_>>());
        }
    }

    #[test]
    fn decode_penalizes_unassigned() {
        let mut p = problem(4);
        p.vehicles[0].capacity = Demand::new(2.0, 100.0);
        let penalty = 1_000_000.0;
        let perm: Vec<usize> = (0..4).collect();
        let decoded = decode(&p, &perm, penalty);
        assert_eq!(decoded.unassigned.len(), 2);
        assert!(decoded.cost >= 2.0 * penalty);
    }
}
