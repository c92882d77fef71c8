//! Smart selection and fallback across real solver implementations.

mod support;

use std::sync::Arc;
use std::time::Duration;

use route_core::config::GeneticConfig;
use route_core::error::CoreError;
use route_core::model::TimeWindow;
use route_core::solver::genetic::GeneticSolver;
use route_core::solver::greedy::GreedySolver;
use route_core::solver::ortools::OrToolsSolver;
use route_core::solver::registry::{SmartSelector, SolverRegistry};
use route_core::solver::vroom::VroomSolver;
use route_core::solver::SolverKind;
use tokio_util::sync::CancellationToken;

use support::line_problem;

/// S3: 250 jobs with tight 30-minute windows select the rich external
/// engine; with that adapter down, the chain falls through to genetic.
#[tokio::test]
async fn tight_large_problem_selects_rich_then_falls_back_to_genetic() {
    let mut problem = line_problem(250);
    problem.flags.has_time_windows = true;
    // 30-minute windows: tightness = 1 - 1800/28800 = 0.9375.
    for job in &mut problem.jobs {
        job.location.time_window = Some(TimeWindow::new(0, 30));
    }
    problem.flags.allow_unassigned = true;

    let selected = SmartSelector.select(&problem);
    assert_eq!(selected, SolverKind::ExternalRich);

    // Rich adapter points at a dead endpoint; genetic must take over.
    let mut registry = SolverRegistry::new();
    registry.register(Arc::new(
        OrToolsSolver::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap(),
    ));
    registry.register(Arc::new(GeneticSolver::new(GeneticConfig {
        population: 20,
        generations: 10,
        early_stop: 5,
        seed: Some(11),
        ..GeneticConfig::default()
    })));
    registry.register(Arc::new(GreedySolver::default()));

    let solution = registry
        .solve_with_fallback(&problem, Some(selected), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(solution.solver_kind, SolverKind::Genetic);
}

/// Both external adapters down: the chain ends on local greedy.
#[tokio::test]
async fn chain_degrades_to_greedy_when_externals_down() {
    let problem = line_problem(6);

    let mut registry = SolverRegistry::new();
    registry.register(Arc::new(
        VroomSolver::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap(),
    ));
    registry.register(Arc::new(
        OrToolsSolver::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap(),
    ));
    registry.register(Arc::new(GreedySolver::default()));

    let solution = registry
        .solve_with_fallback(&problem, Some(SolverKind::ExternalFast), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(solution.solver_kind, SolverKind::Greedy);
    assert_eq!(solution.assigned_count(), 6);
}

/// Cancellation short-circuits the chain instead of falling back.
#[tokio::test]
async fn cancellation_does_not_fall_back() {
    let problem = line_problem(6);
    let mut registry = SolverRegistry::new();
    registry.register(Arc::new(GreedySolver::default()));

    let token = CancellationToken::new();
    token.cancel();
    let err = registry
        .solve_with_fallback(&problem, None, &token)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
}

/// Greedy and seeded genetic agree on assignment counts for the same
/// instance, and neither mutates the shared problem.
#[tokio::test]
async fn solvers_agree_on_small_instance() {
    let problem = line_problem(8);
    let snapshot = serde_json::to_string(&problem).unwrap();

    let greedy = GreedySolver::default();
    let genetic = GeneticSolver::new(GeneticConfig {
        population: 30,
        generations: 40,
        early_stop: 15,
        seed: Some(3),
        ..GeneticConfig::default()
    });

    let cancel = CancellationToken::new();
    let a = route_core::solver::Solver::solve(&greedy, &problem, &cancel).await.unwrap();
    let b = route_core::solver::Solver::solve(&genetic, &problem, &cancel).await.unwrap();

    assert_eq!(a.assigned_count(), 8);
    assert_eq!(b.assigned_count(), 8);
    assert_eq!(serde_json::to_string(&problem).unwrap(), snapshot);
}
