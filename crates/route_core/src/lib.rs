//! # SFA Route Optimization Core
//!
//! Planning and continuous adaptation of delivery and field-sales routes
//! for fleets operating across Central Asian metros.
//!
//! ## Overview
//!
//! This crate provides the optimization core, including:
//!
//! - **Solvers**: greedy + 2-opt, genetic, and two external engine
//!   adapters behind one [`solver::Solver`] contract, with a registry,
//!   ordered fallback chain and feature-based smart selection
//! - **Distance matrices**: OSRM table/route client with retries, parallel
//!   batched NxN computation, content-addressed TTL caching and a
//!   Haversine degraded mode
//! - **Spatial indexing**: H3-based radius and k-nearest queries with a
//!   grid fallback sharing the same contract
//! - **Weekly planning**: category-driven visit frequency, k-medoids
//!   clustering, per-day sequencing
//! - **Predictive rerouting**: traffic-aware feasibility projection with
//!   threshold-gated proactive re-solves
//! - **Event pipeline**: bounded priority queue with a worker pool,
//!   per-handler timeouts, retries and a dead-letter store
//!
//! ## Key Concepts
//!
//! - **Ports over transports**: HTTP, storage and delivery concerns stay
//!   outside; the core consumes [`matrix::MatrixBackend`],
//!   [`cache::Cache`], [`clock::Clock`], [`repository::Repository`] and
//!   [`events::EventSink`]
//! - **Deterministic where it matters**: seeded genetic runs reproduce
//!   bit-identically; greedy and clustering break ties on stable ids
//! - **Cancellation everywhere**: long-running operations take a
//!   `CancellationToken` and discard partial results when it fires
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use route_core::config::CoreConfig;
//! use route_core::matrix::parallel::ParallelMatrix;
//! use route_core::matrix::haversine::HaversineMatrixBackend;
//! use route_core::solver::greedy::GreedySolver;
//! use route_core::solver::registry::SolverRegistry;
//!
//! let config = CoreConfig::default();
//! let backend = Arc::new(HaversineMatrixBackend::new(config.estimator));
//! let matrix = ParallelMatrix::new(backend, config.matrix.clone());
//! let mut registry = SolverRegistry::new();
//! registry.register(Arc::new(GreedySolver::new(config.greedy)));
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod handlers;
pub mod matrix;
pub mod model;
pub mod pipeline;
pub mod planner;
pub mod repository;
pub mod rerouting;
pub mod solver;
pub mod spatial;
pub mod traffic;
pub mod warmer;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
