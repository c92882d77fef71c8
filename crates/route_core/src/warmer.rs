//! Scheduled cache warming.
//!
//! One pass per day (default 05:00): pre-build hot matrices for agents with
//! enough active clients, refresh reference lookups, and synthesize missing
//! daily plans through the weekly planner's single-day path. Failures are
//! isolated per agent so one broken dataset never starves the rest of the
//! fleet.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::clock::Clock;
use crate::config::{CacheTtlConfig, WarmerConfig};
use crate::error::CoreError;
use crate::matrix::parallel::ParallelMatrix;
use crate::planner::{RegionalRules, WeeklyPlanner};
use crate::repository::{Agent, Repository};

/// Counters from one warm-up pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WarmerReport {
    pub agents_seen: usize,
    pub matrices_warmed: usize,
    pub plans_warmed: usize,
    pub failures: usize,
}

pub struct CacheWarmer {
    repository: Arc<dyn Repository>,
    matrix: Arc<ParallelMatrix>,
    planner: Arc<WeeklyPlanner>,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
    ttl: CacheTtlConfig,
    config: WarmerConfig,
    rules: RegionalRules,
}

impl CacheWarmer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn Repository>,
        matrix: Arc<ParallelMatrix>,
        planner: Arc<WeeklyPlanner>,
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
        ttl: CacheTtlConfig,
        config: WarmerConfig,
        rules: RegionalRules,
    ) -> Self {
        Self {
            repository,
            matrix,
            planner,
            cache,
            clock,
            ttl,
            config,
            rules,
        }
    }

    /// One full warm-up pass over the active fleet.
    pub async fn run_once(&self, cancel: &CancellationToken) -> WarmerReport {
        let mut report = WarmerReport::default();
        let agents = match self.repository.active_agents().await {
            Ok(agents) => agents,
            Err(err) => {
                warn!(error = %err, "warmer could not enumerate agents");
                report.failures += 1;
                return report;
            }
        };

        // Fleet-wide reference data first.
        if let Ok(vehicles) = self.repository.vehicles().await {
            if let Ok(bytes) = serde_json::to_vec(&vehicles) {
                self.cache
                    .set("ref:vehicles", bytes, Duration::from_secs(self.ttl.reference_s))
                    .await;
            }
        }

        for agent in agents {
            if cancel.is_cancelled() {
                break;
            }
            report.agents_seen += 1;
            match self.warm_agent(&agent, cancel).await {
                Ok((matrix_warmed, plan_warmed)) => {
                    if matrix_warmed {
                        report.matrices_warmed += 1;
                    }
                    if plan_warmed {
                        report.plans_warmed += 1;
                    }
                }
                Err(CoreError::Cancelled) => break,
                Err(err) => {
                    report.failures += 1;
                    warn!(agent_id = %agent.id, error = %err, "agent warm-up failed, continuing");
                }
            }
        }

        info!(
            agents = report.agents_seen,
            matrices = report.matrices_warmed,
            plans = report.plans_warmed,
            failures = report.failures,
            "cache warm-up pass complete"
        );
        report
    }

    /// Warm one agent: reference data, matrix, and today's plan if absent.
    async fn warm_agent(
        &self,
        agent: &Agent,
        cancel: &CancellationToken,
    ) -> Result<(bool, bool), CoreError> {
        let clients = self.repository.clients_for_agent(&agent.id).await?;
        if let Ok(bytes) = serde_json::to_vec(&clients) {
            self.cache
                .set(
                    &format!("ref:clients:{}", agent.id),
                    bytes,
                    Duration::from_secs(self.ttl.reference_s),
                )
                .await;
        }

        let mut matrix_warmed = false;
        if clients.len() > self.config.min_clients_for_matrix {
            let mut coords = Vec::with_capacity(1 + clients.len());
            coords.push(agent.depot.coordinate);
            coords.extend(clients.iter().map(|c| c.location.coordinate));
            // Cache-through: the parallel matrix writes both granularities.
            self.matrix.compute(&agent.id, &coords, cancel).await?;
            matrix_warmed = true;
        }

        let today = self.clock.now().date_naive();
        let plan_key = format!("schedule:{}:{}", agent.id, today);
        let mut plan_warmed = false;
        if self.cache.get(&plan_key).await.is_none() {
            let plan = self
                .planner
                .plan_single_day(agent, &clients, today, &self.rules, cancel)
                .await?;
            if let Ok(bytes) = serde_json::to_vec(&plan) {
                self.cache
                    .set(&plan_key, bytes, Duration::from_secs(self.ttl.schedule_s))
                    .await;
            }
            plan_warmed = true;
        } else {
            debug!(agent_id = %agent.id, "daily plan already cached");
        }
        Ok((matrix_warmed, plan_warmed))
    }

    /// Seconds until the next configured run hour.
    fn seconds_until_next_run(&self) -> u64 {
        let now = self.clock.now();
        let target_today = now
            .date_naive()
            .and_hms_opt(self.config.run_at_hour.min(23), 0, 0)
            .expect("hour is validated")
            .and_utc();
        let target = if now < target_today {
            target_today
        } else {
            target_today + chrono::Duration::days(1)
        };
        (target - now).num_seconds().max(1) as u64
    }

    /// Daily loop; returns when cancelled.
    pub async fn run_scheduled(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let wait = self.seconds_until_next_run();
            debug!(wait_s = wait, "warmer sleeping until next pass");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
            }
            self.run_once(&cancel).await;
        }
    }
}
