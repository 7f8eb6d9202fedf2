//! Aggregate counters and health for the `/api/v1/system/stats` and
//! `/api/v1/health` surfaces.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::PgPool;

use routerx_db::queries::{pools, tasks};

use crate::queue::Queue;
use crate::runner::Runner;

/// Utilization of a single worker pool, as a percentage.
#[derive(Debug, Clone, Serialize)]
pub struct PoolUtilization {
    pub name: String,
    pub current_load: i32,
    pub capacity: i32,
    pub utilization_pct: f64,
}

/// Aggregated system statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
    pub queue_size: usize,
    pub pool_utilization: Vec<PoolUtilization>,
    pub average_latency_ms: Option<f64>,
    pub throughput_per_minute: f64,
    pub tasks_scheduled: u64,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
}

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Compute a fresh snapshot of system statistics.
pub async fn get_stats(pool: &PgPool, queue: &Queue, runner: &Runner) -> Result<SystemStats> {
    let counts = tasks::get_status_counts(pool)
        .await
        .context("failed to get task status counts")?;

    let worker_pools = pools::list_pools(pool)
        .await
        .context("failed to list worker pools")?;

    let pool_utilization = worker_pools
        .iter()
        .map(|p| PoolUtilization {
            name: p.name.clone(),
            current_load: p.current_load,
            capacity: p.capacity,
            utilization_pct: if p.capacity > 0 {
                (p.current_load as f64 / p.capacity as f64) * 100.0
            } else {
                0.0
            },
        })
        .collect();

    let average_latency_ms = tasks::average_latency_ms(pool)
        .await
        .context("failed to compute average latency")?;

    let completed_recently = tasks::completed_in_last(pool, THROUGHPUT_WINDOW)
        .await
        .context("failed to count recently completed tasks")?;
    let throughput_per_minute =
        completed_recently as f64 / (THROUGHPUT_WINDOW.as_secs_f64() / 60.0);

    Ok(SystemStats {
        queued: counts.queued,
        processing: counts.processing,
        completed: counts.completed,
        failed: counts.failed,
        cancelled: counts.cancelled,
        total: counts.total,
        queue_size: queue.size().await,
        pool_utilization,
        average_latency_ms,
        throughput_per_minute,
        tasks_scheduled: runner.tasks_scheduled(),
        tasks_processed: runner.tasks_processed(),
        tasks_failed: runner.tasks_failed(),
    })
}

/// Liveness of the store, queue, and runner.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub store_ok: bool,
    pub queue_size: usize,
    pub runner_state: String,
}

/// Check whether the store is reachable and report queue/runner liveness.
pub async fn health(pool: &PgPool, queue: &Queue, runner: &Runner) -> HealthResponse {
    let store_ok = sqlx::query("SELECT 1").execute(pool).await.is_ok();

    HealthResponse {
        store_ok,
        queue_size: queue.size().await,
        runner_state: runner.state().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_utilization_pct_computed_correctly() {
        let util = PoolUtilization {
            name: "us-east-cpu-pool".to_string(),
            current_load: 2,
            capacity: 8,
            utilization_pct: (2.0 / 8.0) * 100.0,
        };
        assert!((util.utilization_pct - 25.0).abs() < f64::EPSILON);
    }
}
