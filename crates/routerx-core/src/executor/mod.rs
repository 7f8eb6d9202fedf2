//! Simulated execution of a claimed task against a worker pool.
//!
//! `execute` runs the three store-committed phases described for the
//! system: Claim, Work, Release. Claim and Release are each a single
//! transaction; Work happens off-transaction and is the only part of the
//! pipeline that suspends for an extended, unbounded-by-design duration.

use anyhow::{Context, Result};
use rand::Rng;
use serde_json::json;
use uuid::Uuid;

use routerx_db::queries::{logs, pools, tasks};
use sqlx::PgPool;

use crate::config::ExecutorConfig;

/// What happened when `execute` tried to run a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorOutcome {
    /// The task ran to completion; the bool is the work-phase success flag.
    Completed(bool),
    /// Claim failed: the pool was full or the task had already left
    /// `queued` (e.g. cancelled). No mutation occurred. The caller should
    /// re-enqueue the task.
    Requeue,
}

/// Run a claimed task against `pool_name` to completion.
///
/// Claim and Release are each performed in a single transaction; the Work
/// phase (simulated latency and outcome) happens entirely off-transaction
/// and is not cancellable.
pub async fn execute(
    pool: &PgPool,
    task_id: Uuid,
    pool_name: &str,
    cfg: &ExecutorConfig,
) -> Result<ExecutorOutcome> {
    if !claim(pool, task_id, pool_name).await? {
        return Ok(ExecutorOutcome::Requeue);
    }

    let success = work(cfg).await;

    release(pool, task_id, pool_name, success).await?;

    Ok(ExecutorOutcome::Completed(success))
}

/// Transactionally reserve pool capacity and flip the task to `processing`.
/// Returns `false` if either conditional update affected no rows.
async fn claim(pool: &PgPool, task_id: Uuid, pool_name: &str) -> Result<bool> {
    let mut tx = pool.begin().await.context("failed to begin claim transaction")?;

    let pool_affected = pools::reserve_slot(&mut tx, pool_name).await?;
    if pool_affected == 0 {
        tx.rollback().await.context("failed to roll back claim")?;
        return Ok(false);
    }

    let task_affected = tasks::claim_task(&mut tx, task_id, pool_name).await?;
    if task_affected == 0 {
        tx.rollback().await.context("failed to roll back claim")?;
        return Ok(false);
    }

    tx.commit().await.context("failed to commit claim")?;
    Ok(true)
}

/// Simulate work: sleep for a drawn latency, then draw a success/failure
/// outcome. This phase is deliberately not cancellable.
async fn work(cfg: &ExecutorConfig) -> bool {
    let (latency, success) = {
        let mut rng = rand::rng();
        let min = cfg.min_latency.as_secs_f64();
        let max = cfg.max_latency.as_secs_f64();
        let latency = if max > min {
            rng.random_range(min..max)
        } else {
            min
        };
        let success = rng.random_bool(1.0 - cfg.failure_rate);
        (latency, success)
    };

    tokio::time::sleep(std::time::Duration::from_secs_f64(latency)).await;
    success
}

/// Transactionally release pool capacity, finish the task, and log the
/// terminal event.
async fn release(pool: &PgPool, task_id: Uuid, pool_name: &str, success: bool) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin release transaction")?;

    pools::release_slot(&mut tx, pool_name).await?;
    tasks::finish_task(&mut tx, task_id, success).await?;

    let event_type = if success { "completed" } else { "failed" };
    logs::append_log(&mut tx, task_id, event_type, json!({ "pool": pool_name }))
        .await
        .context("failed to append release log")?;

    tx.commit().await.context("failed to commit release")?;
    Ok(())
}
