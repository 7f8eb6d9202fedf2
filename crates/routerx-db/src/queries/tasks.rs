//! Database query functions for the `tasks` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Algorithm, Region, Task, TaskStatus, TaskType};

/// Insert a new task row inside an existing transaction. Returns the
/// inserted task with server-generated defaults (id, enqueued_at, status).
pub async fn insert_task(
    tx: &mut Transaction<'_, Postgres>,
    task_type: TaskType,
    priority: i32,
    cost: f64,
    region: Region,
    metadata: Value,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (task_type, priority, cost, region, metadata) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(task_type)
    .bind(priority)
    .bind(cost)
    .bind(region)
    .bind(metadata)
    .fetch_one(&mut **tx)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Filters accepted by [`list_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub region: Option<Region>,
}

/// List tasks matching the given filters, newest first, paginated.
pub async fn list_tasks(
    pool: &PgPool,
    filter: &TaskFilter,
    page: i64,
    page_size: i64,
) -> Result<Vec<Task>> {
    let offset = (page - 1) * page_size;

    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE ($1::text IS NULL OR status = $1) \
           AND ($2::text IS NULL OR task_type = $2) \
           AND ($3::text IS NULL OR region = $3) \
         ORDER BY enqueued_at DESC \
         LIMIT $4 OFFSET $5",
    )
    .bind(filter.status)
    .bind(filter.task_type)
    .bind(filter.region)
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("failed to list tasks")?;

    Ok(tasks)
}

/// Atomically claim a task for execution: flips `queued -> processing`,
/// records the worker pool and start time. Optimistic locking via the
/// `status = 'queued'` guard in the WHERE clause means concurrent claimants
/// racing on the same task see exactly one succeed.
///
/// Returns the number of rows affected (0 means the task was not in
/// `queued` status, e.g. already claimed or cancelled).
pub async fn claim_task(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
    worker_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'processing', started_at = now(), worker_id = $1 \
         WHERE id = $2 AND status = 'queued'",
    )
    .bind(worker_id)
    .bind(task_id)
    .execute(&mut **tx)
    .await
    .context("failed to claim task")?;

    Ok(result.rows_affected())
}

/// Record the algorithm the runner selected for a still-queued task.
///
/// Uses the same optimistic-locking idiom: the update only applies if the
/// task is still `queued`, so a task cancelled between dequeue and this
/// write is left untouched.
pub async fn set_algorithm_used(
    pool: &PgPool,
    task_id: Uuid,
    algorithm: Algorithm,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET algorithm_used = $1 WHERE id = $2 AND status = 'queued'",
    )
    .bind(algorithm)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to record algorithm for task")?;

    Ok(result.rows_affected())
}

/// Transaction variant of [`set_algorithm_used`], for callers that need to
/// commit it alongside a `scheduled` log entry atomically (the runner's
/// dispatch loop).
pub async fn set_algorithm_used_tx(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
    algorithm: Algorithm,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET algorithm_used = $1 WHERE id = $2 AND status = 'queued'",
    )
    .bind(algorithm)
    .bind(task_id)
    .execute(&mut **tx)
    .await
    .context("failed to record algorithm for task")?;

    Ok(result.rows_affected())
}

/// Mark a task `completed` or `failed`, depending on `success`.
pub async fn finish_task(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
    success: bool,
) -> Result<()> {
    let status = if success {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };

    sqlx::query("UPDATE tasks SET status = $1, completed_at = now() WHERE id = $2")
        .bind(status)
        .bind(task_id)
        .execute(&mut **tx)
        .await
        .context("failed to finish task")?;

    Ok(())
}

/// Atomically cancel a queued task. Returns the number of rows affected (0
/// means the task either does not exist or is no longer `queued`).
pub async fn cancel_task(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'cancelled' WHERE id = $1 AND status = 'queued'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to cancel task")?;

    Ok(result.rows_affected())
}

/// Status counts across all tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskStatusCounts {
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

/// Get a summary of task counts by status.
pub async fn get_status_counts(pool: &PgPool) -> Result<TaskStatusCounts> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status::text, COUNT(*) as cnt FROM tasks GROUP BY status")
            .fetch_all(pool)
            .await
            .context("failed to get task status counts")?;

    let mut counts = TaskStatusCounts::default();
    for (status, count) in &rows {
        match status.as_str() {
            "queued" => counts.queued = *count,
            "processing" => counts.processing = *count,
            "completed" => counts.completed = *count,
            "failed" => counts.failed = *count,
            "cancelled" => counts.cancelled = *count,
            _ => {}
        }
        counts.total += count;
    }
    Ok(counts)
}

/// Average completion latency, in milliseconds, over all `completed` tasks.
pub async fn average_latency_ms(pool: &PgPool) -> Result<Option<f64>> {
    let row: (Option<f64>,) = sqlx::query_as(
        "SELECT EXTRACT(EPOCH FROM AVG(completed_at - started_at)) * 1000.0 \
         FROM tasks \
         WHERE status = 'completed' AND started_at IS NOT NULL AND completed_at IS NOT NULL",
    )
    .fetch_one(pool)
    .await
    .context("failed to compute average latency")?;

    Ok(row.0)
}

/// Count of tasks that completed in the trailing `window`.
pub async fn completed_in_last(pool: &PgPool, window: std::time::Duration) -> Result<i64> {
    let seconds = window.as_secs_f64();
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks \
         WHERE status = 'completed' \
           AND completed_at >= now() - ($1 * interval '1 second')",
    )
    .bind(seconds)
    .fetch_one(pool)
    .await
    .context("failed to count recently completed tasks")?;

    Ok(row.0)
}

/// Reset all tasks stuck in `processing` back to `failed`, and zero every
/// worker pool's `current_load`. Used for restart recovery when
/// `recovery.reset_orphaned_on_startup` is enabled: if the runner process
/// crashed mid-dispatch, `processing` tasks and their pool load counters
/// are left inconsistent with reality. Returns the reset tasks.
pub async fn reset_orphaned_processing(pool: &PgPool) -> Result<Vec<Task>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'failed', completed_at = now() \
         WHERE status = 'processing' \
         RETURNING *",
    )
    .fetch_all(&mut *tx)
    .await
    .context("failed to reset orphaned tasks")?;

    sqlx::query("UPDATE worker_pools SET current_load = 0")
        .execute(&mut *tx)
        .await
        .context("failed to zero worker pool load")?;

    tx.commit().await.context("failed to commit orphan reset")?;

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_filter_default_is_unfiltered() {
        let filter = TaskFilter::default();
        assert!(filter.status.is_none());
        assert!(filter.task_type.is_none());
        assert!(filter.region.is_none());
    }

    #[test]
    fn status_counts_default_is_zero() {
        let counts = TaskStatusCounts::default();
        assert_eq!(counts.total, 0);
        assert_eq!(counts.queued, 0);
    }
}
