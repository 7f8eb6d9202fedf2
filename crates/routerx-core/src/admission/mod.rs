//! Task intake: validates, persists, logs, and enqueues new tasks; cancels
//! queued ones.

use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use routerx_db::models::{Region, Task, TaskType};
use routerx_db::queries::{logs, tasks};

use crate::queue::{Queue, QueueError};

/// A validated request to submit a new task.
#[derive(Debug, Clone)]
pub struct NewTaskRequest {
    pub task_type: TaskType,
    pub priority: i32,
    pub cost: f64,
    pub region: Region,
    pub metadata: Value,
}

/// Failure kinds exposed by [`submit`].
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
    #[error("queue is full; task persisted but not enqueued")]
    QueueFull(Task),
}

/// Validate, persist, log, and enqueue a new task.
///
/// On `QueueFull`, the task row and its `created` log already exist --
/// only the enqueue step failed. The caller is responsible for deciding
/// whether to retry the enqueue later (the task remains visible and
/// claimable as `queued`).
pub async fn submit(pool: &PgPool, queue: &Queue, req: NewTaskRequest) -> Result<Task, AdmissionError> {
    validate(&req)?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AdmissionError::Store(e.into()))?;

    let task = tasks::insert_task(
        &mut tx,
        req.task_type,
        req.priority,
        req.cost,
        req.region,
        req.metadata,
    )
    .await
    .map_err(AdmissionError::Store)?;

    logs::append_log(&mut tx, task.id, "created", json!({ "priority": task.priority }))
        .await
        .map_err(AdmissionError::Store)?;

    tx.commit().await.map_err(|e| AdmissionError::Store(e.into()))?;

    if let Err(QueueError::Full { .. }) = queue.enqueue(task.id).await {
        return Err(AdmissionError::QueueFull(task));
    }

    Ok(task)
}

fn validate(req: &NewTaskRequest) -> Result<(), AdmissionError> {
    if !(1..=10).contains(&req.priority) {
        return Err(AdmissionError::Validation(format!(
            "priority must be between 1 and 10, got {}",
            req.priority
        )));
    }
    if req.cost <= 0.0 {
        return Err(AdmissionError::Validation(format!(
            "cost must be positive, got {}",
            req.cost
        )));
    }
    Ok(())
}

/// Failure kinds exposed by [`cancel`].
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("task not found")]
    NotFound,
    #[error("task is not in queued status")]
    NotQueued,
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Cancel a task, permitted only while it is still `queued`.
pub async fn cancel(pool: &PgPool, task_id: Uuid) -> Result<(), CancelError> {
    let affected = tasks::cancel_task(pool, task_id)
        .await
        .map_err(CancelError::Store)?;

    if affected == 0 {
        let exists = tasks::get_task(pool, task_id)
            .await
            .map_err(CancelError::Store)?
            .is_some();
        return Err(if exists {
            CancelError::NotQueued
        } else {
            CancelError::NotFound
        });
    }

    let mut tx = pool.begin().await.map_err(|e| CancelError::Store(e.into()))?;
    logs::append_log(&mut tx, task_id, "cancelled", json!({}))
        .await
        .map_err(CancelError::Store)?;
    tx.commit().await.map_err(|e| CancelError::Store(e.into()))?;

    Ok(())
}
