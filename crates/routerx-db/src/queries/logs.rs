//! Database query functions for the append-only `schedule_logs` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::ScheduleLog;

/// Append a log entry for a task inside an existing transaction.
///
/// `schedule_logs` is append-only: there is no update or delete function in
/// this module by design.
pub async fn append_log(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
    event_type: &str,
    details: Value,
) -> Result<ScheduleLog> {
    let log = sqlx::query_as::<_, ScheduleLog>(
        "INSERT INTO schedule_logs (task_id, event_type, details) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(event_type)
    .bind(details)
    .fetch_one(&mut **tx)
    .await
    .context("failed to append schedule log")?;

    Ok(log)
}

/// Filters accepted by [`list_logs`].
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub task_id: Option<Uuid>,
    pub event_type: Option<String>,
}

/// List schedule log entries matching the given filters, newest first,
/// paginated.
pub async fn list_logs(
    pool: &PgPool,
    filter: &LogFilter,
    page: i64,
    page_size: i64,
) -> Result<Vec<ScheduleLog>> {
    let offset = (page - 1) * page_size;

    let logs = sqlx::query_as::<_, ScheduleLog>(
        "SELECT * FROM schedule_logs \
         WHERE ($1::uuid IS NULL OR task_id = $1) \
           AND ($2::text IS NULL OR event_type = $2) \
         ORDER BY timestamp DESC \
         LIMIT $3 OFFSET $4",
    )
    .bind(filter.task_id)
    .bind(filter.event_type.as_deref())
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("failed to list schedule logs")?;

    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_default_is_unfiltered() {
        let filter = LogFilter::default();
        assert!(filter.task_id.is_none());
        assert!(filter.event_type.is_none());
    }
}
