//! Database query functions for the `worker_pools` table.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::{Region, ResourceType, WorkerPool, ALL_REGIONS, ALL_RESOURCE_TYPES};

/// Default capacities and costs used when seeding worker pools.
pub struct SeedDefaults {
    pub cpu_capacity: i32,
    pub gpu_capacity: i32,
    pub cpu_cost_per_unit: f64,
    pub gpu_cost_per_unit: f64,
}

impl Default for SeedDefaults {
    fn default() -> Self {
        Self {
            cpu_capacity: 8,
            gpu_capacity: 4,
            cpu_cost_per_unit: 0.55,
            gpu_cost_per_unit: 2.15,
        }
    }
}

/// Seed one worker pool per `(region, resource_type)` pair, named
/// `{region}-{type}-pool`. Idempotent via `ON CONFLICT (name) DO NOTHING`, so
/// this is safe to run on every `routerx db-init` invocation.
pub async fn seed_default_pools(pool: &PgPool, defaults: &SeedDefaults) -> Result<()> {
    for region in ALL_REGIONS {
        for resource_type in ALL_RESOURCE_TYPES {
            let name = format!("{region}-{resource_type}-pool");
            let (capacity, cost_per_unit) = match resource_type {
                ResourceType::Cpu => (defaults.cpu_capacity, defaults.cpu_cost_per_unit),
                ResourceType::Gpu => (defaults.gpu_capacity, defaults.gpu_cost_per_unit),
            };

            sqlx::query(
                "INSERT INTO worker_pools (name, region, resource_type, cost_per_unit, capacity) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (name) DO NOTHING",
            )
            .bind(&name)
            .bind(region)
            .bind(resource_type)
            .bind(cost_per_unit)
            .bind(capacity)
            .execute(pool)
            .await
            .with_context(|| format!("failed to seed worker pool {name}"))?;
        }
    }

    Ok(())
}

/// Fetch a single worker pool by name.
pub async fn get_pool(pool: &PgPool, name: &str) -> Result<Option<WorkerPool>> {
    let row = sqlx::query_as::<_, WorkerPool>("SELECT * FROM worker_pools WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to fetch worker pool")?;

    Ok(row)
}

/// List all worker pools, ordered by name.
pub async fn list_pools(pool: &PgPool) -> Result<Vec<WorkerPool>> {
    let pools = sqlx::query_as::<_, WorkerPool>("SELECT * FROM worker_pools ORDER BY name")
        .fetch_all(pool)
        .await
        .context("failed to list worker pools")?;

    Ok(pools)
}

/// List worker pools in a given region, ordered by name.
pub async fn list_pools_in_region(pool: &PgPool, region: Region) -> Result<Vec<WorkerPool>> {
    let pools = sqlx::query_as::<_, WorkerPool>(
        "SELECT * FROM worker_pools WHERE region = $1 ORDER BY name",
    )
    .bind(region)
    .fetch_all(pool)
    .await
    .context("failed to list worker pools in region")?;

    Ok(pools)
}

/// Sum of `capacity` across all worker pools -- used to size the runner's
/// in-flight execution semaphore.
pub async fn total_capacity(pool: &PgPool) -> Result<i64> {
    let row: (Option<i64>,) =
        sqlx::query_as("SELECT SUM(capacity)::bigint FROM worker_pools")
            .fetch_one(pool)
            .await
            .context("failed to sum worker pool capacity")?;

    Ok(row.0.unwrap_or(0))
}

/// Atomically reserve one slot of capacity on a pool. Optimistic locking via
/// the `current_load < capacity` guard: exactly one of any number of
/// concurrent callers racing for the last free slot succeeds. Returns the
/// number of rows affected (0 means the pool was full or did not exist).
pub async fn reserve_slot(
    tx: &mut Transaction<'_, Postgres>,
    pool_name: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE worker_pools SET current_load = current_load + 1 \
         WHERE name = $1 AND current_load < capacity",
    )
    .bind(pool_name)
    .execute(&mut **tx)
    .await
    .context("failed to reserve worker pool slot")?;

    Ok(result.rows_affected())
}

/// Release one slot of capacity on a pool, clamped so it never drops below
/// zero even if called more times than [`reserve_slot`] (defensive against a
/// double-release racing a crash-recovery sweep).
pub async fn release_slot(tx: &mut Transaction<'_, Postgres>, pool_name: &str) -> Result<()> {
    sqlx::query(
        "UPDATE worker_pools SET current_load = GREATEST(current_load - 1, 0) \
         WHERE name = $1",
    )
    .bind(pool_name)
    .execute(&mut **tx)
    .await
    .context("failed to release worker pool slot")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_defaults_match_spec_midpoints() {
        let defaults = SeedDefaults::default();
        assert_eq!(defaults.cpu_capacity, 8);
        assert_eq!(defaults.gpu_capacity, 4);
        assert!((defaults.cpu_cost_per_unit - 0.55).abs() < f64::EPSILON);
        assert!((defaults.gpu_cost_per_unit - 2.15).abs() < f64::EPSILON);
    }
}
