//! Pure pool-selection strategies.
//!
//! `Policy::select` never mutates its inputs and never touches the store;
//! it is a deterministic function of a task and a pool snapshot, making it
//! trivially unit-testable and safe to call speculatively.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use routerx_db::models::{Task, WorkerPool};

/// A pool-selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    #[default]
    Fifo,
    Priority,
    MinCost,
}

impl Policy {
    /// Pick a pool for `task` out of the `pools` snapshot, or `None` if no
    /// pool has free capacity.
    ///
    /// `pools` is never mutated, and the same inputs always yield the same
    /// output.
    pub fn select(&self, task: &Task, pools: &[WorkerPool]) -> Option<WorkerPool> {
        match self {
            Policy::Fifo => select_fifo(task, pools),
            Policy::Priority => select_priority(task, pools),
            Policy::MinCost => select_min_cost(task, pools),
        }
    }
}

fn select_fifo(task: &Task, pools: &[WorkerPool]) -> Option<WorkerPool> {
    pools
        .iter()
        .find(|p| p.region == task.region && p.has_capacity())
        .or_else(|| pools.iter().find(|p| p.has_capacity()))
        .cloned()
}

fn select_priority(task: &Task, pools: &[WorkerPool]) -> Option<WorkerPool> {
    let same_region: Vec<&WorkerPool> = pools
        .iter()
        .filter(|p| p.region == task.region && p.has_capacity())
        .collect();
    let candidates: Vec<&WorkerPool> = if same_region.is_empty() {
        pools.iter().filter(|p| p.has_capacity()).collect()
    } else {
        same_region
    };

    if candidates.is_empty() {
        return None;
    }

    let chosen: &WorkerPool = if task.priority >= 7 {
        candidates
            .into_iter()
            .min_by(|a, b| cmp_f64(a.cost_per_unit, b.cost_per_unit))?
    } else if task.priority >= 4 {
        candidates
            .into_iter()
            .min_by(|a, b| {
                cmp_f64(a.cost_per_unit, b.cost_per_unit)
                    .then_with(|| b.capacity.cmp(&a.capacity))
            })?
    } else {
        candidates
            .into_iter()
            .max_by_key(|p| p.capacity - p.current_load)?
    };

    Some(chosen.clone())
}

fn select_min_cost(task: &Task, pools: &[WorkerPool]) -> Option<WorkerPool> {
    let same_region: Vec<&WorkerPool> = pools
        .iter()
        .filter(|p| p.region == task.region && p.has_capacity())
        .collect();
    let candidates: Vec<&WorkerPool> = if same_region.is_empty() {
        pools.iter().filter(|p| p.has_capacity()).collect()
    } else {
        same_region
    };

    candidates
        .into_iter()
        .min_by(|a, b| cmp_f64(a.cost_per_unit, b.cost_per_unit))
        .cloned()
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[derive(Debug, thiserror::Error)]
#[error("invalid algorithm name: {0}")]
pub struct PolicyParseError(String);

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Policy::Fifo => "fifo",
            Policy::Priority => "priority",
            Policy::MinCost => "min_cost",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Policy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(Policy::Fifo),
            "priority" => Ok(Policy::Priority),
            "min_cost" => Ok(Policy::MinCost),
            other => Err(PolicyParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use routerx_db::models::{Region, TaskStatus, TaskType};
    use uuid::Uuid;

    fn task(priority: i32, region: Region) -> Task {
        Task {
            id: Uuid::new_v4(),
            task_type: TaskType::Order,
            priority,
            cost: 1.0,
            region,
            status: TaskStatus::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            algorithm_used: None,
            metadata: serde_json::json!({}),
        }
    }

    fn pool(name: &str, region: Region, capacity: i32, current_load: i32, cost: f64) -> WorkerPool {
        WorkerPool {
            name: name.to_string(),
            region,
            resource_type: routerx_db::models::ResourceType::Cpu,
            cost_per_unit: cost,
            capacity,
            current_load,
        }
    }

    #[test]
    fn fifo_prefers_same_region_free_pool() {
        let t = task(5, Region::UsEast);
        let pools = vec![
            pool("us-west", Region::UsWest, 10, 0, 1.0),
            pool("us-east", Region::UsEast, 10, 0, 1.0),
        ];
        let chosen = Policy::Fifo.select(&t, &pools).unwrap();
        assert_eq!(chosen.name, "us-east");
    }

    #[test]
    fn fifo_falls_back_to_any_free_pool() {
        let t = task(5, Region::UsEast);
        let pools = vec![
            pool("us-east-full", Region::UsEast, 5, 5, 1.0),
            pool("eu-west", Region::EuWest, 5, 0, 1.0),
        ];
        let chosen = Policy::Fifo.select(&t, &pools).unwrap();
        assert_eq!(chosen.name, "eu-west");
    }

    #[test]
    fn fifo_returns_none_when_all_full() {
        let t = task(5, Region::UsEast);
        let pools = vec![pool("us-east", Region::UsEast, 5, 5, 1.0)];
        assert!(Policy::Fifo.select(&t, &pools).is_none());
    }

    #[test]
    fn priority_high_picks_cheapest() {
        let t = task(9, Region::UsEast);
        let pools = vec![
            pool("cheap", Region::UsEast, 10, 0, 0.5),
            pool("pricey", Region::UsEast, 10, 0, 2.0),
        ];
        let chosen = Policy::Priority.select(&t, &pools).unwrap();
        assert_eq!(chosen.name, "cheap");
    }

    #[test]
    fn priority_medium_breaks_cost_ties_by_capacity() {
        let t = task(5, Region::UsEast);
        let pools = vec![
            pool("small", Region::UsEast, 4, 0, 1.0),
            pool("big", Region::UsEast, 10, 0, 1.0),
        ];
        let chosen = Policy::Priority.select(&t, &pools).unwrap();
        assert_eq!(chosen.name, "big");
    }

    #[test]
    fn priority_low_maximizes_free_capacity() {
        let t = task(2, Region::UsEast);
        let pools = vec![
            pool("tight", Region::UsEast, 10, 9, 1.0),
            pool("roomy", Region::UsEast, 10, 1, 1.0),
        ];
        let chosen = Policy::Priority.select(&t, &pools).unwrap();
        assert_eq!(chosen.name, "roomy");
    }

    #[test]
    fn priority_falls_back_across_regions() {
        let t = task(8, Region::ApEast);
        let pools = vec![pool("us-east", Region::UsEast, 10, 0, 1.0)];
        let chosen = Policy::Priority.select(&t, &pools).unwrap();
        assert_eq!(chosen.name, "us-east");
    }

    #[test]
    fn min_cost_prefers_same_region_then_cheapest() {
        let t = task(5, Region::UsEast);
        let pools = vec![
            pool("us-east-expensive", Region::UsEast, 10, 0, 3.0),
            pool("eu-west-cheap", Region::EuWest, 10, 0, 0.1),
        ];
        let chosen = Policy::MinCost.select(&t, &pools).unwrap();
        assert_eq!(chosen.name, "us-east-expensive");
    }

    #[test]
    fn min_cost_ignores_full_pools() {
        let t = task(5, Region::UsEast);
        let pools = vec![
            pool("us-east-full", Region::UsEast, 5, 5, 0.1),
            pool("eu-west", Region::EuWest, 5, 0, 3.0),
        ];
        let chosen = Policy::MinCost.select(&t, &pools).unwrap();
        assert_eq!(chosen.name, "eu-west");
    }

    #[test]
    fn select_never_mutates_inputs() {
        let t = task(5, Region::UsEast);
        let pools = vec![pool("us-east", Region::UsEast, 10, 3, 1.0)];
        let before = pools.clone();
        let _ = Policy::Fifo.select(&t, &pools);
        let _ = Policy::Priority.select(&t, &pools);
        let _ = Policy::MinCost.select(&t, &pools);
        assert_eq!(pools, before);
    }

    #[test]
    fn policy_round_trips_through_display_and_from_str() {
        for p in [Policy::Fifo, Policy::Priority, Policy::MinCost] {
            let s = p.to_string();
            assert_eq!(s.parse::<Policy>().unwrap(), p);
        }
    }

    #[test]
    fn policy_rejects_invalid_name() {
        assert!("bogus".parse::<Policy>().is_err());
    }
}
