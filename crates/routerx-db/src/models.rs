use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Order,
    Simulation,
    Query,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Order => "order",
            Self::Simulation => "simulation",
            Self::Query => "query",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = TaskTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(Self::Order),
            "simulation" => Ok(Self::Simulation),
            "query" => Ok(Self::Query),
            other => Err(TaskTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskType`] string.
#[derive(Debug, Clone)]
pub struct TaskTypeParseError(pub String);

impl fmt::Display for TaskTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task type: {:?}", self.0)
    }
}

impl std::error::Error for TaskTypeParseError {}

// ---------------------------------------------------------------------------

/// Deployment region. The serialized form uses hyphens (`us-east`), not
/// snake_case, to match the wire format fixed by the external API contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum Region {
    #[serde(rename = "us-east")]
    #[sqlx(rename = "us-east")]
    UsEast,
    #[serde(rename = "us-west")]
    #[sqlx(rename = "us-west")]
    UsWest,
    #[serde(rename = "eu-west")]
    #[sqlx(rename = "eu-west")]
    EuWest,
    #[serde(rename = "ap-east")]
    #[sqlx(rename = "ap-east")]
    ApEast,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UsEast => "us-east",
            Self::UsWest => "us-west",
            Self::EuWest => "eu-west",
            Self::ApEast => "ap-east",
        };
        f.write_str(s)
    }
}

impl FromStr for Region {
    type Err = RegionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "us-east" => Ok(Self::UsEast),
            "us-west" => Ok(Self::UsWest),
            "eu-west" => Ok(Self::EuWest),
            "ap-east" => Ok(Self::ApEast),
            other => Err(RegionParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Region`] string.
#[derive(Debug, Clone)]
pub struct RegionParseError(pub String);

impl fmt::Display for RegionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid region: {:?}", self.0)
    }
}

impl std::error::Error for RegionParseError {}

/// All regions a worker pool can be seeded for, in a stable order.
pub const ALL_REGIONS: [Region; 4] = [
    Region::UsEast,
    Region::UsWest,
    Region::EuWest,
    Region::ApEast,
];

// ---------------------------------------------------------------------------

/// The class of compute a worker pool offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Cpu,
    Gpu,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        };
        f.write_str(s)
    }
}

impl FromStr for ResourceType {
    type Err = ResourceTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            other => Err(ResourceTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ResourceType`] string.
#[derive(Debug, Clone)]
pub struct ResourceTypeParseError(pub String);

impl fmt::Display for ResourceTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid resource type: {:?}", self.0)
    }
}

impl std::error::Error for ResourceTypeParseError {}

/// All resource types, in a stable order.
pub const ALL_RESOURCE_TYPES: [ResourceType; 2] = [ResourceType::Cpu, ResourceType::Gpu];

// ---------------------------------------------------------------------------

/// A scheduling strategy used to pick a worker pool for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Fifo,
    Priority,
    MinCost,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fifo => "fifo",
            Self::Priority => "priority",
            Self::MinCost => "min_cost",
        };
        f.write_str(s)
    }
}

impl FromStr for Algorithm {
    type Err = AlgorithmParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(Self::Fifo),
            "priority" => Ok(Self::Priority),
            "min_cost" => Ok(Self::MinCost),
            other => Err(AlgorithmParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Algorithm`] string.
#[derive(Debug, Clone)]
pub struct AlgorithmParseError(pub String);

impl fmt::Display for AlgorithmParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid algorithm: {:?}", self.0)
    }
}

impl std::error::Error for AlgorithmParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
///
/// Legal transitions: `queued -> {processing, cancelled}`,
/// `processing -> {completed, failed}`. All other states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions are legal).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A unit of work submitted to the router.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub priority: i32,
    pub cost: f64,
    pub region: Region,
    pub status: TaskStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub algorithm_used: Option<Algorithm>,
    pub metadata: serde_json::Value,
}

/// A named capacity bucket tasks are dispatched onto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkerPool {
    pub name: String,
    pub region: Region,
    pub resource_type: ResourceType,
    pub cost_per_unit: f64,
    pub capacity: i32,
    pub current_load: i32,
}

impl WorkerPool {
    /// Free capacity remaining on this pool.
    pub fn free_capacity(&self) -> i32 {
        self.capacity - self.current_load
    }

    /// Whether the pool has at least one free slot.
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.capacity
    }
}

/// An append-only record of a lifecycle event for a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduleLog {
    pub id: i64,
    pub task_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub details: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_display_roundtrip() {
        let variants = [TaskType::Order, TaskType::Simulation, TaskType::Query];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_type_invalid() {
        assert!("bogus".parse::<TaskType>().is_err());
    }

    #[test]
    fn region_display_roundtrip() {
        for v in &ALL_REGIONS {
            let s = v.to_string();
            let parsed: Region = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn region_invalid() {
        assert!("mars".parse::<Region>().is_err());
    }

    #[test]
    fn resource_type_display_roundtrip() {
        for v in &ALL_RESOURCE_TYPES {
            let s = v.to_string();
            let parsed: ResourceType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn resource_type_invalid() {
        assert!("quantum".parse::<ResourceType>().is_err());
    }

    #[test]
    fn algorithm_display_roundtrip() {
        let variants = [Algorithm::Fifo, Algorithm::Priority, Algorithm::MinCost];
        for v in &variants {
            let s = v.to_string();
            let parsed: Algorithm = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn algorithm_invalid() {
        assert!("ml_based".parse::<Algorithm>().is_err());
    }

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Queued,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("nope".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_status_terminal() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn worker_pool_free_capacity() {
        let pool = WorkerPool {
            name: "us-east-cpu-pool".to_string(),
            region: Region::UsEast,
            resource_type: ResourceType::Cpu,
            cost_per_unit: 0.55,
            capacity: 8,
            current_load: 3,
        };
        assert_eq!(pool.free_capacity(), 5);
        assert!(pool.has_capacity());
    }

    #[test]
    fn worker_pool_at_capacity() {
        let pool = WorkerPool {
            name: "us-east-cpu-pool".to_string(),
            region: Region::UsEast,
            resource_type: ResourceType::Cpu,
            cost_per_unit: 0.55,
            capacity: 2,
            current_load: 2,
        };
        assert_eq!(pool.free_capacity(), 0);
        assert!(!pool.has_capacity());
    }
}
