//! Persistence layer for TaskRouterX: row models, query helpers, and
//! connection/migration plumbing over PostgreSQL.
//!
//! This crate owns the three durable entities (`tasks`, `worker_pools`,
//! `schedule_logs`) and nothing else -- no scheduling or routing logic
//! lives here.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
