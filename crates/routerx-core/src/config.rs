//! Plain configuration structs for the scheduling and execution pipeline.
//!
//! These carry no environment/file resolution logic of their own -- that
//! lives in `routerx-cli::config`, which builds these from the layered
//! CLI-flag / env-var / config-file / default chain and passes them down.

use std::time::Duration;

/// Tuning knobs for the [`crate::runner::Runner`] dispatch loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long `dequeue` blocks waiting for a task before the loop cycles
    /// again to check for a stop signal.
    pub poll_interval: Duration,
    /// Backoff applied after the policy returns no pool, before the task is
    /// re-enqueued.
    pub requeue_backoff: Duration,
    /// Grace period `stop` waits for in-flight executor jobs to finish
    /// before abandoning them.
    pub shutdown_grace: Duration,
    /// Policy used for newly dispatched tasks until changed at runtime via
    /// `set_algorithm`.
    pub initial_algorithm: crate::policy::Policy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            requeue_backoff: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
            initial_algorithm: crate::policy::Policy::Fifo,
        }
    }
}

/// Tuning knobs for the [`crate::executor`] simulated work phase.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Probability in `[0, 1]` that a claimed task's work phase fails.
    pub failure_rate: f64,
    /// Lower bound of the uniform latency distribution for the work phase.
    pub min_latency: Duration,
    /// Upper bound of the uniform latency distribution for the work phase.
    pub max_latency: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.05,
            min_latency: Duration::from_millis(100),
            max_latency: Duration::from_secs(2),
        }
    }
}

/// Whether a crash-recovery sweep runs at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryConfig {
    /// If true, `processing` tasks found at startup are reset to `failed`
    /// and all pool loads are zeroed before the runner starts.
    pub reset_orphaned_on_startup: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_defaults_match_spec() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.requeue_backoff, Duration::from_secs(1));
        assert_eq!(cfg.initial_algorithm, crate::policy::Policy::Fifo);
    }

    #[test]
    fn executor_defaults_match_spec() {
        let cfg = ExecutorConfig::default();
        assert!((cfg.failure_rate - 0.05).abs() < f64::EPSILON);
        assert_eq!(cfg.min_latency, Duration::from_millis(100));
        assert_eq!(cfg.max_latency, Duration::from_secs(2));
    }

    #[test]
    fn recovery_defaults_to_disabled() {
        assert!(!RecoveryConfig::default().reset_orphaned_on_startup);
    }
}
