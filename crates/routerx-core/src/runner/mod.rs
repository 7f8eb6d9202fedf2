//! The background dispatch loop: the single consumer of the queue, owner
//! of the runtime-swappable policy, and the spawn point for executor jobs.
//!
//! Concurrency shape is grounded on the teacher's orchestrator loop: a
//! `Semaphore` bounds in-flight executor jobs, an `mpsc` channel reports
//! completions back, and a `CancellationToken` drives cooperative shutdown
//! with a bounded drain grace period.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use routerx_db::models::TaskStatus;
use routerx_db::queries::{logs, pools, tasks};

use crate::config::{ExecutorConfig, SchedulerConfig};
use crate::executor::{self, ExecutorOutcome};
use crate::policy::Policy;
use crate::queue::Queue;

/// Runner lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Stopped,
    Running,
    Stopping,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunnerState::Stopped => "stopped",
            RunnerState::Running => "running",
            RunnerState::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

fn encode_state(s: RunnerState) -> u8 {
    match s {
        RunnerState::Stopped => 0,
        RunnerState::Running => 1,
        RunnerState::Stopping => 2,
    }
}

fn decode_state(v: u8) -> RunnerState {
    match v {
        1 => RunnerState::Running,
        2 => RunnerState::Stopping,
        _ => RunnerState::Stopped,
    }
}

fn encode_policy(p: Policy) -> u8 {
    match p {
        Policy::Fifo => 0,
        Policy::Priority => 1,
        Policy::MinCost => 2,
    }
}

fn decode_policy(v: u8) -> Policy {
    match v {
        1 => Policy::Priority,
        2 => Policy::MinCost,
        _ => Policy::Fifo,
    }
}

struct JobDone {
    task_id: Uuid,
    outcome: anyhow::Result<ExecutorOutcome>,
}

/// The scheduling runner: owns exactly one dispatch loop task.
pub struct Runner {
    pool: PgPool,
    queue: Queue,
    state: AtomicU8,
    algorithm: AtomicU8,
    tasks_scheduled: AtomicU64,
    tasks_processed: AtomicU64,
    tasks_failed: AtomicU64,
    scheduler_cfg: SchedulerConfig,
    executor_cfg: ExecutorConfig,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Runner {
    /// Build a runner. `concurrency` bounds in-flight executor jobs; callers
    /// typically size this to the sum of all worker pool capacities.
    pub fn new(
        pool: PgPool,
        queue: Queue,
        concurrency: usize,
        scheduler_cfg: SchedulerConfig,
        executor_cfg: ExecutorConfig,
    ) -> Arc<Self> {
        let initial_algorithm = scheduler_cfg.initial_algorithm;
        Arc::new(Self {
            pool,
            queue,
            state: AtomicU8::new(encode_state(RunnerState::Stopped)),
            algorithm: AtomicU8::new(encode_policy(initial_algorithm)),
            tasks_scheduled: AtomicU64::new(0),
            tasks_processed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            scheduler_cfg,
            executor_cfg,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    pub fn state(&self) -> RunnerState {
        decode_state(self.state.load(Ordering::SeqCst))
    }

    pub fn algorithm(&self) -> Policy {
        decode_policy(self.algorithm.load(Ordering::SeqCst))
    }

    /// Swap the policy strategy atomically. In-flight work keeps the
    /// algorithm it was dispatched under; only subsequent selections use
    /// the new value.
    pub fn set_algorithm(&self, algorithm: Policy) {
        self.algorithm.store(encode_policy(algorithm), Ordering::SeqCst);
    }

    pub fn tasks_scheduled(&self) -> u64 {
        self.tasks_scheduled.load(Ordering::Relaxed)
    }

    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    /// Launch the dispatch loop. Idempotent no-op if already running.
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        self.state.store(encode_state(RunnerState::Running), Ordering::SeqCst);
        let this = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { this.dispatch_loop().await }));
    }

    /// Flip to stopping, wait for the dispatch loop to join within the
    /// configured grace period, then mark stopped.
    pub async fn stop(self: &Arc<Self>) {
        self.state.store(encode_state(RunnerState::Stopping), Ordering::SeqCst);
        self.cancel.cancel();

        let mut handle = self.handle.lock().await;
        if let Some(h) = handle.take() {
            let _ = tokio::time::timeout(self.scheduler_cfg.shutdown_grace, h).await;
        }
        self.state.store(encode_state(RunnerState::Stopped), Ordering::SeqCst);
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let (tx, mut rx) = mpsc::channel::<JobDone>(256);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let task_id = match self.queue.dequeue(self.scheduler_cfg.poll_interval).await {
                Some(id) => id,
                None => {
                    self.drain_completed(&mut rx).await;
                    continue;
                }
            };

            if let Err(e) = self.dispatch_one(task_id, &tx).await {
                self.tasks_failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, task_id = %task_id, "dispatch failed, task remains queued");
            }

            self.drain_completed(&mut rx).await;
        }

        self.drain_on_shutdown(rx).await;
    }

    /// Load, snapshot, select, and either requeue or hand off one task.
    async fn dispatch_one(&self, task_id: Uuid, tx: &mpsc::Sender<JobDone>) -> anyhow::Result<()> {
        let task = match tasks::get_task(&self.pool, task_id).await? {
            Some(t) if t.status == TaskStatus::Queued => t,
            Some(t) => {
                warn!(task_id = %task_id, status = %t.status, "dropping non-queued task from dispatch");
                return Ok(());
            }
            None => {
                warn!(task_id = %task_id, "dropping missing task from dispatch");
                return Ok(());
            }
        };

        let worker_pools = pools::list_pools(&self.pool).await?;
        let algorithm = self.algorithm();

        let Some(chosen) = algorithm.select(&task, &worker_pools) else {
            tokio::time::sleep(self.scheduler_cfg.requeue_backoff).await;
            let _ = self.queue.enqueue(task_id).await;
            return Ok(());
        };

        {
            let mut db_tx = self.pool.begin().await?;
            let affected = tasks::set_algorithm_used_tx(&mut db_tx, task.id, algorithm.into())
                .await?;
            if affected == 0 {
                db_tx.rollback().await?;
                warn!(task_id = %task_id, "task left queued status before scheduling, dropping");
                return Ok(());
            }
            logs::append_log(
                &mut db_tx,
                task.id,
                "scheduled",
                json!({
                    "pool": chosen.name,
                    "algorithm": algorithm.to_string(),
                    "region": chosen.region.to_string(),
                    "cost_per_unit": chosen.cost_per_unit,
                }),
            )
            .await?;
            db_tx.commit().await?;
        }

        // tasks_scheduled counts handoff; tasks_processed counts completion
        // (incremented in handle_job_done), not the same instant.
        self.tasks_scheduled.fetch_add(1, Ordering::Relaxed);
        self.spawn_job(task_id, chosen.name, tx.clone());

        Ok(())
    }

    fn spawn_job(&self, task_id: Uuid, pool_name: String, tx: mpsc::Sender<JobDone>) {
        let pool = self.pool.clone();
        let cfg = self.executor_cfg.clone();
        let semaphore = Arc::clone(&self.semaphore);

        tokio::spawn(async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            let outcome = executor::execute(&pool, task_id, &pool_name, &cfg).await;
            drop(permit);
            let _ = tx.send(JobDone { task_id, outcome }).await;
        });
    }

    async fn drain_completed(&self, rx: &mut mpsc::Receiver<JobDone>) {
        while let Ok(done) = rx.try_recv() {
            self.handle_job_done(done).await;
        }
    }

    async fn drain_on_shutdown(&self, mut rx: mpsc::Receiver<JobDone>) {
        let deadline = tokio::time::Instant::now() + self.scheduler_cfg.shutdown_grace;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(done)) => self.handle_job_done(done).await,
                Ok(None) | Err(_) => break,
            }
        }
    }

    async fn handle_job_done(&self, done: JobDone) {
        match done.outcome {
            Ok(ExecutorOutcome::Completed(_)) => {
                self.tasks_processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(ExecutorOutcome::Requeue) => {
                let _ = self.queue.enqueue(done.task_id).await;
                if let Ok(mut db_tx) = self.pool.begin().await {
                    let _ = logs::append_log(&mut db_tx, done.task_id, "requeued", json!({})).await;
                    let _ = db_tx.commit().await;
                }
            }
            Err(e) => {
                self.tasks_failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, task_id = %done.task_id, "executor job failed");
            }
        }
    }
}

impl From<Policy> for routerx_db::models::Algorithm {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Fifo => routerx_db::models::Algorithm::Fifo,
            Policy::Priority => routerx_db::models::Algorithm::Priority,
            Policy::MinCost => routerx_db::models::Algorithm::MinCost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_encode_decode_roundtrip() {
        for s in [RunnerState::Stopped, RunnerState::Running, RunnerState::Stopping] {
            assert_eq!(decode_state(encode_state(s)), s);
        }
    }

    #[test]
    fn policy_encode_decode_roundtrip() {
        for p in [Policy::Fifo, Policy::Priority, Policy::MinCost] {
            assert_eq!(decode_policy(encode_policy(p)), p);
        }
    }

    #[test]
    fn runner_state_display() {
        assert_eq!(RunnerState::Running.to_string(), "running");
    }
}
