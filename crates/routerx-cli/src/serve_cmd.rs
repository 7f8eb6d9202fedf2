//! The HTTP API surface: task submission/lookup/cancellation, log and
//! worker listings, algorithm switching, and system stats/health.
//!
//! Plain state struct, permissive CORS, graceful shutdown on Ctrl+C.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use routerx_core::admission::{self, AdmissionError, CancelError, NewTaskRequest};
use routerx_core::policy::Policy;
use routerx_core::queue::Queue;
use routerx_core::runner::Runner;
use routerx_core::stats;
use routerx_db::models::{Region, Task, TaskStatus, TaskType};
use routerx_db::queries::logs::{self, LogFilter};
use routerx_db::queries::pools;
use routerx_db::queries::tasks::{self, TaskFilter};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({ "detail": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<AdmissionError> for AppError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::Validation(msg) => AppError::bad_request(msg),
            AdmissionError::QueueFull(task) => AppError::conflict(format!(
                "queue is full; task {} persisted but not scheduled",
                task.id
            )),
            AdmissionError::Store(err) => AppError::internal(err),
        }
    }
}

impl From<CancelError> for AppError {
    fn from(e: CancelError) -> Self {
        match e {
            CancelError::NotFound => AppError::not_found("task not found"),
            CancelError::NotQueued => AppError::bad_request("task is not in queued status"),
            CancelError::Store(err) => AppError::internal(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    queue: Queue,
    runner: Arc<Runner>,
}

// ---------------------------------------------------------------------------
// Request/response DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitTaskRequest {
    task_type: TaskType,
    priority: i32,
    cost: f64,
    region: Region,
    #[serde(default = "default_metadata")]
    metadata: Value,
}

fn default_metadata() -> Value {
    json!({})
}

#[derive(Debug, Deserialize, Default)]
struct TaskListQuery {
    status: Option<TaskStatus>,
    #[serde(rename = "type")]
    task_type: Option<TaskType>,
    region: Option<Region>,
    page: Option<i64>,
    page_size: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct LogListQuery {
    task_id: Option<Uuid>,
    event_type: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SimulateRequest {
    count: u32,
    #[serde(default)]
    task_type: Option<TaskType>,
    #[serde(default)]
    region: Option<Region>,
}

#[derive(Debug, Serialize)]
struct SimulateResponse {
    accepted: u32,
}

#[derive(Debug, Deserialize)]
struct SwitchAlgorithmRequest {
    algorithm: Policy,
}

#[derive(Debug, Serialize)]
struct SwitchAlgorithmResponse {
    algorithm: String,
}

fn paginate(page: Option<i64>, page_size: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size.unwrap_or(10).clamp(1, 100);
    (page, page_size)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool, queue: Queue, runner: Arc<Runner>) -> Router {
    let state = AppState { pool, queue, runner };

    Router::new()
        .route("/api/v1/tasks", post(submit_task).get(list_tasks))
        .route("/api/v1/tasks/{id}", get(get_task).delete(cancel_task))
        .route("/api/v1/simulate", post(simulate))
        .route("/api/v1/logs", get(list_logs))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/algorithms/switch", post(switch_algorithm))
        .route("/api/v1/system/stats", get(system_stats))
        .route("/api/v1/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(
    pool: PgPool,
    queue: Queue,
    runner: Arc<Runner>,
    bind: &str,
    port: u16,
) -> Result<()> {
    let app = build_router(pool, queue, runner.clone());
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("routerx serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    runner.stop().await;
    tracing::info!("routerx serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn submit_task(
    State(state): State<AppState>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<axum::response::Response, AppError> {
    let task = admission::submit(
        &state.pool,
        &state.queue,
        NewTaskRequest {
            task_type: req.task_type,
            priority: req.priority,
            cost: req.cost,
            region: req.region,
            metadata: req.metadata,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(task)).into_response())
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<TaskListQuery>,
) -> Result<axum::response::Response, AppError> {
    let (page, page_size) = paginate(q.page, q.page_size);
    let filter = TaskFilter {
        status: q.status,
        task_type: q.task_type,
        region: q.region,
    };

    let found = tasks::list_tasks(&state.pool, &filter, page, page_size)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(found).into_response())
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    Ok(Json(task))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    admission::cancel(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn simulate(
    State(state): State<AppState>,
    Json(req): Json<SimulateRequest>,
) -> Result<axum::response::Response, AppError> {
    let count = req.count.min(10_000);

    tokio::spawn(async move {
        for i in 0..count {
            let task_type = req.task_type.unwrap_or(match i % 3 {
                0 => TaskType::Order,
                1 => TaskType::Simulation,
                _ => TaskType::Query,
            });
            let region = req.region.unwrap_or(match i % 4 {
                0 => Region::UsEast,
                1 => Region::UsWest,
                2 => Region::EuWest,
                _ => Region::ApEast,
            });

            let mut rng = rand::rng();
            use rand::Rng;
            let priority = rng.random_range(1..=10);
            let cost = rng.random_range(0.1..10.0);

            let _ = admission::submit(
                &state.pool,
                &state.queue,
                NewTaskRequest {
                    task_type,
                    priority,
                    cost,
                    region,
                    metadata: json!({ "simulated": true }),
                },
            )
            .await;
        }
    });

    Ok((StatusCode::OK, Json(SimulateResponse { accepted: count })).into_response())
}

async fn list_logs(
    State(state): State<AppState>,
    Query(q): Query<LogListQuery>,
) -> Result<axum::response::Response, AppError> {
    let (page, page_size) = paginate(q.page, q.page_size);
    let filter = LogFilter {
        task_id: q.task_id,
        event_type: q.event_type,
    };

    let found = logs::list_logs(&state.pool, &filter, page, page_size)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(found).into_response())
}

async fn list_workers(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let worker_pools = pools::list_pools(&state.pool).await.map_err(AppError::internal)?;
    Ok(Json(worker_pools).into_response())
}

async fn switch_algorithm(
    State(state): State<AppState>,
    Json(req): Json<SwitchAlgorithmRequest>,
) -> Json<SwitchAlgorithmResponse> {
    state.runner.set_algorithm(req.algorithm);
    Json(SwitchAlgorithmResponse {
        algorithm: req.algorithm.to_string(),
    })
}

async fn system_stats(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let snapshot = stats::get_stats(&state.pool, &state.queue, &state.runner)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(snapshot).into_response())
}

async fn health(State(state): State<AppState>) -> Json<stats::HealthResponse> {
    Json(stats::health(&state.pool, &state.queue, &state.runner).await)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use routerx_core::config::{ExecutorConfig, SchedulerConfig};
    use routerx_db::queries::pools::{seed_default_pools, SeedDefaults};
    use routerx_test_utils::{create_test_db, drop_test_db};

    use super::*;

    fn test_runner(pool: PgPool) -> (Queue, Arc<Runner>) {
        let queue = Queue::unbounded();
        let runner = Runner::new(
            pool,
            queue.clone(),
            4,
            SchedulerConfig::default(),
            ExecutorConfig::default(),
        );
        (queue, runner)
    }

    async fn send_request(
        pool: PgPool,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let (queue, runner) = test_runner(pool.clone());
        let app = super::build_router(pool, queue, runner);

        let mut builder = Request::builder().method(method).uri(uri);
        builder = builder.header("content-type", "application/json");
        let body = match body {
            Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
            None => Body::empty(),
        };

        app.oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_then_get_task_roundtrip() {
        let (pool, db_name) = create_test_db().await;
        seed_default_pools(&pool, &SeedDefaults::default()).await.unwrap();

        let submit_body = json!({
            "task_type": "order",
            "priority": 5,
            "cost": 1.5,
            "region": "us-east",
        });
        let response = send_request(pool.clone(), "POST", "/api/v1/tasks", Some(submit_body)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let id = created["id"].as_str().unwrap();

        let response = send_request(pool.clone(), "GET", &format!("/api/v1/tasks/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let fetched = body_json(response).await;
        assert_eq!(fetched["status"], "queued");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn submit_rejects_invalid_priority() {
        let (pool, db_name) = create_test_db().await;

        let submit_body = json!({
            "task_type": "order",
            "priority": 99,
            "cost": 1.5,
            "region": "us-east",
        });
        let response = send_request(pool.clone(), "POST", "/api/v1/tasks", Some(submit_body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn get_unknown_task_is_404() {
        let (pool, db_name) = create_test_db().await;

        let response = send_request(
            pool.clone(),
            "GET",
            &format!("/api/v1/tasks/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn cancel_then_cancel_again_is_bad_request() {
        let (pool, db_name) = create_test_db().await;

        let submit_body = json!({
            "task_type": "query",
            "priority": 3,
            "cost": 0.5,
            "region": "eu-west",
        });
        let response = send_request(pool.clone(), "POST", "/api/v1/tasks", Some(submit_body)).await;
        let created = body_json(response).await;
        let id = created["id"].as_str().unwrap();

        let response = send_request(pool.clone(), "DELETE", &format!("/api/v1/tasks/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send_request(pool.clone(), "DELETE", &format!("/api/v1/tasks/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn health_reports_store_ok() {
        let (pool, db_name) = create_test_db().await;

        let response = send_request(pool.clone(), "GET", "/api/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let health = body_json(response).await;
        assert_eq!(health["store_ok"], true);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn switch_algorithm_updates_response() {
        let (pool, db_name) = create_test_db().await;

        let response = send_request(
            pool.clone(),
            "POST",
            "/api/v1/algorithms/switch",
            Some(json!({ "algorithm": "priority" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let switched = body_json(response).await;
        assert_eq!(switched["algorithm"], "priority");

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
