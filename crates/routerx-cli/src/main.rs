mod config;
mod serve_cmd;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use routerx_core::admission::{self, NewTaskRequest};
use routerx_core::policy::Policy;
use routerx_core::queue::Queue;
use routerx_core::runner::Runner;
use routerx_core::stats;
use routerx_db::models::{Region, TaskStatus, TaskType};
use routerx_db::queries::pools;
use routerx_db::queries::tasks::{self, TaskFilter};
use routerx_db::pool;

use config::RouterxConfig;

#[derive(Parser)]
#[command(name = "routerx", about = "Task routing and scheduling engine")]
struct Cli {
    /// Database URL (overrides ROUTERX_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a routerx config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/routerx")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the routerx database: create, migrate, seed worker pools
    DbInit,
    /// Submit a new task
    Submit {
        /// Task type: order, simulation, query
        #[arg(long)]
        task_type: TaskType,
        /// Priority, 1 (lowest) to 10 (highest)
        #[arg(long)]
        priority: i32,
        /// Cost units this task will consume
        #[arg(long)]
        cost: f64,
        /// Target region: us-east, us-west, eu-west, ap-east
        #[arg(long)]
        region: Region,
        /// Arbitrary JSON metadata
        #[arg(long, default_value = "{}")]
        metadata: String,
    },
    /// List tasks
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long = "type")]
        task_type: Option<TaskType>,
        #[arg(long)]
        region: Option<Region>,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 10)]
        page_size: i64,
    },
    /// Show a single task
    Get {
        task_id: Uuid,
    },
    /// Cancel a queued task
    Cancel {
        task_id: Uuid,
    },
    /// List worker pools
    Workers,
    /// Show aggregated system statistics
    Stats,
    /// Show store/queue/runner health
    Health,
    /// Switch the scheduling algorithm: fifo, priority, min_cost
    Algorithm {
        algorithm: Policy,
    },
    /// Submit a batch of synthetic tasks for load testing
    Simulate {
        #[arg(long)]
        count: u32,
        #[arg(long = "type")]
        task_type: Option<TaskType>,
        #[arg(long)]
        region: Option<Region>,
    },
    /// Run the scheduler and HTTP API together
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

/// Execute the `routerx init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database_url: Some(db_url.to_string()),
        ..Default::default()
    };
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database_url = {db_url}");
    println!();
    println!("Next: run `routerx db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `routerx db-init` command: create database, migrate, seed pools.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = RouterxConfig::resolve(cli_db_url)?;

    println!("Initializing routerx database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    pools::seed_default_pools(&db_pool, &pools::SeedDefaults::default()).await?;

    if resolved.recovery_config.reset_orphaned_on_startup {
        let reset = tasks::reset_orphaned_processing(&db_pool).await?;
        if !reset.is_empty() {
            println!("Reset {} orphaned processing task(s) to failed.", reset.len());
        }
    }

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("routerx db-init complete.");
    Ok(())
}

async fn build_pool(cli_db_url: Option<&str>) -> anyhow::Result<(sqlx::PgPool, RouterxConfig)> {
    let resolved = RouterxConfig::resolve(cli_db_url)?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    Ok((db_pool, resolved))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Submit {
            task_type,
            priority,
            cost,
            region,
            metadata,
        } => {
            let (db_pool, _) = build_pool(cli.database_url.as_deref()).await?;
            let metadata: Value =
                serde_json::from_str(&metadata).context("--metadata must be valid JSON")?;
            let queue = Queue::unbounded();
            let task = admission::submit(
                &db_pool,
                &queue,
                NewTaskRequest {
                    task_type,
                    priority,
                    cost,
                    region,
                    metadata,
                },
            )
            .await;
            db_pool.close().await;
            let task = task.map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Commands::List {
            status,
            task_type,
            region,
            page,
            page_size,
        } => {
            let (db_pool, _) = build_pool(cli.database_url.as_deref()).await?;
            let filter = TaskFilter {
                status,
                task_type,
                region,
            };
            let found = tasks::list_tasks(&db_pool, &filter, page, page_size).await;
            db_pool.close().await;
            println!("{}", serde_json::to_string_pretty(&found?)?);
        }
        Commands::Get { task_id } => {
            let (db_pool, _) = build_pool(cli.database_url.as_deref()).await?;
            let task = tasks::get_task(&db_pool, task_id).await;
            db_pool.close().await;
            match task? {
                Some(t) => println!("{}", serde_json::to_string_pretty(&t)?),
                None => anyhow::bail!("task {task_id} not found"),
            }
        }
        Commands::Cancel { task_id } => {
            let (db_pool, _) = build_pool(cli.database_url.as_deref()).await?;
            let result = admission::cancel(&db_pool, task_id).await;
            db_pool.close().await;
            result.map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Task {task_id} cancelled.");
        }
        Commands::Workers => {
            let (db_pool, _) = build_pool(cli.database_url.as_deref()).await?;
            let worker_pools = pools::list_pools(&db_pool).await;
            db_pool.close().await;
            println!("{}", serde_json::to_string_pretty(&worker_pools?)?);
        }
        Commands::Stats => {
            let (db_pool, resolved) = build_pool(cli.database_url.as_deref()).await?;
            let queue = Queue::unbounded();
            let runner = Runner::new(
                db_pool.clone(),
                queue.clone(),
                1,
                resolved.scheduler_config,
                resolved.executor_config,
            );
            let snapshot = stats::get_stats(&db_pool, &queue, &runner).await;
            db_pool.close().await;
            println!("{}", serde_json::to_string_pretty(&snapshot?)?);
        }
        Commands::Health => {
            let (db_pool, resolved) = build_pool(cli.database_url.as_deref()).await?;
            let queue = Queue::unbounded();
            let runner = Runner::new(
                db_pool.clone(),
                queue.clone(),
                1,
                resolved.scheduler_config,
                resolved.executor_config,
            );
            let health = stats::health(&db_pool, &queue, &runner).await;
            db_pool.close().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Commands::Algorithm { algorithm } => {
            println!(
                "Note: `routerx algorithm` only has effect against a running `routerx serve` \
                 instance; use POST /api/v1/algorithms/switch. Requested: {algorithm}"
            );
        }
        Commands::Simulate {
            count,
            task_type,
            region,
        } => {
            let (db_pool, _) = build_pool(cli.database_url.as_deref()).await?;
            let queue = Queue::unbounded();
            let mut accepted = 0u32;
            for i in 0..count {
                let tt = task_type.unwrap_or(match i % 3 {
                    0 => TaskType::Order,
                    1 => TaskType::Simulation,
                    _ => TaskType::Query,
                });
                let rg = region.unwrap_or(match i % 4 {
                    0 => Region::UsEast,
                    1 => Region::UsWest,
                    2 => Region::EuWest,
                    _ => Region::ApEast,
                });
                use rand::Rng;
                let mut rng = rand::rng();
                let priority = rng.random_range(1..=10);
                let cost = rng.random_range(0.1..10.0);

                if admission::submit(
                    &db_pool,
                    &queue,
                    NewTaskRequest {
                        task_type: tt,
                        priority,
                        cost,
                        region: rg,
                        metadata: serde_json::json!({ "simulated": true }),
                    },
                )
                .await
                .is_ok()
                {
                    accepted += 1;
                }
            }
            db_pool.close().await;
            println!("Submitted {accepted}/{count} simulated tasks.");
        }
        Commands::Serve { bind, port } => {
            let (db_pool, resolved) = build_pool(cli.database_url.as_deref()).await?;

            if resolved.recovery_config.reset_orphaned_on_startup {
                let reset = tasks::reset_orphaned_processing(&db_pool).await?;
                if !reset.is_empty() {
                    tracing::warn!(count = reset.len(), "reset orphaned processing tasks");
                }
            }

            let concurrency = pools::total_capacity(&db_pool).await?.max(1) as usize;
            let queue = Queue::unbounded();
            let runner = Runner::new(
                db_pool.clone(),
                queue.clone(),
                concurrency,
                resolved.scheduler_config,
                resolved.executor_config,
            );
            runner.start().await;

            let bind = bind.unwrap_or(resolved.server_bind);
            let port = port.unwrap_or(resolved.server_port);
            let result = serve_cmd::run_serve(db_pool.clone(), queue, runner, &bind, port).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
