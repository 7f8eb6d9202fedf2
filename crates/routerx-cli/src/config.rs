//! Configuration resolution: CLI flag > env var > TOML config file >
//! compiled default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use routerx_core::config::{ExecutorConfig, RecoveryConfig, SchedulerConfig};
use routerx_core::policy::Policy;
use routerx_db::config::DbConfig;

/// On-disk representation of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database_url: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub recovery: RecoverySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    pub poll_interval_secs: f64,
    pub default_algorithm: String,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 0.5,
            default_algorithm: "fifo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    pub failure_rate: f64,
    pub min_latency_secs: f64,
    pub max_latency_secs: f64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            failure_rate: defaults.failure_rate,
            min_latency_secs: defaults.min_latency.as_secs_f64(),
            max_latency_secs: defaults.max_latency.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoverySection {
    pub reset_orphaned_on_startup: bool,
}

/// Fully resolved configuration, ready to build the DB pool, runner, and
/// server from.
#[derive(Debug, Clone)]
pub struct RouterxConfig {
    pub db_config: DbConfig,
    pub scheduler_config: SchedulerConfig,
    pub executor_config: ExecutorConfig,
    pub server_bind: String,
    pub server_port: u16,
    pub recovery_config: RecoveryConfig,
}

/// The directory config.toml lives in: `$XDG_CONFIG_HOME/routerx` or
/// `~/.config/routerx`. Deliberately not `dirs::config_dir()`, which
/// resolves to the wrong path on macOS for a CLI tool like this one.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("routerx");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("routerx")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Read and parse the config file. Errors if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile =
        toml::from_str(&contents).with_context(|| "failed to parse config file as TOML")?;
    Ok(config)
}

/// Write the config file, creating parent directories as needed and
/// restricting permissions to the owner on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path)?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(&path, perms)?;
    }

    Ok(())
}

impl RouterxConfig {
    /// Resolve configuration from, in priority order: `cli_db_url`, the
    /// `ROUTERX_DATABASE_URL` env var, the config file, then the compiled
    /// default. Non-database settings follow the same file-then-default
    /// pattern (no per-field env vars beyond the database URL and
    /// algorithm, per the recognized-keys list).
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file = load_config().ok();

        let database_url = cli_db_url
            .map(str::to_string)
            .or_else(|| std::env::var("ROUTERX_DATABASE_URL").ok())
            .or_else(|| file.as_ref().and_then(|f| f.database_url.clone()))
            .unwrap_or_else(|| DbConfig::DEFAULT_URL.to_string());

        let scheduler_section = file.as_ref().map(|f| f.scheduler.clone()).unwrap_or_default();
        let algorithm = std::env::var("ROUTERX_DEFAULT_ALGORITHM")
            .ok()
            .unwrap_or(scheduler_section.default_algorithm.clone());
        let initial_algorithm: Policy = algorithm.parse().unwrap_or(Policy::Fifo);

        let poll_interval_secs = std::env::var("ROUTERX_POLL_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(scheduler_section.poll_interval_secs);

        let executor_section = file.as_ref().map(|f| f.executor.clone()).unwrap_or_default();
        let server_section = file.as_ref().map(|f| f.server.clone()).unwrap_or_default();
        let recovery_section = file.as_ref().map(|f| f.recovery.clone()).unwrap_or_default();

        Ok(Self {
            db_config: DbConfig::new(database_url),
            scheduler_config: SchedulerConfig {
                poll_interval: Duration::from_secs_f64(poll_interval_secs),
                initial_algorithm,
                ..SchedulerConfig::default()
            },
            executor_config: ExecutorConfig {
                failure_rate: executor_section.failure_rate,
                min_latency: Duration::from_secs_f64(executor_section.min_latency_secs),
                max_latency: Duration::from_secs_f64(executor_section.max_latency_secs),
            },
            server_bind: server_section.bind_address,
            server_port: server_section.port,
            recovery_config: RecoveryConfig {
                reset_orphaned_on_startup: recovery_section.reset_orphaned_on_startup,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate process-wide environment variables.
    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: Mutex<()> = Mutex::new(());
        LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        assert_eq!(config_path().file_name().unwrap(), "config.toml");
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _guard = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", tmp.path());
        }

        let config = ConfigFile {
            database_url: Some("postgresql://localhost/routerx_test".to_string()),
            ..Default::default()
        };
        save_config(&config).expect("save should succeed");

        let loaded = load_config().expect("load should succeed");
        assert_eq!(loaded.database_url, config.database_url);

        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
        }
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let _guard = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", tmp.path());
        }

        save_config(&ConfigFile::default()).expect("save should succeed");
        let perms = std::fs::metadata(config_path()).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);

        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
        }
    }

    #[test]
    fn resolve_with_cli_flag_overrides_everything() {
        let _guard = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", tmp.path());
            std::env::remove_var("ROUTERX_DATABASE_URL");
        }

        let resolved = RouterxConfig::resolve(Some("postgresql://flag/db")).unwrap();
        assert_eq!(resolved.db_config.database_url, "postgresql://flag/db");

        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
        }
    }

    #[test]
    fn resolve_defaults_db_url_when_nothing_set() {
        let _guard = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", tmp.path());
            std::env::remove_var("ROUTERX_DATABASE_URL");
        }

        let resolved = RouterxConfig::resolve(None).unwrap();
        assert_eq!(resolved.db_config.database_url, DbConfig::DEFAULT_URL);

        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
        }
    }
}
