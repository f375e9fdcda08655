// src/config.rs
use crate::errors::{Result, RunnerError};
use crate::models::TestCase;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_PASTE_THRESHOLD: usize = 15;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;

/// Which execution channel variant hosts the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelKind {
    /// One long-lived interpreter process per channel.
    #[default]
    Worker,
    /// A fresh interpreter process per submission.
    Process,
}

impl FromStr for ChannelKind {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worker" => Ok(ChannelKind::Worker),
            "process" | "inline" => Ok(ChannelKind::Process),
            other => Err(RunnerError::Config(format!(
                "CHANNEL_KIND must be 'worker' or 'process', got '{}'",
                other
            ))),
        }
    }
}

/// Settings for the interpreter and the session coordinator.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub python_bin: String,
    pub channel_kind: ChannelKind,
    pub execution_timeout: Duration,
    pub ready_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            channel_kind: ChannelKind::Worker,
            execution_timeout: Duration::from_millis(DEFAULT_EXECUTION_TIMEOUT_MS),
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
        }
    }
}

/// High-level application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub tasks_dir: Option<PathBuf>,
    pub paste_threshold: usize,
    /// Sessions untouched for this long are closed and their interpreter stopped.
    pub session_idle_ttl: Duration,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, so tests don't
    /// have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_var(&lookup, "PORT", 8080u16)?;

        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => default_database_url()?,
        };
        if !database_url.starts_with("sqlite:") {
            return Err(RunnerError::Config(
                "DATABASE_URL must start with 'sqlite:'".to_string(),
            ));
        }

        let channel_kind = match lookup("CHANNEL_KIND") {
            Some(kind) => kind.parse()?,
            None => ChannelKind::default(),
        };

        let execution_timeout_ms =
            parse_var(&lookup, "EXECUTION_TIMEOUT_MS", DEFAULT_EXECUTION_TIMEOUT_MS)?;
        let ready_timeout_ms = parse_var(&lookup, "READY_TIMEOUT_MS", DEFAULT_READY_TIMEOUT_MS)?;
        if execution_timeout_ms == 0 || ready_timeout_ms == 0 {
            return Err(RunnerError::Config(
                "EXECUTION_TIMEOUT_MS and READY_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let session_idle_secs = parse_var(&lookup, "SESSION_IDLE_SECS", DEFAULT_SESSION_IDLE_SECS)?;
        if session_idle_secs == 0 {
            return Err(RunnerError::Config("SESSION_IDLE_SECS must be greater than zero".to_string()));
        }

        Ok(AppConfig {
            host,
            port,
            database_url,
            tasks_dir: lookup("TASKS_DIR").map(PathBuf::from),
            paste_threshold: parse_var(&lookup, "PASTE_THRESHOLD", DEFAULT_PASTE_THRESHOLD)?,
            session_idle_ttl: Duration::from_secs(session_idle_secs),
            runtime: RuntimeConfig {
                python_bin: lookup("PYTHON_BIN").unwrap_or_else(|| "python3".to_string()),
                channel_kind,
                execution_timeout: Duration::from_millis(execution_timeout_ms),
                ready_timeout: Duration::from_millis(ready_timeout_ms),
            },
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RunnerError::Config(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}

fn default_database_url() -> Result<String> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        RunnerError::Config("No data directory available; set DATABASE_URL".to_string())
    })?;
    let path = data_dir.join("coderun").join("coderun.db");
    Ok(format!("sqlite:{}", path.display()))
}

/// An exercise as authored on disk, e.g. `tasks/sum.toml`.
#[derive(Deserialize, Debug, Clone)]
pub struct TaskFile {
    /// Stable identifier used to upsert the task
    pub slug: String,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Code placed in the editor before the student writes anything
    #[serde(default)]
    pub default_code: Option<String>,

    /// Ordered test cases
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

impl TaskFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Loads every `*.toml` file in `dir`, sorted by file name.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();
        paths.iter().map(|p| TaskFile::load(p)).collect()
    }
}
