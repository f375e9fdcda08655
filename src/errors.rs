// src/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML task file: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to parse JSON message: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Interpreter unavailable: not ready after {waited_ms}ms")]
    InterpreterUnavailable { waited_ms: u64 },

    #[error("Failed to start interpreter '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Interpreter protocol error: {0}")]
    Protocol(String),

    #[error("Interpreter worker exited unexpectedly")]
    WorkerExited,

    #[error("Execution channel is busy with another request")]
    ChannelBusy,

    #[error("Execution channel is not ready")]
    ChannelNotReady,

    #[error("Input collection was cancelled")]
    InputCancelled,

    #[error("Program asks for {expected} input value(s) but only {supplied} were supplied")]
    MissingInput { expected: usize, supplied: usize },

    #[error("Another run is already in progress for this session")]
    SessionBusy,

    #[error("Task {0} not found")]
    TaskNotFound(i64),

    #[error("Task {0} is already completed")]
    TaskLocked(i64),

    #[error("Unknown activity event type '{0}'")]
    UnknownActivity(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
