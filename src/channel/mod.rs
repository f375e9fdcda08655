// src/channel/mod.rs
//! Submitting code to an interpreter and getting captured output back.

use crate::config::{ChannelKind, RuntimeConfig};
use crate::errors::{Result, RunnerError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

pub mod interpreter;
pub mod process;
pub mod protocol;
pub mod worker;

pub use process::ProcessChannel;
pub use worker::WorkerChannel;

/// Lifecycle of one channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Uninitialized,
    Initializing,
    Ready,
    Busy,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Uninitialized => write!(f, "uninitialized"),
            ChannelState::Initializing => write!(f, "initializing"),
            ChannelState::Ready => write!(f, "ready"),
            ChannelState::Busy => write!(f, "busy"),
        }
    }
}

/// Holds a channel in Busy for one submission.
///
/// Dropping the claim hands the channel back to Ready, whether the submission
/// resolved or its future was dropped mid-run. A state changed by someone else
/// in the meantime (a dead worker, a terminate) is left alone.
pub struct BusyClaim<'a> {
    state: &'a watch::Sender<ChannelState>,
}

impl<'a> BusyClaim<'a> {
    pub fn acquire(state: &'a watch::Sender<ChannelState>) -> Result<Self> {
        let claimed = state.send_if_modified(|current| {
            if *current == ChannelState::Ready {
                *current = ChannelState::Busy;
                true
            } else {
                false
            }
        });
        if !claimed {
            let current = *state.borrow();
            return Err(match current {
                ChannelState::Busy => RunnerError::ChannelBusy,
                _ => RunnerError::ChannelNotReady,
            });
        }
        Ok(Self { state })
    }
}

impl Drop for BusyClaim<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|current| {
            if *current == ChannelState::Busy {
                *current = ChannelState::Ready;
                true
            } else {
                false
            }
        });
    }
}

/// Code plus the values its `input()` calls will receive, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub source: String,
    pub inputs: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>, inputs: Vec<String>) -> Self {
        Self { source: source.into(), inputs }
    }
}

/// Normalized outcome of one execution. Success, error and timeout are
/// mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Everything the program wrote, trimmed.
    Completed { output: String },
    /// The program raised; the description is passed through verbatim.
    Failed { error: String },
    /// The deadline elapsed before the channel answered.
    TimedOut { message: String },
}

impl ExecutionResult {
    pub fn output_text(&self) -> &str {
        match self {
            ExecutionResult::Completed { output } => output,
            _ => "",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionResult::Completed { .. } => None,
            ExecutionResult::Failed { error } => Some(error),
            ExecutionResult::TimedOut { message } => Some(message),
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, ExecutionResult::TimedOut { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            ExecutionResult::Completed { .. } => "completed",
            ExecutionResult::Failed { .. } => "failed",
            ExecutionResult::TimedOut { .. } => "timed_out",
        }
    }
}

/// An interpreter the session coordinator can submit code to.
///
/// Implementations capture stdout/stderr per submission and feed `inputs`
/// to `input()` in order, answering `""` once they run out. They do not
/// enforce a deadline; the coordinator does.
#[async_trait]
pub trait ExecutionChannel: Send + Sync {
    fn state(&self) -> ChannelState;

    /// Observe state transitions.
    fn subscribe(&self) -> watch::Receiver<ChannelState>;

    /// Loads the interpreter: Uninitialized -> Initializing -> Ready.
    /// A no-op unless the channel is Uninitialized.
    async fn init(&self) -> Result<()>;

    /// Runs one request. Only valid while Ready; the channel is Busy until
    /// the result arrives.
    async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionResult>;

    /// Kills whatever hosts the interpreter. The instance is unusable afterwards.
    async fn terminate(&self);
}

/// Builds fresh channels; the coordinator calls it again after discarding a hung one.
pub trait ChannelFactory: Send + Sync {
    fn create(&self) -> Arc<dyn ExecutionChannel>;
}

/// Factory for the CPython-backed channels.
pub struct PythonChannelFactory {
    config: RuntimeConfig,
}

impl PythonChannelFactory {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }
}

impl ChannelFactory for PythonChannelFactory {
    fn create(&self) -> Arc<dyn ExecutionChannel> {
        match self.config.channel_kind {
            ChannelKind::Worker => Arc::new(WorkerChannel::new(
                self.config.python_bin.clone(),
                self.config.ready_timeout,
            )),
            ChannelKind::Process => Arc::new(ProcessChannel::new(
                self.config.python_bin.clone(),
                self.config.ready_timeout,
            )),
        }
    }
}
