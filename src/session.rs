// src/session.rs
//! One editor page's execution session.
//!
//! A `Session` owns its channel and drives each attempt through
//! Idle -> AwaitingReady -> CollectingInputs -> Submitted -> Completed | Failed | TimedOut.
//! Attempts take `&mut self`, so a session can never have two in flight.

use crate::channel::{ChannelFactory, ChannelState, ExecutionChannel, ExecutionRequest, ExecutionResult};
use crate::config::RuntimeConfig;
use crate::errors::{Result, RunnerError};
use crate::harvester::{InputPrompter, harvest};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where a session persists the code of each attempt. Best effort.
#[async_trait]
pub trait DraftSink: Send + Sync {
    async fn save_draft(&self, source: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    Idle,
    AwaitingReady,
    CollectingInputs,
    Submitted,
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub execution_timeout: Duration,
    pub ready_timeout: Duration,
}

impl From<&RuntimeConfig> for SessionConfig {
    fn from(runtime: &RuntimeConfig) -> Self {
        Self {
            execution_timeout: runtime.execution_timeout,
            ready_timeout: runtime.ready_timeout,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

pub struct Session {
    factory: Arc<dyn ChannelFactory>,
    channel: Arc<dyn ExecutionChannel>,
    drafts: Option<Arc<dyn DraftSink>>,
    config: SessionConfig,
    phase: AttemptPhase,
    generation: u64,
}

impl Session {
    /// Creates the session's channel and starts loading the interpreter in
    /// the background.
    pub fn new(factory: Arc<dyn ChannelFactory>, config: SessionConfig) -> Self {
        let channel = factory.create();
        spawn_init(&channel);
        Self {
            factory,
            channel,
            drafts: None,
            config,
            phase: AttemptPhase::Idle,
            generation: 1,
        }
    }

    pub fn with_drafts(mut self, drafts: Arc<dyn DraftSink>) -> Self {
        self.drafts = Some(drafts);
        self
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn phase(&self) -> AttemptPhase {
        self.phase
    }

    /// How many channels this session has created; grows on every timeout.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Interactive run: wait for the interpreter, persist the code, collect
    /// one value per `input()` call site, then execute under the deadline.
    pub async fn run<P>(
        &mut self,
        source: &str,
        prompter: &mut P,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult>
    where
        P: InputPrompter + ?Sized,
    {
        self.phase = AttemptPhase::Idle;
        self.wait_until_ready().await?;
        self.save_draft(source);

        self.set_phase(AttemptPhase::CollectingInputs);
        let inputs = match harvest(source, prompter, cancel).await {
            Ok(inputs) => inputs,
            Err(e) => {
                self.set_phase(AttemptPhase::Failed);
                return Err(e);
            }
        };

        self.submit(ExecutionRequest::new(source, inputs)).await
    }

    /// Runs a request whose inputs are already known.
    pub async fn execute(&mut self, request: ExecutionRequest) -> Result<ExecutionResult> {
        self.phase = AttemptPhase::Idle;
        self.wait_until_ready().await?;
        self.submit(request).await
    }

    /// Blocks until the channel is Ready, for at most the ready timeout.
    /// A channel left Uninitialized (failed init) is initialized again.
    pub async fn wait_until_ready(&mut self) -> Result<()> {
        if self.channel.state() == ChannelState::Ready {
            return Ok(());
        }
        self.set_phase(AttemptPhase::AwaitingReady);
        if let Err(e) = self.await_channel_ready().await {
            self.set_phase(AttemptPhase::Failed);
            return Err(e);
        }
        Ok(())
    }

    /// Waits for a replacement channel after a timeout. Leaves the phase alone.
    pub async fn recover(&self) -> Result<()> {
        self.await_channel_ready().await
    }

    /// Fire-and-forget persistence of `source`; failures are only logged.
    pub fn save_draft(&self, source: &str) {
        let Some(drafts) = self.drafts.as_ref() else {
            return;
        };
        let drafts = Arc::clone(drafts);
        let source = source.to_string();
        tokio::spawn(async move {
            if let Err(e) = drafts.save_draft(&source).await {
                log::error!("Failed to save draft: {}", e);
            }
        });
    }

    pub async fn shutdown(&self) {
        self.channel.terminate().await;
    }

    async fn await_channel_ready(&self) -> Result<()> {
        let channel = Arc::clone(&self.channel);
        if channel.state() == ChannelState::Uninitialized {
            spawn_init(&channel);
        }

        let mut states = channel.subscribe();
        match tokio::time::timeout(
            self.config.ready_timeout,
            states.wait_for(|state| *state == ChannelState::Ready),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            _ => {
                log::warn!(
                    "interpreter not ready after {}ms (state: {})",
                    self.config.ready_timeout.as_millis(),
                    channel.state()
                );
                Err(RunnerError::InterpreterUnavailable {
                    waited_ms: self.config.ready_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn submit(&mut self, request: ExecutionRequest) -> Result<ExecutionResult> {
        if self.channel.state() != ChannelState::Ready {
            if let Err(e) = self.await_channel_ready().await {
                self.set_phase(AttemptPhase::Failed);
                return Err(e);
            }
        }

        self.set_phase(AttemptPhase::Submitted);
        let channel = Arc::clone(&self.channel);
        let deadline = self.config.execution_timeout;

        match tokio::time::timeout(deadline, channel.submit(request)).await {
            Ok(Ok(result)) => {
                self.set_phase(match result {
                    ExecutionResult::Completed { .. } => AttemptPhase::Completed,
                    _ => AttemptPhase::Failed,
                });
                Ok(result)
            }
            Ok(Err(e @ (RunnerError::WorkerExited | RunnerError::Protocol(_)))) => {
                log::warn!("execution channel failed mid-run: {}", e);
                self.set_phase(AttemptPhase::Failed);
                Ok(ExecutionResult::Failed { error: e.to_string() })
            }
            Ok(Err(e)) => {
                self.set_phase(AttemptPhase::Failed);
                Err(e)
            }
            Err(_) => {
                self.set_phase(AttemptPhase::TimedOut);
                self.replace_channel();
                Ok(ExecutionResult::TimedOut { message: timeout_message(deadline) })
            }
        }
    }

    /// Discards the hung channel outright and starts a fresh one. The old
    /// channel is torn down in the background so the timeout is reported
    /// without waiting for the kill.
    fn replace_channel(&mut self) {
        log::warn!(
            "execution exceeded {}ms; discarding channel generation {}",
            self.config.execution_timeout.as_millis(),
            self.generation
        );
        let hung = std::mem::replace(&mut self.channel, self.factory.create());
        tokio::spawn(async move {
            hung.terminate().await;
        });
        self.generation += 1;
        spawn_init(&self.channel);
    }

    fn set_phase(&mut self, phase: AttemptPhase) {
        log::debug!("attempt phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

fn spawn_init(channel: &Arc<dyn ExecutionChannel>) {
    let channel = Arc::clone(channel);
    tokio::spawn(async move {
        if let Err(e) = channel.init().await {
            log::error!("Failed to initialize execution channel: {}", e);
        }
    });
}

/// Message reported to the student when the deadline elapses.
pub fn timeout_message(limit: Duration) -> String {
    let limit = if limit.subsec_millis() == 0 {
        let secs = limit.as_secs();
        format!("{} second{}", secs, if secs == 1 { "" } else { "s" })
    } else {
        format!("{}ms", limit.as_millis())
    };
    format!(
        "Execution time limit exceeded ({}). The program was stopped.\n\
         It may be stuck in an infinite loop; check the conditions of your while and for loops.",
        limit
    )
}
