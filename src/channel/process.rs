// src/channel/process.rs
//! Channel that starts a fresh interpreter process for every submission.
//!
//! Nothing survives between runs, and dropping an in-flight submission kills
//! its process, so a hung program never outlives its deadline.

use super::interpreter::{kill_interpreter, spawn_interpreter};
use super::protocol::{HostToWorker, WorkerToHost, encode_line};
use super::{BusyClaim, ChannelState, ExecutionChannel, ExecutionRequest, ExecutionResult};
use crate::errors::{Result, RunnerError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::watch;
use uuid::Uuid;

pub struct ProcessChannel {
    python_bin: String,
    init_timeout: Duration,
    state: watch::Sender<ChannelState>,
    terminated: AtomicBool,
}

impl ProcessChannel {
    pub fn new(python_bin: impl Into<String>, init_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ChannelState::Uninitialized);
        Self {
            python_bin: python_bin.into(),
            init_timeout,
            state,
            terminated: AtomicBool::new(false),
        }
    }

    /// Sends `request` to a new interpreter and waits for the reply tagged `id`
    /// (or for `ready` when `id` is `None`).
    async fn exchange(&self, request: &HostToWorker, id: Option<&str>) -> Result<ExecutionResult> {
        let mut spawned = spawn_interpreter(&self.python_bin)?;
        let line = encode_line(request)?;

        if let Err(e) = spawned.stdin.write_all(line.as_bytes()).await {
            kill_interpreter(&mut spawned.child, "write_failed").await;
            return Err(RunnerError::Protocol(format!("failed to write to interpreter: {}", e)));
        }
        // Closing stdin lets the shim exit once it has answered.
        drop(spawned.stdin);

        let reply = read_reply(spawned.stdout, id).await;
        kill_interpreter(&mut spawned.child, "exchange_done").await;
        reply
    }
}

async fn read_reply(stdout: ChildStdout, id: Option<&str>) -> Result<ExecutionResult> {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(RunnerError::Protocol(format!("failed to read from interpreter: {}", e))),
        };
        let msg: WorkerToHost = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("interpreter sent invalid json: {} (line: {})", e, line);
                continue;
            }
        };
        match msg {
            WorkerToHost::Ready if id.is_none() => {
                return Ok(ExecutionResult::Completed { output: String::new() });
            }
            WorkerToHost::Result { id: reply_id, output, error } if reply_id.as_deref() == id && id.is_some() => {
                return Ok(match error {
                    Some(error) => ExecutionResult::Failed { error },
                    None => ExecutionResult::Completed { output },
                });
            }
            WorkerToHost::Error { id: reply_id, error } if reply_id.as_deref() == id => {
                return Ok(ExecutionResult::Failed { error });
            }
            other => log::warn!("discarding unexpected interpreter reply: {:?}", other),
        }
    }
    Err(RunnerError::WorkerExited)
}

#[async_trait]
impl ExecutionChannel for ProcessChannel {
    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    async fn init(&self) -> Result<()> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(RunnerError::WorkerExited);
        }
        let claimed = self.state.send_if_modified(|state| {
            if *state == ChannelState::Uninitialized {
                *state = ChannelState::Initializing;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Ok(());
        }

        // A handshake proves the interpreter starts and the shim loads.
        let handshake = tokio::time::timeout(self.init_timeout, self.exchange(&HostToWorker::Init, None)).await;
        let outcome = match handshake {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RunnerError::InterpreterUnavailable {
                waited_ms: self.init_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(()) if !self.terminated.load(Ordering::Acquire) => {
                self.state.send_replace(ChannelState::Ready);
                log::info!("interpreter ({}) available for per-run processes", self.python_bin);
                Ok(())
            }
            Ok(()) => Err(RunnerError::WorkerExited),
            Err(e) => {
                log::error!("interpreter handshake failed: {}", e);
                self.state.send_replace(ChannelState::Uninitialized);
                Err(e)
            }
        }
    }

    async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        // Dropping a pending exchange kills its process (kill_on_drop) and
        // the claim hands the channel back as Ready.
        let _claim = BusyClaim::acquire(&self.state)?;

        let id = Uuid::new_v4().to_string();
        let run = HostToWorker::Run {
            id: id.clone(),
            code: request.source,
            inputs: request.inputs,
        };
        self.exchange(&run, Some(&id)).await
    }

    async fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        self.state.send_replace(ChannelState::Uninitialized);
    }
}
