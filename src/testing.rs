// src/testing.rs
//! Scripted execution channels shared by the unit and integration tests.

use crate::channel::{BusyClaim, ChannelFactory, ChannelState, ExecutionChannel, ExecutionRequest, ExecutionResult};
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

pub enum Reply {
    Result(ExecutionResult),
    Hang,
}

pub fn completed(output: &str) -> Reply {
    Reply::Result(ExecutionResult::Completed { output: output.to_string() })
}

pub fn failed(error: &str) -> Reply {
    Reply::Result(ExecutionResult::Failed { error: error.to_string() })
}

/// What a cooperative interpreter prints: the echoed input values, then the program's output.
pub fn echoed(inputs: &[String], output: &str) -> Reply {
    let mut text: Vec<String> = inputs.to_vec();
    text.push(output.to_string());
    completed(text.join("\n").trim())
}

pub type Script = Arc<dyn Fn(&ExecutionRequest) -> Reply + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    /// Time `init` takes to reach Ready; `None` never gets there.
    pub ready_after: Option<Duration>,
    pub terminate_delay: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            ready_after: Some(Duration::ZERO),
            terminate_delay: Duration::ZERO,
        }
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Channel answering from a script, with the same Ready/Busy discipline as
/// the interpreter-backed channels.
pub struct ScriptedChannel {
    script: Script,
    options: ChannelOptions,
    state: watch::Sender<ChannelState>,
    requests: Arc<Mutex<Vec<ExecutionRequest>>>,
    submitted: AtomicUsize,
    terminated: AtomicBool,
}

impl ScriptedChannel {
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionChannel for ScriptedChannel {
    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    async fn init(&self) -> Result<()> {
        let claimed = self.state.send_if_modified(|state| {
            let uninitialized = *state == ChannelState::Uninitialized;
            if uninitialized {
                *state = ChannelState::Initializing;
            }
            uninitialized
        });
        if !claimed {
            return Ok(());
        }
        match self.options.ready_after {
            None => futures::future::pending().await,
            Some(delay) if delay.is_zero() => tokio::task::yield_now().await,
            Some(delay) => tokio::time::sleep(delay).await,
        }
        self.state.send_replace(ChannelState::Ready);
        Ok(())
    }

    async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let _claim = BusyClaim::acquire(&self.state)?;
        self.submitted.fetch_add(1, Ordering::SeqCst);
        locked(&self.requests).push(request.clone());
        match (self.script)(&request) {
            Reply::Result(result) => Ok(result),
            Reply::Hang => futures::future::pending().await,
        }
    }

    async fn terminate(&self) {
        if !self.options.terminate_delay.is_zero() {
            tokio::time::sleep(self.options.terminate_delay).await;
        }
        self.terminated.store(true, Ordering::SeqCst);
        self.state.send_replace(ChannelState::Uninitialized);
    }
}

/// Every channel it creates shares one script and one request log.
pub struct ScriptedFactory {
    script: Script,
    options: ChannelOptions,
    requests: Arc<Mutex<Vec<ExecutionRequest>>>,
    channels: Mutex<Vec<Arc<ScriptedChannel>>>,
}

impl ScriptedFactory {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&ExecutionRequest) -> Reply + Send + Sync + 'static,
    {
        Self::with_options(script, ChannelOptions::default())
    }

    pub fn with_options<F>(script: F, options: ChannelOptions) -> Arc<Self>
    where
        F: Fn(&ExecutionRequest) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Arc::new(script),
            options,
            requests: Arc::new(Mutex::new(Vec::new())),
            channels: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        locked(&self.channels).len()
    }

    /// Every request submitted to any of this factory's channels, in order.
    pub fn requests(&self) -> Vec<ExecutionRequest> {
        locked(&self.requests).clone()
    }

    pub fn submitted(&self) -> usize {
        locked(&self.requests).len()
    }

    /// The n-th channel this factory built.
    pub fn channel(&self, n: usize) -> Arc<ScriptedChannel> {
        Arc::clone(&locked(&self.channels)[n])
    }

    pub fn channel_state(&self, n: usize) -> ChannelState {
        self.channel(n).state()
    }
}

impl ChannelFactory for ScriptedFactory {
    fn create(&self) -> Arc<dyn ExecutionChannel> {
        let (state, _) = watch::channel(ChannelState::Uninitialized);
        let channel = Arc::new(ScriptedChannel {
            script: Arc::clone(&self.script),
            options: self.options,
            state,
            requests: Arc::clone(&self.requests),
            submitted: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
        });
        locked(&self.channels).push(Arc::clone(&channel));
        channel
    }
}
