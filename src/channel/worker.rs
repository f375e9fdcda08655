// src/channel/worker.rs
//! Channel backed by one long-lived interpreter process.
//!
//! Requests carry a fresh id and wait on a oneshot registered under that id;
//! the reader task routes each reply by id and drops replies nobody waits for,
//! so a late answer can never be handed to a newer request.

use super::interpreter::{SpawnedInterpreter, kill_interpreter, spawn_interpreter};
use super::protocol::{HostToWorker, WorkerToHost, encode_line};
use super::{BusyClaim, ChannelState, ExecutionChannel, ExecutionRequest, ExecutionResult};
use crate::errors::{Result, RunnerError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{Mutex, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<ExecutionResult>>>>;

struct WorkerHandle {
    child: Child,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingReplies,
    shutdown: CancellationToken,
}

pub struct WorkerChannel {
    python_bin: String,
    init_timeout: Duration,
    state: Arc<watch::Sender<ChannelState>>,
    worker: Mutex<Option<WorkerHandle>>,
    terminated: AtomicBool,
}

impl WorkerChannel {
    pub fn new(python_bin: impl Into<String>, init_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ChannelState::Uninitialized);
        Self {
            python_bin: python_bin.into(),
            init_timeout,
            state: Arc::new(state),
            worker: Mutex::new(None),
            terminated: AtomicBool::new(false),
        }
    }

    async fn start(&self) -> Result<WorkerHandle> {
        let SpawnedInterpreter { mut child, mut stdin, stdout } = spawn_interpreter(&self.python_bin)?;

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(read_replies(
            stdout,
            ready_tx,
            Arc::clone(&pending),
            Arc::clone(&self.state),
            shutdown.clone(),
        ));

        let handshake = async {
            write_line(&mut stdin, &encode_line(&HostToWorker::Init)?).await?;
            match tokio::time::timeout(self.init_timeout, ready_rx).await {
                Ok(Ok(())) => Ok::<(), RunnerError>(()),
                Ok(Err(_)) => Err(RunnerError::WorkerExited),
                Err(_) => Err(RunnerError::InterpreterUnavailable {
                    waited_ms: self.init_timeout.as_millis() as u64,
                }),
            }
        };

        if let Err(e) = handshake.await {
            shutdown.cancel();
            kill_interpreter(&mut child, "init_failed").await;
            return Err(e);
        }

        Ok(WorkerHandle {
            child,
            stdin: Arc::new(Mutex::new(stdin)),
            pending,
            shutdown,
        })
    }

    async fn dispatch(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let (stdin, pending) = {
            let worker = self.worker.lock().await;
            let handle = worker.as_ref().ok_or(RunnerError::ChannelNotReady)?;
            (Arc::clone(&handle.stdin), Arc::clone(&handle.pending))
        };

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(id.clone(), tx);

        let line = encode_line(&HostToWorker::Run {
            id: id.clone(),
            code: request.source,
            inputs: request.inputs,
        })?;
        let written = {
            let mut stdin = stdin.lock().await;
            write_line(&mut stdin, &line).await
        };
        if let Err(e) = written {
            pending.lock().await.remove(&id);
            return Err(e);
        }

        log::debug!("submitted request {} to interpreter worker", id);
        rx.await.map_err(|_| RunnerError::WorkerExited)
    }
}

#[async_trait]
impl ExecutionChannel for WorkerChannel {
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

        log::info!("starting interpreter worker ({})", self.python_bin);
        match self.start().await {
            Ok(mut handle) => {
                if self.terminated.load(Ordering::Acquire) {
                    handle.shutdown.cancel();
                    kill_interpreter(&mut handle.child, "terminated_during_init").await;
                    return Err(RunnerError::WorkerExited);
                }
                let replaced = self.worker.lock().await.replace(handle);
                if let Some(mut old) = replaced {
                    // a worker that died or was abandoned; its reader must not touch our state
                    old.shutdown.cancel();
                    kill_interpreter(&mut old.child, "replaced").await;
                }
                self.state.send_replace(ChannelState::Ready);
                log::info!("interpreter worker ready");
                Ok(())
            }
            Err(e) => {
                log::error!("interpreter worker failed to start: {}", e);
                self.state.send_replace(ChannelState::Uninitialized);
                Err(e)
            }
        }
    }

    async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let _claim = BusyClaim::acquire(&self.state)?;
        let mut in_flight = InFlight { channel: self, settled: false };
        let result = self.dispatch(request).await;
        in_flight.settled = true;
        result
    }

    async fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        let handle = self.worker.lock().await.take();
        if let Some(mut handle) = handle {
            handle.shutdown.cancel();
            kill_interpreter(&mut handle.child, "terminate").await;
            handle.pending.lock().await.clear();
        }
        self.state.send_replace(ChannelState::Uninitialized);
    }
}

impl WorkerChannel {
    /// Kills the worker of a submission nobody waits for any more. The program
    /// may still be running, so the process cannot be reused.
    fn abandon_worker(&self) {
        log::warn!("submission abandoned mid-run; killing interpreter worker");
        match self.worker.try_lock() {
            Ok(mut worker) => {
                if let Some(mut handle) = worker.take() {
                    handle.shutdown.cancel();
                    if let Err(e) = handle.child.start_kill() {
                        log::warn!("failed to kill abandoned interpreter worker: {}", e);
                    }
                }
            }
            // The next init replaces (and kills) the handle.
            Err(_) => log::debug!("worker handle locked; deferring kill to the next init"),
        }
        self.state.send_replace(ChannelState::Uninitialized);
    }
}

/// Marks a submission that was dropped before its reply arrived.
struct InFlight<'a> {
    channel: &'a WorkerChannel,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.channel.abandon_worker();
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<()> {
    let io = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    };
    io.await.map_err(|e| match e.kind() {
        std::io::ErrorKind::BrokenPipe => RunnerError::WorkerExited,
        _ => RunnerError::Protocol(format!("failed to write to interpreter: {}", e)),
    })
}

async fn read_replies<R>(
    stdout: R,
    ready: oneshot::Sender<()>,
    pending: PendingReplies,
    state: Arc<watch::Sender<ChannelState>>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut ready = Some(ready);
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            res = lines.next_line() => match res {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("failed to read from interpreter worker: {}", e);
                    break;
                }
            },
        };

        let msg: WorkerToHost = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("interpreter worker sent invalid json: {} (line: {})", e, line);
                continue;
            }
        };

        let (id, result) = match msg {
            WorkerToHost::Ready => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
                continue;
            }
            WorkerToHost::Result { id, output, error } => (
                id,
                match error {
                    Some(error) => ExecutionResult::Failed { error },
                    None => ExecutionResult::Completed { output },
                },
            ),
            WorkerToHost::Error { id, error } => (id, ExecutionResult::Failed { error }),
        };

        let waiter = match &id {
            Some(id) => pending.lock().await.remove(id),
            None => None,
        };
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => log::warn!("discarding interpreter reply for unknown request {:?}", id),
        }
    }

    pending.lock().await.clear();
    // An abandoned worker's output closes after a newer worker may already own the state.
    if shutdown.is_cancelled() {
        return;
    }
    log::warn!("interpreter worker closed its output");
    state.send_replace(ChannelState::Uninitialized);
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn route(lines: &'static str, pending: PendingReplies) -> (bool, ChannelState) {
        let (state, _) = watch::channel(ChannelState::Busy);
        let state = Arc::new(state);
        let (ready_tx, ready_rx) = oneshot::channel();
        read_replies(lines.as_bytes(), ready_tx, pending, Arc::clone(&state), CancellationToken::new()).await;
        let current = *state.borrow();
        (ready_rx.await.is_ok(), current)
    }

    #[tokio::test]
    async fn test_replies_for_unknown_ids_are_discarded() {
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert("current".to_string(), tx);

        let lines = concat!(
            "{\"type\":\"ready\"}\n",
            "{\"type\":\"result\",\"id\":\"stale\",\"output\":\"late answer\",\"error\":null}\n",
            "not json\n",
            "{\"type\":\"result\",\"id\":\"current\",\"output\":\"7\",\"error\":null}\n",
        );
        let (ready, state_after_eof) = route(lines, Arc::clone(&pending)).await;

        assert!(ready);
        assert_eq!(rx.await.unwrap(), ExecutionResult::Completed { output: "7".to_string() });
        assert!(pending.lock().await.is_empty());
        assert_eq!(state_after_eof, ChannelState::Uninitialized);
    }

    #[tokio::test]
    async fn test_error_reply_fails_only_its_request() {
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        pending.lock().await.insert("a".to_string(), first_tx);
        pending.lock().await.insert("b".to_string(), second_tx);

        let lines = concat!(
            "{\"type\":\"error\",\"id\":\"b\",\"error\":\"unknown request type 'x'\"}\n",
            "{\"type\":\"error\",\"id\":null,\"error\":\"invalid request\"}\n",
        );
        route(lines, Arc::clone(&pending)).await;

        assert_eq!(
            second_rx.await.unwrap(),
            ExecutionResult::Failed { error: "unknown request type 'x'".to_string() }
        );
        // the worker closed before answering "a"
        assert!(first_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_reader_leaves_state_alone() {
        let (state, _) = watch::channel(ChannelState::Ready);
        let state = Arc::new(state);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let (ready_tx, _ready_rx) = oneshot::channel();

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        read_replies(&b""[..], ready_tx, pending, Arc::clone(&state), shutdown).await;

        assert_eq!(*state.borrow(), ChannelState::Ready);
    }
}
