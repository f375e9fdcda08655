// src/harvester.rs
//! Counting `input()` call sites and collecting the values up front.
//!
//! The interpreter cannot stop mid-run to ask a human for a value, so the
//! values are gathered before submission and satisfied positionally.
//!
//! Comment stripping is a line heuristic: everything after the first `#` on a
//! line is dropped, even when that `#` sits inside a string literal. So
//! `print("#"); input()` counts zero call sites. This is kept deliberately
//! and pinned by tests.

use crate::errors::{Result, RunnerError};
use async_trait::async_trait;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::OnceLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

fn input_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\binput\s*\(").expect("input call regex is valid"))
}

/// Number of input-request call sites outside line comments.
pub fn count_input_calls(source: &str) -> usize {
    source
        .split('\n')
        .map(|line| match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        })
        .map(|code| input_call_re().find_iter(code).count())
        .sum()
}

/// Label shown for the `index`-th (zero based) of `total` prompts.
pub fn prompt_label(index: usize, total: usize) -> String {
    format!("Input {}/{}:", index + 1, total)
}

/// Source of values for the harvest loop.
#[async_trait]
pub trait InputPrompter: Send {
    /// Asks for the value of prompt `index` (zero based) out of `total`.
    async fn prompt(&mut self, index: usize, total: usize) -> Result<String>;
}

/// Collects one value per call site, in order.
///
/// The wait on the human has no time bound; `cancel` tears it down.
pub async fn harvest<P>(source: &str, prompter: &mut P, cancel: &CancellationToken) -> Result<Vec<String>>
where
    P: InputPrompter + ?Sized,
{
    let total = count_input_calls(source);
    if total == 0 {
        return Ok(Vec::new());
    }
    log::debug!("collecting {} input value(s)", total);

    let mut values = Vec::with_capacity(total);
    for index in 0..total {
        let value = tokio::select! {
            _ = cancel.cancelled() => return Err(RunnerError::InputCancelled),
            value = prompter.prompt(index, total) => value?,
        };
        values.push(value);
    }
    Ok(values)
}

/// Prompter fed from values the caller already has, e.g. an HTTP request body.
pub struct QueuedPrompter {
    values: VecDeque<String>,
    supplied: usize,
}

impl QueuedPrompter {
    pub fn new(values: Vec<String>) -> Self {
        let supplied = values.len();
        Self { values: values.into(), supplied }
    }
}

#[async_trait]
impl InputPrompter for QueuedPrompter {
    async fn prompt(&mut self, _index: usize, total: usize) -> Result<String> {
        self.values.pop_front().ok_or(RunnerError::MissingInput {
            expected: total,
            supplied: self.supplied,
        })
    }
}

/// Prompter that writes the label to `writer` and reads one line from `reader`.
pub struct LinePrompter<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> LinePrompter<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

#[async_trait]
impl<R, W> InputPrompter for LinePrompter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn prompt(&mut self, index: usize, total: usize) -> Result<String> {
        self.writer.write_all(format!("{} ", prompt_label(index, total)).as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(RunnerError::InputCancelled);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}
