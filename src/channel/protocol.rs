// src/channel/protocol.rs
//! JSON-lines messages exchanged with the interpreter shim.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostToWorker {
    Init,
    Run {
        id: String,
        code: String,
        inputs: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerToHost {
    Ready,
    Result {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        output: String,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        id: Option<String>,
        error: String,
    },
}

/// Serializes `msg` as one newline-terminated line.
pub fn encode_line(msg: &HostToWorker) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}
