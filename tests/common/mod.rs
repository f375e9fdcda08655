// tests/common/mod.rs
#![allow(dead_code)]

use coderun::channel::ExecutionRequest;
use coderun::testing::{echoed, failed, Reply};
pub use coderun::testing::ScriptedFactory;

/// Mock of a Python interpreter for the handful of programs the tests use.
pub fn classroom_script(request: &ExecutionRequest) -> Reply {
    let code = request.source.as_str();
    if code.contains("while True") {
        return Reply::Hang;
    }
    if code.contains("raise") {
        return failed("ValueError: boom");
    }
    if code.contains("int(input())") {
        let sum: i64 = request.inputs.iter().filter_map(|v| v.trim().parse::<i64>().ok()).sum();
        let sum = if code.contains("a - b") { -sum } else { sum };
        return echoed(&request.inputs, &sum.to_string());
    }
    if code.contains("input()") {
        let first = request.inputs.first().cloned().unwrap_or_default();
        return echoed(&request.inputs, &first);
    }
    if let Some(start) = code.find("print(\"") {
        let rest = &code[start + 7..];
        let end = rest.find('"').unwrap_or(rest.len());
        return echoed(&[], &rest[..end]);
    }
    echoed(&[], "")
}
