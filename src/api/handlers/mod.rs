// src/api/handlers/mod.rs
mod health;
mod history;
mod progress;
mod runs;
mod tasks;
pub mod ws;

pub use health::health_check;
pub use history::get_history;
pub use progress::{record_activity, save_code};
pub use runs::{check_code, count_inputs, run_code};
pub use tasks::{get_task, list_tasks};
pub use ws::{ws_handler, RunUpdate, WsBroker};

use crate::errors::RunnerError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;

impl ResponseError for RunnerError {
    fn status_code(&self) -> StatusCode {
        match self {
            RunnerError::MissingInput { .. }
            | RunnerError::UnknownActivity(_)
            | RunnerError::InputCancelled => StatusCode::BAD_REQUEST,
            RunnerError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            RunnerError::SessionBusy | RunnerError::TaskLocked(_) => StatusCode::CONFLICT,
            RunnerError::InterpreterUnavailable { .. } | RunnerError::ChannelNotReady => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            log::error!("Request failed: {}", self);
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
