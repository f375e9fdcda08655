// src/api/handlers/runs.rs
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::api::AppState;
use crate::api::handlers::ws::{RunUpdate, WsBroker};
use crate::channel::ExecutionResult;
use crate::database;
use crate::errors::RunnerError;
use crate::evaluator::{self, TestRunVerdict};
use crate::harvester::{count_input_calls, prompt_label, QueuedPrompter};
use crate::models::{RunKind, RunRecord};
use crate::session::Session;

#[derive(Deserialize)]
pub struct InputsRequest {
    pub code: String,
}

#[derive(Serialize)]
pub struct InputsResponse {
    pub count: usize,
    pub prompts: Vec<String>,
}

impl InputsResponse {
    fn for_source(code: &str) -> Self {
        let count = count_input_calls(code);
        Self {
            count,
            prompts: (0..count).map(|i| prompt_label(i, count)).collect(),
        }
    }
}

#[derive(Deserialize)]
pub struct RunRequest {
    pub student: String,
    pub code: String,
    pub inputs: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct AwaitingInput {
    pub status: &'static str,
    #[serde(flatten)]
    pub needed: InputsResponse,
}

#[derive(Serialize)]
pub struct FinishedRun {
    pub id: String,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

#[derive(Deserialize)]
pub struct CheckRequest {
    pub student: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct CheckResponse {
    pub id: String,
    #[serde(flatten)]
    pub verdict: TestRunVerdict,
    pub completed: bool,
}

pub async fn count_inputs(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    req: web::Json<InputsRequest>,
) -> Result<HttpResponse, RunnerError> {
    database::get_task(&state.db_pool, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(InputsResponse::for_source(&req.code)))
}

pub async fn run_code(
    state: web::Data<AppState>,
    broker: web::Data<WsBroker>,
    path: web::Path<i64>,
    req: web::Json<RunRequest>,
) -> Result<HttpResponse, RunnerError> {
    let task_id = path.into_inner();
    let req = req.into_inner();
    database::get_task(&state.db_pool, task_id).await?;

    let inputs = match req.inputs {
        Some(inputs) => inputs,
        None => {
            let needed = InputsResponse::for_source(&req.code);
            if needed.count > 0 {
                return Ok(HttpResponse::Ok().json(AwaitingInput { status: "awaiting_input", needed }));
            }
            Vec::new()
        }
    };

    let drafts = state.drafts(&req.student, task_id);
    let mut session = state.sessions.acquire(&req.student, task_id, drafts)?;
    let mut prompter = QueuedPrompter::new(inputs);
    let result = session.run(&req.code, &mut prompter, &CancellationToken::new()).await?;
    if result.timed_out() {
        recover_in_background(session);
    }

    let id = Uuid::new_v4().to_string();
    log::info!("Run {} for '{}' on task {}: {}", id, req.student, task_id, result.status());

    store_run(&state, RunRecord {
        id: id.clone(),
        student: req.student.clone(),
        task_id,
        kind: RunKind::Run.as_str().to_string(),
        status: result.status().to_string(),
        output: Some(result.output_text().to_string()),
        error_message: result.error_message().map(str::to_string),
        passed_count: None,
        total_count: None,
        created_at: chrono::Utc::now().to_rfc3339(),
    })
    .await;

    broker.broadcast(RunUpdate {
        id: id.clone(),
        student: req.student,
        task_id,
        kind: RunKind::Run.as_str().to_string(),
        status: result.status().to_string(),
        passed_count: None,
        total_count: None,
    }).await;

    Ok(HttpResponse::Ok().json(FinishedRun { id, result }))
}

pub async fn check_code(
    state: web::Data<AppState>,
    broker: web::Data<WsBroker>,
    path: web::Path<i64>,
    req: web::Json<CheckRequest>,
) -> Result<HttpResponse, RunnerError> {
    let task_id = path.into_inner();
    let req = req.into_inner();
    database::get_task(&state.db_pool, task_id).await?;
    let cases = database::get_test_cases(&state.db_pool, task_id).await?;

    let drafts = state.drafts(&req.student, task_id);
    let last_paste = state.sessions.last_paste(&req.student, task_id);
    let mut session = state.sessions.acquire(&req.student, task_id, drafts)?;
    let verdict = evaluator::evaluate(&mut session, &req.code, &cases, last_paste.as_deref()).await?;
    drop(session);

    let mut completed = false;
    if verdict.all_passed {
        match database::mark_complete(&state.db_pool, &req.student, task_id, &req.code).await {
            Ok(()) => completed = true,
            Err(e) => log::error!("Failed to mark task {} complete for '{}': {}", task_id, req.student, e),
        }
    }

    let id = Uuid::new_v4().to_string();
    let status = if verdict.all_passed {
        "passed"
    } else if verdict.timed_out {
        "timed_out"
    } else {
        "failed"
    };
    log::info!(
        "Check {} for '{}' on task {}: {}/{} passed",
        id, req.student, task_id, verdict.passed_count, verdict.total
    );

    store_run(&state, RunRecord {
        id: id.clone(),
        student: req.student.clone(),
        task_id,
        kind: RunKind::Check.as_str().to_string(),
        status: status.to_string(),
        output: None,
        error_message: verdict.first_failure.as_ref().map(|f| f.diagnostic.clone()),
        passed_count: Some(verdict.passed_count as i64),
        total_count: Some(verdict.total as i64),
        created_at: chrono::Utc::now().to_rfc3339(),
    })
    .await;

    broker.broadcast(RunUpdate {
        id: id.clone(),
        student: req.student,
        task_id,
        kind: RunKind::Check.as_str().to_string(),
        status: status.to_string(),
        passed_count: Some(verdict.passed_count),
        total_count: Some(verdict.total),
    }).await;

    Ok(HttpResponse::Ok().json(CheckResponse { id, verdict, completed }))
}

/// Keeps the session claimed until its replacement interpreter is ready, so
/// the next attempt from this page gets a 409 instead of a cold channel.
fn recover_in_background(session: OwnedMutexGuard<Session>) {
    actix_rt::spawn(async move {
        if let Err(e) = session.recover().await {
            log::error!("Interpreter did not come back after a timeout: {}", e);
        }
    });
}

async fn store_run(state: &AppState, record: RunRecord) {
    if let Err(e) = database::save_run(&state.db_pool, &record).await {
        log::error!("Failed to save run {}: {}", record.id, e);
    }
}
