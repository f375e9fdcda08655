// src/api/handlers/tasks.rs
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use crate::api::AppState;
use crate::database;
use crate::errors::RunnerError;
use crate::models::{Progress, Task, TestCase};

#[derive(Deserialize)]
pub struct TaskQuery {
    pub student: Option<String>,
}

#[derive(Serialize)]
pub struct TaskView {
    pub task: Task,
    pub tests: Vec<TestCase>,
    pub progress: Option<Progress>,
}

pub async fn list_tasks(state: web::Data<AppState>) -> Result<HttpResponse, RunnerError> {
    let tasks = database::list_tasks(&state.db_pool).await?;
    Ok(HttpResponse::Ok().json(tasks))
}

/// Task page data. Hidden tests are listed but carry no input or output.
pub async fn get_task(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<TaskQuery>,
) -> Result<HttpResponse, RunnerError> {
    let task_id = path.into_inner();
    let task = database::get_task(&state.db_pool, task_id).await?;
    let tests = database::get_test_cases(&state.db_pool, task_id)
        .await?
        .iter()
        .map(TestCase::redacted)
        .collect();
    let progress = match query.student.as_deref() {
        Some(student) => database::get_progress(&state.db_pool, student, task_id).await?,
        None => None,
    };

    Ok(HttpResponse::Ok().json(TaskView { task, tests, progress }))
}
