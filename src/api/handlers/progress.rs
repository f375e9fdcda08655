// src/api/handlers/progress.rs
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use crate::api::AppState;
use crate::database;
use crate::errors::RunnerError;
use crate::models::ActivityKind;

#[derive(Deserialize)]
pub struct SaveRequest {
    pub student: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct ActivityRequest {
    pub student: String,
    pub event_type: String,
    pub text: Option<String>,
}

pub async fn save_code(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    req: web::Json<SaveRequest>,
) -> Result<HttpResponse, RunnerError> {
    let task_id = path.into_inner();
    database::get_task(&state.db_pool, task_id).await?;
    database::save_draft(&state.db_pool, &req.student, task_id, &req.code).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "saved" })))
}

pub async fn record_activity(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    req: web::Json<ActivityRequest>,
) -> Result<HttpResponse, RunnerError> {
    let task_id = path.into_inner();
    let req = req.into_inner();
    let kind: ActivityKind = req.event_type.parse()?;
    database::get_task(&state.db_pool, task_id).await?;

    let recorded =
        database::record_activity(&state.db_pool, &req.student, task_id, kind, req.text.as_deref()).await?;

    if recorded && kind == ActivityKind::Paste {
        if let Some(text) = req.text.as_deref() {
            if text.chars().count() >= state.config.paste_threshold {
                state.sessions.record_paste(&req.student, task_id, text);
            }
        }
    }

    Ok(HttpResponse::Ok().json(json!({ "recorded": recorded })))
}
