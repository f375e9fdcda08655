// src/api/handlers/history.rs
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use crate::api::AppState;
use crate::errors::RunnerError;
use crate::models::RunRecord;

const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub results: Vec<RunRecord>,
}

pub async fn get_history(
    state: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, RunnerError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 500);
    let results = crate::database::get_run_history(&state.db_pool, limit).await?;
    Ok(HttpResponse::Ok().json(HistoryResponse { results }))
}
