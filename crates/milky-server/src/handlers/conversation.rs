use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use milky_core::ConversationTurn;
use milky_engine::{ProbeReport, ServiceStatus, TurnOutcome, TurnRequest};

use super::parse_key;
use crate::error::ApiResult;
use crate::server::AppState;

/// POST /turn
pub async fn turn(State(state): State<AppState>, Json(request): Json<TurnRequest>) -> ApiResult<Json<TurnOutcome>> {
    Ok(Json(state.companion.handle_turn(request).await?))
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub key: String,
    pub turns: Vec<ConversationTurn>,
}

/// GET /history/{*key}
pub async fn get_history(State(state): State<AppState>, Path(raw): Path<String>) -> ApiResult<Json<HistoryResponse>> {
    let key = parse_key(&raw)?;
    Ok(Json(HistoryResponse {
        turns: state.companion.get_history(&key),
        key: key.to_string(),
    }))
}

/// DELETE /history/{*key}
pub async fn clear_history(State(state): State<AppState>, Path(raw): Path<String>) -> ApiResult<StatusCode> {
    let key = parse_key(&raw)?;
    Ok(if state.companion.clear_history(&key).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.companion.status())
}

/// POST /probe
pub async fn probe(State(state): State<AppState>) -> Json<ProbeReport> {
    Json(state.companion.probe().await)
}

/// POST /circuit/reset
pub async fn reset_circuit(State(state): State<AppState>) -> StatusCode {
    state.companion.reset_circuit();
    StatusCode::NO_CONTENT
}

/// POST /save
pub async fn save(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.companion.save().await?;
    Ok(StatusCode::NO_CONTENT)
}
