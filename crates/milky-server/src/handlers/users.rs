use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use milky_core::UserRecord;
use milky_store::{CheckinOutcome, LastCheckin, PointsAction};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

const DEFAULT_LEADERBOARD: usize = 10;

pub async fn checkin(State(state): State<AppState>, Path(id): Path<u64>) -> Json<CheckinOutcome> {
    Json(state.companion.checkin(id))
}

pub async fn get_user(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<UserRecord>> {
    state
        .companion
        .user(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("user {id} has no record")))
}

#[derive(Deserialize)]
pub struct PointsBody {
    pub action: PointsAction,
    pub amount: u64,
}

#[derive(Serialize)]
pub struct PointsChange {
    pub old: u64,
    pub new: u64,
}

pub async fn adjust_points(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<PointsBody>,
) -> Json<PointsChange> {
    let (old, new) = state.companion.adjust_points(id, req.action, req.amount);
    Json(PointsChange { old, new })
}

#[derive(Deserialize)]
pub struct EditCheckinBody {
    pub points: Option<u64>,
    pub consecutive_days: Option<u32>,
    /// Empty keeps, `reset` clears, else `YYYY-MM-DD`.
    pub last_checkin_date: Option<String>,
}

/// PUT /users/{id}/checkin
pub async fn edit_checkin(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<EditCheckinBody>,
) -> ApiResult<Json<UserRecord>> {
    let last = LastCheckin::parse(req.last_checkin_date.as_deref())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.companion.edit_checkin(id, req.points, req.consecutive_days, last)))
}

/// POST /users/{id}/reset
pub async fn reset_user(State(state): State<AppState>, Path(id): Path<u64>) -> Json<UserRecord> {
    Json(state.companion.reset_user(id))
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct LeaderboardRow {
    pub user_id: u64,
    pub points: u64,
}

pub async fn leaderboard(State(state): State<AppState>, Query(q): Query<LeaderboardQuery>) -> Json<Vec<LeaderboardRow>> {
    let rows = state
        .companion
        .leaderboard(q.limit.unwrap_or(DEFAULT_LEADERBOARD))
        .into_iter()
        .map(|(user_id, points)| LeaderboardRow { user_id, points })
        .collect();
    Json(rows)
}
