use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use milky_core::EmojiDescriptor;

use crate::error::ApiResult;
use crate::server::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Vec<EmojiDescriptor>> {
    Json(state.companion.emojis())
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub count: usize,
}

/// PUT /emojis: replace the catalog, keeping known descriptions.
pub async fn refresh(State(state): State<AppState>, Json(emojis): Json<Vec<EmojiDescriptor>>) -> Json<RefreshResponse> {
    Json(RefreshResponse {
        count: state.companion.refresh_emojis(emojis),
    })
}

#[derive(Deserialize)]
pub struct DescriptionBody {
    pub description: String,
}

pub async fn describe(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<DescriptionBody>,
) -> ApiResult<StatusCode> {
    state.companion.describe_emoji(id, &req.description)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct JobStarted {
    pub guild_id: u64,
    pub pending: usize,
}

/// POST /emojis/describe/{guild_id}: starts a background job, replacing
/// any job already running for the guild.
pub async fn describe_guild(State(state): State<AppState>, Path(guild_id): Path<u64>) -> (StatusCode, Json<JobStarted>) {
    let ticket = state.companion.describe_guild_emojis(guild_id);
    (
        StatusCode::ACCEPTED,
        Json(JobStarted {
            guild_id: ticket.guild_id,
            pending: ticket.pending,
        }),
    )
}
