use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use milky_core::FeatureFlags;
use milky_engine::{FlagsPatch, PersonaSummary};

use crate::error::ApiResult;
use crate::server::AppState;

// ── Flags ──────────────────────────────────────────────────────────────

pub async fn get_flags(State(state): State<AppState>) -> Json<FeatureFlags> {
    Json(state.companion.flags())
}

pub async fn put_flags(State(state): State<AppState>, Json(patch): Json<FlagsPatch>) -> Json<FeatureFlags> {
    Json(state.companion.apply_flags(patch))
}

// ── Personas ───────────────────────────────────────────────────────────

pub async fn list_personas(State(state): State<AppState>) -> Json<Vec<PersonaSummary>> {
    Json(state.companion.personas())
}

#[derive(Deserialize)]
pub struct PersonaBody {
    pub body: String,
}

pub async fn put_persona(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PersonaBody>,
) -> ApiResult<StatusCode> {
    let created = state.companion.upsert_persona(&name, &req.body)?;
    Ok(if created { StatusCode::CREATED } else { StatusCode::OK })
}

pub async fn delete_persona(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<StatusCode> {
    state.companion.delete_persona(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ActivePersona {
    pub active_persona: Option<String>,
}

pub async fn activate_persona(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<ActivePersona>> {
    Ok(Json(ActivePersona {
        active_persona: state.companion.activate_persona(&name)?,
    }))
}

// ── Authorized users ───────────────────────────────────────────────────

pub async fn list_authorized(State(state): State<AppState>) -> Json<Vec<u64>> {
    Json(state.companion.authorized_users())
}

pub async fn authorize(State(state): State<AppState>, Path(id): Path<u64>) -> StatusCode {
    if state.companion.authorize_user(id) {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

pub async fn revoke(State(state): State<AppState>, Path(id): Path<u64>) -> StatusCode {
    if state.companion.revoke_user(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

// ── Filtered words ─────────────────────────────────────────────────────

pub async fn list_filtered(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.companion.filtered_words())
}

#[derive(Deserialize)]
pub struct WordsBody {
    /// Comma-separated.
    pub words: String,
}

#[derive(Serialize)]
pub struct WordsAdded {
    pub added: Vec<String>,
}

pub async fn add_filtered(State(state): State<AppState>, Json(req): Json<WordsBody>) -> Json<WordsAdded> {
    Json(WordsAdded {
        added: state.companion.add_filtered_words(&req.words),
    })
}

#[derive(Deserialize)]
pub struct RemoveQuery {
    pub word: Option<String>,
}

#[derive(Serialize)]
pub struct WordsRemoved {
    pub removed: usize,
}

/// DELETE /filtered-words[?word=w]: one word, or all of them.
pub async fn remove_filtered(State(state): State<AppState>, Query(q): Query<RemoveQuery>) -> Json<WordsRemoved> {
    let removed = match q.word {
        Some(word) => usize::from(state.companion.remove_filtered_word(&word)),
        None => state.companion.clear_filtered_words(),
    };
    Json(WordsRemoved { removed })
}
