//! `MilkyServer`: the operator HTTP surface over a [`Companion`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use milky_engine::Companion;

use crate::handlers::{admin, conversation, emoji, users};
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub companion: Arc<Companion>,
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

pub struct MilkyServer {
    companion: Arc<Companion>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl MilkyServer {
    pub fn new(companion: Arc<Companion>) -> Self {
        Self {
            companion,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            companion: self.companion.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/status", get(conversation::status))
            .route("/probe", post(conversation::probe))
            .route("/circuit/reset", post(conversation::reset_circuit))
            .route("/save", post(conversation::save))
            .route("/turn", post(conversation::turn))
            .route(
                "/history/{*key}",
                get(conversation::get_history).delete(conversation::clear_history),
            )
            .route("/flags", get(admin::get_flags).put(admin::put_flags))
            .route("/personas", get(admin::list_personas))
            .route("/personas/{name}", put(admin::put_persona).delete(admin::delete_persona))
            .route("/personas/{name}/activate", post(admin::activate_persona))
            .route("/authorized", get(admin::list_authorized))
            .route("/authorized/{id}", put(admin::authorize).delete(admin::revoke))
            .route(
                "/filtered-words",
                get(admin::list_filtered)
                    .post(admin::add_filtered)
                    .delete(admin::remove_filtered),
            )
            .route("/users/{id}", get(users::get_user))
            .route("/users/{id}/checkin", post(users::checkin).put(users::edit_checkin))
            .route("/users/{id}/points", post(users::adjust_points))
            .route("/users/{id}/reset", post(users::reset_user))
            .route("/leaderboard", get(users::leaderboard))
            .route("/emojis", get(emoji::list).put(emoji::refresh))
            .route("/emojis/{id}/description", put(emoji::describe))
            .route("/emojis/describe/{guild_id}", post(emoji::describe_guild))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serve until the shutdown coordinator fires.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        info!(?addr, "operator API listening");
        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    }

    pub fn companion(&self) -> &Arc<Companion> {
        &self.companion
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.companion.client().circuit_open()))
}
