use axum::Router;

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .route("/health", axum::routing::get(ws_handler::health_check))
        .with_state(state)
}
