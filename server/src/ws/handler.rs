use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::state::AppState;
use crate::ws::actor;
use crate::ws::protocol::ConnectQuery;

/// GET /ws?transactionId=..&userId=..&userName=..&userRole=..
///
/// Handshake parameters are validated and authorized before the upgrade, so
/// a rejected socket never gets a connection id or a registry row.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let params = match state.dispatcher.admit(&query) {
        Ok(params) => params,
        Err(err) => {
            tracing::warn!(
                transaction_id = ?query.transaction_id,
                user_id = ?query.user_id,
                error = %err,
                "WebSocket handshake rejected"
            );
            return (err.status(), err.to_string()).into_response();
        }
    };

    let connection_id = uuid::Uuid::new_v4().to_string();
    tracing::debug!(
        connection_id = %connection_id,
        transaction_id = %params.transaction_id,
        user_id = %params.user_id,
        "WebSocket handshake accepted"
    );

    ws.on_upgrade(move |socket| actor::run_connection(socket, state, connection_id, params))
}

/// GET /health
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
