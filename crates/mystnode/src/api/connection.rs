use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use super::AppState;
use crate::connection::{ConnectionState, ConnectionStatus};

#[derive(Debug, Serialize)]
struct ErrorMessage {
    message: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorMessage {
            message: message.into(),
        }),
    )
        .into_response()
}

pub async fn get_status(State(state): State<AppState>) -> Json<ConnectionStatus> {
    Json(state.connection.status())
}

/// Location of the node while a connection is up; 503 otherwise.
pub async fn get_location(State(state): State<AppState>) -> Response {
    if state.connection.status().state != ConnectionState::Connected {
        return error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Connection is not connected",
        );
    }

    match state.location.resolve() {
        Ok(location) => Json(location).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
