mod connection;
mod sessions;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use mystnode_sessions::Database;

use crate::connection::{ConnectionManager, LocationResolver};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub connection: Arc<dyn ConnectionManager>,
    pub location: Arc<dyn LocationResolver>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/stats", get(sessions::get_stats))
        .route("/sessions/{id}", get(sessions::get_session))
        .route("/connection", get(connection::get_status))
        .route("/connection/location", get(connection::get_location))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
