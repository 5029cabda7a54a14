use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;

use mystnode_sessions::{Query as SessionQuery, QueryError, SessionHistory, Stats};

use super::AppState;
use crate::filters::FilterArgs;

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<FilterArgs>,
) -> Result<Json<Vec<SessionHistory>>, (StatusCode, String)> {
    let mut query = build_query(&params)?;
    query.collect_sessions();

    let results = run_query(&state, query).await?.into_results();
    Ok(Json(results.sessions.unwrap_or_default()))
}

pub async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<FilterArgs>,
) -> Result<Json<Stats>, (StatusCode, String)> {
    let mut query = build_query(&params)?;
    query.collect_stats();

    let results = run_query(&state, query).await?.into_results();
    Ok(Json(results.stats.unwrap_or_default()))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionHistory>, (StatusCode, String)> {
    let session = state
        .db
        .sessions()
        .get(&id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    session
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Session not found: {}", id)))
}

fn build_query(params: &FilterArgs) -> Result<SessionQuery, (StatusCode, String)> {
    params
        .to_query(Utc::now())
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

/// Execute the query off the async runtime; the scan blocks until it completes.
async fn run_query(
    state: &AppState,
    mut query: SessionQuery,
) -> Result<SessionQuery, (StatusCode, String)> {
    let db = state.db.clone();

    tokio::task::spawn_blocking(move || -> Result<SessionQuery, QueryError> {
        query.execute(db.as_ref())?;
        Ok(query)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(|e| {
        tracing::error!("Session query failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}
