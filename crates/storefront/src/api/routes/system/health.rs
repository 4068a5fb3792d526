use axum::{extract::State, http::StatusCode, response::ErrorResponse};
use log::error;
use std::sync::Arc;

use crate::{domain::Error, startup::AppState};

pub async fn health_check(State(state): State<Arc<AppState>>) -> Result<StatusCode, ErrorResponse> {
    state.contests.ping().await.map_err(|e| {
        error!("health check failed to reach the database: {}", e);
        Error::DbError(e)
    })?;
    Ok(StatusCode::OK)
}
