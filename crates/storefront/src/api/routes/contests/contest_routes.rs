use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::ErrorResponse,
    Json,
};
use log::error;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{AddDraw, Contest, ContestUpdate, Draw, NewContest, PrizePool},
    startup::AppState,
};

pub async fn get_contest(
    State(state): State<Arc<AppState>>,
    Path(contest_id): Path<Uuid>,
) -> Result<Json<Contest>, ErrorResponse> {
    state
        .contests
        .get_contest(contest_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error getting contest {}: {:?}", contest_id, e);
            e.into()
        })
}

pub async fn get_prize_pool(
    State(state): State<Arc<AppState>>,
    Path(contest_id): Path<Uuid>,
) -> Result<Json<PrizePool>, ErrorResponse> {
    state
        .settlement
        .prize_pool(contest_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error computing prize pool of {}: {:?}", contest_id, e);
            e.into()
        })
}

pub async fn create_contest(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewContest>,
) -> Result<(StatusCode, Json<Contest>), ErrorResponse> {
    state
        .contests
        .create_contest(body)
        .await
        .map(|contest| (StatusCode::CREATED, Json(contest)))
        .map_err(|e| {
            error!("error creating contest: {:?}", e);
            e.into()
        })
}

pub async fn update_contest(
    State(state): State<Arc<AppState>>,
    Path(contest_id): Path<Uuid>,
    Json(body): Json<ContestUpdate>,
) -> Result<Json<Contest>, ErrorResponse> {
    state
        .contests
        .update_contest(contest_id, body)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error updating contest {}: {:?}", contest_id, e);
            e.into()
        })
}

pub async fn record_draw(
    State(state): State<Arc<AppState>>,
    Path(contest_id): Path<Uuid>,
    Json(body): Json<AddDraw>,
) -> Result<(StatusCode, Json<Draw>), ErrorResponse> {
    state
        .contests
        .record_draw(contest_id, body)
        .await
        .map(|draw| (StatusCode::CREATED, Json(draw)))
        .map_err(|e| {
            error!("error recording draw for {}: {:?}", contest_id, e);
            e.into()
        })
}
