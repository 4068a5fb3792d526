use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::ErrorResponse,
    Json,
};
use log::{debug, error};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    api::extractors::UserId,
    domain::{AddParticipation, CashPayment, CashSettlement, Participation},
    startup::AppState,
};

pub async fn create_participation(
    UserId(user_id): UserId,
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddParticipation>,
) -> Result<(StatusCode, Json<Participation>), ErrorResponse> {
    state
        .settlement
        .create_participation(&user_id, body)
        .await
        .map(|participation| (StatusCode::CREATED, Json(participation)))
        .map_err(|e| {
            error!("error creating participation for {}: {:?}", user_id, e);
            e.into()
        })
}

pub async fn list_participations(
    UserId(user_id): UserId,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Participation>>, ErrorResponse> {
    debug!("listing participations of {}", user_id);
    state
        .ledger
        .list_by_user(&user_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error listing participations of {}: {:?}", user_id, e);
            e.into()
        })
}

pub async fn list_pending_participations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Participation>>, ErrorResponse> {
    state.ledger.list_pending().await.map(Json).map_err(|e| {
        error!("error listing pending participations: {:?}", e);
        e.into()
    })
}

pub async fn activate_participation(
    State(state): State<Arc<AppState>>,
    Path(participation_id): Path<Uuid>,
) -> Result<Json<Participation>, ErrorResponse> {
    state
        .settlement
        .activate_participation(participation_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error activating participation {}: {:?}", participation_id, e);
            e.into()
        })
}

pub async fn cancel_participation(
    State(state): State<Arc<AppState>>,
    Path(participation_id): Path<Uuid>,
) -> Result<Json<Participation>, ErrorResponse> {
    state
        .settlement
        .cancel_participation(participation_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error cancelling participation {}: {:?}", participation_id, e);
            e.into()
        })
}

/// Desk staff confirming cash handed over for a ticket
pub async fn register_cash_payment(
    State(state): State<Arc<AppState>>,
    Path(participation_id): Path<Uuid>,
    Json(body): Json<CashPayment>,
) -> Result<Json<CashSettlement>, ErrorResponse> {
    state
        .settlement
        .register_cash_payment(participation_id, body)
        .await
        .map(Json)
        .map_err(|e| {
            error!(
                "error registering cash payment for {}: {:?}",
                participation_id, e
            );
            e.into()
        })
}
