use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::ErrorResponse,
    Json,
};
use log::{error, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    api::extractors::UserId,
    domain::{
        CartCheckout, ConfirmedCharge, Error, PixCheckout, PixCheckoutReceipt, RefreshedQrCode,
    },
    startup::AppState,
};

/// One ticket paid by PIX. Responds once the QR code is ready or the poll gives up.
pub async fn pix_checkout(
    UserId(user_id): UserId,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PixCheckout>,
) -> Result<(StatusCode, Json<PixCheckoutReceipt>), ErrorResponse> {
    let cancel = state.cancel_token.child_token();
    state
        .settlement
        .pix_checkout(&user_id, body, &cancel)
        .await
        .map(|receipt| (StatusCode::CREATED, Json(receipt)))
        .map_err(|e| {
            error!("error in pix checkout for {}: {:?}", user_id, e);
            e.into()
        })
}

/// Several tickets, possibly across contests, paid by a single PIX charge
pub async fn cart_checkout(
    UserId(user_id): UserId,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CartCheckout>,
) -> Result<(StatusCode, Json<PixCheckoutReceipt>), ErrorResponse> {
    let cancel = state.cancel_token.child_token();
    state
        .settlement
        .cart_checkout(&user_id, body, &cancel)
        .await
        .map(|receipt| (StatusCode::CREATED, Json(receipt)))
        .map_err(|e| {
            error!("error in cart checkout for {}: {:?}", user_id, e);
            e.into()
        })
}

pub async fn refresh_qr_code(
    UserId(user_id): UserId,
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<RefreshedQrCode>, ErrorResponse> {
    let payment = state.payments.get(payment_id).await?;
    let participation = state.ledger.get(payment.participation_id).await?;
    if participation.user_id != user_id {
        warn!(
            "{} asked for the qr code of payment {} owned by someone else",
            user_id, payment_id
        );
        return Err(Error::NotFound(format!("payment {} not found", payment_id)).into());
    }

    let cancel = state.cancel_token.child_token();
    state
        .settlement
        .refresh_pix_qr(payment_id, &cancel)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error refreshing qr code of payment {}: {:?}", payment_id, e);
            e.into()
        })
}

/// Called by gateway reconciliation once a charge is settled
pub async fn confirm_pix_charge(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
) -> Result<Json<ConfirmedCharge>, ErrorResponse> {
    state
        .settlement
        .confirm_pix_charge(&external_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error confirming pix charge {}: {:?}", external_id, e);
            e.into()
        })
}
