use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::ErrorResponse,
    Json,
};
use log::error;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storefront_core::DiscountQuote;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    domain::{Discount, NewDiscount},
    startup::AppState,
};

#[derive(Debug, Deserialize)]
pub struct QuoteParams {
    pub contest_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub code: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub quote: DiscountQuote,
}

/// Price preview; does not use up the coupon
pub async fn quote_discount(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<QuoteParams>,
) -> Result<Json<QuoteResponse>, ErrorResponse> {
    let (discount, quote) = state
        .discounts
        .quote(
            &code,
            params.contest_id,
            params.amount,
            OffsetDateTime::now_utc(),
        )
        .await
        .map_err(|e| {
            error!("error quoting discount {}: {:?}", code, e);
            e
        })?;

    Ok(Json(QuoteResponse {
        code: discount.code,
        description: discount.description,
        quote,
    }))
}

pub async fn create_discount(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewDiscount>,
) -> Result<(StatusCode, Json<Discount>), ErrorResponse> {
    state
        .discounts
        .create_discount(body)
        .await
        .map(|discount| (StatusCode::CREATED, Json(discount)))
        .map_err(|e| {
            error!("error creating discount: {:?}", e);
            e.into()
        })
}
