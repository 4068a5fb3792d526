use log::{info, warn};
use rust_decimal::Decimal;
use storefront_core::{validate_amount, DiscountQuote, DiscountRejection, DiscountStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{Discount, NewDiscount};
use crate::{
    domain::Error,
    infra::db::{
        format_datetime, format_optional_datetime, is_unique_violation_on, DBConnection,
        DatabaseWriteError,
    },
};

const DISCOUNT_COLUMNS: &str = "id, code, description, discount_type, discount_value, contest_id,
    is_active, starts_at, expires_at, max_uses, current_uses, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct DiscountStore {
    db_connection: DBConnection,
}

impl DiscountStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    pub async fn create_discount(&self, discount: NewDiscount) -> Result<Discount, Error> {
        let code = normalize_code(&discount.code);
        if code.is_empty() {
            return Err(Error::BadRequest(String::from("discount code is required")));
        }
        let terms = discount.terms();
        terms.validate()?;

        let id = Uuid::now_v7();
        let now = format_datetime(OffsetDateTime::now_utc())?;
        let starts_at = format_optional_datetime(terms.starts_at)?;
        let expires_at = format_optional_datetime(terms.expires_at)?;
        let description = discount.description;
        let insert_code = code.clone();

        let created = self
            .db_connection
            .execute_write(move |pool| async move {
                sqlx::query_as::<_, Discount>(&format!(
                    "INSERT INTO discounts (
                        id, code, description, discount_type, discount_value, contest_id,
                        is_active, starts_at, expires_at, max_uses, current_uses, created_at,
                        updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
                    RETURNING {}",
                    DISCOUNT_COLUMNS
                ))
                .bind(id.to_string())
                .bind(insert_code)
                .bind(description)
                .bind(terms.discount_type.as_str())
                .bind(terms.discount_value.to_string())
                .bind(terms.contest_id.map(|id| id.to_string()))
                .bind(terms.is_active)
                .bind(starts_at)
                .bind(expires_at)
                .bind(terms.max_uses)
                .bind(&now)
                .bind(&now)
                .fetch_one(&pool)
                .await
            })
            .await
            .map_err(|e| match e {
                DatabaseWriteError::Sqlx(e) if is_unique_violation_on(&e, "discounts.code") => {
                    Error::InvalidState(format!("discount code {} already exists", code))
                }
                e => e.into(),
            })?;

        info!("created discount {} ({})", created.code, created.id);
        Ok(created)
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Discount, Error> {
        let code = normalize_code(code);
        let discount = sqlx::query_as::<_, Discount>(&format!(
            "SELECT {} FROM discounts WHERE code = ?",
            DISCOUNT_COLUMNS
        ))
        .bind(&code)
        .fetch_optional(self.db_connection.read())
        .await?;

        discount.ok_or_else(|| Error::NotFound(format!("discount {} not found", code)))
    }

    pub async fn get(&self, discount_id: Uuid) -> Result<Discount, Error> {
        let discount = sqlx::query_as::<_, Discount>(&format!(
            "SELECT {} FROM discounts WHERE id = ?",
            DISCOUNT_COLUMNS
        ))
        .bind(discount_id.to_string())
        .fetch_optional(self.db_connection.read())
        .await?;

        discount.ok_or_else(|| Error::NotFound(format!("discount {} not found", discount_id)))
    }

    /// Price after the coupon, without using it up
    pub async fn quote(
        &self,
        code: &str,
        contest_id: Uuid,
        price: Decimal,
        now: OffsetDateTime,
    ) -> Result<(Discount, DiscountQuote), Error> {
        let price = validate_amount(price)?;
        let discount = self.find_by_code(code).await?;
        let quote = discount.terms.quote(contest_id, price, now)?;
        Ok((discount, quote))
    }

    /// Count one use. Guarded in SQL so concurrent checkouts cannot overshoot `max_uses`.
    pub async fn redeem(&self, discount_id: Uuid) -> Result<Discount, Error> {
        let now = format_datetime(OffsetDateTime::now_utc())?;
        let redeemed = self
            .db_connection
            .execute_write(move |pool| async move {
                sqlx::query_as::<_, Discount>(&format!(
                    "UPDATE discounts
                     SET current_uses = current_uses + 1, updated_at = ?
                     WHERE id = ? AND is_active = 1
                       AND (max_uses IS NULL OR current_uses < max_uses)
                     RETURNING {}",
                    DISCOUNT_COLUMNS
                ))
                .bind(now)
                .bind(discount_id.to_string())
                .fetch_optional(&pool)
                .await
            })
            .await?;

        match redeemed {
            Some(discount) => {
                info!(
                    "redeemed discount {} ({}/{:?} uses)",
                    discount.code, discount.terms.current_uses, discount.terms.max_uses
                );
                Ok(discount)
            }
            None => {
                let current = self.get(discount_id).await?;
                let status = match current.status(OffsetDateTime::now_utc()) {
                    DiscountStatus::Active => DiscountStatus::Exhausted,
                    status => status,
                };
                warn!("discount {} could not be redeemed: {}", current.code, status);
                Err(DiscountRejection::NotUsable(status).into())
            }
        }
    }

    /// Give back a use taken by a checkout that failed before charging
    pub async fn release(&self, discount_id: Uuid) -> Result<(), Error> {
        let now = format_datetime(OffsetDateTime::now_utc())?;
        self.db_connection
            .execute_write(move |pool| async move {
                sqlx::query(
                    "UPDATE discounts
                     SET current_uses = current_uses - 1, updated_at = ?
                     WHERE id = ? AND current_uses > 0",
                )
                .bind(now)
                .bind(discount_id.to_string())
                .execute(&pool)
                .await
            })
            .await?;
        Ok(())
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
