mod store;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use storefront_core::{DiscountStatus, DiscountTerms, DiscountType};
pub use store::*;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::infra::db::{
    parse_optional_datetime, parse_optional_uuid, parse_required_datetime, parse_required_decimal,
    parse_required_label, parse_required_uuid,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub id: Uuid,
    /// Stored uppercase, matched case-insensitively
    pub code: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub terms: DiscountTerms,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Discount {
    pub fn status(&self, now: OffsetDateTime) -> DiscountStatus {
        self.terms.effective_status(now)
    }
}

impl FromRow<'_, SqliteRow> for Discount {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Discount {
            id: parse_required_uuid(row, "id")?,
            code: row.try_get("code")?,
            description: row.try_get("description")?,
            terms: DiscountTerms {
                discount_type: parse_required_label(row, "discount_type")?,
                discount_value: parse_required_decimal(row, "discount_value")?,
                contest_id: parse_optional_uuid(row, "contest_id")?,
                is_active: row.try_get("is_active")?,
                starts_at: parse_optional_datetime(row, "starts_at")?,
                expires_at: parse_optional_datetime(row, "expires_at")?,
                max_uses: row.try_get("max_uses")?,
                current_uses: row.try_get("current_uses")?,
            },
            created_at: parse_required_datetime(row, "created_at")?,
            updated_at: parse_required_datetime(row, "updated_at")?,
        })
    }
}

fn default_active() -> bool {
    true
}

/// Admin payload for a new coupon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDiscount {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub contest_id: Option<Uuid>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub starts_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub max_uses: Option<i64>,
}

impl NewDiscount {
    pub fn terms(&self) -> DiscountTerms {
        DiscountTerms {
            discount_type: self.discount_type,
            discount_value: self.discount_value,
            contest_id: self.contest_id,
            is_active: self.is_active,
            starts_at: self.starts_at,
            expires_at: self.expires_at,
            max_uses: self.max_uses,
            current_uses: 0,
        }
    }
}
