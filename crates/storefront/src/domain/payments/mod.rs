mod recorder;

pub use recorder::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use storefront_core::{PaymentMethod, PaymentStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use super::pix::PixQrCode;
use crate::infra::db::{
    parse_optional_datetime, parse_optional_json, parse_required_datetime, parse_required_decimal,
    parse_required_label, parse_required_uuid,
};

/// Gateway payload or desk notes kept alongside a payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExternalData {
    Pix {
        /// Missing until the gateway finishes generating it
        qr_code: Option<PixQrCode>,
        /// Every ticket paid by the same charge
        ticket_codes: Vec<String>,
    },
    Cash {
        notes: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub participation_id: Uuid,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,
    /// Gateway charge id; a cart charge shares one across its payments
    pub external_id: Option<String>,
    pub external_data: Option<ExternalData>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Payment {
    pub fn qr_code(&self) -> Option<&PixQrCode> {
        match &self.external_data {
            Some(ExternalData::Pix { qr_code, .. }) => qr_code.as_ref(),
            _ => None,
        }
    }
}

impl FromRow<'_, SqliteRow> for Payment {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Payment {
            id: parse_required_uuid(row, "id")?,
            participation_id: parse_required_uuid(row, "participation_id")?,
            amount: parse_required_decimal(row, "amount")?,
            status: parse_required_label(row, "status")?,
            payment_method: parse_required_label(row, "payment_method")?,
            external_id: row.try_get("external_id")?,
            external_data: parse_optional_json(row, "external_data")?,
            paid_at: parse_optional_datetime(row, "paid_at")?,
            created_at: parse_required_datetime(row, "created_at")?,
            updated_at: parse_required_datetime(row, "updated_at")?,
        })
    }
}
