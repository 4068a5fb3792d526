mod ledger;

pub use ledger::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use storefront_core::ParticipationStatus;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::infra::db::{
    parse_required_datetime, parse_required_decimal, parse_required_json, parse_required_label,
    parse_required_uuid,
};

/// One ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub id: Uuid,
    pub contest_id: Uuid,
    /// Subject issued by the identity provider
    pub user_id: String,
    pub numbers: Vec<i64>,
    pub ticket_code: String,
    /// Price captured at checkout
    pub amount: Decimal,
    pub status: ParticipationStatus,
    /// Maintained by scoring, read-only here
    pub current_score: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl FromRow<'_, SqliteRow> for Participation {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Participation {
            id: parse_required_uuid(row, "id")?,
            contest_id: parse_required_uuid(row, "contest_id")?,
            user_id: row.try_get("user_id")?,
            numbers: parse_required_json(row, "numbers")?,
            ticket_code: row.try_get("ticket_code")?,
            amount: parse_required_decimal(row, "amount")?,
            status: parse_required_label(row, "status")?,
            current_score: row.try_get("current_score")?,
            created_at: parse_required_datetime(row, "created_at")?,
            updated_at: parse_required_datetime(row, "updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddParticipation {
    pub contest_id: Uuid,
    pub numbers: Vec<i64>,
    pub amount: Decimal,
}
