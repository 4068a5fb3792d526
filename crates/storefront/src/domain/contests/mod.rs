mod store;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use storefront_core::{
    validate_amount, validate_number_rules, validate_window, AdmissionWindow, ContestStatus,
    NumberRules, PrizeDistribution,
};
pub use store::*;
use time::OffsetDateTime;
use uuid::Uuid;

use super::Error;
use crate::infra::db::{
    parse_optional_decimal, parse_required_datetime, parse_required_decimal, parse_required_json,
    parse_required_label, parse_required_uuid,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contest {
    pub id: Uuid,
    pub contest_code: String,
    pub name: String,
    pub description: Option<String>,
    pub min_number: i64,
    pub max_number: i64,
    pub numbers_per_participation: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: OffsetDateTime,
    pub status: ContestStatus,
    /// Ticket price, `None` when the contest has no fixed price
    pub participation_value: Option<Decimal>,
    #[serde(flatten)]
    pub prize_distribution: PrizeDistribution,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Contest {
    pub fn number_rules(&self) -> NumberRules {
        NumberRules {
            min_number: self.min_number,
            max_number: self.max_number,
            numbers_per_participation: self.numbers_per_participation,
        }
    }

    pub fn admission_window(&self) -> AdmissionWindow {
        AdmissionWindow {
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

impl FromRow<'_, SqliteRow> for Contest {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Contest {
            id: parse_required_uuid(row, "id")?,
            contest_code: row.try_get("contest_code")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            min_number: row.try_get("min_number")?,
            max_number: row.try_get("max_number")?,
            numbers_per_participation: row.try_get("numbers_per_participation")?,
            start_date: parse_required_datetime(row, "start_date")?,
            end_date: parse_required_datetime(row, "end_date")?,
            status: parse_required_label(row, "status")?,
            participation_value: parse_optional_decimal(row, "participation_value")?,
            prize_distribution: PrizeDistribution {
                first_place_pct: parse_required_decimal(row, "first_place_pct")?,
                second_place_pct: parse_required_decimal(row, "second_place_pct")?,
                lowest_place_pct: parse_required_decimal(row, "lowest_place_pct")?,
                admin_fee_pct: parse_required_decimal(row, "admin_fee_pct")?,
            },
            created_at: parse_required_datetime(row, "created_at")?,
            updated_at: parse_required_datetime(row, "updated_at")?,
        })
    }
}

/// Admin payload for a new contest; it always starts as `draft`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContest {
    pub name: String,
    pub description: Option<String>,
    pub min_number: i64,
    pub max_number: i64,
    pub numbers_per_participation: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: OffsetDateTime,
    pub participation_value: Option<Decimal>,
    #[serde(flatten)]
    pub prize_distribution: PrizeDistribution,
}

impl NewContest {
    /// Checks every persisted invariant and returns the price rescaled to cents
    pub fn validate(&self) -> Result<Option<Decimal>, Error> {
        if self.name.trim().is_empty() {
            return Err(Error::BadRequest(String::from("contest name is required")));
        }
        validate_number_rules(&NumberRules {
            min_number: self.min_number,
            max_number: self.max_number,
            numbers_per_participation: self.numbers_per_participation,
        })?;
        validate_window(self.start_date, self.end_date)?;
        self.prize_distribution.validate()?;
        Ok(self.participation_value.map(validate_amount).transpose()?)
    }
}

/// Partial admin update, absent fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContestUpdate {
    pub status: Option<ContestStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub participation_value: Option<Decimal>,
    pub prize_distribution: Option<PrizeDistribution>,
}

impl ContestUpdate {
    /// Merge onto `current`, re-running the same checks as creation
    pub fn apply_to(&self, current: &Contest) -> Result<Contest, Error> {
        let mut next = current.clone();

        if let Some(status) = self.status {
            if !current.status.can_transition_to(status) {
                return Err(Error::InvalidState(format!(
                    "contest {} cannot move from {} to {}",
                    current.id, current.status, status
                )));
            }
            next.status = status;
        }
        if let Some(start_date) = self.start_date {
            next.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            next.end_date = end_date;
        }
        if let Some(value) = self.participation_value {
            next.participation_value = Some(validate_amount(value)?);
        }
        if let Some(distribution) = self.prize_distribution {
            next.prize_distribution = distribution;
        }

        validate_window(next.start_date, next.end_date)?;
        next.prize_distribution.validate()?;
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub id: Uuid,
    pub contest_id: Uuid,
    pub drawn_numbers: Vec<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub draw_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl FromRow<'_, SqliteRow> for Draw {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Draw {
            id: parse_required_uuid(row, "id")?,
            contest_id: parse_required_uuid(row, "contest_id")?,
            drawn_numbers: parse_required_json(row, "drawn_numbers")?,
            draw_date: parse_required_datetime(row, "draw_date")?,
            created_at: parse_required_datetime(row, "created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDraw {
    pub drawn_numbers: Vec<i64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub draw_date: Option<OffsetDateTime>,
}
