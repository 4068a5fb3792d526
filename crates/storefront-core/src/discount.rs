//! Coupon rules. A coupon's status is never stored; it is derived from the
//! clock, its window and its usage count every time it is looked at.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `discount_value` is a percentage in `[0, 100]`
    Percentage,
    /// `discount_value` is subtracted from the price
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscountType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(Self::Percentage),
            "fixed" => Ok(Self::Fixed),
            val => Err(CoreError::Validation(format!("unknown discount type: {}", val))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountStatus {
    Inactive,
    Scheduled,
    Expired,
    Exhausted,
    Active,
}

impl fmt::Display for DiscountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Inactive => "inactive",
            Self::Scheduled => "scheduled",
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
            Self::Active => "active",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiscountRejection {
    #[error("discount is {0}")]
    NotUsable(DiscountStatus),
    #[error("discount does not apply to this contest")]
    WrongContest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountQuote {
    pub original_price: Decimal,
    pub discount_amount: Decimal,
    pub final_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountTerms {
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    /// `None` applies to every contest
    pub contest_id: Option<Uuid>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub starts_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    /// `None` is unlimited
    pub max_uses: Option<i64>,
    pub current_uses: i64,
}

impl DiscountTerms {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.discount_value < Decimal::ZERO {
            return Err(CoreError::Validation(
                "discount_value cannot be negative".into(),
            ));
        }
        if self.discount_type == DiscountType::Percentage
            && self.discount_value > Decimal::ONE_HUNDRED
        {
            return Err(CoreError::Validation(format!(
                "percentage discount must be within [0, 100], got {}",
                self.discount_value
            )));
        }
        if let (Some(starts_at), Some(expires_at)) = (self.starts_at, self.expires_at) {
            if starts_at >= expires_at {
                return Err(CoreError::Validation(
                    "discount starts_at must be before expires_at".into(),
                ));
            }
        }
        if matches!(self.max_uses, Some(max) if max < 1) {
            return Err(CoreError::Validation("max_uses must be at least 1".into()));
        }
        if self.current_uses < 0 {
            return Err(CoreError::Validation(
                "current_uses cannot be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn effective_status(&self, now: OffsetDateTime) -> DiscountStatus {
        if !self.is_active {
            return DiscountStatus::Inactive;
        }
        if matches!(self.starts_at, Some(starts_at) if now < starts_at) {
            return DiscountStatus::Scheduled;
        }
        if matches!(self.expires_at, Some(expires_at) if now > expires_at) {
            return DiscountStatus::Expired;
        }
        if matches!(self.max_uses, Some(max) if self.current_uses >= max) {
            return DiscountStatus::Exhausted;
        }
        DiscountStatus::Active
    }

    pub fn applies_to(&self, contest_id: Uuid) -> bool {
        self.contest_id.map_or(true, |scope| scope == contest_id)
    }

    /// Price after the discount, rounded to cents and never below zero
    pub fn apply(&self, price: Decimal) -> DiscountQuote {
        let raw = match self.discount_type {
            DiscountType::Percentage => price * self.discount_value / Decimal::ONE_HUNDRED,
            DiscountType::Fixed => self.discount_value,
        };
        let discount_amount = raw
            .min(price)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        DiscountQuote {
            original_price: price,
            discount_amount,
            final_price: price - discount_amount,
        }
    }

    pub fn quote(
        &self,
        contest_id: Uuid,
        price: Decimal,
        now: OffsetDateTime,
    ) -> Result<DiscountQuote, DiscountRejection> {
        let status = self.effective_status(now);
        if status != DiscountStatus::Active {
            return Err(DiscountRejection::NotUsable(status));
        }
        if !self.applies_to(contest_id) {
            return Err(DiscountRejection::WrongContest);
        }
        Ok(self.apply(price))
    }
}
