//! Validation shared by contest administration and checkout

use itertools::Itertools;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::CoreError;

/// Number picking rules of a contest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberRules {
    pub min_number: i64,
    pub max_number: i64,
    pub numbers_per_participation: i64,
}

impl NumberRules {
    /// How many distinct numbers can be picked, `None` if the bounds are too wide to count
    pub fn pool_size(&self) -> Option<i64> {
        self.max_number
            .checked_sub(self.min_number)?
            .checked_add(1)
    }
}

/// Check the rules themselves are satisfiable
pub fn validate_number_rules(rules: &NumberRules) -> Result<(), CoreError> {
    if rules.min_number > rules.max_number {
        return Err(CoreError::Validation(format!(
            "min_number {} is greater than max_number {}",
            rules.min_number, rules.max_number
        )));
    }
    if rules.numbers_per_participation < 1 {
        return Err(CoreError::Validation(
            "numbers_per_participation must be at least 1".into(),
        ));
    }
    let pool_size = rules.pool_size().ok_or_else(|| {
        CoreError::Validation(format!(
            "number range [{}, {}] is too wide",
            rules.min_number, rules.max_number
        ))
    })?;
    if rules.numbers_per_participation > pool_size {
        return Err(CoreError::Validation(format!(
            "numbers_per_participation {} exceeds the {} numbers available",
            rules.numbers_per_participation, pool_size
        )));
    }
    Ok(())
}

/// Check a ticket's picks: exact cardinality, inside bounds, no repeats
pub fn validate_numbers(numbers: &[i64], rules: &NumberRules) -> Result<(), CoreError> {
    if numbers.len() as i64 != rules.numbers_per_participation {
        return Err(CoreError::InvalidNumbers(format!(
            "expected {} numbers, got {}",
            rules.numbers_per_participation,
            numbers.len()
        )));
    }

    if let Some(out_of_range) = numbers
        .iter()
        .find(|n| **n < rules.min_number || **n > rules.max_number)
    {
        return Err(CoreError::InvalidNumbers(format!(
            "{} is outside [{}, {}]",
            out_of_range, rules.min_number, rules.max_number
        )));
    }

    let duplicates: Vec<&i64> = numbers.iter().duplicates().collect();
    if !duplicates.is_empty() {
        return Err(CoreError::InvalidNumbers(format!(
            "duplicate numbers: {}",
            duplicates.iter().join(", ")
        )));
    }

    Ok(())
}

/// Largest single price or payment accepted
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// A price or payment: strictly positive, at most [`MAX_AMOUNT`], at most two
/// decimal places. Returned rescaled to cents.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, CoreError> {
    if amount <= Decimal::ZERO {
        return Err(CoreError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if amount > MAX_AMOUNT {
        return Err(CoreError::InvalidAmount(format!(
            "amount {} is above the {} limit",
            amount, MAX_AMOUNT
        )));
    }
    let mut cents = amount.normalize();
    if cents.scale() > 2 {
        return Err(CoreError::InvalidAmount(format!(
            "amount {} has more than two decimal places",
            amount
        )));
    }
    cents.rescale(2);
    Ok(cents)
}

/// Sum of amounts, failing instead of overflowing
pub fn sum_amounts<I>(amounts: I) -> Result<Decimal, CoreError>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts.into_iter().try_fold(Decimal::ZERO, |total, amount| {
        total.checked_add(amount).ok_or_else(|| {
            CoreError::InvalidAmount(format!("total overflows when adding {}", amount))
        })
    })
}

pub fn validate_window(start: OffsetDateTime, end: OffsetDateTime) -> Result<(), CoreError> {
    if start >= end {
        return Err(CoreError::Validation(format!(
            "start_date {} must be before end_date {}",
            start, end
        )));
    }
    Ok(())
}
