use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Allowed drift of the percentage sum away from 100
pub fn percentage_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// How a contest's pool is divided, in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeDistribution {
    pub first_place_pct: Decimal,
    pub second_place_pct: Decimal,
    pub lowest_place_pct: Decimal,
    pub admin_fee_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeSplit {
    pub pool: Decimal,
    pub first_place: Decimal,
    pub second_place: Decimal,
    pub lowest_place: Decimal,
    pub admin_fee: Decimal,
}

impl PrizeDistribution {
    pub fn total(&self) -> Decimal {
        self.first_place_pct + self.second_place_pct + self.lowest_place_pct + self.admin_fee_pct
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        for (label, pct) in [
            ("first_place_pct", self.first_place_pct),
            ("second_place_pct", self.second_place_pct),
            ("lowest_place_pct", self.lowest_place_pct),
            ("admin_fee_pct", self.admin_fee_pct),
        ] {
            if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
                return Err(CoreError::Validation(format!(
                    "{} must be within [0, 100], got {}",
                    label, pct
                )));
            }
        }

        let total = self.total();
        if (total - Decimal::ONE_HUNDRED).abs() > percentage_tolerance() {
            return Err(CoreError::Validation(format!(
                "prize percentages must sum to 100, got {}",
                total
            )));
        }
        Ok(())
    }

    /// Prize shares are truncated to cents; whatever rounding leaves over goes
    /// to the admin fee so the shares always add up to `pool`.
    pub fn split(&self, pool: Decimal) -> PrizeSplit {
        let share = |pct: Decimal| {
            (pool * pct / Decimal::ONE_HUNDRED).round_dp_with_strategy(2, RoundingStrategy::ToZero)
        };
        let first_place = share(self.first_place_pct);
        let second_place = share(self.second_place_pct);
        let lowest_place = share(self.lowest_place_pct);
        PrizeSplit {
            pool,
            first_place,
            second_place,
            lowest_place,
            admin_fee: pool - first_place - second_place - lowest_place,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn dist(first: &str, second: &str, lowest: &str, admin: &str) -> PrizeDistribution {
        PrizeDistribution {
            first_place_pct: dec(first),
            second_place_pct: dec(second),
            lowest_place_pct: dec(lowest),
            admin_fee_pct: dec(admin),
        }
    }

    #[test]
    fn test_sum_must_be_one_hundred() {
        assert!(dist("65", "10", "7", "18").validate().is_ok());
        assert!(dist("33.33", "33.33", "33.33", "0.01").validate().is_ok());
        assert!(dist("33.33", "33.33", "33.33", "0").validate().is_ok());
        assert!(dist("33.33", "33.33", "33.32", "0").validate().is_err());
        assert!(dist("60", "10", "10", "10").validate().is_err());
        assert!(dist("60", "30", "10", "10").validate().is_err());
    }

    #[test]
    fn test_each_percentage_within_bounds() {
        assert!(dist("110", "-10", "0", "0").validate().is_err());
    }

    #[test]
    fn test_split_assigns_remainder_to_admin() {
        let split = dist("33.33", "33.33", "33.33", "0.01").split(dec("100.01"));
        assert_eq!(split.first_place, dec("33.33"));
        assert_eq!(split.second_place, dec("33.33"));
        assert_eq!(split.lowest_place, dec("33.33"));
        assert_eq!(split.admin_fee, dec("0.02"));
        assert_eq!(
            split.first_place + split.second_place + split.lowest_place + split.admin_fee,
            split.pool
        );
    }

    #[test]
    fn test_split_of_empty_pool() {
        let split = dist("65", "10", "7", "18").split(Decimal::ZERO);
        assert_eq!(split.first_place, Decimal::ZERO);
        assert_eq!(split.admin_fee, Decimal::ZERO);
    }
}
