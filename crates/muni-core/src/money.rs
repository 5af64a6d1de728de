//! # Money Arithmetic
//!
//! Helpers over [`Decimal`] for currency amounts: half-up rounding to two
//! places, percentage computation, and the range/precision checks applied to
//! every amount accepted from a request.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::ValidationError;

/// Smallest positive currency amount.
pub fn cent() -> Decimal {
    Decimal::new(1, 2)
}

/// Round to two decimal places, ties away from zero.
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `base × percentage / 100`, rounded to currency precision.
pub fn percentage_of(base: Decimal, percentage: Decimal) -> Decimal {
    round_currency(base * percentage / Decimal::ONE_HUNDRED)
}

/// Require `value > 0`.
pub fn require_positive(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value <= Decimal::ZERO {
        return Err(ValidationError::OutOfRange {
            field,
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

/// Require `value >= 0`.
pub fn require_non_negative(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO {
        return Err(ValidationError::OutOfRange {
            field,
            reason: "must not be negative".to_string(),
        });
    }
    Ok(())
}

/// Require `value >= minimum`.
pub fn require_at_least(
    field: &'static str,
    value: Decimal,
    minimum: Decimal,
) -> Result<(), ValidationError> {
    if value < minimum {
        return Err(ValidationError::OutOfRange {
            field,
            reason: format!("must be at least {minimum}"),
        });
    }
    Ok(())
}

/// Require `lower <= value <= upper`.
pub fn require_between(
    field: &'static str,
    value: Decimal,
    lower: Decimal,
    upper: Decimal,
) -> Result<(), ValidationError> {
    if value < lower || value > upper {
        return Err(ValidationError::OutOfRange {
            field,
            reason: format!("must be between {lower} and {upper}"),
        });
    }
    Ok(())
}

/// Reject amounts with more integer or fraction digits than the column allows.
pub fn check_precision(
    field: &'static str,
    value: Decimal,
    integer_digits: usize,
    fraction_digits: u32,
) -> Result<(), ValidationError> {
    if value.normalize().scale() > fraction_digits {
        return Err(ValidationError::InvalidFormat {
            field,
            reason: format!("at most {fraction_digits} decimal places are allowed"),
        });
    }
    if value.abs().trunc().to_string().len() > integer_digits {
        return Err(ValidationError::InvalidFormat {
            field,
            reason: format!("at most {integer_digits} integer digits are allowed"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(round_currency(d("10.005")), d("10.01"));
        assert_eq!(round_currency(d("10.004")), d("10.00"));
        assert_eq!(round_currency(d("-10.005")), d("-10.01"));
    }

    #[test]
    fn percentage_of_rounds_to_cents() {
        assert_eq!(percentage_of(d("1000.00"), d("12")), d("120.00"));
        assert_eq!(percentage_of(d("333.33"), d("7.5")), d("25.00"));
    }

    #[test]
    fn positive_rejects_zero() {
        assert!(require_positive("amount", Decimal::ZERO).is_err());
        assert!(require_positive("amount", cent()).is_ok());
    }

    #[test]
    fn at_least_one_cent() {
        assert!(require_at_least("amount", d("0.009"), cent()).is_err());
        assert!(require_at_least("amount", d("0.01"), cent()).is_ok());
    }

    #[test]
    fn between_is_inclusive() {
        let hundred = Decimal::ONE_HUNDRED;
        assert!(require_between("rate", hundred, Decimal::ZERO, hundred).is_ok());
        assert!(require_between("rate", d("100.01"), Decimal::ZERO, hundred).is_err());
    }

    #[test]
    fn precision_limits() {
        assert!(check_precision("amount", d("1234567890123.45"), 13, 2).is_ok());
        assert!(check_precision("amount", d("12345678901234.00"), 13, 2).is_err());
        assert!(check_precision("amount", d("1.234"), 13, 2).is_err());
        // Trailing zeros do not count against the fraction limit.
        assert!(check_precision("amount", d("1.2300"), 13, 2).is_ok());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Amounts below a trillion with six fraction digits.
    fn amount() -> impl Strategy<Value = Decimal> {
        (-999_999_999_999_999_999i64..=999_999_999_999_999_999i64)
            .prop_map(|mantissa| Decimal::new(mantissa, 6))
    }

    proptest! {
        /// Rounded amounts carry at most two decimals and move by at most half a cent.
        #[test]
        fn round_currency_stays_within_half_a_cent(value in amount()) {
            let rounded = round_currency(value);
            prop_assert!(rounded.normalize().scale() <= 2);
            prop_assert!((rounded - value).abs() <= Decimal::new(5, 3));
        }

        /// Rounding twice changes nothing.
        #[test]
        fn round_currency_is_idempotent(value in amount()) {
            let once = round_currency(value);
            prop_assert_eq!(round_currency(once), once);
        }

        /// Anything rounded to currency passes the 13.2 column check.
        #[test]
        fn rounded_amounts_fit_the_money_column(value in amount()) {
            prop_assert!(check_precision("amount", round_currency(value), 13, 2).is_ok());
        }

        /// A hundred percent of a base is the base at currency precision.
        #[test]
        fn full_percentage_is_the_rounded_base(value in amount()) {
            prop_assert_eq!(percentage_of(value, Decimal::ONE_HUNDRED), round_currency(value));
        }
    }
}
