//! Conversion between raw on-chain token values and human-scale USDT.
//!
//! Explorers report transfer values as integers in the token's smallest unit,
//! either decimal (`"100000000"`) or `0x`-prefixed hex. These are scaled by
//! the network's decimals into an exact [`Decimal`]; no floating point is
//! involved anywhere in amount handling.

use rust_decimal::Decimal;

/// Maximum absolute difference between an observed and an expected amount
/// for the two to be considered equal (one cent).
pub const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Errors raised while converting a raw token value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// The raw value is not an unsigned integer.
    #[error("invalid raw token value: {0:?}")]
    InvalidDigits(String),
    /// The value does not fit a decimal at the requested scale.
    #[error("token value out of range: {value} at {decimals} decimals")]
    OutOfRange {
        /// The raw value.
        value: String,
        /// The scale that was requested.
        decimals: u32,
    },
}

/// Parses a raw integer string, decimal or `0x`-prefixed hex.
///
/// # Errors
///
/// Returns [`AmountError::InvalidDigits`] if the string is empty or not an
/// unsigned integer in the detected radix.
pub fn parse_raw(raw: &str) -> Result<u128, AmountError> {
    let trimmed = raw.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some("") => Ok(0),
        Some(hex) => u128::from_str_radix(hex, 16),
        None => trimmed.parse::<u128>(),
    };
    parsed.map_err(|_| AmountError::InvalidDigits(raw.to_owned()))
}

/// Scales a raw token value into human units.
///
/// # Errors
///
/// Returns [`AmountError`] if `raw` is not an unsigned integer or the result
/// cannot be represented at `decimals` scale.
pub fn from_base_units(raw: &str, decimals: u32) -> Result<Decimal, AmountError> {
    let value = parse_raw(raw)?;
    let out_of_range = || AmountError::OutOfRange {
        value: raw.to_owned(),
        decimals,
    };
    let signed = i128::try_from(value).map_err(|_| out_of_range())?;
    Decimal::try_from_i128_with_scale(signed, decimals)
        .map(|d| d.normalize())
        .map_err(|_| out_of_range())
}

/// Returns `true` if `observed` is within [`AMOUNT_TOLERANCE`] of `expected`,
/// inclusive on both sides.
#[must_use]
pub fn within_tolerance(observed: Decimal, expected: Decimal) -> bool {
    (observed - expected).abs() <= AMOUNT_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_from_base_units_six_decimals() {
        assert_eq!(from_base_units("100000000", 6).unwrap(), dec("100"));
        assert_eq!(from_base_units("100009000", 6).unwrap(), dec("100.009"));
    }

    #[test]
    fn test_from_base_units_eighteen_decimals() {
        let raw = "50000000000000000000";
        assert_eq!(from_base_units(raw, 18).unwrap(), dec("50"));
    }

    #[test]
    fn test_from_base_units_hex() {
        // 0x05f5e100 = 100_000_000
        assert_eq!(from_base_units("0x05f5e100", 6).unwrap(), dec("100"));
        assert_eq!(from_base_units("0x", 6).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_from_base_units_rejects_garbage() {
        assert!(matches!(
            from_base_units("12.5", 6),
            Err(AmountError::InvalidDigits(_))
        ));
        assert!(matches!(
            from_base_units("-1", 6),
            Err(AmountError::InvalidDigits(_))
        ));
        assert!(from_base_units("", 6).is_err());
    }

    #[test]
    fn test_from_base_units_out_of_range() {
        let huge = u128::MAX.to_string();
        assert!(matches!(
            from_base_units(&huge, 6),
            Err(AmountError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_tolerance_is_symmetric_and_inclusive() {
        let expected = dec("100");
        assert!(within_tolerance(dec("100.009"), expected));
        assert!(within_tolerance(dec("99.991"), expected));
        assert!(within_tolerance(dec("100.01"), expected));
        assert!(within_tolerance(dec("99.99"), expected));
        assert!(!within_tolerance(dec("100.02"), expected));
        assert!(!within_tolerance(dec("99.98"), expected));
    }
}
