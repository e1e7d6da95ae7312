//! Conversions between exact decimal prices and integer ticks

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{FairbookError, Result};

/// Integer price unit: `price = tick * tick_size`
pub type Tick = i64;

/// Reject non-positive tick sizes before they reach a division
pub fn check_tick_size(tick_size: Decimal) -> Result<Decimal> {
    if tick_size <= Decimal::ZERO {
        return Err(FairbookError::InvalidTickSize(tick_size));
    }
    Ok(tick_size)
}

/// Convert a price to its tick index.
///
/// The price must be an exact multiple of `tick_size`; anything else is an
/// alignment error rather than a silent rounding.
pub fn to_tick(price: Decimal, tick_size: Decimal) -> Result<Tick> {
    let misaligned = || FairbookError::Alignment { price, tick_size };

    let q = price.checked_div(tick_size).ok_or_else(misaligned)?;
    if !q.fract().is_zero() {
        return Err(misaligned());
    }
    q.to_i64().ok_or_else(misaligned)
}

pub fn tick_to_price(tick: Tick, tick_size: Decimal) -> Decimal {
    Decimal::from(tick) * tick_size
}

/// Largest tick-aligned price that is `<= price`
pub fn floor_to_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    (price / tick_size).floor() * tick_size
}

/// Smallest tick-aligned price that is `>= price`
pub fn ceil_to_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    (price / tick_size).ceil() * tick_size
}

/// Tick index of `floor_to_tick(price)`
pub fn floor_tick(price: Decimal, tick_size: Decimal) -> Option<Tick> {
    (price / tick_size).floor().to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_tick_exact() {
        assert_eq!(to_tick(dec!(0.41), dec!(0.01)).unwrap(), 41);
        assert_eq!(to_tick(dec!(0.410), dec!(0.001)).unwrap(), 410);
        assert_eq!(to_tick(dec!(0), dec!(0.01)).unwrap(), 0);
    }

    #[test]
    fn test_to_tick_misaligned() {
        let err = to_tick(dec!(0.415), dec!(0.01)).unwrap_err();
        assert!(matches!(err, FairbookError::Alignment { .. }));
    }

    #[test]
    fn test_zero_tick_size_rejected() {
        assert!(to_tick(dec!(0.5), Decimal::ZERO).is_err());
        assert!(check_tick_size(Decimal::ZERO).is_err());
        assert!(check_tick_size(dec!(-0.01)).is_err());
        assert_eq!(check_tick_size(dec!(0.01)).unwrap(), dec!(0.01));
    }

    #[test]
    fn test_round_trip_for_aligned_prices() {
        for tick_size in [dec!(0.01), dec!(0.001), dec!(0.0001), dec!(0.05)] {
            for tick in [0i64, 1, 7, 49, 50, 99, 999] {
                let price = tick_to_price(tick, tick_size);
                assert_eq!(to_tick(price, tick_size).unwrap(), tick);
            }
        }
    }

    #[test]
    fn test_floor_and_ceil() {
        assert_eq!(floor_to_tick(dec!(0.4955), dec!(0.01)), dec!(0.49));
        assert_eq!(ceil_to_tick(dec!(0.4955), dec!(0.01)), dec!(0.50));
        assert_eq!(floor_to_tick(dec!(0.50), dec!(0.01)), dec!(0.50));
        assert_eq!(ceil_to_tick(dec!(0.50), dec!(0.01)), dec!(0.50));
        assert_eq!(floor_tick(dec!(0.4955), dec!(0.01)), Some(49));
    }
}
