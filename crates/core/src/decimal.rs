//! Fixed-point cost arithmetic.
//!
//! Every cost the ledger stores or compares goes through [`round4`]: four
//! fractional digits, ties rounded away from zero (round-half-up for the
//! non-negative amounts the ledger deals in).

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits kept for costs and journal amounts.
pub const COST_SCALE: u32 = 4;

/// Round to [`COST_SCALE`] digits, half-up.
pub fn round4(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_up_at_fifth_digit() {
        assert_eq!(round4(dec!(1.00005)), dec!(1.0001));
        assert_eq!(round4(dec!(1.00004)), dec!(1.0000));
        assert_eq!(round4(dec!(2.99995)), dec!(3.0000));
    }

    #[test]
    fn leaves_short_values_alone() {
        assert_eq!(round4(dec!(10.5)), dec!(10.5));
        assert_eq!(round4(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn repeating_division_is_bounded() {
        assert_eq!(round4(dec!(1050) / dec!(3)), dec!(350.0000));
        assert_eq!(round4(dec!(100) / dec!(3)), dec!(33.3333));
        assert_eq!(round4(dec!(200) / dec!(3)), dec!(66.6667));
    }

    proptest! {
        #[test]
        fn rounding_is_idempotent(units in 0i64..10_000_000_000i64, scale in 0u32..10) {
            let value = Decimal::new(units, scale);
            let once = round4(value);
            prop_assert_eq!(round4(once), once);
            prop_assert!(once.scale() <= COST_SCALE);
        }
    }
}
