//! Fixed-point wide arithmetic for the PTP control path (§4.L, §9): never
//! floating point. 128-bit uses the native `i128`; 256-bit accumulation
//! (needed by the linear-regression filter's sum-of-squares) is hand-rolled
//! as two `i128` halves.

/// A signed 256-bit integer as `high * 2^128 + low`, `low` interpreted as
/// unsigned magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wide256 {
    pub high: i128,
    pub low: u128,
}

impl Wide256 {
    pub const ZERO: Wide256 = Wide256 { high: 0, low: 0 };

    /// Widen a signed 128-bit value.
    pub fn from_i128(v: i128) -> Self {
        if v < 0 {
            Wide256 { high: -1, low: v as u128 }
        } else {
            Wide256 { high: 0, low: v as u128 }
        }
    }

    /// Add another 256-bit value, wrapping on overflow (the accumulators
    /// this backs are bounded by filter window size, never by adversarial
    /// input).
    pub fn add(self, other: Wide256) -> Self {
        let (low, carry) = self.low.overflowing_add(other.low);
        let high = self.high.wrapping_add(other.high).wrapping_add(carry as i128);
        Wide256 { high, low }
    }

    pub fn sub(self, other: Wide256) -> Self {
        self.add(other.neg())
    }

    pub fn neg(self) -> Self {
        let low = (!self.low).wrapping_add(1);
        let carry = self.low == 0;
        let high = (!self.high).wrapping_add(if carry { 1 } else { 0 });
        Wide256 { high, low }
    }

    pub fn is_negative(&self) -> bool {
        self.high < 0
    }

    /// Narrow back to `i128` if the value fits. `high` is always a sign
    /// extension of `low`'s top bit for any value built through `from_i128`
    /// plus `add`/`sub`, so reinterpreting `low`'s bit pattern as signed is
    /// correct whenever `high` is exactly 0 or -1; anything else means the
    /// accumulation overflowed 128 bits.
    pub fn to_i128_if_fits(self) -> Option<i128> {
        if self.high == 0 || self.high == -1 {
            Some(self.low as i128)
        } else {
            None
        }
    }

    /// Divide by a small positive `i128` divisor, returning a best-effort
    /// 128-bit quotient (saturating on overflow). Sufficient for the
    /// regression filter's mean/slope computation, where `divisor` is the
    /// filter window size, not adversarial input.
    pub fn div_i128(self, divisor: i128) -> i128 {
        debug_assert!(divisor > 0);
        let negative = self.is_negative();
        let magnitude = if negative { self.neg() } else { self };
        if magnitude.high != 0 {
            return if negative { i128::MIN } else { i128::MAX };
        }
        let q = (magnitude.low / divisor as u128).min(i128::MAX as u128);
        if negative {
            -(q as i128)
        } else {
            q as i128
        }
    }
}

/// Square a 64-bit-range value into a 128-bit product without overflow,
/// used to build the sum-of-squares term of the regression filter.
pub fn square_to_i128(v: i64) -> i128 {
    (v as i128) * (v as i128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_carries_between_halves() {
        let a = Wide256 { high: 0, low: u128::MAX };
        let b = Wide256::from_i128(1);
        let sum = a.add(b);
        assert_eq!(sum, Wide256 { high: 1, low: 0 });
    }

    #[test]
    fn negation_round_trips() {
        let a = Wide256::from_i128(12345);
        assert_eq!(a.neg().neg(), a);
        assert!(a.neg().is_negative());
    }

    #[test]
    fn div_i128_matches_simple_case() {
        let a = Wide256::from_i128(100);
        assert_eq!(a.div_i128(4), 25);
        let neg = Wide256::from_i128(-100);
        assert_eq!(neg.div_i128(4), -25);
    }

    #[test]
    fn square_to_i128_handles_large_magnitude() {
        assert_eq!(square_to_i128(1_000_000_000), 1_000_000_000_000_000_000);
    }
}
