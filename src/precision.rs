//! Conversion boundary between f64 arithmetic and the arbitrary-precision accumulator.
//!
//! Distances and softmax run in f64. Anything multiplied across merge steps,
//! cells or mutations is carried as a decimal with an unbounded exponent, so
//! probabilities far below `f64::MIN_POSITIVE` stay representable.

pub use bigdecimal::BigDecimal as Decimal;
use num_traits::{FromPrimitive, One, ToPrimitive, Zero};

use crate::error::{PfError, Result};

/// Significant digits kept after every multiplication or division
pub const DECIMAL_PRECISION: u64 = 50;

/// Running f64 products below this are folded into the decimal accumulator
const UNDERFLOW_GUARD: f64 = 1e-150;

/// Exact conversion of a finite f64
pub fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value).ok_or(PfError::NonFiniteValue { value })
}

/// Nearest f64, for reporting only. Values below the f64 range come back as 0.
pub fn to_f64(value: &Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

pub fn mul_rounded(a: &Decimal, b: &Decimal) -> Decimal {
    (a * b).with_prec(DECIMAL_PRECISION)
}

pub fn add_rounded(a: &Decimal, b: &Decimal) -> Decimal {
    (a + b).with_prec(DECIMAL_PRECISION)
}

/// `num / den`; the caller guarantees `den` is non-zero
pub fn ratio(num: &Decimal, den: &Decimal) -> Decimal {
    (num / den).with_prec(DECIMAL_PRECISION)
}

/// Product of probabilities that may underflow f64 in aggregate.
///
/// Factors are multiplied in f64 while the running product stays well inside
/// the normal range; before it can underflow it is moved into the decimal
/// accumulator and the f64 product restarts at 1.
pub fn product<I>(factors: I) -> Result<Decimal>
where
    I: IntoIterator<Item = f64>,
{
    let mut acc = Decimal::one();
    let mut running = 1.0_f64;
    for factor in factors {
        if factor == 0.0 {
            return Ok(Decimal::zero());
        }
        if running < UNDERFLOW_GUARD {
            acc = mul_rounded(&acc, &to_decimal(running)?);
            running = 1.0;
        }
        if factor < UNDERFLOW_GUARD {
            acc = mul_rounded(&acc, &to_decimal(factor)?);
        } else {
            running *= factor;
        }
    }
    Ok(mul_rounded(&acc, &to_decimal(running)?))
}
