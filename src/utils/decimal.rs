//! Decimal arithmetic utilities for lot sizing.

use rust_decimal::Decimal;

/// Whether `value` is an exact multiple of `step` (a zero step accepts anything).
pub fn is_multiple_of(value: Decimal, step: Decimal) -> bool {
    if step == Decimal::ZERO {
        return true;
    }
    (value % step).is_zero()
}

/// Least common multiple of two step sizes.
///
/// A zero step means "any precision" and defers to the other step.
/// Returns `None` if the result does not fit in a `Decimal`.
pub fn decimal_lcm(a: Decimal, b: Decimal) -> Option<Decimal> {
    let (a, b) = (a.abs(), b.abs());
    if a.is_zero() {
        return Some(b);
    }
    if b.is_zero() {
        return Some(a);
    }

    let scale = a.scale().max(b.scale());
    let mut a_scaled = a;
    let mut b_scaled = b;
    a_scaled.rescale(scale);
    b_scaled.rescale(scale);

    let (a_int, b_int) = (a_scaled.mantissa(), b_scaled.mantissa());
    let lcm = (a_int / gcd(a_int, b_int)).checked_mul(b_int)?;

    Decimal::try_from_i128_with_scale(lcm, scale)
        .ok()
        .map(|d| d.normalize())
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}
