//! # Math Utilities for no_std
//!
//! Provides math helpers for no_std environments using libm, plus the
//! integer routines the placement paths rely on.

/// Square root for f64
#[inline]
pub fn sqrt(x: f64) -> f64 {
    libm::sqrt(x)
}

/// Absolute value
#[inline]
pub fn abs(x: f64) -> f64 {
    libm::fabs(x)
}

/// Floor
#[inline]
pub fn floor(x: f64) -> f64 {
    libm::floor(x)
}

// ============================================================================
// INTEGER HELPERS
// ============================================================================

/// Integer square root of a u64.
///
/// Seeds from the hardware float square root and corrects the result so the
/// returned value `r` always satisfies `r * r <= x < (r + 1) * (r + 1)`.
#[inline]
pub fn int_sqrt(x: u64) -> u64 {
    if x < 2 {
        return x;
    }

    let mut r = sqrt(x as f64) as u64;
    while r.checked_mul(r).map_or(true, |sq| sq > x) {
        r -= 1;
    }
    while (r + 1).checked_mul(r + 1).map_or(false, |sq| sq <= x) {
        r += 1;
    }
    r
}

/// Scales `value` by the ratio `num / den`, rounding down.
///
/// Returns zero when the denominator is zero so callers never divide by an
/// unpopulated tunable.
#[inline]
pub fn mul_frac(value: u64, num: u64, den: u64) -> u64 {
    if den == 0 {
        return 0;
    }
    ((value as u128 * num as u128) / den as u128) as u64
}

/// Division rounding to the closest integer.
#[inline]
pub fn div_round_closest(dividend: u64, divisor: u64) -> u64 {
    if divisor == 0 {
        return 0;
    }
    (dividend + divisor / 2) / divisor
}
