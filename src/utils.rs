//! Small numeric helpers.

/// Bound `value` to `[min, max]`.
///
/// Unlike `f64::clamp` this never panics on inverted bounds, and NaN passes
/// through untouched.
#[inline]
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// `Some(v)` only for finite values
#[inline]
pub fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}
