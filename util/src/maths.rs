//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Arithmetic mean of the given values.
///
/// Returns `None` if there are no values.
pub fn mean<'a, T, I>(values: I) -> Option<T>
where
    T: Float + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut sum = T::zero();
    let mut count = 0usize;

    for v in values {
        sum = sum + *v;
        count += 1;
    }

    match count {
        0 => None,
        n => Some(sum / T::from(n)?),
    }
}

/// Clamp a value into `[min, max]`.
///
/// Unlike `f64::clamp` this does not panic if `min > max`, `max` wins in that case.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    let mut ret = value;

    if ret < min {
        ret = min
    }
    if ret > max {
        ret = max
    }

    ret
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
///
/// In particular, the return value `r` satisfies `0.0 <= r < rhs.abs()` in
/// most cases. However, due to a floating point round-off error it can
/// result in `r == rhs.abs()`, violating the mathematical definition, if
/// `self` is much smaller than `rhs.abs()` in magnitude and `self < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}
