//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Inverse of the golden ratio, `(sqrt(5) - 1) / 2`.
const INV_GOLDEN_RATIO: f64 = 0.618_033_988_749_894_9;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Find the maximum of a unimodal function on `[lower, upper]` by golden section search.
///
/// Returns `(x, f(x))` for the best point found. The search stops once the bracket is narrower
/// than `tol` or after `max_iters` reductions. If the function is not unimodal on the interval a
/// local maximum is returned, which is never worse than the better of the two end points.
pub fn golden_section_max<T, F>(f: F, lower: T, upper: T, tol: T, max_iters: usize) -> (T, T)
where
    T: Float,
    F: Fn(T) -> T,
{
    let ratio = T::from(INV_GOLDEN_RATIO).unwrap_or_else(T::one);

    let (mut a, mut b) = if lower <= upper {
        (lower, upper)
    } else {
        (upper, lower)
    };

    let mut x_1 = b - ratio * (b - a);
    let mut x_2 = a + ratio * (b - a);
    let mut f_1 = f(x_1);
    let mut f_2 = f(x_2);

    for _ in 0..max_iters {
        if (b - a).abs() <= tol {
            break;
        }

        if f_1 < f_2 {
            a = x_1;
            x_1 = x_2;
            f_1 = f_2;
            x_2 = a + ratio * (b - a);
            f_2 = f(x_2);
        } else {
            b = x_2;
            x_2 = x_1;
            f_2 = f_1;
            x_1 = b - ratio * (b - a);
            f_1 = f(x_1);
        }
    }

    // Compare the interior best with the bracket ends so a monotonic function still reports its
    // true maximum on the interval
    let mut best = if f_1 >= f_2 { (x_1, f_1) } else { (x_2, f_2) };
    for &end in [lower, upper].iter() {
        let f_end = f(end);
        if f_end > best.1 {
            best = (end, f_end);
        }
    }

    best
}

/// Smooth one-sided cubic penalty, `max(x, 0)^3`, and its derivative.
pub fn cubic_penalty<T>(x: T) -> (T, T)
where
    T: Float,
{
    if x > T::zero() {
        let three = T::from(3.0).unwrap_or_else(T::one);
        (x * x * x, three * x * x)
    } else {
        (T::zero(), T::zero())
    }
}
