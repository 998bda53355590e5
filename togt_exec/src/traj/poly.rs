//! Polynomial basis used by every trajectory segment.
//!
//! Segments are degree 7 polynomials (8 coefficients) per axis, the lowest degree for which a
//! minimum snap segment can match position through jerk at both ends. Coefficients are stored
//! lowest power first, one column per spatial axis.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{SMatrix, SVector, Vector3};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of coefficients per axis of a segment.
pub const NUM_COEFFS: usize = 8;

/// Number of derivatives (position included) fixed at the start and end of a trajectory.
pub const NUM_BOUNDARY_DERIVS: usize = 4;

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// Segment coefficients, row `k` holds the coefficient of `t^k` for the x, y and z axes.
pub type Coeffs = SMatrix<f64, NUM_COEFFS, 3>;

/// One row of the polynomial basis, i.e. the values multiplying each coefficient.
pub type Basis = SVector<f64, NUM_COEFFS>;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Value of `n! / (n - order)!`, the factor produced by differentiating `t^n` `order` times.
pub fn falling_factorial(n: usize, order: usize) -> f64 {
    ((n + 1 - order)..=n).map(|x| x as f64).product()
}

/// The basis row of the `order`-th derivative at local time `t`.
///
/// Element `k` is `d^order/dt^order (t^k)`, so that `coeffs.transpose() * basis(t, order)` gives
/// the derivative of all three axes.
pub fn basis(t: f64, order: usize) -> Basis {
    let mut b = Basis::zeros();
    let mut t_pow = 1.0;
    for k in order..NUM_COEFFS {
        b[k] = falling_factorial(k, order) * t_pow;
        t_pow *= t;
    }
    b
}

/// Evaluate the `order`-th derivative of a segment at local time `t`.
pub fn eval(coeffs: &Coeffs, t: f64, order: usize) -> Vector3<f64> {
    coeffs.transpose() * basis(t, order)
}
