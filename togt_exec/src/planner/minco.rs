//! Closed-form minimum snap solve for a fixed time allocation
//!
//! For given segment durations, boundary states and interior waypoints the minimum snap
//! trajectory is the solution of one banded linear system `M c = b`, of size `8N` for `N`
//! segments:
//!
//! - 4 rows fixing position, velocity, acceleration and jerk at the start,
//! - 8 rows per interior waypoint: one fixing the position and 7 enforcing continuity of the
//!   derivatives 0 to 6 across it,
//! - 4 rows fixing position through jerk at the end.
//!
//! Because the coefficients are a smooth function of the durations and waypoints, the gradient
//! of any cost `K(c, T)` can be propagated back to them with a single adjoint solve
//! `M^T lambda = dK/dc`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, SMatrix, Vector3};

use crate::race_track::BoundaryState;
use crate::traj::poly::{basis, eval, falling_factorial, NUM_BOUNDARY_DERIVS};
use crate::traj::{Coeffs, PolynomialTrajectory, TrajError, NUM_COEFFS};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Order of the derivative whose square is integrated by the energy.
const SNAP_ORDER: usize = 4;

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// Position, velocity, acceleration and jerk of a boundary, one row each.
pub type BoundaryMatrix = SMatrix<f64, NUM_BOUNDARY_DERIVS, 3>;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The solved trajectory for one time allocation, along with the system it came from.
#[derive(Debug, Clone)]
pub struct MincoSolution {
    times_s: Vec<f64>,
    coeffs: Vec<Coeffs>,
    matrix: DMatrix<f64>,
}

/// Gradient of a cost with respect to the free variables of the solve.
#[derive(Debug, Clone, PartialEq)]
pub struct MincoGradient {
    pub times: Vec<f64>,
    pub inner_points: Vec<Vector3<f64>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MincoError {
    #[error("Expected {expected} interior points for {segments} segments, found {found}")]
    DimensionMismatch {
        segments: usize,
        expected: usize,
        found: usize,
    },

    #[error("Segment {index} has an invalid duration of {value} s")]
    InvalidTime { index: usize, value: f64 },

    #[error("The minimum snap system is singular")]
    Singular,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Arrange a boundary state as rows of derivatives.
pub fn boundary_matrix(state: &BoundaryState) -> BoundaryMatrix {
    let mut m = BoundaryMatrix::zeros();
    for d in 0..NUM_BOUNDARY_DERIVS {
        m.set_row(d, &state.derivative(d).transpose());
    }
    m
}

/// Solve for the minimum snap coefficients of every segment.
pub fn solve(
    times_s: &[f64],
    head: &BoundaryMatrix,
    tail: &BoundaryMatrix,
    inner_points_m: &[Vector3<f64>],
) -> Result<MincoSolution, MincoError> {
    let num_segs = times_s.len();
    if num_segs == 0 || inner_points_m.len() + 1 != num_segs {
        return Err(MincoError::DimensionMismatch {
            segments: num_segs,
            expected: num_segs.saturating_sub(1),
            found: inner_points_m.len(),
        });
    }
    for (index, &value) in times_s.iter().enumerate() {
        if !value.is_finite() || value <= 0.0 {
            return Err(MincoError::InvalidTime { index, value });
        }
    }

    let dim = NUM_COEFFS * num_segs;
    let mut matrix = DMatrix::<f64>::zeros(dim, dim);
    let mut rhs = DMatrix::<f64>::zeros(dim, 3);

    // Head
    for d in 0..NUM_BOUNDARY_DERIVS {
        set_basis_row(&mut matrix, d, 0, 0.0, d, 1.0);
        rhs.row_mut(d).copy_from(&head.row(d));
    }

    // Interior waypoints and continuity
    for i in 0..num_segs - 1 {
        let r = row_of_point(i);
        set_basis_row(&mut matrix, r, i, times_s[i], 0, 1.0);
        rhs.row_mut(r).copy_from(&inner_points_m[i].transpose());

        for d in 0..NUM_COEFFS - 1 {
            set_basis_row(&mut matrix, r + 1 + d, i, times_s[i], d, 1.0);
            set_basis_row(&mut matrix, r + 1 + d, i + 1, 0.0, d, -1.0);
        }
    }

    // Tail
    let last = num_segs - 1;
    for d in 0..NUM_BOUNDARY_DERIVS {
        let r = dim - NUM_BOUNDARY_DERIVS + d;
        set_basis_row(&mut matrix, r, last, times_s[last], d, 1.0);
        rhs.row_mut(r).copy_from(&tail.row(d));
    }

    let sol = matrix
        .clone()
        .lu()
        .solve(&rhs)
        .ok_or(MincoError::Singular)?;

    if sol.iter().any(|v| !v.is_finite()) {
        return Err(MincoError::Singular);
    }

    let coeffs = (0..num_segs)
        .map(|i| sol.fixed_view::<NUM_COEFFS, 3>(NUM_COEFFS * i, 0).into_owned())
        .collect();

    Ok(MincoSolution {
        times_s: times_s.to_vec(),
        coeffs,
        matrix,
    })
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MincoSolution {
    pub fn times_s(&self) -> &[f64] {
        &self.times_s
    }

    pub fn coeffs(&self) -> &[Coeffs] {
        &self.coeffs
    }

    pub fn num_segments(&self) -> usize {
        self.times_s.len()
    }

    /// Build the trajectory described by this solution.
    pub fn trajectory(&self) -> Result<PolynomialTrajectory, TrajError> {
        PolynomialTrajectory::from_parts(&self.times_s, &self.coeffs)
    }

    /// Integral of the squared snap over the whole trajectory.
    pub fn energy(&self) -> f64 {
        self.times_s
            .iter()
            .zip(self.coeffs.iter())
            .map(|(&t, c)| {
                let q = snap_cost_matrix(t);
                (c.transpose() * q * c).trace()
            })
            .sum()
    }

    /// Partial derivatives of the energy with respect to the coefficients and the durations
    /// (holding the coefficients fixed).
    pub fn energy_partials(&self) -> (Vec<Coeffs>, Vec<f64>) {
        self.times_s
            .iter()
            .zip(self.coeffs.iter())
            .map(|(&t, c)| {
                let grad_c = snap_cost_matrix(t) * c * 2.0;
                let grad_t = eval(c, t, SNAP_ORDER).norm_squared();
                (grad_c, grad_t)
            })
            .unzip()
    }

    /// Propagate the partial derivatives of a cost `K(c, T)` to its total derivatives with
    /// respect to the durations and interior waypoints.
    ///
    /// `grad_c` holds `dK/dc` per segment, `partial_t` the explicit `dK/dT` per segment.
    pub fn propagate_gradient(
        &self,
        grad_c: &[Coeffs],
        partial_t: &[f64],
    ) -> Result<MincoGradient, MincoError> {
        let num_segs = self.num_segments();
        if grad_c.len() != num_segs || partial_t.len() != num_segs {
            return Err(MincoError::DimensionMismatch {
                segments: num_segs,
                expected: num_segs,
                found: grad_c.len().min(partial_t.len()),
            });
        }

        let dim = NUM_COEFFS * num_segs;
        let mut g = DMatrix::<f64>::zeros(dim, 3);
        for (i, gc) in grad_c.iter().enumerate() {
            g.fixed_view_mut::<NUM_COEFFS, 3>(NUM_COEFFS * i, 0)
                .copy_from(gc);
        }

        let adjoint = self
            .matrix
            .transpose()
            .lu()
            .solve(&g)
            .ok_or(MincoError::Singular)?;

        let mut times = partial_t.to_vec();

        // Rows at the end of each segment depend on its duration through p^(d+1)(T)
        for i in 0..num_segs - 1 {
            let r = row_of_point(i);
            let c = &self.coeffs[i];
            let t = self.times_s[i];

            let mut dot = adjoint.row(r).transpose().dot(&eval(c, t, 1));
            for d in 0..NUM_COEFFS - 1 {
                dot += adjoint.row(r + 1 + d).transpose().dot(&eval(c, t, d + 1));
            }
            times[i] -= dot;
        }

        let last = num_segs - 1;
        let c = &self.coeffs[last];
        let t = self.times_s[last];
        for d in 0..NUM_BOUNDARY_DERIVS {
            let r = dim - NUM_BOUNDARY_DERIVS + d;
            times[last] -= adjoint.row(r).transpose().dot(&eval(c, t, d + 1));
        }

        let inner_points = (0..num_segs - 1)
            .map(|i| adjoint.row(row_of_point(i)).transpose().into_owned())
            .map(|v| Vector3::new(v[0], v[1], v[2]))
            .collect();

        Ok(MincoGradient {
            times,
            inner_points,
        })
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Row of the system fixing the position of interior waypoint `i`.
fn row_of_point(i: usize) -> usize {
    NUM_BOUNDARY_DERIVS + NUM_COEFFS * i
}

/// Write `scale * basis(t, order)` into the columns of segment `seg` on row `row`.
fn set_basis_row(
    matrix: &mut DMatrix<f64>,
    row: usize,
    seg: usize,
    t: f64,
    order: usize,
    scale: f64,
) {
    let b = basis(t, order) * scale;
    matrix
        .fixed_view_mut::<1, NUM_COEFFS>(row, NUM_COEFFS * seg)
        .copy_from(&b.transpose());
}

/// The matrix `Q` such that the snap energy of a segment of duration `t` is `c^T Q c` per axis.
fn snap_cost_matrix(t: f64) -> SMatrix<f64, NUM_COEFFS, NUM_COEFFS> {
    let mut q = SMatrix::<f64, NUM_COEFFS, NUM_COEFFS>::zeros();
    for j in SNAP_ORDER..NUM_COEFFS {
        for k in SNAP_ORDER..NUM_COEFFS {
            let power = (j + k + 1 - 2 * SNAP_ORDER) as i32;
            q[(j, k)] = falling_factorial(j, SNAP_ORDER) * falling_factorial(k, SNAP_ORDER)
                * t.powi(power)
                / power as f64;
        }
    }
    q
}

#[cfg(test)]
mod test {
    use super::*;

    fn rest(p: Vector3<f64>) -> BoundaryMatrix {
        boundary_matrix(&BoundaryState::at_rest(p))
    }

    #[test]
    fn test_single_segment_closed_form() {
        let length = 10.0;
        let t = 4.0;
        let sol = solve(
            &[t],
            &rest(Vector3::zeros()),
            &rest(Vector3::new(length, 0.0, 0.0)),
            &[],
        )
        .unwrap();

        let c = &sol.coeffs()[0];
        let expected = [0.0, 0.0, 0.0, 0.0, 35.0, -84.0, 70.0, -20.0];
        for k in 0..NUM_COEFFS {
            let scaled = expected[k] * length / t.powi(k as i32);
            assert!((c[(k, 0)] - scaled).abs() < 1e-9 * (1.0 + scaled.abs()));
            assert!(c[(k, 1)].abs() < 1e-12);
            assert!(c[(k, 2)].abs() < 1e-12);
        }
    }

    #[test]
    fn test_two_segments_match_single() {
        // The midpoint of a symmetric rest to rest motion is on the single segment optimum, so
        // splitting there must not change the trajectory
        let end = Vector3::new(6.0, -2.0, 1.0);
        let t = 1.5;

        let single = solve(&[2.0 * t], &rest(Vector3::zeros()), &rest(end), &[])
            .unwrap()
            .trajectory()
            .unwrap();
        let mid = single.position(t).unwrap();
        let split = solve(&[t, t], &rest(Vector3::zeros()), &rest(end), &[mid])
            .unwrap()
            .trajectory()
            .unwrap();

        for i in 0..=20 {
            let time = 2.0 * t * i as f64 / 20.0;
            for order in 0..4 {
                let a = single.derivative(time, order).unwrap();
                let b = split.derivative(time, order).unwrap();
                assert!((a - b).norm() < 1e-7, "order {} at {}", order, time);
            }
        }
        assert!(split.max_continuity_error(6) < 1e-6);
    }

    #[test]
    fn test_boundary_conditions() {
        let head = boundary_matrix(&BoundaryState {
            position_m: Vector3::new(1.0, 2.0, 3.0),
            velocity_ms: Vector3::new(0.5, 0.0, -0.5),
            acceleration_mss: Vector3::new(0.0, 1.0, 0.0),
            jerk_msss: Vector3::new(0.1, 0.2, 0.3),
        });
        let tail = boundary_matrix(&BoundaryState {
            position_m: Vector3::new(5.0, -1.0, 2.0),
            velocity_ms: Vector3::new(2.0, 0.0, 0.0),
            acceleration_mss: Vector3::zeros(),
            jerk_msss: Vector3::zeros(),
        });
        let inner = [Vector3::new(2.0, 1.0, 2.5), Vector3::new(4.0, 0.0, 2.0)];
        let traj = solve(&[1.0, 0.8, 1.2], &head, &tail, &inner)
            .unwrap()
            .trajectory()
            .unwrap();

        for d in 0..NUM_BOUNDARY_DERIVS {
            let start = traj.derivative(0.0, d).unwrap();
            let end = traj.derivative(traj.duration_s(), d).unwrap();
            assert!((start - head.row(d).transpose()).norm() < 1e-9);
            assert!((end - tail.row(d).transpose()).norm() < 1e-9);
        }

        let wpts = traj.waypoints();
        assert!((wpts[1].position_m - inner[0]).norm() < 1e-9);
        assert!((wpts[2].position_m - inner[1]).norm() < 1e-9);
    }

    #[test]
    fn test_energy_partials() {
        let inner = [Vector3::new(2.0, 1.0, 0.0)];
        let sol = solve(
            &[1.0, 1.3],
            &rest(Vector3::zeros()),
            &rest(Vector3::new(4.0, 0.0, 1.0)),
            &inner,
        )
        .unwrap();

        // Energy by quadrature of the squared snap
        let traj = sol.trajectory().unwrap();
        let n = 20000;
        let dt = traj.duration_s() / n as f64;
        let mut quad = 0.0;
        for i in 0..n {
            let t = (i as f64 + 0.5) * dt;
            quad += traj.snap(t).unwrap().norm_squared() * dt;
        }
        assert!((quad - sol.energy()).abs() < 1e-4 * sol.energy());

        let (grad_c, grad_t) = sol.energy_partials();
        let c = sol.coeffs()[1];
        let t = sol.times_s()[1];
        let e_of = |c: &Coeffs, t: f64| (c.transpose() * snap_cost_matrix(t) * c).trace();

        let h = 1e-6;
        let fd_t = (e_of(&c, t + h) - e_of(&c, t - h)) / (2.0 * h);
        assert!((fd_t - grad_t[1]).abs() < 1e-5 * (1.0 + fd_t.abs()));

        let mut c_plus = c;
        c_plus[(6, 2)] += h;
        let mut c_minus = c;
        c_minus[(6, 2)] -= h;
        let fd_c = (e_of(&c_plus, t) - e_of(&c_minus, t)) / (2.0 * h);
        assert!((fd_c - grad_c[1][(6, 2)]).abs() < 1e-5 * (1.0 + fd_c.abs()));
    }

    #[test]
    fn test_propagate_gradient() {
        let head = rest(Vector3::zeros());
        let tail = boundary_matrix(&BoundaryState {
            position_m: Vector3::new(5.0, 1.0, -1.0),
            velocity_ms: Vector3::new(1.0, 0.0, 0.0),
            acceleration_mss: Vector3::zeros(),
            jerk_msss: Vector3::zeros(),
        });
        let times = [0.9, 1.1, 1.4];
        let inner = [Vector3::new(1.5, 1.0, 0.5), Vector3::new(3.0, -0.5, 0.0)];

        // K = energy + sum(T) * x position at the middle of segment 1
        let cost = |times: &[f64], inner: &[Vector3<f64>]| {
            let sol = solve(times, &head, &tail, inner).unwrap();
            let x_mid = eval(&sol.coeffs()[1], 0.5 * times[1], 0).x;
            sol.energy() + times.iter().sum::<f64>() * x_mid
        };

        let sol = solve(&times, &head, &tail, &inner).unwrap();
        let (mut grad_c, mut partial_t) = sol.energy_partials();
        let total: f64 = times.iter().sum();
        let x_mid = eval(&sol.coeffs()[1], 0.5 * times[1], 0).x;
        for t in partial_t.iter_mut() {
            *t += x_mid;
        }
        partial_t[1] += total * eval(&sol.coeffs()[1], 0.5 * times[1], 1).x * 0.5;
        let b = basis(0.5 * times[1], 0);
        for k in 0..NUM_COEFFS {
            grad_c[1][(k, 0)] += total * b[k];
        }

        let grad = sol.propagate_gradient(&grad_c, &partial_t).unwrap();

        let h = 1e-6;
        for i in 0..times.len() {
            let mut plus = times;
            plus[i] += h;
            let mut minus = times;
            minus[i] -= h;
            let fd = (cost(&plus, &inner) - cost(&minus, &inner)) / (2.0 * h);
            assert!(
                (fd - grad.times[i]).abs() < 1e-4 * (1.0 + fd.abs()),
                "time {}: fd {} vs {}",
                i,
                fd,
                grad.times[i]
            );
        }

        for k in 0..inner.len() {
            for axis in 0..3 {
                let mut plus = inner;
                plus[k][axis] += h;
                let mut minus = inner;
                minus[k][axis] -= h;
                let fd = (cost(&times, &plus) - cost(&times, &minus)) / (2.0 * h);
                assert!((fd - grad.inner_points[k][axis]).abs() < 1e-4 * (1.0 + fd.abs()));
            }
        }
    }

    #[test]
    fn test_invalid_inputs() {
        let head = rest(Vector3::zeros());
        assert!(matches!(
            solve(&[1.0, 1.0], &head, &head, &[]),
            Err(MincoError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            solve(&[1.0, -1.0], &head, &head, &[Vector3::zeros()]),
            Err(MincoError::InvalidTime { index: 1, .. })
        ));
    }
}
