//! Smooth penalty on the dynamic limits
//!
//! Every constraint is written in normalised form `g = |x|^2 / L^2 - 1`, where `L` is the limit
//! shrunk by the constraint margin, and penalised with `max(g, 0)^3`. The penalty is integrated
//! over each segment with the trapezoidal rule on a regular grid.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;

use super::minco::MincoSolution;
use crate::race_params::{DynamicLimits, PlannerParams};
use crate::traj::poly::{basis, eval};
use crate::traj::Coeffs;
use util::maths::cubic_penalty;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Highest derivative needed, the time derivative of a snap constraint uses crackle.
const MAX_ORDER: usize = 5;

/// Below this squared thrust the body rate is undefined and not constrained.
const MIN_THRUST_SQ: f64 = 1e-6;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The set of constraints applied along the trajectory.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintSet {
    /// Squared (margin reduced) limits
    vel_sq: f64,
    acc_sq: f64,
    jerk_sq: f64,
    snap_sq: Option<f64>,
    thrust_sq: Option<f64>,
    body_rate_sq: Option<f64>,

    gravity_mss: f64,
    weight: f64,
    samples_per_segment: usize,
}

/// Value and gradient of one normalised constraint at one sample.
///
/// `grad[k]` is the derivative of `g` with respect to the `k`-th derivative of position.
struct ConstraintValue {
    g: f64,
    grad: [Vector3<f64>; MAX_ORDER],
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ConstraintSet {
    pub fn new(limits: &DynamicLimits, params: &PlannerParams) -> Self {
        let scale = 1.0 - params.constraint_margin;
        let sq = |l: f64| (scale * l).powi(2);

        Self {
            vel_sq: sq(limits.max_vel_ms),
            acc_sq: sq(limits.max_acc_mss),
            jerk_sq: sq(limits.max_jerk_msss),
            snap_sq: limits.max_snap_mssss.map(sq),
            thrust_sq: limits.max_thrust_mss.map(sq),
            body_rate_sq: limits.max_body_rate_rads.map(sq),
            gravity_mss: params.gravity_mss,
            weight: params.penalty_weight,
            samples_per_segment: params.samples_per_segment,
        }
    }

    /// Compute the penalty of a solution, adding its partial derivatives to `grad_c` (per
    /// segment coefficients) and `grad_t` (per segment durations, coefficients held fixed).
    pub fn accumulate(
        &self,
        sol: &MincoSolution,
        grad_c: &mut [Coeffs],
        grad_t: &mut [f64],
    ) -> f64 {
        let k = self.samples_per_segment;
        let mut penalty = 0.0;

        for (i, (c, &duration)) in sol.coeffs().iter().zip(sol.times_s().iter()).enumerate() {
            let step = duration / k as f64;

            for j in 0..=k {
                let omega = if j == 0 || j == k { 0.5 } else { 1.0 };
                let t = j as f64 * step;

                // derivs[d] is the d-th derivative, position is never constrained
                let mut derivs = [Vector3::zeros(); MAX_ORDER + 1];
                for (d, v) in derivs.iter_mut().enumerate().skip(1) {
                    *v = eval(c, t, d);
                }

                for cv in self.constraints(&derivs).iter() {
                    let (phi, dphi) = cubic_penalty(cv.g);
                    if dphi == 0.0 {
                        continue;
                    }

                    penalty += self.weight * omega * step * phi;

                    // Coefficient gradient through each derivative
                    let scale = self.weight * omega * step * dphi;
                    let mut g_dot = 0.0;
                    for d in 1..MAX_ORDER {
                        if cv.grad[d] == Vector3::zeros() {
                            continue;
                        }
                        grad_c[i] += basis(t, d) * cv.grad[d].transpose() * scale;
                        g_dot += cv.grad[d].dot(&derivs[d + 1]);
                    }

                    // Both the step and the sample time scale with the duration
                    grad_t[i] += self.weight * omega * phi / k as f64
                        + scale * (j as f64 / k as f64) * g_dot;
                }
            }
        }

        penalty
    }

    /// Evaluate every active constraint at one sample.
    fn constraints(&self, derivs: &[Vector3<f64>; MAX_ORDER + 1]) -> Vec<ConstraintValue> {
        let mut out = Vec::with_capacity(6);

        out.push(norm_constraint(derivs, 1, self.vel_sq));
        out.push(norm_constraint(derivs, 2, self.acc_sq));
        out.push(norm_constraint(derivs, 3, self.jerk_sq));
        if let Some(l_sq) = self.snap_sq {
            out.push(norm_constraint(derivs, 4, l_sq));
        }

        let f = derivs[2] + Vector3::new(0.0, 0.0, self.gravity_mss);

        if let Some(l_sq) = self.thrust_sq {
            let mut grad = [Vector3::zeros(); MAX_ORDER];
            grad[2] = f * (2.0 / l_sq);
            out.push(ConstraintValue {
                g: f.norm_squared() / l_sq - 1.0,
                grad,
            });
        }

        if let Some(l_sq) = self.body_rate_sq {
            let j = derivs[3];
            let n = f.norm_squared();
            if n > MIN_THRUST_SQ {
                let f_dot_j = f.dot(&j);
                let a = j.norm_squared() * n - f_dot_j * f_dot_j;
                let w_sq = a / (n * n);

                let mut grad = [Vector3::zeros(); MAX_ORDER];
                grad[3] = (j * n - f * f_dot_j) * (2.0 / (n * n * l_sq));
                grad[2] = ((f * j.norm_squared() - j * f_dot_j) * (2.0 / (n * n))
                    - f * (4.0 * a / (n * n * n)))
                    / l_sq;

                out.push(ConstraintValue {
                    g: w_sq / l_sq - 1.0,
                    grad,
                });
            }
        }

        out
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// `|x|^2 / L^2 - 1` on the derivative of the given order.
fn norm_constraint(
    derivs: &[Vector3<f64>; MAX_ORDER + 1],
    order: usize,
    l_sq: f64,
) -> ConstraintValue {
    let mut grad = [Vector3::zeros(); MAX_ORDER];
    grad[order] = derivs[order] * (2.0 / l_sq);
    ConstraintValue {
        g: derivs[order].norm_squared() / l_sq - 1.0,
        grad,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::planner::minco::{boundary_matrix, solve};
    use crate::race_track::BoundaryState;

    /// Tight limits with every optional constraint enabled, so all of them are active.
    fn tight_set() -> ConstraintSet {
        let limits = DynamicLimits::new(2.0, 3.0, 6.0)
            .unwrap()
            .with_max_snap(20.0)
            .unwrap()
            .with_max_thrust(11.0)
            .unwrap()
            .with_max_body_rate(1.0)
            .unwrap();
        ConstraintSet::new(&limits, &PlannerParams::default())
    }

    fn test_solution(times: &[f64]) -> MincoSolution {
        let head = boundary_matrix(&BoundaryState::at_rest(Vector3::zeros()));
        let tail = boundary_matrix(&BoundaryState {
            position_m: Vector3::new(6.0, 2.0, 1.0),
            velocity_ms: Vector3::new(1.0, 0.5, 0.0),
            acceleration_mss: Vector3::zeros(),
            jerk_msss: Vector3::zeros(),
        });
        solve(times, &head, &tail, &[Vector3::new(3.0, -1.0, 0.5)]).unwrap()
    }

    fn penalty_of(set: &ConstraintSet, sol: &MincoSolution) -> f64 {
        let mut gc = vec![Coeffs::zeros(); sol.num_segments()];
        let mut gt = vec![0.0; sol.num_segments()];
        set.accumulate(sol, &mut gc, &mut gt)
    }

    #[test]
    fn test_feasible_is_zero() {
        let limits = DynamicLimits::new(100.0, 100.0, 1000.0).unwrap();
        let set = ConstraintSet::new(&limits, &PlannerParams::default());
        let sol = test_solution(&[3.0, 3.0]);
        assert_eq!(penalty_of(&set, &sol), 0.0);
    }

    #[test]
    fn test_time_gradient() {
        let set = tight_set();
        let times = [1.2, 0.9];
        let sol = test_solution(&times);

        let mut gc = vec![Coeffs::zeros(); 2];
        let mut gt = vec![0.0; 2];
        let p = set.accumulate(&sol, &mut gc, &mut gt);
        assert!(p > 0.0);

        // Perturb the duration while holding the coefficients fixed
        let h = 1e-6;
        for i in 0..2 {
            let c = &sol.coeffs()[i];
            let fd = (single_segment_penalty(&set, c, times[i] + h)
                - single_segment_penalty(&set, c, times[i] - h))
                / (2.0 * h);
            assert!(
                (fd - gt[i]).abs() < 1e-5 * (1.0 + fd.abs()),
                "segment {}: fd {} vs {}",
                i,
                fd,
                gt[i]
            );
        }
    }

    #[test]
    fn test_coeff_gradient() {
        let set = tight_set();
        let sol = test_solution(&[1.2, 0.9]);
        let mut gc = vec![Coeffs::zeros(); 2];
        let mut gt = vec![0.0; 2];
        set.accumulate(&sol, &mut gc, &mut gt);

        let h = 1e-7;
        for seg in 0..2 {
            for &(row, col) in [(1, 0), (2, 2), (3, 1), (5, 0), (7, 2)].iter() {
                let c = sol.coeffs()[seg];
                let dur = sol.times_s()[seg];
                let mut plus = c;
                plus[(row, col)] += h;
                let mut minus = c;
                minus[(row, col)] -= h;
                let fd = (single_segment_penalty(&set, &plus, dur)
                    - single_segment_penalty(&set, &minus, dur))
                    / (2.0 * h);
                let an = gc[seg][(row, col)];
                assert!(
                    (fd - an).abs() < 1e-4 * (1.0 + fd.abs()),
                    "seg {} ({}, {}): fd {} vs {}",
                    seg,
                    row,
                    col,
                    fd,
                    an
                );
            }
        }
    }

    /// Penalty of one segment given directly by its coefficients.
    fn single_segment_penalty(set: &ConstraintSet, c: &Coeffs, duration: f64) -> f64 {
        let k = set.samples_per_segment;
        let step = duration / k as f64;
        let mut p = 0.0;
        for j in 0..=k {
            let omega = if j == 0 || j == k { 0.5 } else { 1.0 };
            let t = j as f64 * step;
            let mut derivs = [Vector3::zeros(); MAX_ORDER + 1];
            for (d, v) in derivs.iter_mut().enumerate().skip(1) {
                *v = eval(c, t, d);
            }
            for cv in set.constraints(&derivs).iter() {
                p += set.weight * omega * step * cubic_penalty(cv.g).0;
            }
        }
        p
    }
}
