//! The time optimal trajectory problem
//!
//! The decision vector holds, in order:
//!
//! - `tau_i`, one per segment, with the segment duration `T_i = exp(tau_i)` so that no step can
//!   produce a non-positive duration,
//! - `xi_k`, three per interior gate, mapped into the gate's corridor (see `Corridor::map`) to
//!   give the waypoint the trajectory passes through.
//!
//! The cost is `w_t sum(T) + w_e E(c, T) + P(c, T)` with `E` the snap energy and `P` the limit
//! penalty, the coefficients `c` being the minimum snap solution for the current variables.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DVector, Vector3};

use super::minco::{self, BoundaryMatrix, MincoError, MincoSolution};
use super::optimiser::{Evaluation, Objective};
use super::penalty::ConstraintSet;
use crate::race_params::{DynamicLimits, PlannerParams};
use crate::race_track::{Corridor, Track};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The optimisation problem for one track.
pub struct TogtProblem<'a> {
    track: &'a Track,
    params: &'a PlannerParams,
    head: BoundaryMatrix,
    tail: BoundaryMatrix,
    constraints: ConstraintSet,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<'a> TogtProblem<'a> {
    pub fn new(track: &'a Track, limits: &DynamicLimits, params: &'a PlannerParams) -> Self {
        Self {
            track,
            params,
            head: minco::boundary_matrix(track.init_state()),
            tail: minco::boundary_matrix(track.end_state()),
            constraints: ConstraintSet::new(limits, params),
        }
    }

    pub fn num_segments(&self) -> usize {
        self.track.num_segments()
    }

    fn inner(&self) -> &[Corridor] {
        self.track.interior_corridors()
    }

    /// The initial time allocation: distance between consecutive gates covered at a fraction of
    /// the speed limit.
    pub fn initial_times_s(&self, max_vel_ms: f64) -> Vec<f64> {
        let speed = self.params.init_speed_ratio * max_vel_ms;
        self.track
            .reference_points_m()
            .windows(2)
            .map(|w| ((w[1] - w[0]).norm() / speed).max(self.params.min_segment_time_s))
            .collect()
    }

    /// Build the starting point of the optimisation with the given durations and every interior
    /// waypoint at its gate centre.
    pub fn initial_point(&self, times_s: &[f64]) -> Result<DVector<f64>, MincoError> {
        if times_s.len() != self.num_segments() {
            return Err(MincoError::DimensionMismatch {
                segments: self.num_segments(),
                expected: self.num_segments(),
                found: times_s.len(),
            });
        }

        let mut x = DVector::zeros(self.num_vars());
        for (i, &t) in times_s.iter().enumerate() {
            if !t.is_finite() || t <= 0.0 {
                return Err(MincoError::InvalidTime { index: i, value: t });
            }
            x[i] = t.ln();
        }

        Ok(x)
    }

    /// Split the decision vector into durations, the corridor variables and the waypoints they
    /// map to.
    pub fn decode(&self, x: &DVector<f64>) -> (Vec<f64>, Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
        let n = self.num_segments();
        let times_s = x.rows(0, n).iter().map(|tau| tau.exp()).collect();

        let xis: Vec<Vector3<f64>> = (0..n - 1)
            .map(|k| Vector3::new(x[n + 3 * k], x[n + 3 * k + 1], x[n + 3 * k + 2]))
            .collect();
        let points = xis
            .iter()
            .zip(self.inner().iter())
            .map(|(xi, corridor)| corridor.map(xi))
            .collect();

        (times_s, xis, points)
    }

    /// Solve the inner minimum snap problem at `x`.
    pub fn solve(&self, x: &DVector<f64>) -> Result<MincoSolution, MincoError> {
        let (times_s, _, points) = self.decode(x);
        minco::solve(&times_s, &self.head, &self.tail, &points)
    }
}

impl<'a> Objective for TogtProblem<'a> {
    fn num_vars(&self) -> usize {
        let n = self.num_segments();
        n + 3 * (n - 1)
    }

    fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, MincoError> {
        let n = self.num_segments();
        let (times_s, xis, points) = self.decode(x);
        let sol = minco::solve(&times_s, &self.head, &self.tail, &points)?;

        let energy = sol.energy();
        let (mut grad_c, mut grad_t) = sol.energy_partials();
        for g in grad_c.iter_mut() {
            *g *= self.params.energy_weight;
        }
        for g in grad_t.iter_mut() {
            *g = *g * self.params.energy_weight + self.params.time_weight;
        }

        let penalty = self.constraints.accumulate(&sol, &mut grad_c, &mut grad_t);

        let total_s: f64 = times_s.iter().sum();
        let cost = self.params.time_weight * total_s + self.params.energy_weight * energy + penalty;

        let grad_sol = sol.propagate_gradient(&grad_c, &grad_t)?;

        let mut grad = DVector::zeros(self.num_vars());
        for i in 0..n {
            grad[i] = grad_sol.times[i] * times_s[i];
        }
        for (k, (xi, corridor)) in xis.iter().zip(self.inner().iter()).enumerate() {
            let g_xi = corridor.map_jacobian(xi).transpose() * grad_sol.inner_points[k];
            grad.fixed_rows_mut::<3>(n + 3 * k).copy_from(&g_xi);
        }

        Ok(Evaluation {
            cost,
            penalty,
            grad,
            times_s,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::race_track::{BoundaryState, Gate, GateShape};

    fn test_track() -> Track {
        let gates = vec![
            Gate::ball("a", Vector3::new(3.0, 2.0, 1.0), 0.5),
            Gate {
                name: "b".into(),
                position_m: Vector3::new(6.0, -1.0, 1.5),
                shape: GateShape::RectanglePrisma {
                    rpy_rad: Vector3::new(0.0, 0.0, 0.5),
                    length_m: 0.8,
                    width_m: 1.2,
                    height_m: 1.0,
                    margin_w_m: 0.1,
                    margin_h_m: 0.1,
                },
                stationary: true,
            },
        ];
        Track::through_gates(
            BoundaryState::at_rest(Vector3::new(0.0, 0.0, 1.0)),
            gates,
            BoundaryState::at_rest(Vector3::new(9.0, 0.0, 1.0)),
        )
        .unwrap()
    }

    #[test]
    fn test_initial_point() {
        let track = test_track();
        let limits = DynamicLimits::new(4.0, 8.0, 40.0).unwrap();
        let params = PlannerParams::default();
        let problem = TogtProblem::new(&track, &limits, &params);

        assert_eq!(problem.num_vars(), 3 + 6);

        let times = problem.initial_times_s(limits.max_vel_ms);
        assert_eq!(times.len(), 3);
        assert!((times[0] - Vector3::<f64>::new(3.0, 2.0, 0.0).norm() / 2.0).abs() < 1e-12);

        let x0 = problem.initial_point(&times).unwrap();
        let (decoded, _, points) = problem.decode(&x0);
        for (a, b) in decoded.iter().zip(times.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(points[0], Vector3::new(3.0, 2.0, 1.0));
        assert_eq!(points[1], Vector3::new(6.0, -1.0, 1.5));

        assert!(problem.initial_point(&[1.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn test_gradient() {
        let track = test_track();
        let limits = DynamicLimits::new(4.0, 8.0, 40.0)
            .unwrap()
            .with_max_thrust(14.0)
            .unwrap()
            .with_max_body_rate(3.0)
            .unwrap();
        let mut params = PlannerParams::default();
        params.energy_weight = 1e-3;
        let problem = TogtProblem::new(&track, &limits, &params);

        // A point away from the centres and fast enough to activate the penalty
        let mut x = problem
            .initial_point(&problem.initial_times_s(limits.max_vel_ms))
            .unwrap();
        for i in 0..3 {
            x[i] -= 0.4;
        }
        for (j, v) in [0.3, -0.5, 0.2, 0.7, -0.1, 0.4].iter().enumerate() {
            x[3 + j] = *v;
        }

        let eval = problem.evaluate(&x).unwrap();
        assert!(eval.penalty > 0.0);

        let h = 1e-6;
        for i in 0..problem.num_vars() {
            let mut plus = x.clone();
            plus[i] += h;
            let mut minus = x.clone();
            minus[i] -= h;
            let fd = (problem.evaluate(&plus).unwrap().cost
                - problem.evaluate(&minus).unwrap().cost)
                / (2.0 * h);
            assert!(
                (fd - eval.grad[i]).abs() < 1e-4 * (1.0 + fd.abs()),
                "variable {}: fd {} vs {}",
                i,
                fd,
                eval.grad[i]
            );
        }
    }
}
