//! # Race planner module
//!
//! The race planner finds a time optimal trajectory (TOGT) through a race track, subject to the
//! vehicle's dynamic limits.
//!
//! Planning jointly optimises the duration of each segment and the point at which the trajectory
//! crosses each interior gate. For any choice of those variables the minimum snap coefficients
//! are given in closed form (see `minco`), and the gradient of the cost is propagated back
//! through that solution, so the outer problem is a smooth unconstrained minimisation solved by
//! the optimiser state machine in `optimiser`.
//!
//! A trajectory is only returned if it passes every gate and respects every limit to within the
//! configured tolerances, no partial result is returned on failure.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod minco;
pub mod optimiser;
pub mod penalty;
pub mod problem;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use serde::Serialize;
use std::time::Instant;

use crate::race_params::{ConfigurationError, DynamicLimits, PlannerParams};
use crate::race_track::{BoundaryState, Track, TrackError};
use crate::traj::flatness::{thrust_vector, tilt_rate};
use crate::traj::{PolynomialTrajectory, TrajError, TrajExtremum};
use minco::MincoError;
use optimiser::{ConvergedReason, FailureReason, OptState, TogtOptimiser};
use problem::TogtProblem;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The race planner. It holds only its parameters, every planning call is independent.
#[derive(Debug, Clone, Copy)]
pub struct RacePlanner {
    params: PlannerParams,
}

/// A successfully planned race.
#[derive(Debug, Clone)]
pub struct RaceSolution {
    pub trajectory: PolynomialTrajectory,
    pub extremum: TrajExtremum,
    pub report: PlanReport,
}

/// Summary of a planning run.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub num_gates: usize,
    pub segment_times_s: Vec<f64>,
    pub total_duration_s: f64,
    pub iterations: usize,
    pub termination: Termination,
    pub final_cost: f64,
    pub final_penalty: f64,

    /// Largest relative overshoot of any limit
    pub limit_violation: f64,

    /// Largest distance of a gate crossing outside its corridor
    ///
    /// Units: meters
    pub corridor_violation_m: f64,

    pub extremum: TrajExtremum,
    pub planning_time_s: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Why the optimiser stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    Converged(ConvergedReason),
    Stopped(FailureReason),
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Invalid configuration: {0}")]
    Configuration(ConfigurationError),

    #[error("Invalid track: {0}")]
    Track(TrackError),

    #[error("Invalid initial time allocation: {0}")]
    InvalidGuess(MincoError),

    #[error("The track is infeasible for the vehicle's limits (violation {violation:.4})")]
    Infeasible { violation: f64 },

    #[error(
        "The planner did not converge to a feasible trajectory in {iterations} iterations \
         (violation {violation:.4})"
    )]
    Convergence { iterations: usize, violation: f64 },

    #[error("The minimum snap system could not be solved")]
    SingularSystem,

    #[error("Could not build the trajectory: {0}")]
    Trajectory(TrajError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RacePlanner {
    pub fn new(params: PlannerParams) -> Result<Self, PlanError> {
        params.validate().map_err(PlanError::Configuration)?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &PlannerParams {
        &self.params
    }

    /// Plan a time optimal trajectory through the track, starting from the default time
    /// allocation.
    pub fn plan_togt(
        &self,
        track: &Track,
        limits: &DynamicLimits,
    ) -> Result<RaceSolution, PlanError> {
        self.plan_togt_with_guess(track, limits, None)
    }

    /// Plan a time optimal trajectory through the track.
    ///
    /// `guess` is an optional initial duration for each segment, by default durations are the
    /// distance between gates covered at a fraction of the speed limit.
    pub fn plan_togt_with_guess(
        &self,
        track: &Track,
        limits: &DynamicLimits,
        guess: Option<&[f64]>,
    ) -> Result<RaceSolution, PlanError> {
        let start = Instant::now();

        // Inputs may have been modified since they were built, check them again
        limits.validate().map_err(PlanError::Configuration)?;
        track.validate().map_err(PlanError::Track)?;
        self.check_boundaries(track, limits)?;

        let problem = TogtProblem::new(track, limits, &self.params);
        let times_s = match guess {
            Some(g) => g.to_vec(),
            None => problem.initial_times_s(limits.max_vel_ms),
        };
        let x0 = problem
            .initial_point(&times_s)
            .map_err(PlanError::InvalidGuess)?;

        info!(
            "Planning through {} gates ({} segments), initial duration {:.3} s",
            track.gates().len(),
            track.num_segments(),
            times_s.iter().sum::<f64>()
        );

        let optimiser = TogtOptimiser::new(&problem, &self.params);
        let state = optimiser.run(x0);

        let (it, termination) = match state {
            OptState::Converged(it, reason) => (it, Termination::Converged(reason)),
            OptState::Failed(Some(it), reason) => (it, Termination::Stopped(reason)),
            OptState::Failed(None, FailureReason::SingularSystem) => {
                warn!("Minimum snap system is singular at the initial point");
                return Err(PlanError::SingularSystem);
            }
            OptState::Failed(None, reason) => {
                warn!("Optimisation could not start: {:?}", reason);
                return Err(PlanError::Convergence {
                    iterations: 0,
                    violation: std::f64::INFINITY,
                });
            }
            OptState::Initializing { .. } | OptState::Evaluating(_) => {
                // The optimiser only returns terminal states
                return Err(PlanError::Convergence {
                    iterations: 0,
                    violation: std::f64::INFINITY,
                });
            }
        };

        info!(
            "Optimisation finished after {} iterations: {:?}",
            it.iteration, termination
        );

        // Validate the final iterate
        let trajectory = problem
            .solve(&it.x)
            .map_err(|_| PlanError::SingularSystem)?
            .trajectory()
            .map_err(PlanError::Trajectory)?;
        let extremum = TrajExtremum::compute(
            &trajectory,
            self.params.extremum_samples_per_segment,
            self.params.gravity_mss,
        )
        .map_err(PlanError::Trajectory)?;

        let limit_violation = extremum.check_limits(limits);
        let corridor_violation_m = trajectory
            .waypoints()
            .iter()
            .zip(track.corridors().iter())
            .map(|(wpt, corridor)| corridor.distance_outside(&wpt.position_m))
            .fold(0.0, f64::max);

        let feasible = limit_violation <= self.params.feasibility_tolerance
            && corridor_violation_m <= self.params.corridor_tolerance_m;

        if !feasible {
            let violation = limit_violation.max(corridor_violation_m);
            warn!(
                "Final trajectory is infeasible: limit violation {:.4}, corridor violation {:.4} m",
                limit_violation, corridor_violation_m
            );

            return Err(match termination {
                Termination::Stopped(FailureReason::IterationBudget)
                | Termination::Stopped(FailureReason::TimeBudget) => PlanError::Convergence {
                    iterations: it.iteration,
                    violation,
                },
                _ => PlanError::Infeasible { violation },
            });
        }

        let report = PlanReport {
            num_gates: track.gates().len(),
            segment_times_s: trajectory.segment_times_s(),
            total_duration_s: trajectory.duration_s(),
            iterations: it.iteration,
            termination,
            final_cost: it.eval.cost,
            final_penalty: it.eval.penalty,
            limit_violation,
            corridor_violation_m,
            extremum,
            planning_time_s: start.elapsed().as_secs_f64(),
        };

        info!(
            "Planned trajectory of {:.3} s in {:.3} s",
            report.total_duration_s, report.planning_time_s
        );

        Ok(RaceSolution {
            trajectory,
            extremum,
            report,
        })
    }

    /// Check that the boundary states can be flown at all. If they already violate a limit no
    /// amount of time makes the track feasible.
    fn check_boundaries(&self, track: &Track, limits: &DynamicLimits) -> Result<(), PlanError> {
        let gravity = self.params.gravity_mss;

        if let Some(max_thrust) = limits.max_thrust_mss {
            if max_thrust <= gravity {
                warn!(
                    "Thrust limit of {} m/s^2 cannot compensate gravity",
                    max_thrust
                );
                return Err(PlanError::Infeasible {
                    violation: gravity / max_thrust - 1.0,
                });
            }
        }

        let violation = [track.init_state(), track.end_state()]
            .iter()
            .map(|s| boundary_violation(s, limits, gravity))
            .fold(0.0, f64::max);

        if violation > self.params.feasibility_tolerance {
            warn!("A boundary state exceeds the limits by {:.4}", violation);
            return Err(PlanError::Infeasible { violation });
        }

        Ok(())
    }
}

impl PlanError {
    /// True if the inputs were valid but no feasible trajectory was found.
    pub fn is_planning_failure(&self) -> bool {
        matches!(
            self,
            PlanError::Infeasible { .. } | PlanError::Convergence { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Largest relative overshoot of any limit by a boundary state.
fn boundary_violation(state: &BoundaryState, limits: &DynamicLimits, gravity_mss: f64) -> f64 {
    let thrust = thrust_vector(&state.acceleration_mss, gravity_mss);

    let checks = [
        (state.velocity_ms.norm(), Some(limits.max_vel_ms)),
        (state.acceleration_mss.norm(), Some(limits.max_acc_mss)),
        (state.jerk_msss.norm(), Some(limits.max_jerk_msss)),
        (thrust.norm(), limits.max_thrust_mss),
        (tilt_rate(&thrust, &state.jerk_msss), limits.max_body_rate_rads),
    ];

    checks
        .iter()
        .filter_map(|(value, limit)| limit.map(|l| value / l - 1.0))
        .fold(0.0, f64::max)
}
