//! Parameters of the race planner's optimiser

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::limits::check_positive;
use super::ConfigurationError;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Largest accepted wall clock budget, one week.
///
/// Units: seconds
pub const MAX_TIME_BUDGET_S: f64 = 7.0 * 24.0 * 3600.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Convergence and weighting parameters of the planner.
///
/// Every field has a default (see the `Default` impl), and any of them may be overridden from
/// the `[planner]` table of the race parameter file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerParams {
    // ---- COST ----
    /// Weight on the total duration of the trajectory.
    pub time_weight: f64,

    /// Weight on the integral of squared snap. Kept small, it only regularises the problem.
    pub energy_weight: f64,

    /// Weight on the constraint violation penalty.
    pub penalty_weight: f64,

    /// Fraction of each limit held back by the penalty, so the optimum sits just inside the
    /// true limits.
    pub constraint_margin: f64,

    /// Number of intervals each segment is divided into when evaluating the penalty.
    pub samples_per_segment: usize,

    // ---- TERMINATION ----
    /// Maximum number of optimiser iterations.
    pub max_iterations: usize,

    /// Relative cost improvement below which an iteration counts as stalled.
    pub rel_tolerance: f64,

    /// Number of consecutive stalled iterations before declaring convergence.
    pub stall_iterations: usize,

    /// Infinity norm of the gradient below which the optimiser has converged.
    pub grad_tolerance: f64,

    /// Penalty below which the iterate is treated as feasible when classifying convergence.
    ///
    /// A small penalty does not stop the optimiser by itself. The time term keeps pulling the
    /// durations down, so the first feasible iterate is usually far from time optimal. The
    /// optimiser only stops once progress stalls, and this tolerance then tells a stall at a
    /// feasible point (`FeasibleAndStalled`) from one that is not (`RelativeImprovement`).
    pub penalty_tolerance: f64,

    /// Maximum relative overshoot of any limit accepted in the final trajectory.
    pub feasibility_tolerance: f64,

    /// Distance outside a gate corridor accepted in the final trajectory.
    ///
    /// Units: meters
    pub corridor_tolerance_m: f64,

    /// Optional wall clock budget for one planning call, at most `MAX_TIME_BUDGET_S`.
    ///
    /// Units: seconds
    pub max_time_s: Option<f64>,

    // ---- LINE SEARCH ----
    /// Sufficient decrease constant of the Armijo condition.
    pub armijo_c: f64,

    /// Factor the step is multiplied by on each backtrack.
    pub backtrack_factor: f64,

    /// Maximum number of backtracks per iteration.
    pub max_backtracks: usize,

    /// Number of correction pairs kept by L-BFGS.
    pub lbfgs_memory: usize,

    // ---- INITIALISATION ----
    /// Fraction of the speed limit used to compute the initial time allocation.
    pub init_speed_ratio: f64,

    /// Lower bound on any initial segment duration.
    ///
    /// Units: seconds
    pub min_segment_time_s: f64,

    // ---- MISC ----
    /// Magnitude of gravity, used for thrust and body rate.
    ///
    /// Units: meters/second^2
    pub gravity_mss: f64,

    /// Number of intervals per segment used to compute the final extremum.
    pub extremum_samples_per_segment: usize,

    /// Log progress at debug level every this many iterations.
    pub log_interval: usize,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            time_weight: 1.0,
            energy_weight: 1e-5,
            penalty_weight: 1e4,
            constraint_margin: 0.03,
            samples_per_segment: 16,
            max_iterations: 500,
            rel_tolerance: 1e-7,
            stall_iterations: 3,
            grad_tolerance: 1e-6,
            penalty_tolerance: 1e-6,
            feasibility_tolerance: 0.01,
            corridor_tolerance_m: 1e-6,
            max_time_s: None,
            armijo_c: 1e-4,
            backtrack_factor: 0.5,
            max_backtracks: 40,
            lbfgs_memory: 8,
            init_speed_ratio: 0.5,
            min_segment_time_s: 0.05,
            gravity_mss: crate::traj::GRAVITY_MSS,
            extremum_samples_per_segment: 64,
            log_interval: 25,
        }
    }
}

impl PlannerParams {
    /// Check the parameters describe a usable optimiser.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_positive("time_weight", self.time_weight)?;
        check_positive("penalty_weight", self.penalty_weight)?;
        check_positive("rel_tolerance", self.rel_tolerance)?;
        check_positive("grad_tolerance", self.grad_tolerance)?;
        check_positive("penalty_tolerance", self.penalty_tolerance)?;
        check_positive("feasibility_tolerance", self.feasibility_tolerance)?;
        check_positive("corridor_tolerance_m", self.corridor_tolerance_m)?;
        check_positive("armijo_c", self.armijo_c)?;
        check_positive("backtrack_factor", self.backtrack_factor)?;
        check_positive("init_speed_ratio", self.init_speed_ratio)?;
        check_positive("min_segment_time_s", self.min_segment_time_s)?;
        check_positive("gravity_mss", self.gravity_mss)?;

        if let Some(t) = self.max_time_s {
            check_positive("max_time_s", t)?;
            if t > MAX_TIME_BUDGET_S {
                return Err(invalid("max_time_s", "must be at most one week"));
            }
        }

        if !(self.energy_weight.is_finite() && self.energy_weight >= 0.0) {
            return Err(invalid("energy_weight", "must be finite and not negative"));
        }
        if !(self.constraint_margin >= 0.0 && self.constraint_margin < 1.0) {
            return Err(invalid("constraint_margin", "must be in [0, 1)"));
        }
        if self.armijo_c >= 1.0 {
            return Err(invalid("armijo_c", "must be in (0, 1)"));
        }
        if self.backtrack_factor >= 1.0 {
            return Err(invalid("backtrack_factor", "must be in (0, 1)"));
        }
        if self.init_speed_ratio > 1.0 {
            return Err(invalid("init_speed_ratio", "must be in (0, 1]"));
        }

        let counts = [
            ("samples_per_segment", self.samples_per_segment),
            ("max_iterations", self.max_iterations),
            ("stall_iterations", self.stall_iterations),
            ("max_backtracks", self.max_backtracks),
            ("lbfgs_memory", self.lbfgs_memory),
            ("log_interval", self.log_interval),
        ];
        for (field, count) in counts.iter() {
            if *count == 0 {
                return Err(invalid(field, "must be at least 1"));
            }
        }
        if self.extremum_samples_per_segment < 2 {
            return Err(invalid("extremum_samples_per_segment", "must be at least 2"));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn invalid(field: &'static str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidPlannerParam {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_valid() {
        assert!(PlannerParams::default().validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let params: PlannerParams =
            util::params::from_str("max_iterations = 42\nmax_time_s = 1.5\n").unwrap();
        assert_eq!(params.max_iterations, 42);
        assert_eq!(params.max_time_s, Some(1.5));
        assert_eq!(params.penalty_weight, PlannerParams::default().penalty_weight);
    }

    #[test]
    fn test_invalid() {
        let mut params = PlannerParams::default();
        params.constraint_margin = 1.0;
        assert!(matches!(
            params.validate(),
            Err(ConfigurationError::InvalidPlannerParam {
                field: "constraint_margin",
                ..
            })
        ));

        let mut params = PlannerParams::default();
        params.lbfgs_memory = 0;
        assert!(params.validate().is_err());

        let mut params = PlannerParams::default();
        params.penalty_weight = -1.0;
        assert!(matches!(
            params.validate(),
            Err(ConfigurationError::NonPositive { .. })
        ));
    }

    #[test]
    fn test_time_budget_bounds() {
        let mut params = PlannerParams::default();
        params.max_time_s = Some(MAX_TIME_BUDGET_S);
        assert!(params.validate().is_ok());

        params.max_time_s = Some(1e30);
        assert!(matches!(
            params.validate(),
            Err(ConfigurationError::InvalidPlannerParam {
                field: "max_time_s",
                ..
            })
        ));

        params.max_time_s = Some(0.0);
        assert!(params.validate().is_err());
    }
}
