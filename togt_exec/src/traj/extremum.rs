//! Extremum summary of a trajectory
//!
//! The largest magnitude of each tracked quantity is found by sampling every segment on a regular
//! grid and refining each sampled local maximum with a golden section search. Extrema of smooth
//! polynomials usually lie inside segments, so the segment boundaries alone are not enough.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;
use std::fmt;

use super::flatness::{thrust_vector, tilt_rate};
use super::{PolynomialSegment, PolynomialTrajectory, TrajError};
use crate::race_params::DynamicLimits;
use util::maths::golden_section_max;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Golden section refinement stops once the bracket is this fraction of the segment duration.
const REFINE_REL_TOL: f64 = 1e-9;

const REFINE_MAX_ITERS: usize = 100;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The maximum of one quantity and where it occurs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extremum {
    pub value: f64,

    /// Global time of the maximum
    pub t_s: f64,

    /// Index of the segment containing the maximum
    pub segment: usize,
}

/// Maximum magnitudes attained along a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrajExtremum {
    pub speed_ms: Extremum,
    pub acceleration_mss: Extremum,
    pub jerk_msss: Extremum,
    pub snap_mssss: Extremum,
    pub thrust_mss: Extremum,
    pub body_rate_rads: Extremum,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The quantities tracked by the extremum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Quantity {
    Speed,
    Acceleration,
    Jerk,
    Snap,
    Thrust,
    BodyRate,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Quantity {
    pub const ALL: [Quantity; 6] = [
        Quantity::Speed,
        Quantity::Acceleration,
        Quantity::Jerk,
        Quantity::Snap,
        Quantity::Thrust,
        Quantity::BodyRate,
    ];

    /// Value of this quantity on the given segment at local time `t_s`.
    pub fn eval(&self, seg: &PolynomialSegment, t_s: f64, gravity_mss: f64) -> f64 {
        match self {
            Quantity::Speed => seg.derivative(t_s, 1).norm(),
            Quantity::Acceleration => seg.derivative(t_s, 2).norm(),
            Quantity::Jerk => seg.derivative(t_s, 3).norm(),
            Quantity::Snap => seg.derivative(t_s, 4).norm(),
            Quantity::Thrust => thrust_vector(&seg.derivative(t_s, 2), gravity_mss).norm(),
            Quantity::BodyRate => tilt_rate(
                &thrust_vector(&seg.derivative(t_s, 2), gravity_mss),
                &seg.derivative(t_s, 3),
            ),
        }
    }

    /// Name and unit used when displaying the quantity.
    pub fn label(&self) -> &'static str {
        match self {
            Quantity::Speed => "speed [m/s]",
            Quantity::Acceleration => "acceleration [m/s^2]",
            Quantity::Jerk => "jerk [m/s^3]",
            Quantity::Snap => "snap [m/s^4]",
            Quantity::Thrust => "thrust [m/s^2]",
            Quantity::BodyRate => "body rate [rad/s]",
        }
    }

    /// The limit on this quantity, if there is one.
    pub fn limit(&self, limits: &DynamicLimits) -> Option<f64> {
        match self {
            Quantity::Speed => Some(limits.max_vel_ms),
            Quantity::Acceleration => Some(limits.max_acc_mss),
            Quantity::Jerk => Some(limits.max_jerk_msss),
            Quantity::Snap => limits.max_snap_mssss,
            Quantity::Thrust => limits.max_thrust_mss,
            Quantity::BodyRate => limits.max_body_rate_rads,
        }
    }
}

impl TrajExtremum {
    /// Compute the extremum of a trajectory.
    ///
    /// Each segment is sampled at `samples_per_segment` equal intervals before refinement.
    pub fn compute(
        traj: &PolynomialTrajectory,
        samples_per_segment: usize,
        gravity_mss: f64,
    ) -> Result<Self, TrajError> {
        if samples_per_segment < 2 {
            return Err(TrajError::InvalidSampling(format!(
                "extremum needs at least 2 samples per segment, found {}",
                samples_per_segment
            )));
        }

        let mut maxima = [Extremum {
            value: std::f64::NEG_INFINITY,
            t_s: 0.0,
            segment: 0,
        }; 6];

        for (index, seg) in traj.segments().iter().enumerate() {
            let start_s = traj.segment_start_s(index).unwrap_or(0.0);

            for (quantity, best) in Quantity::ALL.iter().zip(maxima.iter_mut()) {
                let (t_s, value) =
                    segment_max(seg, samples_per_segment, |t| quantity.eval(seg, t, gravity_mss));

                if value > best.value {
                    *best = Extremum {
                        value,
                        t_s: start_s + t_s,
                        segment: index,
                    };
                }
            }
        }

        Ok(Self {
            speed_ms: maxima[0],
            acceleration_mss: maxima[1],
            jerk_msss: maxima[2],
            snap_mssss: maxima[3],
            thrust_mss: maxima[4],
            body_rate_rads: maxima[5],
        })
    }

    pub fn get(&self, quantity: Quantity) -> &Extremum {
        match quantity {
            Quantity::Speed => &self.speed_ms,
            Quantity::Acceleration => &self.acceleration_mss,
            Quantity::Jerk => &self.jerk_msss,
            Quantity::Snap => &self.snap_mssss,
            Quantity::Thrust => &self.thrust_mss,
            Quantity::BodyRate => &self.body_rate_rads,
        }
    }

    /// The largest relative violation of any limit, `max(value / limit - 1)`, or zero if every
    /// quantity is within its limit.
    pub fn check_limits(&self, limits: &DynamicLimits) -> f64 {
        Quantity::ALL
            .iter()
            .filter_map(|q| q.limit(limits).map(|l| self.get(*q).value / l - 1.0))
            .fold(0.0, f64::max)
    }

    /// True if no limit is exceeded by more than the relative tolerance `tol`.
    pub fn within_limits(&self, limits: &DynamicLimits, tol: f64) -> bool {
        self.check_limits(limits) <= tol
    }
}

impl fmt::Display for TrajExtremum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Trajectory extremum:")?;
        writeln!(
            f,
            "  {:<22} {:>12} {:>10} {:>8}",
            "quantity", "max", "t [s]", "segment"
        )?;
        for q in Quantity::ALL.iter() {
            let e = self.get(*q);
            writeln!(
                f,
                "  {:<22} {:>12.4} {:>10.4} {:>8}",
                q.label(),
                e.value,
                e.t_s,
                e.segment
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Maximum of `f` over one segment, returned as `(local time, value)`.
fn segment_max<F>(seg: &PolynomialSegment, num_samples: usize, f: F) -> (f64, f64)
where
    F: Fn(f64) -> f64,
{
    let dt = seg.duration_s() / num_samples as f64;
    let values: Vec<f64> = (0..=num_samples).map(|j| f(j as f64 * dt)).collect();

    let mut best = (0.0, std::f64::NEG_INFINITY);

    for j in 0..=num_samples {
        let left = if j > 0 { values[j - 1] } else { std::f64::NEG_INFINITY };
        let right = if j < num_samples {
            values[j + 1]
        } else {
            std::f64::NEG_INFINITY
        };

        if values[j] < left || values[j] < right {
            continue;
        }

        // Local maximum on the grid, refine within the neighbouring samples
        let lower = j.saturating_sub(1) as f64 * dt;
        let upper = (j + 1).min(num_samples) as f64 * dt;
        let (t, value) = golden_section_max(
            &f,
            lower,
            upper,
            REFINE_REL_TOL * seg.duration_s(),
            REFINE_MAX_ITERS,
        );

        let candidate = if value >= values[j] {
            (t, value)
        } else {
            (j as f64 * dt, values[j])
        };
        if candidate.1 > best.1 {
            best = candidate;
        }
    }

    best
}
