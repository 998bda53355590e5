//! Differential flatness recovery of the vehicle state along a trajectory.
//!
//! For a multicopter with a fixed (zero) yaw the attitude, collective thrust and body rates follow
//! directly from the acceleration and jerk of the position trajectory.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::Serialize;

use super::TrajPoint;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Standard gravity.
pub const GRAVITY_MSS: f64 = 9.8066;

/// Below this mass normalised thrust the attitude is considered undefined.
const MIN_THRUST_MSS: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Vehicle state recovered from a trajectory point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlatState {
    /// Attitude of the body frame in the world frame
    pub attitude_q: UnitQuaternion<f64>,

    /// Body rates, expressed in the body frame
    pub body_rates_rads: Vector3<f64>,

    /// Mass normalised collective thrust
    pub thrust_mss: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FlatState {
    /// Recover the state at the given point, with the heading held along the world x axis.
    ///
    /// In free fall (zero thrust) the attitude is undefined, the identity attitude and zero rates
    /// are reported.
    pub fn from_point(point: &TrajPoint, gravity_mss: f64) -> Self {
        let thrust = thrust_vector(&point.acceleration_mss, gravity_mss);
        let thrust_mss = thrust.norm();

        if thrust_mss < MIN_THRUST_MSS {
            return Self {
                attitude_q: UnitQuaternion::identity(),
                body_rates_rads: Vector3::zeros(),
                thrust_mss,
            };
        }

        let z_b = thrust / thrust_mss;

        // Heading along world x, fall back to world y when the body z axis lies in that direction
        let mut y_b = z_b.cross(&Vector3::x());
        if y_b.norm() < 1e-6 {
            y_b = z_b.cross(&Vector3::y());
        }
        let y_b = y_b.normalize();
        let x_b = y_b.cross(&z_b);

        let rot = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[x_b, y_b, z_b]));

        // Rate of change of the body z axis
        let z_b_dot = (point.jerk_msss - z_b * z_b.dot(&point.jerk_msss)) / thrust_mss;

        Self {
            attitude_q: UnitQuaternion::from_rotation_matrix(&rot),
            body_rates_rads: Vector3::new(-z_b_dot.dot(&y_b), z_b_dot.dot(&x_b), 0.0),
            thrust_mss,
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Mass normalised thrust vector needed to follow the given acceleration.
pub fn thrust_vector(acceleration_mss: &Vector3<f64>, gravity_mss: f64) -> Vector3<f64> {
    acceleration_mss + Vector3::new(0.0, 0.0, gravity_mss)
}

/// Magnitude of the tilt rate (rate of change of the thrust direction) for the given thrust
/// vector and jerk.
pub fn tilt_rate(thrust: &Vector3<f64>, jerk: &Vector3<f64>) -> f64 {
    let n = thrust.norm_squared();
    if n < MIN_THRUST_MSS * MIN_THRUST_MSS {
        return 0.0;
    }

    let f_dot_j = thrust.dot(jerk);
    ((jerk.norm_squared() * n - f_dot_j * f_dot_j).max(0.0) / (n * n)).sqrt()
}
