//! Dynamic limits of the racing vehicle

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use super::ConfigurationError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Bounds on the vehicle's motion which the planned trajectory must respect everywhere.
///
/// All limits are magnitudes, so they apply to the norm of the corresponding vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DynamicLimits {
    /// Maximum speed.
    ///
    /// Units: meters/second
    pub max_vel_ms: f64,

    /// Maximum acceleration.
    ///
    /// Units: meters/second^2
    pub max_acc_mss: f64,

    /// Maximum jerk.
    ///
    /// Units: meters/second^3
    pub max_jerk_msss: f64,

    /// Maximum snap, if constrained.
    ///
    /// Units: meters/second^4
    pub max_snap_mssss: Option<f64>,

    /// Maximum mass normalised collective thrust, if constrained.
    ///
    /// Units: meters/second^2
    pub max_thrust_mss: Option<f64>,

    /// Maximum tilt rate of the thrust axis, if constrained.
    ///
    /// Units: radians/second
    pub max_body_rate_rads: Option<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DynamicLimits {
    /// Create a new set of limits on speed, acceleration and jerk only.
    pub fn new(
        max_vel_ms: f64,
        max_acc_mss: f64,
        max_jerk_msss: f64,
    ) -> Result<Self, ConfigurationError> {
        let limits = Self {
            max_vel_ms,
            max_acc_mss,
            max_jerk_msss,
            max_snap_mssss: None,
            max_thrust_mss: None,
            max_body_rate_rads: None,
        };

        limits.validate()?;

        Ok(limits)
    }

    pub fn with_max_snap(mut self, max_snap_mssss: f64) -> Result<Self, ConfigurationError> {
        self.max_snap_mssss = Some(max_snap_mssss);
        self.validate()?;
        Ok(self)
    }

    pub fn with_max_thrust(mut self, max_thrust_mss: f64) -> Result<Self, ConfigurationError> {
        self.max_thrust_mss = Some(max_thrust_mss);
        self.validate()?;
        Ok(self)
    }

    pub fn with_max_body_rate(mut self, max_body_rate_rads: f64) -> Result<Self, ConfigurationError> {
        self.max_body_rate_rads = Some(max_body_rate_rads);
        self.validate()?;
        Ok(self)
    }

    /// Check that every limit present is a finite and strictly positive number.
    ///
    /// Fields are public so the planner checks again before optimising.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_positive("max_vel_ms", self.max_vel_ms)?;
        check_positive("max_acc_mss", self.max_acc_mss)?;
        check_positive("max_jerk_msss", self.max_jerk_msss)?;

        let optional = [
            ("max_snap_mssss", self.max_snap_mssss),
            ("max_thrust_mss", self.max_thrust_mss),
            ("max_body_rate_rads", self.max_body_rate_rads),
        ];
        for (field, value) in optional.iter() {
            if let Some(v) = value {
                check_positive(field, *v)?;
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Check that a named value is finite and strictly positive.
pub(crate) fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if !value.is_finite() {
        Err(ConfigurationError::NonFinite { field, value })
    } else if value <= 0.0 {
        Err(ConfigurationError::NonPositive { field, value })
    } else {
        Ok(())
    }
}
