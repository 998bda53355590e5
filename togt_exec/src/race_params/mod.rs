//! # Race parameters module
//!
//! Race parameters describe what the vehicle is capable of (the `DynamicLimits`) and how the
//! planner should go about optimising (`PlannerParams`). They are loaded together from a TOML
//! file:
//!
//! ```toml
//! [limits]
//! max_vel_ms = 12.0
//! max_acc_mss = 20.0
//! max_jerk_msss = 200.0
//! max_thrust_mss = 30.0
//!
//! [planner]
//! max_iterations = 400
//! ```

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod limits;
mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;
use std::path::Path;

pub use limits::*;
pub use params::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Validated race parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaceParams {
    pub limits: DynamicLimits,
    pub planner: PlannerParams,
}

/// Race parameter file as written on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RaceParamsFile {
    pub limits: LimitsRecord,
    pub planner: PlannerParams,
}

/// The `[limits]` table, every field is optional at the file level so that missing fields can be
/// reported by name.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LimitsRecord {
    pub max_vel_ms: Option<f64>,
    pub max_acc_mss: Option<f64>,
    pub max_jerk_msss: Option<f64>,
    pub max_snap_mssss: Option<f64>,
    pub max_thrust_mss: Option<f64>,
    pub max_body_rate_rads: Option<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors in the race parameters.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{field} must be strictly positive, found {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("{field} must be finite, found {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("Required parameter {0} is missing")]
    Missing(&'static str),

    #[error("Invalid planner parameter {field}: {reason}")]
    InvalidPlannerParam { field: &'static str, reason: String },

    #[error("Cannot load the race parameters: {0}")]
    Load(util::params::LoadError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RaceParams {
    /// Load and validate race parameters from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let file: RaceParamsFile = util::params::load(path).map_err(ConfigurationError::Load)?;
        Self::from_file(file)
    }

    /// Parse and validate race parameters from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigurationError> {
        let file: RaceParamsFile = util::params::from_str(s).map_err(ConfigurationError::Load)?;
        Self::from_file(file)
    }

    /// Validate the file record.
    pub fn from_file(file: RaceParamsFile) -> Result<Self, ConfigurationError> {
        let limits = file.limits.into_limits()?;
        file.planner.validate()?;

        Ok(Self {
            limits,
            planner: file.planner,
        })
    }
}

impl LimitsRecord {
    pub fn into_limits(self) -> Result<DynamicLimits, ConfigurationError> {
        let limits = DynamicLimits {
            max_vel_ms: self
                .max_vel_ms
                .ok_or(ConfigurationError::Missing("max_vel_ms"))?,
            max_acc_mss: self
                .max_acc_mss
                .ok_or(ConfigurationError::Missing("max_acc_mss"))?,
            max_jerk_msss: self
                .max_jerk_msss
                .ok_or(ConfigurationError::Missing("max_jerk_msss"))?,
            max_snap_mssss: self.max_snap_mssss,
            max_thrust_mss: self.max_thrust_mss,
            max_body_rate_rads: self.max_body_rate_rads,
        };

        limits.validate()?;

        Ok(limits)
    }
}
