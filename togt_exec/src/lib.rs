//! # TOGT race planner library.
//!
//! Plans time optimal trajectories for a multirotor racing through a sequence of gates, subject to
//! the vehicle's dynamic limits.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Planner - optimises segment durations and gate crossing points of a race
pub mod planner;

/// Race parameters - vehicle dynamic limits and planner tuning
pub mod race_params;

/// Race track - gates, their corridors and the boundary states of the race
pub mod race_track;

/// Trajectory - piecewise polynomial trajectories, their evaluation, extrema and persistence
pub mod traj;
