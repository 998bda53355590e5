//! # Race track module
//!
//! A race track is an ordered sequence of gates together with the vehicle's state at the start
//! and end of the race. The first gate holds the start position and the last gate the end
//! position, so a track of `N + 1` gates gives `N` trajectory segments.
//!
//! Gate order is the traversal order. It is never changed by the planner.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod gate;
mod track_file;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::debug;
use nalgebra::Vector3;
use serde::Serialize;
use std::path::Path;

pub use gate::*;
pub use track_file::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Tolerance radius of the gates generated around the start and end states when a track is
/// built from interior gates only.
pub const BOUNDARY_GATE_RADIUS_M: f64 = 0.1;

/// Numerical slack allowed when checking that a boundary position lies in its gate.
const BOUNDARY_SLACK_M: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Kinematic state of the vehicle at the start or end of the race.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundaryState {
    pub position_m: Vector3<f64>,
    pub velocity_ms: Vector3<f64>,
    pub acceleration_mss: Vector3<f64>,
    pub jerk_msss: Vector3<f64>,
}

/// A validated race track.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    gates: Vec<Gate>,
    corridors: Vec<Corridor>,
    init_state: BoundaryState,
    end_state: BoundaryState,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("A track needs at least two gates (start and end), found {0}")]
    TooFewGates(usize),

    #[error("Gate {gate} has a non-positive usable tolerance ({value} m)")]
    NonPositiveTolerance { gate: String, value: f64 },

    #[error("Gate {gate} has a negative length ({value} m)")]
    NegativeLength { gate: String, value: f64 },

    #[error("The {what} is not finite")]
    NonFiniteValue { what: String },

    #[error("The {which} boundary state is inconsistent with the track: {reason}")]
    InconsistentBoundary { which: &'static str, reason: String },

    #[error("The track order refers to an undefined gate: {0}")]
    UnknownGate(String),

    #[error("Cannot load the track file: {0}")]
    Load(util::params::LoadError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl BoundaryState {
    /// The vehicle at rest (hovering) at the given position.
    pub fn at_rest(position_m: Vector3<f64>) -> Self {
        Self {
            position_m,
            velocity_ms: Vector3::zeros(),
            acceleration_mss: Vector3::zeros(),
            jerk_msss: Vector3::zeros(),
        }
    }

    /// The derivative of the given order, position being order 0.
    pub fn derivative(&self, order: usize) -> Vector3<f64> {
        match order {
            0 => self.position_m,
            1 => self.velocity_ms,
            2 => self.acceleration_mss,
            3 => self.jerk_msss,
            _ => Vector3::zeros(),
        }
    }

    fn is_finite(&self) -> bool {
        (0..4).all(|d| self.derivative(d).iter().all(|v| v.is_finite()))
    }
}

impl Track {
    /// Create a new track from gates in traversal order.
    ///
    /// The start state's position must lie in the first gate and the end state's in the last.
    pub fn new(
        gates: Vec<Gate>,
        init_state: BoundaryState,
        end_state: BoundaryState,
    ) -> Result<Self, TrackError> {
        if gates.len() < 2 {
            return Err(TrackError::TooFewGates(gates.len()));
        }

        let corridors = gates
            .iter()
            .map(|g| g.corridor())
            .collect::<Result<Vec<_>, _>>()?;

        for (which, state, corridor) in [
            ("start", &init_state, &corridors[0]),
            ("end", &end_state, &corridors[corridors.len() - 1]),
        ]
        .iter()
        {
            if !state.is_finite() {
                return Err(TrackError::NonFiniteValue {
                    what: format!("{} boundary state", which),
                });
            }

            let dist = corridor.distance_outside(&state.position_m);
            if dist > BOUNDARY_SLACK_M {
                return Err(TrackError::InconsistentBoundary {
                    which: *which,
                    reason: format!("position is {:.3} m outside of its gate", dist),
                });
            }
        }

        debug!(
            "Track created with {} gates ({} segments)",
            gates.len(),
            gates.len() - 1
        );

        Ok(Self {
            gates,
            corridors,
            init_state,
            end_state,
        })
    }

    /// Create a track passing through `gates`, with small ball gates generated around the start
    /// and end positions.
    pub fn through_gates(
        init_state: BoundaryState,
        gates: Vec<Gate>,
        end_state: BoundaryState,
    ) -> Result<Self, TrackError> {
        let mut all = Vec::with_capacity(gates.len() + 2);
        all.push(Gate::ball("start", init_state.position_m, BOUNDARY_GATE_RADIUS_M));
        all.extend(gates);
        all.push(Gate::ball("end", end_state.position_m, BOUNDARY_GATE_RADIUS_M));

        Self::new(all, init_state, end_state)
    }

    /// Load a track from a TOML track file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrackError> {
        let file: TrackFile = util::params::load(path).map_err(TrackError::Load)?;
        file.into_track()
    }

    /// Re-run the checks of `new`.
    pub fn validate(&self) -> Result<(), TrackError> {
        Self::new(self.gates.clone(), self.init_state, self.end_state).map(|_| ())
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    pub fn corridors(&self) -> &[Corridor] {
        &self.corridors
    }

    pub fn init_state(&self) -> &BoundaryState {
        &self.init_state
    }

    pub fn end_state(&self) -> &BoundaryState {
        &self.end_state
    }

    pub fn num_segments(&self) -> usize {
        self.gates.len() - 1
    }

    /// Gates between the first and the last, whose crossing points the planner is free to move.
    pub fn interior_corridors(&self) -> &[Corridor] {
        &self.corridors[1..self.corridors.len() - 1]
    }

    /// Reference positions of the gates, with the start and end positions in place of the first
    /// and last gate centres.
    pub fn reference_points_m(&self) -> Vec<Vector3<f64>> {
        let mut points: Vec<Vector3<f64>> = self.corridors.iter().map(|c| c.centre_m()).collect();
        let last = points.len() - 1;
        points[0] = self.init_state.position_m;
        points[last] = self.end_state.position_m;
        points
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_two_gates() {
        let track = Track::through_gates(
            BoundaryState::at_rest(Vector3::zeros()),
            vec![],
            BoundaryState::at_rest(Vector3::new(10.0, 0.0, 0.0)),
        )
        .unwrap();

        assert_eq!(track.num_segments(), 1);
        assert!(track.interior_corridors().is_empty());
        assert_eq!(track.reference_points_m()[1], Vector3::new(10.0, 0.0, 0.0));
        assert!(track.validate().is_ok());
    }

    #[test]
    fn test_too_few_gates() {
        let res = Track::new(
            vec![Gate::ball("only", Vector3::zeros(), 1.0)],
            BoundaryState::at_rest(Vector3::zeros()),
            BoundaryState::at_rest(Vector3::zeros()),
        );
        assert!(matches!(res, Err(TrackError::TooFewGates(1))));
    }

    #[test]
    fn test_zero_tolerance() {
        let res = Track::new(
            vec![
                Gate::ball("a", Vector3::zeros(), 0.0),
                Gate::ball("b", Vector3::new(10.0, 0.0, 0.0), 0.0),
            ],
            BoundaryState::at_rest(Vector3::zeros()),
            BoundaryState::at_rest(Vector3::new(10.0, 0.0, 0.0)),
        );
        assert!(matches!(
            res,
            Err(TrackError::NonPositiveTolerance { .. })
        ));
    }

    #[test]
    fn test_inconsistent_boundary() {
        let res = Track::new(
            vec![
                Gate::ball("a", Vector3::zeros(), 0.5),
                Gate::ball("b", Vector3::new(10.0, 0.0, 0.0), 0.5),
            ],
            BoundaryState::at_rest(Vector3::zeros()),
            BoundaryState::at_rest(Vector3::new(11.0, 0.0, 0.0)),
        );
        assert!(matches!(
            res,
            Err(TrackError::InconsistentBoundary { which: "end", .. })
        ));

        let mut init = BoundaryState::at_rest(Vector3::zeros());
        init.velocity_ms.x = std::f64::NAN;
        let res = Track::new(
            vec![
                Gate::ball("a", Vector3::zeros(), 0.5),
                Gate::ball("b", Vector3::new(10.0, 0.0, 0.0), 0.5),
            ],
            init,
            BoundaryState::at_rest(Vector3::new(10.0, 0.0, 0.0)),
        );
        assert!(matches!(res, Err(TrackError::NonFiniteValue { .. })));
    }
}
