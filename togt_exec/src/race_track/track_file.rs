//! Race track file format
//!
//! Track files are TOML. The gates are defined by name and traversed in the order given by the
//! `order` list, so the same gate may be flown through more than once:
//!
//! ```toml
//! order = ["g1", "g2", "g1"]
//!
//! [init_state]
//! pos = [0.0, 0.0, 1.0]
//!
//! [end_state]
//! pos = [10.0, 0.0, 1.0]
//! vel = [2.0, 0.0, 0.0]
//!
//! [gates.g1]
//! position = [4.0, 1.0, 1.5]
//! shape = { type = "SingleBall", radius = 0.5, margin = 0.1 }
//!
//! [gates.g2]
//! position = [7.0, -1.0, 1.5]
//! stationary = false
//! shape = { type = "RectanglePrisma", rpy_deg = [0.0, 0.0, 90.0], length = 0.4, width = 1.5, height = 1.5, margin_w = 0.2, margin_h = 0.2 }
//! ```
//!
//! Other shapes are `TrianglePrisma` (`width`, `height`, `margin`), `PentagonPrisma` (`radius`,
//! `margin`) and `HexagonPrisma` (`side`, `margin`). All prisms take an optional `rpy_deg` and
//! `length`, a missing length is a flat gate. Unknown keys are ignored.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::Deserialize;
use std::collections::HashMap;

use super::{BoundaryState, Gate, GateShape, Track, TrackError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A track file as written on disk.
#[derive(Debug, Deserialize)]
pub struct TrackFile {
    pub init_state: StateRecord,
    pub end_state: StateRecord,

    /// Names of the gates in traversal order
    #[serde(default)]
    pub order: Vec<String>,

    #[serde(default)]
    pub gates: HashMap<String, GateRecord>,
}

/// A boundary state, unspecified derivatives are zero.
#[derive(Debug, Deserialize)]
pub struct StateRecord {
    pub pos: [f64; 3],

    #[serde(default)]
    pub vel: [f64; 3],

    #[serde(default)]
    pub acc: [f64; 3],

    #[serde(default)]
    pub jer: [f64; 3],
}

#[derive(Debug, Deserialize)]
pub struct GateRecord {
    pub position: [f64; 3],

    pub shape: ShapeRecord,

    #[serde(default = "default_stationary")]
    pub stationary: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ShapeRecord {
    SingleBall {
        radius: f64,

        #[serde(default)]
        margin: f64,
    },

    TrianglePrisma {
        #[serde(default)]
        rpy_deg: [f64; 3],

        #[serde(default)]
        length: f64,

        width: f64,
        height: f64,

        #[serde(default)]
        margin: f64,
    },

    RectanglePrisma {
        #[serde(default)]
        rpy_deg: [f64; 3],

        #[serde(default)]
        length: f64,

        width: f64,
        height: f64,

        #[serde(default)]
        margin_w: f64,

        #[serde(default)]
        margin_h: f64,
    },

    PentagonPrisma {
        #[serde(default)]
        rpy_deg: [f64; 3],

        #[serde(default)]
        length: f64,

        radius: f64,

        #[serde(default)]
        margin: f64,
    },

    HexagonPrisma {
        #[serde(default)]
        rpy_deg: [f64; 3],

        #[serde(default)]
        length: f64,

        side: f64,

        #[serde(default)]
        margin: f64,
    },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrackFile {
    /// Resolve the gate order and validate the track.
    pub fn into_track(self) -> Result<Track, TrackError> {
        let gates = self
            .order
            .iter()
            .map(|name| match self.gates.get(name) {
                Some(rec) => Ok(rec.to_gate(name)),
                None => Err(TrackError::UnknownGate(name.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Track::through_gates(self.init_state.to_state(), gates, self.end_state.to_state())
    }
}

impl StateRecord {
    pub fn to_state(&self) -> BoundaryState {
        BoundaryState {
            position_m: Vector3::from(self.pos),
            velocity_ms: Vector3::from(self.vel),
            acceleration_mss: Vector3::from(self.acc),
            jerk_msss: Vector3::from(self.jer),
        }
    }
}

impl GateRecord {
    pub fn to_gate(&self, name: &str) -> Gate {
        let shape = match self.shape {
            ShapeRecord::SingleBall { radius, margin } => GateShape::SingleBall {
                radius_m: radius,
                margin_m: margin,
            },
            ShapeRecord::TrianglePrisma {
                rpy_deg,
                length,
                width,
                height,
                margin,
            } => GateShape::TrianglePrisma {
                rpy_rad: to_rad(rpy_deg),
                length_m: length,
                width_m: width,
                height_m: height,
                margin_m: margin,
            },
            ShapeRecord::RectanglePrisma {
                rpy_deg,
                length,
                width,
                height,
                margin_w,
                margin_h,
            } => GateShape::RectanglePrisma {
                rpy_rad: to_rad(rpy_deg),
                length_m: length,
                width_m: width,
                height_m: height,
                margin_w_m: margin_w,
                margin_h_m: margin_h,
            },
            ShapeRecord::PentagonPrisma {
                rpy_deg,
                length,
                radius,
                margin,
            } => GateShape::PentagonPrisma {
                rpy_rad: to_rad(rpy_deg),
                length_m: length,
                radius_m: radius,
                margin_m: margin,
            },
            ShapeRecord::HexagonPrisma {
                rpy_deg,
                length,
                side,
                margin,
            } => GateShape::HexagonPrisma {
                rpy_rad: to_rad(rpy_deg),
                length_m: length,
                side_m: side,
                margin_m: margin,
            },
        };

        Gate {
            name: name.into(),
            position_m: Vector3::from(self.position),
            shape,
            stationary: self.stationary,
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_stationary() -> bool {
    true
}

fn to_rad(deg: [f64; 3]) -> Vector3<f64> {
    Vector3::from(deg).map(f64::to_radians)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::race_track::Corridor;

    const TRACK_TOML: &str = r#"
order = ["g1", "g2", "g1"]

[init_state]
pos = [0.0, 0.0, 1.0]

[end_state]
pos = [10.0, 0.0, 1.0]
vel = [2.0, 0.0, 0.0]

[gates.g1]
position = [4.0, 1.0, 1.5]
shape = { type = "SingleBall", radius = 0.5, margin = 0.1 }

[gates.g2]
position = [7.0, -1.0, 1.5]
stationary = false
shape = { type = "RectanglePrisma", rpy_deg = [0.0, 0.0, 90.0], width = 1.5, height = 1.5, margin_w = 0.2, margin_h = 0.2 }
"#;

    const PRISMS_TOML: &str = r#"
order = ["tri", "rect", "pent", "hex"]

[init_state]
pos = [0.0, 0.0, 1.0]

[end_state]
pos = [20.0, 0.0, 1.0]

[gates.tri]
position = [4.0, 0.0, 1.5]
shape = { type = "TrianglePrisma", length = 0.2, width = 6.0, height = 4.0, margin = 0.5, midpoints = 0 }

[gates.rect]
position = [8.0, 0.0, 1.5]
shape = { type = "RectanglePrisma", rpy_deg = [0.0, 0.0, 30.0], length = 0.5, width = 2.0, height = 1.0, margin_w = 0.1, margin_h = 0.1 }

[gates.pent]
position = [12.0, 0.0, 1.5]
shape = { type = "PentagonPrisma", length = 1.0, radius = 1.0, margin = 0.1 }

[gates.hex]
position = [16.0, 0.0, 1.5]
shape = { type = "HexagonPrisma", rpy_deg = [0.0, 90.0, 0.0], side = 1.0 }
"#;

    #[test]
    fn test_parse_track() {
        let file: TrackFile = util::params::from_str(TRACK_TOML).unwrap();
        let track = file.into_track().unwrap();

        // start + 3 ordered gates + end
        assert_eq!(track.gates().len(), 5);
        assert_eq!(track.num_segments(), 4);
        assert_eq!(track.gates()[1].name, "g1");
        assert_eq!(track.gates()[3].name, "g1");
        assert!(!track.gates()[2].stationary);
        assert_eq!(track.end_state().velocity_ms, Vector3::new(2.0, 0.0, 0.0));

        match track.corridors()[2] {
            Corridor::Box { half_extents_m, .. } => {
                assert!((half_extents_m - Vector3::new(0.0, 0.55, 0.55)).norm() < 1e-12)
            }
            _ => panic!("Expected a box corridor"),
        }
    }

    #[test]
    fn test_parse_prisms() {
        let file: TrackFile = util::params::from_str(PRISMS_TOML).unwrap();
        let track = file.into_track().unwrap();
        let corridors = track.corridors();

        match corridors[1] {
            Corridor::Cylinder {
                centre_m,
                radius_m,
                half_length_m,
                ..
            } => {
                assert!((radius_m - 1.0).abs() < 1e-12);
                assert!((half_length_m - 0.1).abs() < 1e-12);
                assert!((centre_m - Vector3::new(4.0, 0.0, 1.0)).norm() < 1e-12);
            }
            _ => panic!("Expected a cylinder corridor for the triangle"),
        }

        match corridors[2] {
            Corridor::Box { half_extents_m, .. } => {
                assert!((half_extents_m - Vector3::new(0.25, 0.9, 0.4)).norm() < 1e-12)
            }
            _ => panic!("Expected a box corridor for the rectangle"),
        }

        match corridors[3] {
            Corridor::Cylinder {
                radius_m,
                half_length_m,
                ..
            } => {
                let expected = (std::f64::consts::PI / 5.0).cos() - 0.1;
                assert!((radius_m - expected).abs() < 1e-12);
                assert!((half_length_m - 0.5).abs() < 1e-12);
            }
            _ => panic!("Expected a cylinder corridor for the pentagon"),
        }

        // Pitched up by 90 degrees the hexagon's axis is vertical, with no length it is a
        // horizontal disc
        let hex = corridors[4];
        match hex {
            Corridor::Cylinder {
                radius_m,
                half_length_m,
                ..
            } => {
                assert!((radius_m - 0.75_f64.sqrt()).abs() < 1e-12);
                assert_eq!(half_length_m, 0.0);
            }
            _ => panic!("Expected a cylinder corridor for the hexagon"),
        }
        assert!(hex.contains(&Vector3::new(16.8, 0.0, 1.5), 1e-12));
        assert!(!hex.contains(&Vector3::new(16.0, 0.0, 1.6), 1e-3));
    }

    #[test]
    fn test_negative_length() {
        let toml = PRISMS_TOML.replace("length = 1.0", "length = -1.0");
        let file: TrackFile = util::params::from_str(&toml).unwrap();
        assert!(matches!(
            file.into_track(),
            Err(TrackError::NegativeLength { gate, .. }) if gate == "pent"
        ));
    }

    #[test]
    fn test_unknown_gate() {
        let toml = TRACK_TOML.replace(r#"order = ["g1", "g2", "g1"]"#, r#"order = ["g3"]"#);
        let file: TrackFile = util::params::from_str(&toml).unwrap();
        assert!(matches!(
            file.into_track(),
            Err(TrackError::UnknownGate(name)) if name == "g3"
        ));
    }

    #[test]
    fn test_load_missing() {
        assert!(matches!(
            Track::load("/this/path/does/not/exist.toml"),
            Err(TrackError::Load(_))
        ));
    }
}
