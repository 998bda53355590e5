//! Gates and the corridors they define
//!
//! Prism gates share a frame: the gate's local x axis is the direction of travel through it, the
//! opening lies in the local y-z plane (width along y, height along z), and the opening is
//! extruded `length_m` along x. A zero length gate is a flat opening the trajectory must cross in
//! its plane.
//!
//! Rectangular openings give a box corridor. Triangular, pentagonal and hexagonal openings give a
//! cylinder corridor with the radius of the circle inscribed in the opening.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Matrix2, Matrix3, Rotation3, Vector2, Vector3};
use serde::Serialize;
use std::f64::consts::PI;

use super::TrackError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A gate the trajectory must pass through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gate {
    pub name: String,

    /// Reference (centre) position of the gate.
    ///
    /// Units: meters,
    /// Frame: World
    pub position_m: Vector3<f64>,

    pub shape: GateShape,

    /// False if the gate may move during the race. The planner treats every gate as fixed, the
    /// flag is carried for downstream consumers.
    pub stationary: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Physical shape of a gate. Orientations are roll, pitch and yaw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum GateShape {
    /// A sphere, the usable radius is `radius_m - margin_m`.
    SingleBall { radius_m: f64, margin_m: f64 },

    /// An isosceles triangle opening, base along the local y axis at the bottom and apex on
    /// the local z axis at the top.
    TrianglePrisma {
        rpy_rad: Vector3<f64>,
        length_m: f64,
        width_m: f64,
        height_m: f64,
        margin_m: f64,
    },

    RectanglePrisma {
        rpy_rad: Vector3<f64>,
        length_m: f64,
        width_m: f64,
        height_m: f64,
        margin_w_m: f64,
        margin_h_m: f64,
    },

    /// A regular pentagon opening with the given circumradius.
    PentagonPrisma {
        rpy_rad: Vector3<f64>,
        length_m: f64,
        radius_m: f64,
        margin_m: f64,
    },

    /// A regular hexagon opening with the given side length.
    HexagonPrisma {
        rpy_rad: Vector3<f64>,
        length_m: f64,
        side_m: f64,
        margin_m: f64,
    },
}

/// The region a trajectory's boundary point may lie in to count as passing a gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Corridor {
    Ball {
        centre_m: Vector3<f64>,
        radius_m: f64,
    },

    /// An oriented box, `half_extents_m` are along the gate's local axes.
    Box {
        centre_m: Vector3<f64>,
        rotation: Rotation3<f64>,
        half_extents_m: Vector3<f64>,
    },

    /// An oriented cylinder with its axis along the gate's local x axis.
    Cylinder {
        centre_m: Vector3<f64>,
        rotation: Rotation3<f64>,
        radius_m: f64,
        half_length_m: f64,
    },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Gate {
    /// A ball gate with the given usable tolerance radius and no margin.
    pub fn ball<S: Into<String>>(name: S, position_m: Vector3<f64>, tolerance_m: f64) -> Self {
        Self {
            name: name.into(),
            position_m,
            shape: GateShape::SingleBall {
                radius_m: tolerance_m,
                margin_m: 0.0,
            },
            stationary: true,
        }
    }

    /// Build the corridor of this gate, checking that it has a usable (strictly positive) size.
    pub fn corridor(&self) -> Result<Corridor, TrackError> {
        if self.position_m.iter().any(|v| !v.is_finite()) {
            return Err(TrackError::NonFiniteValue {
                what: format!("position of gate {}", self.name),
            });
        }

        match self.shape {
            GateShape::SingleBall { radius_m, margin_m } => {
                let tolerance = radius_m - margin_m;
                self.check_tolerance(tolerance)?;

                Ok(Corridor::Ball {
                    centre_m: self.position_m,
                    radius_m: tolerance,
                })
            }
            GateShape::RectanglePrisma {
                rpy_rad,
                length_m,
                width_m,
                height_m,
                margin_w_m,
                margin_h_m,
            } => {
                let rotation = self.rotation(&rpy_rad)?;
                let half_length = self.half_length(length_m)?;

                let half_w = 0.5 * width_m - margin_w_m;
                let half_h = 0.5 * height_m - margin_h_m;
                self.check_tolerance(half_w.min(half_h))?;

                Ok(Corridor::Box {
                    centre_m: self.position_m,
                    rotation,
                    half_extents_m: Vector3::new(half_length, half_w, half_h),
                })
            }
            GateShape::TrianglePrisma {
                rpy_rad,
                length_m,
                width_m,
                height_m,
                margin_m,
            } => {
                self.check_tolerance(width_m.min(height_m))?;

                let leg = (0.25 * width_m * width_m + height_m * height_m).sqrt();
                let inradius = width_m * height_m / (width_m + 2.0 * leg);

                // The incentre sits one inradius above the base
                let offset = Vector3::new(0.0, 0.0, inradius - 0.5 * height_m);
                self.cylinder(&rpy_rad, length_m, inradius - margin_m, offset)
            }
            GateShape::PentagonPrisma {
                rpy_rad,
                length_m,
                radius_m,
                margin_m,
            } => self.cylinder(
                &rpy_rad,
                length_m,
                radius_m * (PI / 5.0).cos() - margin_m,
                Vector3::zeros(),
            ),
            GateShape::HexagonPrisma {
                rpy_rad,
                length_m,
                side_m,
                margin_m,
            } => self.cylinder(
                &rpy_rad,
                length_m,
                side_m * (PI / 6.0).cos() - margin_m,
                Vector3::zeros(),
            ),
        }
    }

    /// Cylinder corridor of a polygonal prism, `offset_m` is the centre of the inscribed circle
    /// in the gate frame.
    fn cylinder(
        &self,
        rpy_rad: &Vector3<f64>,
        length_m: f64,
        radius_m: f64,
        offset_m: Vector3<f64>,
    ) -> Result<Corridor, TrackError> {
        let rotation = self.rotation(rpy_rad)?;
        let half_length_m = self.half_length(length_m)?;
        self.check_tolerance(radius_m)?;

        Ok(Corridor::Cylinder {
            centre_m: self.position_m + rotation * offset_m,
            rotation,
            radius_m,
            half_length_m,
        })
    }

    fn rotation(&self, rpy_rad: &Vector3<f64>) -> Result<Rotation3<f64>, TrackError> {
        if rpy_rad.iter().any(|v| !v.is_finite()) {
            return Err(TrackError::NonFiniteValue {
                what: format!("orientation of gate {}", self.name),
            });
        }

        Ok(Rotation3::from_euler_angles(rpy_rad.x, rpy_rad.y, rpy_rad.z))
    }

    fn half_length(&self, length_m: f64) -> Result<f64, TrackError> {
        if !length_m.is_finite() {
            Err(TrackError::NonFiniteValue {
                what: format!("length of gate {}", self.name),
            })
        } else if length_m < 0.0 {
            Err(TrackError::NegativeLength {
                gate: self.name.clone(),
                value: length_m,
            })
        } else {
            Ok(0.5 * length_m)
        }
    }

    fn check_tolerance(&self, value: f64) -> Result<(), TrackError> {
        if !value.is_finite() {
            Err(TrackError::NonFiniteValue {
                what: format!("tolerance of gate {}", self.name),
            })
        } else if value <= 0.0 {
            Err(TrackError::NonPositiveTolerance {
                gate: self.name.clone(),
                value,
            })
        } else {
            Ok(())
        }
    }
}

impl Corridor {
    pub fn centre_m(&self) -> Vector3<f64> {
        match self {
            Corridor::Ball { centre_m, .. } => *centre_m,
            Corridor::Box { centre_m, .. } => *centre_m,
            Corridor::Cylinder { centre_m, .. } => *centre_m,
        }
    }

    /// How far the point is outside the corridor, zero if it is inside.
    pub fn distance_outside(&self, point_m: &Vector3<f64>) -> f64 {
        match self {
            Corridor::Ball { centre_m, radius_m } => {
                ((point_m - centre_m).norm() - radius_m).max(0.0)
            }
            Corridor::Box {
                centre_m,
                rotation,
                half_extents_m,
            } => {
                let local = rotation.inverse() * (point_m - centre_m);
                local
                    .abs()
                    .zip_map(half_extents_m, |l, h| (l - h).max(0.0))
                    .norm()
            }
            Corridor::Cylinder {
                centre_m,
                rotation,
                radius_m,
                half_length_m,
            } => {
                let local = rotation.inverse() * (point_m - centre_m);
                let axial = (local.x.abs() - half_length_m).max(0.0);
                let radial = (Vector2::new(local.y, local.z).norm() - radius_m).max(0.0);
                axial.hypot(radial)
            }
        }
    }

    pub fn contains(&self, point_m: &Vector3<f64>, tol_m: f64) -> bool {
        self.distance_outside(point_m) <= tol_m
    }

    /// Map an unconstrained variable to a point strictly inside the corridor. Zero maps to the
    /// centre.
    pub fn map(&self, xi: &Vector3<f64>) -> Vector3<f64> {
        match self {
            Corridor::Ball { centre_m, radius_m } => {
                centre_m + xi * (*radius_m / (1.0 + xi.norm_squared()).sqrt())
            }
            Corridor::Box {
                centre_m,
                rotation,
                half_extents_m,
            } => centre_m + rotation * xi.map(f64::tanh).component_mul(half_extents_m),
            Corridor::Cylinder {
                centre_m,
                rotation,
                radius_m,
                half_length_m,
            } => {
                let radial = Vector2::new(xi.y, xi.z);
                let radial = radial * (*radius_m / (1.0 + radial.norm_squared()).sqrt());
                centre_m
                    + rotation * Vector3::new(half_length_m * xi.x.tanh(), radial.x, radial.y)
            }
        }
    }

    /// Jacobian of `map`, element `(i, j)` is the derivative of point component `i` with respect
    /// to `xi[j]`.
    pub fn map_jacobian(&self, xi: &Vector3<f64>) -> Matrix3<f64> {
        match self {
            Corridor::Ball { radius_m, .. } => {
                let s = 1.0 + xi.norm_squared();
                let sqrt_s = s.sqrt();
                (Matrix3::identity() / sqrt_s - xi * xi.transpose() / (s * sqrt_s)) * *radius_m
            }
            Corridor::Box {
                rotation,
                half_extents_m,
                ..
            } => {
                let diag = xi
                    .map(|x| 1.0 - x.tanh().powi(2))
                    .component_mul(half_extents_m);
                rotation.matrix() * Matrix3::from_diagonal(&diag)
            }
            Corridor::Cylinder {
                rotation,
                radius_m,
                half_length_m,
                ..
            } => {
                let eta = Vector2::new(xi.y, xi.z);
                let s = 1.0 + eta.norm_squared();
                let sqrt_s = s.sqrt();
                let radial =
                    (Matrix2::identity() / sqrt_s - eta * eta.transpose() / (s * sqrt_s)) * *radius_m;

                let mut local = Matrix3::zeros();
                local[(0, 0)] = half_length_m * (1.0 - xi.x.tanh().powi(2));
                local.fixed_view_mut::<2, 2>(1, 1).copy_from(&radial);
                rotation.matrix() * local
            }
        }
    }
}
