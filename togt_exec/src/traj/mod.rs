//! # Trajectory module
//!
//! This module defines the piecewise polynomial trajectory produced by the race planner. The
//! trajectory is made up of a number of segments, one per pair of consecutive gates, each of which
//! is a degree 7 polynomial per spatial axis defined on its own local time interval
//! `[0, duration]`.
//!
//! Global time runs from zero at the start of the first segment to the total duration at the end
//! of the last one. Evaluating outside of that range is an error, the trajectory never
//! extrapolates or clamps.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod extremum;
pub mod flatness;
pub mod persist;
pub mod poly;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub use extremum::{Extremum, Quantity, TrajExtremum};
pub use flatness::{FlatState, GRAVITY_MSS};
pub use persist::{SegmentRecord, TrajectoryRecord};
pub use poly::{Coeffs, NUM_COEFFS};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Largest number of points any sampling method will produce.
pub const MAX_SAMPLES: usize = 10_000_000;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One polynomial piece of the trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialSegment {
    duration_s: f64,
    coeffs: Coeffs,
}

/// A piecewise polynomial trajectory through the race track.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialTrajectory {
    segments: Vec<PolynomialSegment>,

    /// Global start time of each segment
    start_times_s: Vec<f64>,

    duration_s: f64,
}

/// The kinematic state of the trajectory at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajPoint {
    /// Global time of the point
    pub t_s: f64,

    pub position_m: Vector3<f64>,

    pub velocity_ms: Vector3<f64>,

    pub acceleration_mss: Vector3<f64>,

    pub jerk_msss: Vector3<f64>,

    pub snap_mssss: Vector3<f64>,
}

/// State of the trajectory at a segment boundary, i.e. where it passes a gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Index of the gate in the track
    pub index: usize,

    pub t_s: f64,

    pub position_m: Vector3<f64>,

    pub velocity_ms: Vector3<f64>,

    pub acceleration_mss: Vector3<f64>,

    pub jerk_msss: Vector3<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TrajError {
    #[error("Time {t} s is outside of the trajectory's range [0, {duration}] s")]
    OutOfRange { t: f64, duration: f64 },

    #[error("Attempted to create a trajectory with no segments")]
    Empty,

    #[error("Segment {index} is invalid: {reason}")]
    InvalidSegment { index: usize, reason: String },

    #[error("Invalid sampling parameter: {0}")]
    InvalidSampling(String),

    #[error("Unsupported file extension for {0:?}, expected .json or .csv")]
    UnsupportedExtension(std::path::PathBuf),

    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("JSON error: {0}")]
    Json(serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(csv::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PolynomialSegment {
    /// Create a new segment, the duration must be positive and all values finite.
    pub fn new(duration_s: f64, coeffs: Coeffs) -> Result<Self, TrajError> {
        if !duration_s.is_finite() || duration_s <= 0.0 {
            return Err(TrajError::InvalidSegment {
                index: 0,
                reason: format!("duration must be positive and finite, found {}", duration_s),
            });
        }
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(TrajError::InvalidSegment {
                index: 0,
                reason: "coefficients must be finite".into(),
            });
        }

        Ok(Self { duration_s, coeffs })
    }

    pub fn duration_s(&self) -> f64 {
        self.duration_s
    }

    pub fn coeffs(&self) -> &Coeffs {
        &self.coeffs
    }

    /// The `order`-th derivative at local time `t_s`.
    ///
    /// No range checking is performed, this is the raw polynomial.
    pub fn derivative(&self, t_s: f64, order: usize) -> Vector3<f64> {
        poly::eval(&self.coeffs, t_s, order)
    }

    /// The full kinematic state at local time `t_s`, stamped with the given global time.
    fn point(&self, t_s: f64, global_t_s: f64) -> TrajPoint {
        TrajPoint {
            t_s: global_t_s,
            position_m: self.derivative(t_s, 0),
            velocity_ms: self.derivative(t_s, 1),
            acceleration_mss: self.derivative(t_s, 2),
            jerk_msss: self.derivative(t_s, 3),
            snap_mssss: self.derivative(t_s, 4),
        }
    }
}

impl PolynomialTrajectory {
    /// Build a trajectory from a sequence of segments, in traversal order.
    pub fn new(segments: Vec<PolynomialSegment>) -> Result<Self, TrajError> {
        if segments.is_empty() {
            return Err(TrajError::Empty);
        }

        let mut start_times_s = Vec::with_capacity(segments.len());
        let mut duration_s = 0.0;
        for seg in segments.iter() {
            start_times_s.push(duration_s);
            duration_s += seg.duration_s;
        }

        Ok(Self {
            segments,
            start_times_s,
            duration_s,
        })
    }

    /// Build a trajectory directly from per-segment durations and coefficients.
    pub fn from_parts(durations_s: &[f64], coeffs: &[Coeffs]) -> Result<Self, TrajError> {
        if durations_s.len() != coeffs.len() {
            return Err(TrajError::InvalidSegment {
                index: durations_s.len().min(coeffs.len()),
                reason: format!(
                    "{} durations given for {} coefficient sets",
                    durations_s.len(),
                    coeffs.len()
                ),
            });
        }

        let segments = durations_s
            .iter()
            .zip(coeffs.iter())
            .enumerate()
            .map(|(index, (&t, c))| {
                PolynomialSegment::new(t, *c).map_err(|e| match e {
                    TrajError::InvalidSegment { reason, .. } => {
                        TrajError::InvalidSegment { index, reason }
                    }
                    e => e,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(segments)
    }

    /// Total duration of the trajectory.
    pub fn duration_s(&self) -> f64 {
        self.duration_s
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[PolynomialSegment] {
        &self.segments
    }

    /// The duration of each segment, in order.
    pub fn segment_times_s(&self) -> Vec<f64> {
        self.segments.iter().map(|s| s.duration_s).collect()
    }

    /// Global time at which the given segment starts.
    pub fn segment_start_s(&self, index: usize) -> Option<f64> {
        self.start_times_s.get(index).copied()
    }

    /// Find the segment owning global time `t_s`, returning its index and the local time within
    /// it.
    ///
    /// A time exactly on a boundary belongs to the later segment, except for the end of the
    /// trajectory which belongs to the last segment.
    pub fn locate(&self, t_s: f64) -> Result<(usize, f64), TrajError> {
        if !(t_s >= 0.0 && t_s <= self.duration_s) {
            return Err(TrajError::OutOfRange {
                t: t_s,
                duration: self.duration_s,
            });
        }

        let index = self
            .start_times_s
            .partition_point(|&start| start <= t_s)
            .saturating_sub(1)
            .min(self.segments.len() - 1);

        Ok((index, t_s - self.start_times_s[index]))
    }

    /// The `order`-th derivative of position at global time `t_s`.
    pub fn derivative(&self, t_s: f64, order: usize) -> Result<Vector3<f64>, TrajError> {
        let (index, local_t) = self.locate(t_s)?;
        Ok(self.segments[index].derivative(local_t, order))
    }

    pub fn position(&self, t_s: f64) -> Result<Vector3<f64>, TrajError> {
        self.derivative(t_s, 0)
    }

    pub fn velocity(&self, t_s: f64) -> Result<Vector3<f64>, TrajError> {
        self.derivative(t_s, 1)
    }

    pub fn acceleration(&self, t_s: f64) -> Result<Vector3<f64>, TrajError> {
        self.derivative(t_s, 2)
    }

    pub fn jerk(&self, t_s: f64) -> Result<Vector3<f64>, TrajError> {
        self.derivative(t_s, 3)
    }

    pub fn snap(&self, t_s: f64) -> Result<Vector3<f64>, TrajError> {
        self.derivative(t_s, 4)
    }

    /// The full kinematic state at global time `t_s`.
    pub fn point(&self, t_s: f64) -> Result<TrajPoint, TrajError> {
        let (index, local_t) = self.locate(t_s)?;
        Ok(self.segments[index].point(local_t, t_s))
    }

    /// Sample the trajectory with a fixed time step.
    ///
    /// The first sample is at zero and the last exactly at the total duration, even if the
    /// duration is not a multiple of the step.
    pub fn sample_uniform(&self, dt_s: f64) -> Result<Vec<TrajPoint>, TrajError> {
        if !dt_s.is_finite() || dt_s <= 0.0 {
            return Err(TrajError::InvalidSampling(format!(
                "time step must be positive, found {}",
                dt_s
            )));
        }

        let num_steps = check_num_samples((self.duration_s / dt_s).ceil())?;
        let mut points = Vec::with_capacity(num_steps + 1);
        for i in 0..num_steps {
            points.push(self.point(i as f64 * dt_s)?);
        }
        points.push(self.point(self.duration_s)?);

        Ok(points)
    }

    /// Sample each segment at `num_per_segment` equal intervals.
    ///
    /// Every segment boundary appears exactly once in the output.
    pub fn sample_per_segment(&self, num_per_segment: usize) -> Result<Vec<TrajPoint>, TrajError> {
        if num_per_segment == 0 {
            return Err(TrajError::InvalidSampling(
                "at least one sample per segment is required".into(),
            ));
        }

        let total = check_num_samples(self.segments.len() as f64 * num_per_segment as f64)?;
        let mut points = Vec::with_capacity(total + 1);
        for (seg, &start_s) in self.segments.iter().zip(self.start_times_s.iter()) {
            for j in 0..num_per_segment {
                let local_t = util::maths::lin_map(
                    (0.0, num_per_segment as f64),
                    (0.0, seg.duration_s),
                    j as f64,
                );
                points.push(seg.point(local_t, start_s + local_t));
            }
        }
        points.push(self.point(self.duration_s)?);

        Ok(points)
    }

    /// Sample the trajectory with a step adapted to the speed.
    ///
    /// Each step is chosen so that neither the distance travelled (to first order) exceeds
    /// `max_ds_m` nor the elapsed time exceeds `max_dt_s`.
    pub fn sample_adaptive(
        &self,
        max_ds_m: f64,
        max_dt_s: f64,
    ) -> Result<Vec<TrajPoint>, TrajError> {
        if !(max_ds_m > 0.0 && max_ds_m.is_finite() && max_dt_s > 0.0 && max_dt_s.is_finite()) {
            return Err(TrajError::InvalidSampling(format!(
                "adaptive bounds must be positive, found ds = {}, dt = {}",
                max_ds_m, max_dt_s
            )));
        }

        // Never step shorter than this fraction of the time bound, so stationary points do not
        // stall the sampler
        let min_dt_s = max_dt_s * 1e-3;
        check_num_samples((self.duration_s / min_dt_s).ceil())?;

        let mut points = Vec::new();
        let mut t_s = 0.0;
        while t_s < self.duration_s {
            let point = self.point(t_s)?;
            let speed = point.velocity_ms.norm();
            let dt_s = if speed > max_ds_m / max_dt_s {
                (max_ds_m / speed).max(min_dt_s)
            } else {
                max_dt_s
            };
            points.push(point);
            t_s += dt_s;
        }
        points.push(self.point(self.duration_s)?);

        Ok(points)
    }

    /// The state at every segment boundary, one waypoint per gate.
    pub fn waypoints(&self) -> Vec<Waypoint> {
        let mut waypoints = Vec::with_capacity(self.segments.len() + 1);

        for (index, (seg, &start_s)) in self
            .segments
            .iter()
            .zip(self.start_times_s.iter())
            .enumerate()
        {
            waypoints.push(Waypoint::from_segment(index, seg, 0.0, start_s));
        }

        let last = self.segments.len() - 1;
        waypoints.push(Waypoint::from_segment(
            last + 1,
            &self.segments[last],
            self.segments[last].duration_s,
            self.duration_s,
        ));

        waypoints
    }

    /// The largest jump in any derivative up to `max_order` across an interior segment boundary.
    pub fn max_continuity_error(&self, max_order: usize) -> f64 {
        self.segments
            .windows(2)
            .flat_map(|pair| {
                (0..=max_order).map(move |order| {
                    (pair[0].derivative(pair[0].duration_s, order) - pair[1].derivative(0.0, order))
                        .amax()
                })
            })
            .fold(0.0, f64::max)
    }
}

impl Waypoint {
    fn from_segment(index: usize, seg: &PolynomialSegment, local_t: f64, t_s: f64) -> Self {
        Self {
            index,
            t_s,
            position_m: seg.derivative(local_t, 0),
            velocity_ms: seg.derivative(local_t, 1),
            acceleration_mss: seg.derivative(local_t, 2),
            jerk_msss: seg.derivative(local_t, 3),
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Check a requested number of samples against `MAX_SAMPLES`.
fn check_num_samples(num: f64) -> Result<usize, TrajError> {
    if num.is_finite() && num <= MAX_SAMPLES as f64 {
        Ok(num as usize)
    } else {
        Err(TrajError::InvalidSampling(format!(
            "{} samples requested, at most {} are allowed",
            num, MAX_SAMPLES
        )))
    }
}
