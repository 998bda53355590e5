//! Saving and loading of trajectories.
//!
//! Two formats are supported, chosen by file extension:
//!
//! - `.json` - the exact polynomial representation, which can be loaded back.
//! - `.csv` - the trajectory sampled at a fixed period along with the flat state (attitude, body
//!   rates and thrust), for use by external tools.
//!
//! Waypoints (the state at each gate) are always saved as JSON.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use csv::WriterBuilder;
use serde::{Deserialize, Serialize};

use super::{Coeffs, FlatState, PolynomialTrajectory, TrajError, GRAVITY_MSS, NUM_COEFFS};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Sample period used when saving a trajectory as CSV.
pub const DEFAULT_SAMPLE_PERIOD_S: f64 = 0.01;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Serialisable form of a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub duration_s: f64,
    pub segments: Vec<SegmentRecord>,
}

/// Serialisable form of one segment, coefficients are lowest power first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub duration_s: f64,
    pub x: [f64; NUM_COEFFS],
    pub y: [f64; NUM_COEFFS],
    pub z: [f64; NUM_COEFFS],
}

/// One row of a sampled trajectory CSV.
#[derive(Debug, Serialize)]
struct SampleRow {
    t: f64,
    p_x: f64,
    p_y: f64,
    p_z: f64,
    q_w: f64,
    q_x: f64,
    q_y: f64,
    q_z: f64,
    v_x: f64,
    v_y: f64,
    v_z: f64,
    w_x: f64,
    w_y: f64,
    w_z: f64,
    a_x: f64,
    a_y: f64,
    a_z: f64,
    j_x: f64,
    j_y: f64,
    j_z: f64,
    thrust: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PolynomialTrajectory {
    /// Convert into the serialisable representation.
    pub fn to_record(&self) -> TrajectoryRecord {
        TrajectoryRecord {
            duration_s: self.duration_s(),
            segments: self
                .segments()
                .iter()
                .map(|seg| {
                    let c = seg.coeffs();
                    let mut rec = SegmentRecord {
                        duration_s: seg.duration_s(),
                        x: [0.0; NUM_COEFFS],
                        y: [0.0; NUM_COEFFS],
                        z: [0.0; NUM_COEFFS],
                    };
                    for k in 0..NUM_COEFFS {
                        rec.x[k] = c[(k, 0)];
                        rec.y[k] = c[(k, 1)];
                        rec.z[k] = c[(k, 2)];
                    }
                    rec
                })
                .collect(),
        }
    }

    /// Rebuild a trajectory from its serialisable representation.
    ///
    /// The stored total duration is informative only, it is recomputed from the segments.
    pub fn from_record(record: &TrajectoryRecord) -> Result<Self, TrajError> {
        let durations: Vec<f64> = record.segments.iter().map(|s| s.duration_s).collect();
        let coeffs: Vec<Coeffs> = record
            .segments
            .iter()
            .map(|s| {
                let mut c = Coeffs::zeros();
                for k in 0..NUM_COEFFS {
                    c[(k, 0)] = s.x[k];
                    c[(k, 1)] = s.y[k];
                    c[(k, 2)] = s.z[k];
                }
                c
            })
            .collect();

        Self::from_parts(&durations, &coeffs)
    }

    /// Save the trajectory, the format is chosen from the extension of `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TrajError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => self.save_json(path),
            Some("csv") => self.save_csv(path, DEFAULT_SAMPLE_PERIOD_S, GRAVITY_MSS),
            _ => Err(TrajError::UnsupportedExtension(path.to_path_buf())),
        }
    }

    /// Save the polynomial representation as JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), TrajError> {
        let file = File::create(path).map_err(TrajError::Io)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.to_record())
            .map_err(TrajError::Json)
    }

    /// Sample the trajectory every `period_s` and save the states as CSV.
    pub fn save_csv<P: AsRef<Path>>(
        &self,
        path: P,
        period_s: f64,
        gravity_mss: f64,
    ) -> Result<(), TrajError> {
        let points = self.sample_uniform(period_s)?;

        let mut writer = WriterBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(TrajError::Csv)?;

        for p in points.iter() {
            let flat = FlatState::from_point(p, gravity_mss);
            let q = flat.attitude_q.quaternion();
            writer
                .serialize(SampleRow {
                    t: p.t_s,
                    p_x: p.position_m.x,
                    p_y: p.position_m.y,
                    p_z: p.position_m.z,
                    q_w: q.w,
                    q_x: q.i,
                    q_y: q.j,
                    q_z: q.k,
                    v_x: p.velocity_ms.x,
                    v_y: p.velocity_ms.y,
                    v_z: p.velocity_ms.z,
                    w_x: flat.body_rates_rads.x,
                    w_y: flat.body_rates_rads.y,
                    w_z: flat.body_rates_rads.z,
                    a_x: p.acceleration_mss.x,
                    a_y: p.acceleration_mss.y,
                    a_z: p.acceleration_mss.z,
                    j_x: p.jerk_msss.x,
                    j_y: p.jerk_msss.y,
                    j_z: p.jerk_msss.z,
                    thrust: flat.thrust_mss,
                })
                .map_err(TrajError::Csv)?;
        }

        writer.flush().map_err(TrajError::Io)
    }

    /// Save the state at each gate as JSON.
    pub fn save_waypoints<P: AsRef<Path>>(&self, path: P) -> Result<(), TrajError> {
        let file = File::create(path).map_err(TrajError::Io)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.waypoints())
            .map_err(TrajError::Json)
    }

    /// Load a trajectory previously saved as JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrajError> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return Err(TrajError::UnsupportedExtension(path.to_path_buf()));
        }

        let file = File::open(path).map_err(TrajError::Io)?;
        let record: TrajectoryRecord =
            serde_json::from_reader(BufReader::new(file)).map_err(TrajError::Json)?;

        Self::from_record(&record)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::planner::minco::{boundary_matrix, solve};
    use crate::race_track::BoundaryState;
    use crate::traj::Waypoint;
    use nalgebra::Vector3;

    fn test_traj() -> PolynomialTrajectory {
        let mut c0 = Coeffs::zeros();
        c0[(1, 0)] = 1.0;
        c0[(3, 2)] = 0.5;
        let mut c1 = Coeffs::zeros();
        c1[(0, 0)] = 1.0;
        c1[(0, 2)] = 0.5;
        c1[(2, 1)] = -0.25;
        PolynomialTrajectory::from_parts(&[1.0, 0.5], &[c0, c1]).unwrap()
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("togt_persist_{}_{}", std::process::id(), name));
        path
    }

    /// A minimum snap trajectory, its coefficients are not exactly representable in decimal.
    fn solved_traj() -> PolynomialTrajectory {
        let head = boundary_matrix(&BoundaryState::at_rest(Vector3::new(0.1, -0.3, 1.0)));
        let tail = boundary_matrix(&BoundaryState {
            position_m: Vector3::new(9.7, 1.3, 1.9),
            velocity_ms: Vector3::new(2.3, -0.7, 0.1),
            acceleration_mss: Vector3::new(0.3, 0.0, -0.2),
            jerk_msss: Vector3::zeros(),
        });
        let inner = [Vector3::new(3.1, 2.2, 1.7), Vector3::new(6.3, -1.9, 1.1)];
        solve(&[1.37, 0.93, 1.61], &head, &tail, &inner)
            .unwrap()
            .trajectory()
            .unwrap()
    }

    #[test]
    fn test_json_save_load() {
        for traj in [test_traj(), solved_traj()].iter() {
            let path = temp_path("traj.json");

            traj.save(&path).unwrap();
            let loaded = PolynomialTrajectory::load(&path).unwrap();
            std::fs::remove_file(&path).ok();

            // Bit exact, not just close
            assert_eq!(loaded.to_record(), traj.to_record());
            assert_eq!(&loaded, traj);

            for (a, b) in loaded
                .sample_uniform(0.05)
                .unwrap()
                .iter()
                .zip(traj.sample_uniform(0.05).unwrap().iter())
            {
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_csv_save() {
        let traj = test_traj();
        let path = temp_path("traj.csv");

        traj.save_csv(&path, 0.25, GRAVITY_MSS).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "t,p_x,p_y,p_z,q_w,q_x,q_y,q_z,v_x,v_y,v_z,w_x,w_y,w_z,\
             a_x,a_y,a_z,j_x,j_y,j_z,thrust"
        );
        // 0.0 to 1.5 in steps of 0.25 is 7 rows
        assert_eq!(lines.count(), 7);
    }

    #[test]
    fn test_waypoints_save() {
        let traj = test_traj();
        let path = temp_path("wpts.json");

        traj.save_waypoints(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let wpts: Vec<Waypoint> = serde_json::from_str(&contents).unwrap();
        assert_eq!(wpts, traj.waypoints());
    }

    #[test]
    fn test_unsupported_extension() {
        let traj = test_traj();
        assert!(matches!(
            traj.save(temp_path("traj.yaml")),
            Err(TrajError::UnsupportedExtension(_))
        ));
        assert!(matches!(
            PolynomialTrajectory::load(temp_path("traj.csv")),
            Err(TrajError::UnsupportedExtension(_))
        ));
    }
}
