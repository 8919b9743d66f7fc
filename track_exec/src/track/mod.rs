//! # Track model
//!
//! The track is given as an ordered list of waypoints around a closed circuit. A periodic
//! smoothing spline is fitted through them, and then resampled into a dense sequence of points
//! which the path projector searches every cycle.
//!
//! The dense points follow the waypoint order, which is the direction of travel, and wrap around
//! so that point 0 follows the last point.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod spline;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use csv::ReaderBuilder;
use log::{debug, info};
use nalgebra::Vector2;
use serde::Deserialize;
use std::path::Path;

use spline::{PeriodicCurve, SplineError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Minimum number of distinct waypoints for a periodic cubic fit.
pub const MIN_WAYPOINTS: usize = 4;

/// Waypoints closer than this are considered the same point.
const COINCIDENT_TOL: f64 = 1e-9;

/// Waypoints closer than this fraction of the mean waypoint spacing are merged into one.
const MERGE_REL_TOL: f64 = 1e-2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the track fit.
#[derive(Debug, Clone, Deserialize)]
pub struct FitParams {
    /// Budget for the total squared residual of the spline fit
    pub smoothing: f64,

    /// Number of points in the dense sample sequence
    pub num_samples: usize,

    /// Factor applied to the coordinates read from a track data file
    pub file_scale: f64,
}

/// The fitted reference path of the track.
#[derive(Debug, Clone)]
pub struct ReferencePath {
    curve: PeriodicCurve,

    /// Waypoints used in the fit, after duplicates were removed
    waypoints: Vec<Vector2<f64>>,

    /// Dense samples of the curve
    points: Vec<Vector2<f64>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TrackFitError {
    #[error("At least 4 distinct waypoints are required, found {0}")]
    NotEnoughWaypoints(usize),

    #[error("Waypoint {0} is not finite")]
    NonFiniteWaypoint(usize),

    #[error("The waypoints are collinear, no closed loop can be formed")]
    Degenerate,

    #[error("The dense sample sequence needs at least 2 points, requested {0}")]
    TooFewSamples(usize),

    #[error("Could not fit the track spline: {0}")]
    Spline(SplineError),
}

#[derive(Debug, thiserror::Error)]
pub enum TrackLoadError {
    #[error("Could not open the track data file: {0}")]
    Open(csv::Error),

    #[error("Could not read row {0} of the track data file: {1}")]
    Read(usize, csv::Error),

    #[error("Row {0} of the track data file has fewer than 2 columns")]
    MissingColumn(usize),

    #[error("Could not parse row {0} of the track data file: {1}")]
    Parse(usize, std::num::ParseFloatError),

    #[error(transparent)]
    Fit(#[from] TrackFitError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for FitParams {
    fn default() -> Self {
        Self {
            smoothing: 2.0,
            num_samples: 10_000,
            file_scale: 0.01,
        }
    }
}

impl ReferencePath {
    /// Load the track data file and fit the reference path to it.
    pub fn load<P: AsRef<Path>>(path: P, params: &FitParams) -> Result<Self, TrackLoadError> {
        let waypoints = read_waypoints(path.as_ref(), params.file_scale)?;

        info!(
            "Loaded {} waypoints from {:?}",
            waypoints.len(),
            path.as_ref()
        );

        Ok(Self::fit(&waypoints, params)?)
    }

    /// Fit the reference path to the given waypoints.
    pub fn fit(waypoints: &[Vector2<f64>], params: &FitParams) -> Result<Self, TrackFitError> {
        if let Some(i) = waypoints
            .iter()
            .position(|p| !(p[0].is_finite() && p[1].is_finite()))
        {
            return Err(TrackFitError::NonFiniteWaypoint(i));
        }

        if params.num_samples < 2 {
            return Err(TrackFitError::TooFewSamples(params.num_samples));
        }

        let waypoints = distinct_loop(waypoints);
        if waypoints.len() < MIN_WAYPOINTS {
            return Err(TrackFitError::NotEnoughWaypoints(waypoints.len()));
        }
        if is_collinear(&waypoints) {
            return Err(TrackFitError::Degenerate);
        }

        let curve =
            PeriodicCurve::fit(&waypoints, params.smoothing).map_err(TrackFitError::Spline)?;
        let points = curve.sample(params.num_samples);

        debug!(
            "Reference path fitted: {} waypoints, length {:.2}, residual {:.4}, {} samples",
            waypoints.len(),
            curve.period(),
            curve.residual(),
            points.len()
        );

        Ok(Self {
            curve,
            waypoints,
            points,
        })
    }

    /// The dense sample sequence.
    pub fn points(&self) -> &[Vector2<f64>] {
        &self.points
    }

    /// The waypoints the path was fitted to.
    pub fn waypoints(&self) -> &[Vector2<f64>] {
        &self.waypoints
    }

    /// Length of the closed waypoint polygon, which is the period of the curve parameter.
    pub fn param_length(&self) -> f64 {
        self.curve.period()
    }

    /// Evaluate the fitted curve at a parameter value.
    pub fn eval(&self, t: f64) -> Vector2<f64> {
        self.curve.eval(t)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read waypoints from a headerless CSV file of `x,y[,...]` rows, scaling them by `scale`.
pub fn read_waypoints(path: &Path, scale: f64) -> Result<Vec<Vector2<f64>>, TrackLoadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(TrackLoadError::Open)?;

    let mut waypoints = Vec::new();

    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| TrackLoadError::Read(i, e))?;

        let (x, y) = match (record.get(0), record.get(1)) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(TrackLoadError::MissingColumn(i)),
        };

        let x: f64 = x.parse().map_err(|e| TrackLoadError::Parse(i, e))?;
        let y: f64 = y.parse().map_err(|e| TrackLoadError::Parse(i, e))?;

        waypoints.push(Vector2::new(x * scale, y * scale));
    }

    Ok(waypoints)
}

/// Merge consecutive waypoints which nearly coincide, and drop the last waypoint if it closes the
/// loop onto the first.
///
/// Two waypoints nearly coincide when they are closer than `MERGE_REL_TOL` times the mean spacing
/// of the closed waypoint polygon. Keeping such a pair as separate knots leaves the spline system
/// badly conditioned.
fn distinct_loop(waypoints: &[Vector2<f64>]) -> Vec<Vector2<f64>> {
    let tol = merge_tolerance(waypoints);
    let mut distinct: Vec<Vector2<f64>> = Vec::with_capacity(waypoints.len());

    for p in waypoints {
        match distinct.last() {
            Some(last) if (p - last).norm() <= tol => (),
            _ => distinct.push(*p),
        }
    }

    while distinct.len() > 1 && (distinct[distinct.len() - 1] - distinct[0]).norm() <= tol {
        distinct.pop();
    }

    distinct
}

/// Distance under which two consecutive waypoints are merged.
fn merge_tolerance(waypoints: &[Vector2<f64>]) -> f64 {
    let n = waypoints.len();
    if n < 2 {
        return COINCIDENT_TOL;
    }

    let perimeter: f64 = (0..n)
        .map(|i| (waypoints[(i + 1) % n] - waypoints[i]).norm())
        .sum();

    (MERGE_REL_TOL * perimeter / n as f64).max(COINCIDENT_TOL)
}

/// True if all points lie on a single line.
fn is_collinear(points: &[Vector2<f64>]) -> bool {
    let origin = points[0];

    // Direction to the point furthest from the origin, so the test is scale aware
    let far = points
        .iter()
        .map(|p| p - origin)
        .fold(Vector2::zeros(), |acc: Vector2<f64>, d| {
            if d.norm() > acc.norm() {
                d
            } else {
                acc
            }
        });

    let far_norm = far.norm();
    if far_norm <= COINCIDENT_TOL {
        return true;
    }
    let dir = far / far_norm;

    points.iter().all(|p| {
        let d = p - origin;
        (dir[0] * d[1] - dir[1] * d[0]).abs() <= 1e-9 * far_norm
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::TAU;
    use std::io::Write;

    fn circle(radius: f64, num_points: usize) -> Vec<Vector2<f64>> {
        (0..num_points)
            .map(|i| {
                let a = TAU * i as f64 / num_points as f64;
                Vector2::new(radius * a.cos(), radius * a.sin())
            })
            .collect()
    }

    #[test]
    fn test_fit_produces_requested_samples() {
        let params = FitParams {
            num_samples: 500,
            ..Default::default()
        };
        let path = ReferencePath::fit(&circle(50.0, 8), &params).unwrap();

        assert_eq!(path.points().len(), 500);
        assert_eq!(path.waypoints().len(), 8);

        // Samples are spread evenly, no pair at the seam coincides
        let n = path.points().len();
        let seam = (path.points()[0] - path.points()[n - 1]).norm();
        let inner = (path.points()[1] - path.points()[0]).norm();
        assert!(seam > 0.5 * inner);
    }

    #[test]
    fn test_samples_are_evenly_spaced_in_parameter() {
        let params = FitParams {
            num_samples: 64,
            ..Default::default()
        };
        let path = ReferencePath::fit(&circle(20.0, 10), &params).unwrap();

        // Closed polygon of 10 chords
        let chord = 2.0 * 20.0 * (TAU / 20.0).sin();
        assert!((path.param_length() - 10.0 * chord).abs() < 1e-9);

        let step = path.param_length() / 64.0;
        for (k, p) in path.points().iter().enumerate() {
            assert!((path.eval(k as f64 * step) - p).norm() < 1e-12);
        }
    }

    #[test]
    fn test_samples_follow_waypoint_order() {
        // Counter-clockwise circle, so successive samples turn left
        let params = FitParams {
            smoothing: 0.0,
            num_samples: 100,
            ..Default::default()
        };
        let path = ReferencePath::fit(&circle(10.0, 8), &params).unwrap();
        let pts = path.points();

        for i in 0..pts.len() {
            let a = pts[i];
            let b = pts[(i + 1) % pts.len()];
            assert!(a[0] * b[1] - a[1] * b[0] > 0.0);
        }
    }

    #[test]
    fn test_closing_duplicate_is_dropped() {
        let mut waypoints = circle(10.0, 6);
        waypoints.push(waypoints[0]);
        waypoints.insert(2, waypoints[1]);

        let path = ReferencePath::fit(&waypoints, &FitParams::default()).unwrap();
        assert_eq!(path.waypoints().len(), 6);
    }

    fn ellipse(a: f64, b: f64, num_points: usize) -> Vec<Vector2<f64>> {
        (0..num_points)
            .map(|i| {
                let t = TAU * i as f64 / num_points as f64;
                Vector2::new(a * t.cos(), b * t.sin())
            })
            .collect()
    }

    #[test]
    fn test_nearly_closed_loop() {
        for gap in [1e-3, 1e-5, 1e-7].iter() {
            let mut waypoints = ellipse(3.0, 1.8, 60);
            waypoints.push(waypoints[0] + Vector2::new(*gap, 0.5 * gap));

            let path = ReferencePath::fit(&waypoints, &FitParams::default()).unwrap();
            assert_eq!(path.waypoints().len(), 60);
            assert!((path.waypoints()[59] - waypoints[59]).norm() < 1e-12);
        }
    }

    #[test]
    fn test_near_duplicate_waypoint_is_merged() {
        let mut waypoints = ellipse(3.0, 1.8, 60);
        waypoints.insert(11, waypoints[10] + Vector2::new(1e-7, 0.0));

        let path = ReferencePath::fit(&waypoints, &FitParams::default()).unwrap();
        assert_eq!(path.waypoints().len(), 60);
        assert_eq!(path.waypoints()[10], waypoints[10]);
        assert_eq!(path.waypoints()[11], waypoints[12]);
    }

    #[test]
    fn test_gap_larger_than_tolerance_is_kept() {
        // Half the mean spacing is well above the merge tolerance
        let mut waypoints = ellipse(3.0, 1.8, 60);
        let spacing = (waypoints[1] - waypoints[0]).norm();
        waypoints.push(waypoints[0] + Vector2::new(0.0, -0.5 * spacing));

        let path = ReferencePath::fit(&waypoints, &FitParams::default()).unwrap();
        assert_eq!(path.waypoints().len(), 61);
    }

    #[test]
    fn test_too_few_waypoints() {
        let mut waypoints = circle(10.0, 3);
        waypoints.push(waypoints[0]);

        assert_eq!(
            ReferencePath::fit(&waypoints, &FitParams::default()).unwrap_err(),
            TrackFitError::NotEnoughWaypoints(3)
        );
    }

    #[test]
    fn test_collinear_waypoints() {
        let waypoints: Vec<Vector2<f64>> = (0..6)
            .map(|i| Vector2::new(i as f64, 2.0 * i as f64 + 1.0))
            .collect();

        assert_eq!(
            ReferencePath::fit(&waypoints, &FitParams::default()).unwrap_err(),
            TrackFitError::Degenerate
        );
    }

    #[test]
    fn test_non_finite_waypoint() {
        let mut waypoints = circle(10.0, 6);
        waypoints[4][1] = f64::NAN;

        assert_eq!(
            ReferencePath::fit(&waypoints, &FitParams::default()).unwrap_err(),
            TrackFitError::NonFiniteWaypoint(4)
        );
    }

    #[test]
    fn test_read_waypoints_scales_and_ignores_extra_columns() {
        let path = std::env::temp_dir().join(format!(
            "track_exec_waypoints_{}.txt",
            std::process::id()
        ));
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "100,200,7").unwrap();
            writeln!(f, "-50.5, 0").unwrap();
            writeln!(f, "300,400,1,2").unwrap();
        }

        let waypoints = read_waypoints(&path, 0.01).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(waypoints.len(), 3);
        assert!((waypoints[0] - Vector2::new(1.0, 2.0)).norm() < 1e-12);
        assert!((waypoints[1] - Vector2::new(-0.505, 0.0)).norm() < 1e-12);
        assert!((waypoints[2] - Vector2::new(3.0, 4.0)).norm() < 1e-12);
    }

    #[test]
    fn test_read_waypoints_bad_row() {
        let path = std::env::temp_dir().join(format!(
            "track_exec_bad_waypoints_{}.txt",
            std::process::id()
        ));
        std::fs::write(&path, "1,2\n3\n").unwrap();

        let res = read_waypoints(&path, 1.0);
        std::fs::remove_file(&path).ok();

        assert!(matches!(res, Err(TrackLoadError::MissingColumn(1))));
    }
}
