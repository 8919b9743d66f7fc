//! Track control module state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::trace;
use nalgebra::Vector2;
use serde::Serialize;

// Internal
use super::*;
use crate::track::ReferencePath;
use comms_if::sim::VehicleControl;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Conversion from meters/second to kilometers/hour.
pub const MS_TO_KMH: f64 = 3.6;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct TrackCtrl {
    params: Params,

    projector: PathProjector,
    smoother: ErrorSmoother,

    /// Controller object used to calculate the control demands
    controller: PdController,

    speed: SpeedState,

    /// Throttle demand of the previous cycle
    throttle: f64,

    report: StatusReport,
}

/// Input data to TrackCtrl for one cycle.
#[derive(Debug, Copy, Clone)]
pub struct TrackCtrlInput {
    /// Position of the vehicle on the ground plane
    pub position: Vector2<f64>,

    /// Speed along the vehicle's forward axis in meters/second
    pub forward_speed_ms: f64,
}

/// Speed history of the vehicle in km/h.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SpeedState {
    pub prev_prev_speed: Option<f64>,
    pub prev_speed: Option<f64>,
    pub curr_speed: Option<f64>,
}

/// The status report containing the monitoring quantities of the last cycle.
#[derive(Debug, Default, Copy, Clone, Serialize)]
pub struct StatusReport {
    /// Index of the closest point on the reference path
    pub closest_index: usize,

    /// Signed lateral error to the reference path
    pub lat_error: f64,

    pub steer_direction: f64,

    /// Smoothed derivative of the lateral error
    pub derivative: f64,

    pub speed_kmh: f64,

    pub steer: f64,

    pub throttle: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Potential errors that can occur during processing of the module.
#[derive(Debug, thiserror::Error)]
pub enum TrackCtrlError {
    #[error("Invalid reference path: {0}")]
    InvalidPath(#[from] ProjectorError),

    #[error("Invalid smoother configuration: {0}")]
    InvalidSmoother(#[from] SmootherError),

    /// The position or speed of the vehicle is not finite.
    #[error("Vehicle pose is not finite: position {0:?}, speed {1} m/s")]
    InvalidPose(Vector2<f64>, f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrackCtrl {
    /// Initialise the TrackCtrl module.
    pub fn new(path: &ReferencePath, params: Params) -> Result<Self, TrackCtrlError> {
        let projector = PathProjector::new(path.points().to_vec())?;
        let smoother = ErrorSmoother::new(params.deriv_window)?;
        let controller = PdController::new(&params);

        Ok(Self {
            throttle: params.initial_throttle,
            params,
            projector,
            smoother,
            controller,
            speed: SpeedState::default(),
            report: StatusReport::default(),
        })
    }

    /// Process track control.
    ///
    /// Processing involves:
    ///  1. Projecting the vehicle position onto the reference path
    ///  1. Smoothing the derivative of the lateral error
    ///  1. Updating the throttle demand from the speed error
    ///  1. Calculating the steering demand
    pub fn proc(
        &mut self,
        input: &TrackCtrlInput,
    ) -> Result<(VehicleControl, StatusReport), TrackCtrlError> {
        if !(input.position[0].is_finite()
            && input.position[1].is_finite()
            && input.forward_speed_ms.is_finite())
        {
            return Err(TrackCtrlError::InvalidPose(
                input.position,
                input.forward_speed_ms,
            ));
        }

        self.report = StatusReport::default();

        let proj = self.projector.project(&input.position);
        let derivative = self.smoother.update(proj.signed_error);

        let speed_kmh = input.forward_speed_ms * MS_TO_KMH;
        self.speed.push(speed_kmh);
        self.throttle =
            self.controller
                .throttle(speed_kmh, self.params.target_speed_kmh, self.throttle);

        let steer = self.controller.steer(proj.signed_error, derivative);

        self.report = StatusReport {
            closest_index: proj.closest_index,
            lat_error: proj.signed_error,
            steer_direction: proj.steer_direction,
            derivative,
            speed_kmh,
            steer,
            throttle: self.throttle,
        };

        trace!("TrackCtrl status: {:?}", self.report);

        Ok((VehicleControl::drive(steer, self.throttle), self.report))
    }

    /// Clear the error history and return the throttle to its initial value.
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.speed = SpeedState::default();
        self.throttle = self.params.initial_throttle;
        self.report = StatusReport::default();
    }

    /// Report of the last cycle.
    pub fn report(&self) -> &StatusReport {
        &self.report
    }

    pub fn speed_state(&self) -> &SpeedState {
        &self.speed
    }
}

impl SpeedState {
    /// Shift the history and insert the newest speed.
    pub fn push(&mut self, speed_kmh: f64) {
        self.prev_prev_speed = self.prev_speed;
        self.prev_speed = self.curr_speed;
        self.curr_speed = Some(speed_kmh);
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::track::FitParams;
    use std::f64::consts::PI;

    /// Counter-clockwise circle waypoints starting on the +x axis.
    fn circle(radius: f64, num_points: usize) -> Vec<Vector2<f64>> {
        (0..num_points)
            .map(|i| {
                let a = 2.0 * PI * i as f64 / num_points as f64;
                Vector2::new(radius * a.cos(), radius * a.sin())
            })
            .collect()
    }

    fn interpolated_circle() -> ReferencePath {
        ReferencePath::fit(
            &circle(50.0, 8),
            &FitParams {
                smoothing: 0.0,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn input(x: f64, y: f64, speed_ms: f64) -> TrackCtrlInput {
        TrackCtrlInput {
            position: Vector2::new(x, y),
            forward_speed_ms: speed_ms,
        }
    }

    #[test]
    fn test_on_circle_steer_is_dither() {
        let path = interpolated_circle();
        let mut ctrl = TrackCtrl::new(
            &path,
            Params {
                k_p: 1.0,
                k_d: 0.0,
                dither_seed: Some(3),
                ..Default::default()
            },
        )
        .unwrap();

        for _ in 0..20 {
            let (cmd, report) = ctrl.proc(&input(50.0, 0.0, 8.0)).unwrap();

            assert_eq!(report.closest_index, 0);
            assert!(report.lat_error.abs() < 0.02);
            assert!(cmd.steer.abs() <= 0.07);
            assert_eq!(cmd.brake, 0.0);
            assert!(!cmd.hand_brake);
            assert!(!cmd.reverse);
        }
    }

    #[test]
    fn test_outside_circle_steers_back() {
        let path = interpolated_circle();
        let mut ctrl = TrackCtrl::new(
            &path,
            Params {
                k_p: 2.0,
                k_d: 0.0,
                steer_dither: 0.0,
                ..Default::default()
            },
        )
        .unwrap();

        // 5 units outside the circle is to the right of a counter-clockwise path
        let (cmd, report) = ctrl.proc(&input(55.0, 0.0, 0.0)).unwrap();

        assert_eq!(report.closest_index, 0);
        assert!((report.lat_error + 5.0).abs() < 1e-9);
        assert_eq!(report.derivative, 0.0);
        assert!((cmd.steer - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_throttle_follows_speed_error() {
        let path = interpolated_circle();
        let mut ctrl = TrackCtrl::new(&path, Params::default()).unwrap();

        // 5 m/s is 18 km/h, 12 km/h below target
        let (cmd, report) = ctrl.proc(&input(50.0, 0.0, 5.0)).unwrap();
        assert!((report.speed_kmh - 18.0).abs() < 1e-12);
        assert_eq!(cmd.throttle, 1.0);

        // 10 m/s is 36 km/h, 6 km/h above target
        let (cmd, _) = ctrl.proc(&input(50.0, 0.0, 10.0)).unwrap();
        assert!((cmd.throttle - 0.4).abs() < 1e-12);

        assert_eq!(ctrl.speed_state().prev_speed, Some(report.speed_kmh));
        assert_eq!(ctrl.speed_state().prev_prev_speed, None);

        ctrl.reset();
        assert_eq!(ctrl.speed_state().curr_speed, None);
        let (cmd, _) = ctrl.proc(&input(50.0, 0.0, 30.0 / MS_TO_KMH)).unwrap();
        assert!((cmd.throttle - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_derivative_after_three_cycles() {
        let path = interpolated_circle();
        let mut ctrl = TrackCtrl::new(
            &path,
            Params {
                steer_dither: 0.0,
                ..Default::default()
            },
        )
        .unwrap();

        for _ in 0..2 {
            let (_, report) = ctrl.proc(&input(51.0, 0.0, 8.0)).unwrap();
            assert_eq!(report.derivative, 0.0);
        }

        // Moving outwards makes the error more negative
        let (_, report) = ctrl.proc(&input(53.0, 0.0, 8.0)).unwrap();
        assert!(report.derivative < 0.0);
    }

    #[test]
    fn test_invalid_pose() {
        let path = interpolated_circle();
        let mut ctrl = TrackCtrl::new(&path, Params::default()).unwrap();

        assert!(matches!(
            ctrl.proc(&input(f64::NAN, 0.0, 1.0)),
            Err(TrackCtrlError::InvalidPose(_, _))
        ));
        assert!(matches!(
            ctrl.proc(&input(50.0, 0.0, f64::INFINITY)),
            Err(TrackCtrlError::InvalidPose(_, _))
        ));

        // Rejected cycles leave the throttle and speed history alone
        assert_eq!(ctrl.speed_state().curr_speed, None);
        let (cmd, _) = ctrl.proc(&input(50.0, 0.0, 30.0 / MS_TO_KMH)).unwrap();
        assert!((cmd.throttle - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_window_rejected() {
        let path = interpolated_circle();

        assert!(matches!(
            TrackCtrl::new(
                &path,
                Params {
                    deriv_window: 0,
                    ..Default::default()
                }
            ),
            Err(TrackCtrlError::InvalidSmoother(SmootherError::ZeroWindow))
        ));
    }

    #[test]
    fn test_smoothed_waypoints_close_to_path() {
        let waypoints = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(40.0, -3.0),
            Vector2::new(80.0, 5.0),
            Vector2::new(95.0, 40.0),
            Vector2::new(70.0, 75.0),
            Vector2::new(30.0, 80.0),
            Vector2::new(-5.0, 55.0),
            Vector2::new(-15.0, 20.0),
        ];
        let path = ReferencePath::fit(&waypoints, &FitParams::default()).unwrap();
        let projector = PathProjector::new(path.points().to_vec()).unwrap();

        // Total squared residual is 2, so no waypoint can be further than sqrt(2) from the curve
        for w in waypoints.iter() {
            let p = projector.project(w);
            assert!(p.signed_error.abs() < 1.5);
        }
    }
}
