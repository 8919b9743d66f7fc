//! # Episode runner
//!
//! Runs the closed control loop against the simulator for a number of episodes. Each episode the
//! simulator is configured, the player is placed at a random start spot, and then for every frame
//! the measurements are read, TrackCtrl computes the demands which are sent back, and the depth
//! frame and the demands are archived.
//!
//! Outputs of episode `N`, inside the output directory:
//!
//! - `logN.txt` - CSV log of `frame,steer,throttle,speed`, written as the episode runs.
//! - `depth_dataN.npy` - log depth of every frame, written once the episode completes.
//!
//! If the episode is interrupted or fails the depth data is discarded.
//!
//! A lost connection to the simulator is not fatal. `EpisodeRunner::run_with_retry` waits for the
//! retry delay, reconnects and starts again from episode 0, for as long as it takes.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod depth_store;
pub mod log;
pub mod settings;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use ::log::{debug, error, info, warn};
use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

// Internal
pub use self::log::{EpisodeLog, LogRecord};
pub use depth_store::{DepthStore, DepthStoreError};
pub use settings::{SettingsError, SettingsSource, SimSessionParams};

use crate::{
    sim_client::{SimClientError, SimSession},
    track_ctrl::{TrackCtrl, TrackCtrlError, TrackCtrlInput},
};
use util::{archive::ArchiveError, session::Session};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of the episode runner.
#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeParams {
    pub num_episodes: usize,

    pub frames_per_episode: usize,

    /// Name of the depth camera in the sensor data
    pub depth_camera: String,

    /// Depth frame height in pixels
    pub depth_height: usize,

    /// Depth frame width in pixels
    pub depth_width: usize,

    /// Delay before reconnecting after a connection failure, in seconds
    pub retry_delay_s: f64,

    /// Seed for the start spot and settings generator, `None` seeds from the OS
    pub seed: Option<u64>,
}

/// Runs episodes of the control loop.
pub struct EpisodeRunner<'a> {
    params: EpisodeParams,

    track_ctrl: TrackCtrl,

    settings: SettingsSource,

    /// Directory the logs and depth archives are written to
    out_dir: PathBuf,

    /// Session that episode summaries are saved into, if any
    session: Option<&'a Session>,

    interrupt: Arc<AtomicBool>,

    rng: ChaCha8Rng,

    summaries: Vec<EpisodeSummary>,
}

/// Summary of a completed episode.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub player_start: usize,
    pub num_start_spots: usize,
    pub num_frames: usize,
    pub mean_abs_lat_error: f64,
    pub max_abs_lat_error: f64,
    pub mean_speed_kmh: f64,
    pub log_path: PathBuf,
    pub depth_path: PathBuf,
}

/// Running statistics of an episode.
#[derive(Debug, Default)]
struct EpisodeStats {
    num_frames: usize,
    sum_abs_lat_error: f64,
    max_abs_lat_error: f64,
    sum_speed_kmh: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How a run ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// All episodes were completed
    Completed,

    /// The user interrupted the run
    Interrupted,
}

#[derive(Debug, thiserror::Error)]
pub enum EpisodeError {
    #[error("Simulator error: {0}")]
    Sim(#[from] SimClientError),

    #[error("Could not build the session settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Track control error: {0}")]
    TrackCtrl(#[from] TrackCtrlError),

    #[error("The sensor data does not contain the {0} camera")]
    MissingSensor(String),

    #[error("Could not archive the depth frame: {0}")]
    Depth(#[from] DepthStoreError),

    #[error("Could not write the episode log: {0}")]
    Log(#[from] ArchiveError),
}

/// How a single episode ended.
enum EpisodeOutcome {
    Completed(EpisodeSummary),
    Interrupted,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for EpisodeParams {
    fn default() -> Self {
        Self {
            num_episodes: 10,
            frames_per_episode: 10_000,
            depth_camera: "CameraDepth".into(),
            depth_height: 150,
            depth_width: 200,
            retry_delay_s: 1.0,
            seed: None,
        }
    }
}

impl<'a> EpisodeRunner<'a> {
    pub fn new(
        params: EpisodeParams,
        track_ctrl: TrackCtrl,
        settings: SettingsSource,
        out_dir: PathBuf,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        let rng = match params.seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            params,
            track_ctrl,
            settings,
            out_dir,
            session: None,
            interrupt,
            rng,
            summaries: Vec::new(),
        }
    }

    /// Save a summary of each completed episode into the session.
    pub fn with_session(mut self, session: &'a Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Summaries of the episodes completed so far.
    pub fn summaries(&self) -> &[EpisodeSummary] {
        &self.summaries
    }

    /// Run all episodes.
    ///
    /// An interrupt, either seen between frames or while waiting on the simulator, ends the run
    /// with `RunOutcome::Interrupted` rather than an error.
    pub fn run(&mut self, sim: &mut impl SimSession) -> Result<RunOutcome, EpisodeError> {
        self.summaries.clear();

        for episode in 0..self.params.num_episodes {
            match self.run_episode(episode, sim) {
                Ok(EpisodeOutcome::Completed(summary)) => {
                    if let Some(session) = self.session {
                        session.save(format!("episode_{}.json", episode), summary.clone());
                    }
                    self.summaries.push(summary);
                }
                Ok(EpisodeOutcome::Interrupted) => return Ok(RunOutcome::Interrupted),
                Err(EpisodeError::Sim(SimClientError::Interrupted)) => {
                    return Ok(RunOutcome::Interrupted)
                }
                Err(e) => {
                    if self.interrupted() {
                        warn!("Episode {} failed after an interrupt: {}", episode, e);
                        return Ok(RunOutcome::Interrupted);
                    }
                    return Err(e);
                }
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// Run all episodes, reconnecting to the simulator whenever the connection is lost.
    ///
    /// `connect` opens a new simulator session. After a connection error the runner waits for
    /// the retry delay and runs again from the first episode. Any other error ends the run.
    pub fn run_with_retry<S, F>(&mut self, mut connect: F) -> Result<RunOutcome, EpisodeError>
    where
        S: SimSession,
        F: FnMut() -> Result<S, SimClientError>,
    {
        let retry_delay = Duration::from_secs_f64(self.params.retry_delay_s.max(0.0));

        loop {
            let result = match connect() {
                Ok(mut sim) => self.run(&mut sim),
                Err(e) => Err(EpisodeError::Sim(e)),
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(EpisodeError::Sim(SimClientError::Interrupted)) => {
                    return Ok(RunOutcome::Interrupted)
                }
                Err(EpisodeError::Sim(ref e)) if e.is_connection_error() => {
                    error!("{}", e);

                    if self.interrupted() {
                        return Ok(RunOutcome::Interrupted);
                    }

                    info!("Reconnecting in {:.1} s", retry_delay.as_secs_f64());
                    thread::sleep(retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    fn run_episode(
        &mut self,
        episode: usize,
        sim: &mut impl SimSession,
    ) -> Result<EpisodeOutcome, EpisodeError> {
        if self.interrupted() {
            return Ok(EpisodeOutcome::Interrupted);
        }

        // ---- SETUP ----

        let settings = self.settings.build(&mut self.rng)?;
        let scene = sim.configure(&settings)?;

        let num_start_spots = scene.player_start_spots.len();
        let player_start = self.rng.gen_range(0..num_start_spots.max(1));

        info!(
            "Starting new episode {} at start spot {} of {}",
            episode, player_start, num_start_spots
        );
        sim.start_episode(player_start)?;

        let log_path = self.out_dir.join(format!("log{}.txt", episode));
        let depth_path = self.out_dir.join(format!("depth_data{}.npy", episode));

        let mut log = EpisodeLog::create(&log_path)?;
        let mut depth = DepthStore::new(
            self.params.depth_height,
            self.params.depth_width,
            self.params.frames_per_episode,
        );

        self.track_ctrl.reset();
        let mut stats = EpisodeStats::default();

        // ---- CONTROL LOOP ----

        for frame in 0..self.params.frames_per_episode {
            if self.interrupted() {
                info!("Episode {} interrupted at frame {}", episode, frame);
                return Ok(EpisodeOutcome::Interrupted);
            }

            let (measurements, sensor_data) = sim.read_data()?;
            let player = &measurements.player_measurements;

            info!(
                "Vehicle at ({:.1}, {:.1}), {:.0} km/h",
                player.location.x,
                player.location.y,
                player.forward_speed_ms * crate::track_ctrl::MS_TO_KMH
            );

            let (control, report) = self.track_ctrl.proc(&TrackCtrlInput {
                position: Vector2::new(player.location.x, player.location.y),
                forward_speed_ms: player.forward_speed_ms,
            })?;

            debug!(
                "steer_direction = {:.2} prop = {:.2} deriv = {:.5} throttle = {:.2} \
                 curr_speed = {:.2} steer = {:.2}",
                report.steer_direction,
                report.lat_error,
                report.derivative,
                report.throttle,
                report.speed_kmh,
                report.steer
            );

            sim.send_control(&control)?;

            let depth_frame = sensor_data
                .get(&self.params.depth_camera)
                .ok_or_else(|| EpisodeError::MissingSensor(self.params.depth_camera.clone()))?;
            depth.capture(frame, depth_frame)?;

            log.write(LogRecord {
                frame,
                steer: control.steer,
                throttle: control.throttle,
                speed: report.speed_kmh,
            })?;

            stats.push(report.lat_error, report.speed_kmh);
        }

        // ---- ARCHIVE ----

        depth.save(&depth_path)?;

        info!(
            "Episode {} complete, {} frames logged to {:?}",
            episode,
            log.num_rows(),
            log.path()
        );

        Ok(EpisodeOutcome::Completed(EpisodeSummary {
            episode,
            player_start,
            num_start_spots,
            num_frames: stats.num_frames,
            mean_abs_lat_error: stats.mean_abs_lat_error(),
            max_abs_lat_error: stats.max_abs_lat_error,
            mean_speed_kmh: stats.mean_speed_kmh(),
            log_path,
            depth_path,
        }))
    }
}

impl EpisodeStats {
    fn push(&mut self, lat_error: f64, speed_kmh: f64) {
        self.num_frames += 1;
        self.sum_abs_lat_error += lat_error.abs();
        self.max_abs_lat_error = self.max_abs_lat_error.max(lat_error.abs());
        self.sum_speed_kmh += speed_kmh;
    }

    fn mean_abs_lat_error(&self) -> f64 {
        match self.num_frames {
            0 => 0.0,
            n => self.sum_abs_lat_error / n as f64,
        }
    }

    fn mean_speed_kmh(&self) -> f64 {
        match self.num_frames {
            0 => 0.0,
            n => self.sum_speed_kmh / n as f64,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        track::{FitParams, ReferencePath},
        track_ctrl::Params,
    };
    use comms_if::sim::{
        Location, Measurements, PlayerMeasurements, SceneDescription, SensorData, SensorFrame,
        SettingsSpec, VehicleControl,
    };
    use std::{cell::Cell, f64::consts::PI, rc::Rc};

    const DEPTH_W: u32 = 4;
    const DEPTH_H: u32 = 3;

    /// In-memory simulator holding the vehicle still on a circle of radius 50.
    struct MockSession {
        num_start_spots: usize,
        settings: Vec<SettingsSpec>,
        starts: Vec<usize>,
        controls: Vec<VehicleControl>,
        num_reads: usize,
        send_depth: bool,

        /// Set the interrupt flag on this read
        interrupt_on_read: Option<(usize, Arc<AtomicBool>)>,

        /// Fail this read as if the connection dropped
        fail_on_read: Option<usize>,

        /// Number of configure calls, shared by all sessions of a test
        num_configures: Rc<Cell<usize>>,
    }

    impl MockSession {
        fn new(num_start_spots: usize) -> Self {
            Self {
                num_start_spots,
                settings: Vec::new(),
                starts: Vec::new(),
                controls: Vec::new(),
                num_reads: 0,
                send_depth: true,
                interrupt_on_read: None,
                fail_on_read: None,
                num_configures: Rc::new(Cell::new(0)),
            }
        }
    }

    impl SimSession for MockSession {
        fn configure(
            &mut self,
            settings: &SettingsSpec,
        ) -> Result<SceneDescription, SimClientError> {
            self.settings.push(settings.clone());
            self.num_configures.set(self.num_configures.get() + 1);
            Ok(SceneDescription {
                player_start_spots: vec![Location::default(); self.num_start_spots],
            })
        }

        fn start_episode(&mut self, player_start: usize) -> Result<(), SimClientError> {
            self.starts.push(player_start);
            Ok(())
        }

        fn read_data(&mut self) -> Result<(Measurements, SensorData), SimClientError> {
            if let Some((n, ref flag)) = self.interrupt_on_read {
                if self.num_reads == n {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            if self.fail_on_read == Some(self.num_reads) {
                return Err(SimClientError::NotConnected);
            }
            self.num_reads += 1;

            let measurements = Measurements {
                frame_number: self.num_reads as u64,
                game_timestamp_ms: 100 * self.num_reads as u64,
                player_measurements: PlayerMeasurements {
                    location: Location {
                        x: 50.0,
                        y: 0.0,
                        z: 0.0,
                    },
                    forward_speed_ms: 8.0,
                },
                num_non_player_agents: 0,
            };

            let mut sensor_data = SensorData::new();
            if self.send_depth {
                sensor_data.insert(
                    "CameraDepth".into(),
                    SensorFrame::from_values(
                        DEPTH_W,
                        DEPTH_H,
                        &vec![10.0; (DEPTH_W * DEPTH_H) as usize],
                    ),
                );
            }

            Ok((measurements, sensor_data))
        }

        fn send_control(&mut self, control: &VehicleControl) -> Result<(), SimClientError> {
            self.controls.push(*control);
            Ok(())
        }
    }

    fn out_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "track_exec_episode_{}_{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn runner(
        num_episodes: usize,
        frames: usize,
        dir: PathBuf,
        interrupt: Arc<AtomicBool>,
    ) -> EpisodeRunner<'static> {
        let waypoints: Vec<_> = (0..8)
            .map(|i| {
                let a = 2.0 * PI * i as f64 / 8.0;
                Vector2::new(50.0 * a.cos(), 50.0 * a.sin())
            })
            .collect();
        let path = ReferencePath::fit(
            &waypoints,
            &FitParams {
                smoothing: 0.0,
                num_samples: 1000,
                ..Default::default()
            },
        )
        .unwrap();

        let track_ctrl = TrackCtrl::new(
            &path,
            Params {
                k_p: 1.0,
                dither_seed: Some(5),
                ..Default::default()
            },
        )
        .unwrap();

        EpisodeRunner::new(
            EpisodeParams {
                num_episodes,
                frames_per_episode: frames,
                depth_height: DEPTH_H as usize,
                depth_width: DEPTH_W as usize,
                seed: Some(11),
                retry_delay_s: 0.0,
                ..Default::default()
            },
            track_ctrl,
            SettingsSource::Raw("SynchronousMode=true".into()),
            dir,
            interrupt,
        )
    }

    #[test]
    fn test_run_completes_all_episodes() {
        let dir = out_dir("complete");
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut runner = runner(2, 5, dir.clone(), interrupt);
        let mut sim = MockSession::new(3);

        assert_eq!(runner.run(&mut sim).unwrap(), RunOutcome::Completed);

        // One control per frame, all driving forward
        assert_eq!(sim.controls.len(), 10);
        for c in sim.controls.iter() {
            assert_eq!(c.brake, 0.0);
            assert!(!c.hand_brake && !c.reverse);
            assert!(c.throttle >= 0.25 && c.throttle <= 1.0);
        }

        assert_eq!(sim.settings.len(), 2);
        assert_eq!(sim.starts.len(), 2);
        assert!(sim.starts.iter().all(|s| *s < 3));

        for ep in 0..2 {
            let log = std::fs::read_to_string(dir.join(format!("log{}.txt", ep))).unwrap();
            let lines: Vec<&str> = log.lines().collect();
            assert_eq!(lines.len(), 6);
            assert_eq!(lines[0], "frame,steer,throttle,speed");
            assert!(lines[5].starts_with("4,"));

            let depth = std::fs::read(dir.join(format!("depth_data{}.npy", ep))).unwrap();
            assert_eq!(&depth[..6], b"\x93NUMPY");
        }

        let summaries = runner.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].num_frames, 5);
        assert!(summaries[0].max_abs_lat_error < 0.02);
        assert!((summaries[0].mean_speed_kmh - 28.8).abs() < 1e-9);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_no_start_spots_uses_zero() {
        let dir = out_dir("no_starts");
        let mut runner = runner(3, 1, dir.clone(), Arc::new(AtomicBool::new(false)));
        let mut sim = MockSession::new(0);

        assert_eq!(runner.run(&mut sim).unwrap(), RunOutcome::Completed);
        assert_eq!(sim.starts, vec![0, 0, 0]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_interrupt_skips_archive() {
        let dir = out_dir("interrupt");
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut runner = runner(2, 5, dir.clone(), interrupt.clone());
        let mut sim = MockSession::new(1);
        sim.interrupt_on_read = Some((2, interrupt));

        assert_eq!(runner.run(&mut sim).unwrap(), RunOutcome::Interrupted);

        // The frame being read when the interrupt arrived is still finished
        assert_eq!(sim.controls.len(), 3);
        assert_eq!(sim.starts.len(), 1);
        assert!(!dir.join("depth_data0.npy").exists());
        assert!(runner.summaries().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_depth_sensor() {
        let dir = out_dir("missing_depth");
        let mut runner = runner(1, 5, dir.clone(), Arc::new(AtomicBool::new(false)));
        let mut sim = MockSession::new(1);
        sim.send_depth = false;

        match runner.run(&mut sim) {
            Err(EpisodeError::MissingSensor(name)) => assert_eq!(name, "CameraDepth"),
            r => panic!("Expected a missing sensor error, got {:?}", r),
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_connection_loss_restarts_from_first_episode() {
        let dir = out_dir("retry");
        let mut runner = runner(2, 5, dir.clone(), Arc::new(AtomicBool::new(false)));

        let num_configures = Rc::new(Cell::new(0));
        let mut num_connects = 0;

        let outcome = runner
            .run_with_retry(|| {
                num_connects += 1;
                let mut sim = MockSession::new(2);
                sim.num_configures = num_configures.clone();

                // The first session drops during the second episode
                if num_connects == 1 {
                    sim.fail_on_read = Some(7);
                }
                Ok(sim)
            })
            .unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(num_connects, 2);

        // Two episodes on the first session, then both again on the second
        assert_eq!(num_configures.get(), 4);

        let episodes: Vec<usize> = runner.summaries().iter().map(|s| s.episode).collect();
        assert_eq!(episodes, vec![0, 1]);
        assert!(dir.join("depth_data1.npy").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_interrupt_while_reconnecting() {
        let dir = out_dir("retry_interrupt");
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut runner = runner(2, 5, dir.clone(), interrupt.clone());

        let mut num_connects = 0;
        let outcome = runner
            .run_with_retry(|| -> Result<MockSession, SimClientError> {
                num_connects += 1;
                interrupt.store(true, Ordering::Relaxed);
                Err(SimClientError::NotConnected)
            })
            .unwrap();

        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(num_connects, 1);
        assert!(runner.summaries().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let dir = out_dir("retry_fatal");
        let mut runner = runner(1, 5, dir.clone(), Arc::new(AtomicBool::new(false)));

        let mut num_connects = 0;
        let res = runner.run_with_retry(|| {
            num_connects += 1;
            let mut sim = MockSession::new(1);
            sim.send_depth = false;
            Ok(sim)
        });

        assert!(matches!(res, Err(EpisodeError::MissingSensor(_))));
        assert_eq!(num_connects, 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
