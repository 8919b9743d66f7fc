//! Command line arguments of the track executable

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::path::PathBuf;
use structopt::StructOpt;

// Internal
use comms_if::sim::QualityLevel;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Drive the simulated vehicle around the race track with a PD controller.
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "track_exec")]
pub struct Args {
    /// Print debug information
    #[structopt(short, long)]
    pub verbose: bool,

    /// IP of the host server
    #[structopt(long, default_value = "localhost")]
    pub host: String,

    /// TCP port to connect to
    #[structopt(short, long, default_value = "2000")]
    pub port: u16,

    /// Graphics quality level, a lower level makes the simulation run considerably faster
    #[structopt(
        short,
        long,
        default_value = "Epic",
        possible_values = &["Low", "Epic"],
        case_insensitive = true
    )]
    pub quality_level: QualityLevel,

    /// Path to a simulator settings file, used instead of the generated settings
    #[structopt(short = "c", long = "carla-settings", parse(from_os_str))]
    pub settings_path: Option<PathBuf>,

    /// Proportional gain of the steering controller
    #[structopt(long = "kp", alias = "k-prop", default_value = "0.0")]
    pub k_p: f64,

    /// Derivative gain of the steering controller
    #[structopt(long = "kd", alias = "k-deriv", default_value = "0.0")]
    pub k_d: f64,

    /// Target speed in km/h
    #[structopt(short = "s", long = "speed", default_value = "30")]
    pub target_speed_kmh: f64,

    /// Path to the track waypoint file
    #[structopt(short, long, default_value = "racetrack.txt", parse(from_os_str))]
    pub track: PathBuf,
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
