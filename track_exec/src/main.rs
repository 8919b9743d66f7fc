//! Main track executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Fit the reference path to the track waypoints
//!     - Connect to the simulator
//!     - For each episode:
//!         - Configure the simulator and start the episode
//!         - For each frame:
//!             - Read the measurements and sensor data
//!             - Track control processing
//!             - Send the control demands
//!             - Archive the demands and the depth frame
//!
//! If the connection to the simulator is lost the whole run is restarted after a short delay.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::info;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use structopt::StructOpt;

// Internal
use comms_if::net::zmq;
use track_lib::{
    cli::Args,
    episode::{EpisodeParams, EpisodeRunner, RunOutcome, SettingsSource},
    sim_client::SimClient,
    track::{FitParams, ReferencePath},
    track_ctrl::{self, TrackCtrl},
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Name of the simulator session parameter file.
const SIM_SESSION_PARAMS: &str = "sim_session.toml";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = Args::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session =
        Session::new("track_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    let min_level = if args.verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    logger_init(min_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Track Controller Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- TRACK ----

    let path = ReferencePath::load(&args.track, &FitParams::default())
        .wrap_err_with(|| format!("Failed to fit the reference path to {:?}", args.track))?;

    info!(
        "Reference path fitted with {} points",
        path.points().len()
    );

    // ---- PARAMETERS ----

    let ctrl_params = track_ctrl::Params {
        k_p: args.k_p,
        k_d: args.k_d,
        target_speed_kmh: args.target_speed_kmh,
        ..Default::default()
    };

    let settings = match args.settings_path {
        Some(ref p) => SettingsSource::from_file(p),
        None => SettingsSource::from_params(SIM_SESSION_PARAMS, args.quality_level),
    }
    .wrap_err("Failed to load the simulator settings")?;

    // ---- INTERRUPT HANDLING ----

    let interrupt = Arc::new(AtomicBool::new(false));
    let interrupt_clone = interrupt.clone();
    ctrlc::set_handler(move || interrupt_clone.store(true, Ordering::Relaxed))
        .wrap_err("Failed to set the interrupt handler")?;

    // ---- MAIN LOOP ----

    let ctx = zmq::Context::new();

    let track_ctrl =
        TrackCtrl::new(&path, ctrl_params).wrap_err("Failed to initialise TrackCtrl")?;

    let mut runner = EpisodeRunner::new(
        EpisodeParams::default(),
        track_ctrl,
        settings,
        session.arch_root.clone(),
        interrupt.clone(),
    )
    .with_session(&session);

    info!("Listening to server {}:{}", args.host, args.port);

    let result = runner.run_with_retry(|| {
        let client = SimClient::connect(&ctx, &args.host, args.port, interrupt.clone())?;
        info!("SimClient connected to {}", client.endpoint());
        Ok(client)
    });
    let num_completed = runner.summaries().len();
    drop(runner);

    match result {
        Ok(RunOutcome::Completed) => info!("Done, {} episodes completed.", num_completed),
        Ok(RunOutcome::Interrupted) => println!("\nCancelled by user. Bye!"),
        Err(e) => {
            session.exit();
            return Err(e).wrap_err("Track control run failed");
        }
    }

    session.exit();

    Ok(())
}
