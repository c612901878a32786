//! Main navigation executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the session, logging and parameters
//!     - Initialise the (simulated) platform and the navigation controller
//!     - Adopt the first absolute fix (bounded wait)
//!     - Start the periodic navigation control task
//!     - Main loop:
//!         - Mission script processing: execute commands which have come due
//!         - Pose monitoring
//!
//! The navigation control task runs concurrently at its own fixed period;
//! the main loop only issues commands and observes status through the
//! thread-safe command/query API.

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

use nav_lib::loc;
use nav_lib::mission::{self, MissionScript, PendingTcs};
use nav_lib::nav::{self, NavCtrl};
use nav_lib::platform::sim::{SimConfig, SimPlatform};
use nav_lib::platform::Platform;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::eyre, eyre::WrapErr, Report};
use log::{info, warn};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Internal
use util::archive::Archiver;
use util::logger::{logger_init, LevelFilter};
use util::session::{self, Session};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Target period of one main loop cycle.
const CYCLE_PERIOD_S: f64 = 0.10;

/// Step size of the simulated world.
const SIM_DT_S: f64 = 0.01;

/// Period between pose monitoring log lines.
const POSE_LOG_PERIOD_S: f64 = 1.0;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "nav_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Triton Rover Navigation Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let nav_params: nav::Params = util::params::load(
        "nav_ctrl.toml"
    ).wrap_err("Could not load navigation params")?;

    let loc_params: loc::Params = util::params::load(
        "loc_est.toml"
    ).wrap_err("Could not load localisation params")?;

    let platform_params: nav_lib::platform::Params = util::params::load(
        "platform.toml"
    ).wrap_err("Could not load platform params")?;

    let sim_config: SimConfig = util::params::load(
        "sim.toml"
    ).wrap_err("Could not load simulation params")?;

    info!("Exec parameters loaded");

    // ---- LOAD MISSION SCRIPT ----

    // Collect all arguments
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        return Err(eyre!(
            "Expected exactly one argument (the mission script path), found {}",
            args.len() - 1
        ));
    }

    info!("Loading mission script from \"{}\"", &args[1]);

    let mut script = MissionScript::new(&args[1])
        .wrap_err("Failed to load the mission script")?;

    info!(
        "Loaded script lasts {:.02} s and contains {} commands\n",
        script.get_duration(),
        script.get_num_tcs()
    );

    // ---- INITIALISE PLATFORM ----

    let sim = SimPlatform::new(sim_config);
    let sim_handle = sim.handle.clone();

    let platform = Arc::new(Platform::new(
        platform_params,
        sim.motors,
        sim.gyro,
        sim.encoders,
        sim.fix_source,
    ));

    // Run the simulated world in its own thread
    let sim_running = Arc::new(AtomicBool::new(true));
    let sim_thread = {
        let handle = sim_handle.clone();
        let running = sim_running.clone();
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                handle.step(SIM_DT_S);
                thread::sleep(Duration::from_secs_f64(SIM_DT_S));
            }
        })
    };

    info!("Simulated platform initialised");

    // ---- INITIALISE NAVIGATION ----

    let nav = Arc::new(NavCtrl::new(nav_params, loc_params, platform.clone()));

    if !nav.init_localization() {
        warn!("Starting without an absolute position fix");
    }

    let archiver = match Archiver::from_path(&session, "nav/telemetry.csv") {
        Ok(a) => Some(a),
        Err(e) => {
            warn!("Telemetry archiving disabled: {}", e);
            None
        }
    };

    let nav_task = nav.clone().start(archiver)
        .wrap_err("Failed to start the navigation control task")?;

    info!("NavCtrl initialised\n");

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut last_pose_log = Instant::now();

    loop {

        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // ---- MISSION SCRIPT PROCESSING ----

        match script.get_pending_tcs(session::get_elapsed_seconds()) {
            PendingTcs::None => (),
            PendingTcs::Some(tc_vec) => {
                for tc in tc_vec.iter() {
                    mission::exec(&nav, &platform, tc);
                }
            }
            // Exit if end of script reached
            PendingTcs::EndOfScript => {
                info!("End of mission script reached, stopping");
                break
            }
        }

        // ---- POSE MONITORING ----

        if last_pose_log.elapsed().as_secs_f64() >= POSE_LOG_PERIOD_S {
            let pose = nav.position();
            let report = nav.status_report();
            info!(
                "Pose: ({:.1}, {:.1}) heading {:.1} deg, mode {:?}",
                pose.position.x, pose.position.y, pose.heading_deg, report.mode
            );
            last_pose_log = Instant::now();
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        match Duration::from_secs_f64(CYCLE_PERIOD_S).checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Main loop cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - CYCLE_PERIOD_S
            )
        }
    }

    // ---- SHUTDOWN ----

    nav.stop();
    if nav_task.join().is_err() {
        warn!("Navigation control task panicked");
    }

    sim_running.store(false, Ordering::SeqCst);
    sim_thread.join().ok();

    info!("End of execution");

    Ok(())
}
