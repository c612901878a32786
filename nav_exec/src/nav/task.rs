//! Control task for the navigation controller
//!
//! The control task runs the state-machine cycle at a fixed period. Each
//! cycle runs to completion synchronously: sensors are read, the pose
//! estimate is refreshed, mode transitions are evaluated, the heading
//! controller runs, and the resulting setpoints are published to the motor
//! actuator. Setpoint publication happens outside the nav data lock so the
//! actuator call cannot block other lock holders.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{info, warn};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// Internal
use super::state::{NavCtrl, NavData, NavMode, StatusReport};
use crate::loc::LocInputs;
use util::archive::Archiver;
use util::maths::{ang_diff, signed_ang_diff};
use util::module::State;
use util::session::get_elapsed_seconds;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One row of the control task's telemetry archive.
#[derive(Serialize)]
struct TmRecord {
    time_s: f64,
    mode: NavMode,
    x: f64,
    y: f64,
    heading_deg: f64,
    dist_to_target: f64,
    heading_error_deg: f64,
    left_setpoint: f64,
    right_setpoint: f64,
    fix_applied: bool,
    moves_completed: u64,
}

impl TmRecord {
    fn new(report: &StatusReport) -> Self {
        Self {
            time_s: get_elapsed_seconds(),
            mode: report.mode,
            x: report.x,
            y: report.y,
            heading_deg: report.heading_deg,
            dist_to_target: report.dist_to_target,
            heading_error_deg: report.heading_error_deg,
            left_setpoint: report.left_setpoint,
            right_setpoint: report.right_setpoint,
            fix_applied: report.fix_applied,
            moves_completed: report.moves_completed,
        }
    }
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NavCtrl {
    /// Run one control cycle.
    ///
    /// Called periodically by the task spawned with [`NavCtrl::start`];
    /// exposed so tests and benchmarks can cycle the controller
    /// synchronously.
    pub fn step(&self) {
        // ---- SENSOR ACQUISITION ----

        // Devices are read before taking the nav data lock, keeping hold
        // times short
        self.platform.refresh_fix();
        let fix = self.platform.latest_fix();
        let heading_deg = self.platform.heading_deg();
        let encoder_ticks = self.platform.take_encoder_ticks();
        let reversed = self.platform.is_reversed();

        let mut guard = self.data.lock().unwrap();
        let d = &mut *guard;

        // Setpoints are rebuilt from scratch every cycle
        d.left_setpoint = 0.0;
        d.right_setpoint = 0.0;

        // Continuously re-aim at the target point while driving
        if d.mode == NavMode::Drive && !self.heading_locked.load(Ordering::Relaxed) {
            d.target.heading_deg = d.pose.bearing_to_deg(&d.target.position);
        }

        // ---- POSE UPDATE ----

        let fix_applied = match d.estimator.proc(&LocInputs {
            heading_deg,
            encoder_ticks,
            fix,
        }) {
            Ok((pose, loc_report)) => {
                d.pose = pose;
                loc_report.fix_applied
            }
            Err(e) => {
                // Hold the last known pose on a bad sensor reading
                warn!("Localisation error, holding last pose: {}", e);
                false
            }
        };

        let dist = d.pose.distance_to(&d.target.position);
        let head_err = ang_diff(d.pose.heading_deg, d.target.heading_deg);

        // ---- MODE TRANSITIONS ----

        if d.mode == NavMode::Drive && dist <= self.params.pos_eps {
            self.set_mode(d, NavMode::Done);
        }

        match d.mode {
            NavMode::RotateOnly => {
                if head_err <= self.params.ang_eps {
                    self.set_mode(d, NavMode::Done);
                }
            }
            NavMode::Rotate => {
                if head_err <= self.params.ang_drive_limit {
                    self.set_mode(d, NavMode::Drive);
                }
            }
            NavMode::Drive => {
                if head_err >= self.params.ang_drive_limit {
                    self.set_mode(d, NavMode::Rotate);
                }
            }
            NavMode::Done => (),
        }

        // ---- EXECUTION ----

        match d.mode {
            NavMode::RotateOnly | NavMode::Rotate => {
                self.run_heading_correction(d, reversed);
            }
            NavMode::Drive => {
                // Decelerate on approach unless fast-drive is set
                let forward = if self.fast_drive.load(Ordering::Relaxed) {
                    d.target.speed
                }
                else {
                    f64::min(d.target.speed, dist * self.params.fwd_gain)
                };

                d.left_setpoint = forward;
                d.right_setpoint = forward;

                self.run_heading_correction(d, reversed);
            }
            NavMode::Done => (),
        }

        // ---- REPORT ----

        d.report = StatusReport {
            mode: d.mode,
            x: d.pose.position.x,
            y: d.pose.position.y,
            heading_deg: d.pose.heading_deg,
            dist_to_target: dist,
            heading_error_deg: head_err,
            left_setpoint: d.left_setpoint,
            right_setpoint: d.right_setpoint,
            fix_applied,
            moves_completed: d.moves_completed,
        };

        let (left, right) = (d.left_setpoint, d.right_setpoint);
        drop(guard);

        // ---- SETPOINT PUBLICATION ----

        self.platform.set_wheel_velocities(left, right);
    }

    /// Run the heading PID and superimpose its clamped output as a
    /// differential command.
    fn run_heading_correction(&self, d: &mut NavData, reversed: bool) {
        let error = signed_ang_diff(d.pose.heading_deg, d.target.heading_deg);

        let output = d.rotate_pid.update(error);
        let output = self.rotation_limits().apply(output, reversed);

        d.left_setpoint += output;
        d.right_setpoint -= output;
    }

    /// Spawn the periodic control task.
    ///
    /// The task cycles at the configured period until [`NavCtrl::stop`] is
    /// called, optionally archiving a telemetry record each cycle.
    pub fn start(
        self: Arc<Self>,
        mut archiver: Option<Archiver>,
    ) -> std::io::Result<JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);

        thread::Builder::new()
            .name("nav_ctrl".into())
            .spawn(move || {
                info!("Navigation control task started");

                let cycle_period = Duration::from_secs_f64(self.params.cycle_period_s);

                while self.running.load(Ordering::SeqCst) {
                    let cycle_start = Instant::now();

                    self.step();

                    if let Some(ref mut arch) = archiver {
                        let report = self.status_report();
                        if let Err(e) = arch.serialise(TmRecord::new(&report)) {
                            warn!("Could not archive nav telemetry: {}", e);
                        }
                    }

                    // ---- CYCLE MANAGEMENT ----

                    let cycle_dur = cycle_start.elapsed();

                    match cycle_period.checked_sub(cycle_dur) {
                        Some(remaining) => thread::sleep(remaining),
                        None => warn!(
                            "Cycle overran by {:.06} s",
                            (cycle_dur - cycle_period).as_secs_f64()
                        ),
                    }
                }

                info!("Navigation control task stopped");
            })
    }

    /// Ask the control task to exit after its current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
