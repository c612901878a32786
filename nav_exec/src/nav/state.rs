//! Implementations for the navigation controller state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use nalgebra::Vector2;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// Internal
use super::controllers::{PidController, RotationLimits};
use super::{NavError, Params};
use crate::loc::{LocEstimator, Pose};
use crate::platform::Platform;
use util::maths::{ang_diff, normalize_angle};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The phase of the currently executing movement.
///
/// Owned by the control task, except that issuing a new command forces the
/// mode back to `Rotate`/`RotateOnly` under the same lock the control task
/// cycles under.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum NavMode {
    /// Turn in place to the target heading, position is ignored.
    RotateOnly,

    /// Turn in place until the heading error is small enough to drive.
    Rotate,

    /// Translate towards the target while steering.
    Drive,

    /// Terminal, arrived or aligned.
    Done,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The target pose of the current movement.
#[derive(Debug, Copy, Clone)]
pub struct Target {
    /// Destination position in the field frame.
    pub position: Vector2<f64>,

    /// Destination heading in normalised degrees.
    pub heading_deg: f64,

    /// Commanded translational speed.
    ///
    /// Units: motor command units
    pub speed: f64,

    /// True if this movement drives in the mechanically-reversed
    /// orientation.
    pub reverse: bool,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            position: Vector2::zeros(),
            heading_deg: 360.0,
            speed: 0.0,
            reverse: false,
        }
    }
}

/// Per-cycle monitoring quantities published by the control task.
#[derive(Debug, Copy, Clone, Serialize)]
pub struct StatusReport {
    pub mode: NavMode,

    /// Current pose estimate
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,

    /// Euclidean distance to the target position
    pub dist_to_target: f64,

    /// Unsigned heading error to the target heading, degrees
    pub heading_error_deg: f64,

    /// Wheel setpoints produced this cycle
    pub left_setpoint: f64,
    pub right_setpoint: f64,

    /// True if a fresh fix was adopted this cycle
    pub fix_applied: bool,

    /// Number of movements which have reached `Done` since startup
    pub moves_completed: u64,
}

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            mode: NavMode::Done,
            x: 0.0,
            y: 0.0,
            heading_deg: 360.0,
            dist_to_target: 0.0,
            heading_error_deg: 0.0,
            left_setpoint: 0.0,
            right_setpoint: 0.0,
            fix_applied: false,
            moves_completed: 0,
        }
    }
}

/// State shared between the control task and the command/query API, guarded
/// by the nav data lock.
pub(crate) struct NavData {
    pub estimator: LocEstimator,
    pub pose: Pose,
    pub target: Target,
    pub mode: NavMode,

    /// Per-cycle wheel setpoints, rebuilt from scratch every cycle
    pub left_setpoint: f64,
    pub right_setpoint: f64,

    /// Heading correction controller
    pub rotate_pid: PidController,

    pub moves_completed: u64,
    pub report: StatusReport,
}

/// The navigation controller.
///
/// Constructed once at startup and shared (via `Arc`) between the periodic
/// control task and any tasks issuing commands or polling status.
pub struct NavCtrl {
    pub(crate) params: Params,
    pub(crate) platform: Arc<Platform>,

    /// The nav data lock
    pub(crate) data: Mutex<NavData>,

    /// Signalled on every mode transition; completion waits block on this
    /// rather than spinning
    pub(crate) mode_changed: Condvar,

    /// When set, the target heading is not re-aimed at the target point
    /// while driving. Read by the control task without the nav data lock;
    /// best-effort visibility is acceptable as it only affects steering
    /// heuristics.
    pub(crate) heading_locked: AtomicBool,

    /// When set, skip deceleration-on-approach and drive through the target
    /// at full commanded speed.
    pub(crate) fast_drive: AtomicBool,

    /// Control task run flag
    pub(crate) running: AtomicBool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NavCtrl {
    /// Create a new navigation controller from already-loaded parameters.
    pub fn new(
        params: Params,
        loc_params: crate::loc::Params,
        platform: Arc<Platform>,
    ) -> Self {
        let rotate_pid =
            PidController::new(params.rot_k_p, params.rot_k_i, params.rot_k_d);

        Self {
            params,
            platform,
            data: Mutex::new(NavData {
                estimator: LocEstimator::with_params(loc_params),
                pose: Pose::default(),
                target: Target::default(),
                mode: NavMode::Done,
                left_setpoint: 0.0,
                right_setpoint: 0.0,
                rotate_pid,
                moves_completed: 0,
                report: StatusReport::default(),
            }),
            mode_changed: Condvar::new(),
            heading_locked: AtomicBool::new(false),
            fast_drive: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Create a new navigation controller, loading parameters from the
    /// given files.
    pub fn from_files(
        nav_params_path: &str,
        loc_params_path: &str,
        platform: Arc<Platform>,
    ) -> Result<Self, NavError> {
        let params: Params = util::params::load(nav_params_path)?;
        let loc_params: crate::loc::Params = util::params::load(loc_params_path)?;

        Ok(Self::new(params, loc_params, platform))
    }

    /// The rotation output clamp policy.
    pub(crate) fn rotation_limits(&self) -> RotationLimits {
        RotationLimits {
            max: self.params.max_rot,
            max_reversed: self.params.max_rot_reversed,
            min: self.params.min_rot,
        }
    }

    // ---- INITIALISATION ----

    /// Wait for the first absolute fix, up to the configured startup
    /// timeout, and adopt it.
    ///
    /// Returns true if a fix was adopted. On timeout a warning is logged
    /// and operation continues degraded, with the pose advancing on heading
    /// (and dead-reckoning, if configured) alone.
    pub fn init_localization(&self) -> bool {
        let timeout_s = {
            self.data.lock().unwrap().estimator.fix_startup_timeout_s()
        };

        let start = Instant::now();

        loop {
            self.platform.refresh_fix();

            if let Some(fix) = self.platform.latest_fix() {
                let pose = {
                    let mut d = self.data.lock().unwrap();
                    let pose = d.estimator.adopt_fix(&fix);
                    d.pose = pose;
                    pose
                };

                // Preset the gyro so the heading reading continues from the
                // fix heading
                self.platform.sync_heading_deg(pose.heading_deg);

                info!(
                    "Initial fix adopted: ({:.1}, {:.1}), heading {:.1} deg",
                    pose.position.x, pose.position.y, pose.heading_deg
                );

                return true;
            }

            if start.elapsed().as_secs_f64() > timeout_s {
                warn!(
                    "No absolute fix within {:.1} s, continuing without absolute position",
                    timeout_s
                );
                return false;
            }

            thread::sleep(Duration::from_millis(10));
        }
    }

    // ---- HIGH-LEVEL COMMANDS ----

    /// Command a full target pose.
    ///
    /// If the heading change required exceeds 90 degrees the platform's
    /// mechanical orientation is flipped so the cheaper rotation is used.
    /// The movement starts in `Rotate` and supersedes any movement in
    /// progress.
    pub fn set_target(
        &self,
        x: f64,
        y: f64,
        heading_deg: f64,
        speed: f64,
    ) -> Result<(), NavError> {
        check_finite(&[("x", x), ("y", y), ("heading", heading_deg), ("speed", speed)])?;

        let mut d = self.data.lock().unwrap();

        let mut reverse = self.platform.is_reversed();
        if ang_diff(normalize_angle(heading_deg), d.pose.heading_deg) > 90.0 {
            reverse = !reverse;
        }

        self.apply_target(&mut d, x, y, heading_deg, speed, reverse, NavMode::Rotate);

        Ok(())
    }

    /// Command a full target pose with an explicit mechanical orientation.
    pub fn set_target_directed(
        &self,
        x: f64,
        y: f64,
        heading_deg: f64,
        speed: f64,
        reverse: bool,
    ) -> Result<(), NavError> {
        check_finite(&[("x", x), ("y", y), ("heading", heading_deg), ("speed", speed)])?;

        let mut d = self.data.lock().unwrap();
        self.apply_target(&mut d, x, y, heading_deg, speed, reverse, NavMode::Rotate);

        Ok(())
    }

    /// Turn in place to the given heading, keeping the current position as
    /// the target. The chassis-forward orientation is commanded.
    pub fn turn_to_heading(&self, heading_deg: f64) -> Result<(), NavError> {
        check_finite(&[("heading", heading_deg)])?;

        let mut d = self.data.lock().unwrap();

        let (x, y) = (d.pose.position.x, d.pose.position.y);
        let speed = d.target.speed;

        self.apply_target(&mut d, x, y, heading_deg, speed, false, NavMode::RotateOnly);

        Ok(())
    }

    /// Turn in place to face the given point, without moving towards it.
    pub fn turn_to_point(&self, x: f64, y: f64) -> Result<(), NavError> {
        check_finite(&[("x", x), ("y", y)])?;

        let mut d = self.data.lock().unwrap();

        let heading_deg = d.pose.bearing_to_deg(&Vector2::new(x, y));
        let (px, py) = (d.pose.position.x, d.pose.position.y);
        let speed = d.target.speed;
        let reverse = self.platform.is_reversed();

        self.apply_target(&mut d, px, py, heading_deg, speed, reverse, NavMode::RotateOnly);

        Ok(())
    }

    /// Drive to the given point, facing it first, choosing the cheaper
    /// mechanical orientation.
    pub fn move_to_point(&self, x: f64, y: f64, speed: f64) -> Result<(), NavError> {
        check_finite(&[("x", x), ("y", y), ("speed", speed)])?;

        let mut d = self.data.lock().unwrap();

        let heading_deg = d.pose.bearing_to_deg(&Vector2::new(x, y));

        let mut reverse = self.platform.is_reversed();
        if ang_diff(heading_deg, d.pose.heading_deg) > 90.0 {
            reverse = !reverse;
        }

        self.apply_target(&mut d, x, y, heading_deg, speed, reverse, NavMode::Rotate);

        Ok(())
    }

    /// Drive to the given point with an explicit mechanical orientation.
    pub fn move_to_point_directed(
        &self,
        x: f64,
        y: f64,
        speed: f64,
        reverse: bool,
    ) -> Result<(), NavError> {
        check_finite(&[("x", x), ("y", y), ("speed", speed)])?;

        let mut d = self.data.lock().unwrap();

        let heading_deg = d.pose.bearing_to_deg(&Vector2::new(x, y));
        self.apply_target(&mut d, x, y, heading_deg, speed, reverse, NavMode::Rotate);

        Ok(())
    }

    // ---- NAV OPTIONS ----

    /// Keep the target heading fixed while driving instead of re-aiming at
    /// the target point. Useful for approaches more sensitive to angular
    /// error than lateral offset.
    pub fn set_heading_lock(&self, locked: bool) {
        self.heading_locked.store(locked, Ordering::Relaxed);
    }

    /// Do not slow down on approach to the target point. Useful when the
    /// target is a waypoint along a smooth path which can be driven through
    /// without stopping.
    pub fn set_fast_drive(&self, fast: bool) {
        self.fast_drive.store(fast, Ordering::Relaxed);
    }

    // ---- NAVIGATION STATUS ----

    /// The current pose estimate.
    pub fn position(&self) -> Pose {
        self.data.lock().unwrap().pose
    }

    /// The target of the current movement.
    pub fn target(&self) -> Target {
        self.data.lock().unwrap().target
    }

    /// The current movement phase.
    pub fn mode(&self) -> NavMode {
        self.data.lock().unwrap().mode
    }

    /// True once the in-place rotation phase of the current movement has
    /// finished.
    pub fn is_rotation_complete(&self) -> bool {
        self.mode() != NavMode::Rotate
    }

    /// True once the current movement has reached its terminal state.
    pub fn is_movement_complete(&self) -> bool {
        self.mode() == NavMode::Done
    }

    /// Block until the in-place rotation phase has finished.
    pub fn wait_for_rotation(&self) {
        let mut d = self.data.lock().unwrap();
        while d.mode == NavMode::Rotate {
            d = self.mode_changed.wait(d).unwrap();
        }
    }

    /// Block until the current movement completes.
    ///
    /// If a new command supersedes the movement being waited on, the wait
    /// continues until the superseding movement completes.
    pub fn wait_for_movement(&self) {
        let mut d = self.data.lock().unwrap();
        while d.mode != NavMode::Done {
            d = self.mode_changed.wait(d).unwrap();
        }
    }

    /// The monitoring report from the most recent control cycle.
    pub fn status_report(&self) -> StatusReport {
        self.data.lock().unwrap().report
    }

    // ---- RE-SYNCHRONISATION ----

    /// Force-adopt the latest fix and preset the gyro to its heading,
    /// discarding any accumulated drift.
    ///
    /// The caller should pause movement around this, fresh fixes taken
    /// while moving lag the true position.
    pub fn resync(&self) {
        self.platform.refresh_fix();

        match self.platform.latest_fix() {
            Some(fix) => {
                let pose = {
                    let mut d = self.data.lock().unwrap();
                    let pose = d.estimator.adopt_fix(&fix);
                    d.pose = pose;
                    pose
                };

                self.platform.sync_heading_deg(pose.heading_deg);

                info!(
                    "Re-synchronised: ({:.1}, {:.1}), heading {:.1} deg",
                    pose.position.x, pose.position.y, pose.heading_deg
                );
            }
            None => warn!("Re-synchronisation requested but no fix is available"),
        }
    }

    // ---- INTERNAL ----

    /// Supersede the current movement with a new target.
    ///
    /// Serialised through the nav data lock with the control task: a
    /// command issued mid-movement simply takes effect from the next cycle.
    fn apply_target(
        &self,
        d: &mut NavData,
        x: f64,
        y: f64,
        heading_deg: f64,
        speed: f64,
        reverse: bool,
        mode: NavMode,
    ) {
        d.target = Target {
            position: Vector2::new(x, y),
            heading_deg: normalize_angle(heading_deg),
            speed,
            reverse,
        };

        self.platform.set_reversed(reverse);

        // A new movement must not inherit integral or derivative history
        d.rotate_pid.reset();

        self.set_mode(d, mode);

        debug!(
            "New target: ({:.1}, {:.1}), heading {:.1} deg, speed {:.1}, reverse {}",
            x, y, d.target.heading_deg, speed, reverse
        );
    }

    /// Change mode, signalling waiters on the transition.
    ///
    /// Entering `Done` counts a completed movement; re-evaluating the
    /// terminal condition on later cycles is a no-op, so completion is
    /// signalled exactly once per movement.
    pub(crate) fn set_mode(&self, d: &mut NavData, mode: NavMode) {
        if d.mode == mode {
            return;
        }

        d.mode = mode;

        if mode == NavMode::Done {
            d.moves_completed += 1;
            debug!("Movement complete ({} so far)", d.moves_completed);
        }

        self.mode_changed.notify_all();
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Reject non-finite command values before they can reach the controller
/// state.
fn check_finite(values: &[(&'static str, f64)]) -> Result<(), NavError> {
    for &(field, value) in values {
        if !value.is_finite() {
            return Err(NavError::InvalidTarget { field, value });
        }
    }

    Ok(())
}
