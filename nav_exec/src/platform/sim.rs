//! # Kinematic platform simulator
//!
//! An in-process differential-drive world implementing all four platform
//! device roles, used by the integration tests and the demo mission. The
//! simulated positioning source publishes fixes at a configurable period
//! with a monotonically increasing timestamp tag, and can emulate the
//! elevated-sensor offset which the localisation estimator corrects for.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Vector2;
use serde::Deserialize;
use std::sync::{Arc, Mutex};

// Internal
use super::{FixSource, HeadingSensor, MotorDriver, Side, WheelEncoders};
use crate::loc::{Fix, Pose};
use util::maths::normalize_angle;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Configuration of the simulated world.
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Translational speed per unit of mean wheel command.
    ///
    /// Units: field units/second per command unit
    pub units_per_cmd_s: f64,

    /// Turn rate per unit of left/right command difference. Positive
    /// left-minus-right turns the platform towards increasing heading.
    ///
    /// Units: degrees/second per command unit
    pub turn_deg_per_cmd_s: f64,

    /// Forward travel corresponding to one encoder tick. Should match the
    /// localisation parameter of the same name.
    ///
    /// Units: field units/tick
    pub units_per_tick: f64,

    /// Period between fix publications.
    ///
    /// Units: seconds
    pub fix_period_s: f64,

    /// If true, published fixes carry the elevated-sensor range offset, the
    /// exact inverse of the estimator's correction.
    pub emulate_fix_offset: bool,

    /// Correction gain used when emulating the fix offset.
    pub fix_corr_gain: f64,

    /// Correction reference range used when emulating the fix offset.
    pub fix_corr_ref_range: f64,

    /// Constant gyro drift rate, to exercise re-synchronisation.
    ///
    /// Units: degrees/second
    pub gyro_drift_deg_s: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            units_per_cmd_s: 0.25,
            turn_deg_per_cmd_s: 2.0,
            units_per_tick: 0.05,
            fix_period_s: 0.2,
            emulate_fix_offset: false,
            fix_corr_gain: 443.4,
            fix_corr_ref_range: 4766.55,
            gyro_drift_deg_s: 0.0,
        }
    }
}

/// The simulated world state.
struct World {
    config: SimConfig,

    /// True pose
    position: Vector2<f64>,
    heading_deg: f64,

    /// The gyro's accumulated reading, which drifts from the true heading
    /// when `gyro_drift_deg_s` is non-zero.
    gyro_deg: f64,

    /// Last commanded wheel velocities
    left_cmd: f64,
    right_cmd: f64,

    /// Encoder state: integer counts plus fractional carry per side
    ticks_left: i64,
    ticks_right: i64,
    tick_carry_left: f64,
    tick_carry_right: f64,

    /// Most recent published fix
    fix: Option<Fix>,

    sim_time_s: f64,
    since_fix_s: f64,
}

/// Shared handle onto the simulated world, used to advance time and to
/// inspect or override the true state from tests.
#[derive(Clone)]
pub struct SimHandle(Arc<Mutex<World>>);

/// The simulator's device handles plus the world handle.
pub struct SimPlatform {
    pub handle: SimHandle,
    pub motors: Box<dyn MotorDriver>,
    pub gyro: Box<dyn HeadingSensor>,
    pub encoders: Box<dyn WheelEncoders>,
    pub fix_source: Box<dyn FixSource>,
}

struct SimMotors(Arc<Mutex<World>>);
struct SimGyro(Arc<Mutex<World>>);
struct SimEncoders(Arc<Mutex<World>>);
struct SimVps(Arc<Mutex<World>>);

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimPlatform {
    /// Create a new simulated platform with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        let world = Arc::new(Mutex::new(World {
            config,
            position: Vector2::zeros(),
            heading_deg: 360.0,
            gyro_deg: 360.0,
            left_cmd: 0.0,
            right_cmd: 0.0,
            ticks_left: 0,
            ticks_right: 0,
            tick_carry_left: 0.0,
            tick_carry_right: 0.0,
            fix: None,
            sim_time_s: 0.0,
            since_fix_s: 0.0,
        }));

        Self {
            handle: SimHandle(world.clone()),
            motors: Box::new(SimMotors(world.clone())),
            gyro: Box::new(SimGyro(world.clone())),
            encoders: Box::new(SimEncoders(world.clone())),
            fix_source: Box::new(SimVps(world)),
        }
    }
}

impl SimHandle {
    /// Advance the world by `dt_s` seconds under the current wheel commands.
    pub fn step(&self, dt_s: f64) {
        let mut guard = self.0.lock().unwrap();
        let w = &mut *guard;

        let speed = 0.5 * (w.left_cmd + w.right_cmd) * w.config.units_per_cmd_s;
        let turn_rate = (w.left_cmd - w.right_cmd) * w.config.turn_deg_per_cmd_s;

        w.heading_deg = normalize_angle(w.heading_deg + turn_rate * dt_s);
        w.gyro_deg += (turn_rate + w.config.gyro_drift_deg_s) * dt_s;

        let heading_rad = w.heading_deg.to_radians();
        let travel = speed * dt_s;
        w.position += travel * Vector2::new(heading_rad.cos(), heading_rad.sin());

        // Encoder counts, carrying the sub-tick remainder
        let left_travel = w.left_cmd * w.config.units_per_cmd_s * dt_s;
        let right_travel = w.right_cmd * w.config.units_per_cmd_s * dt_s;

        w.tick_carry_left += left_travel / w.config.units_per_tick;
        w.tick_carry_right += right_travel / w.config.units_per_tick;

        let whole_left = w.tick_carry_left.trunc();
        let whole_right = w.tick_carry_right.trunc();
        w.ticks_left += whole_left as i64;
        w.ticks_right += whole_right as i64;
        w.tick_carry_left -= whole_left;
        w.tick_carry_right -= whole_right;

        w.sim_time_s += dt_s;
        w.since_fix_s += dt_s;

        if w.since_fix_s >= w.config.fix_period_s {
            w.since_fix_s = 0.0;
            publish_fix(w);
        }
    }

    /// Publish a fix immediately, regardless of the publication period.
    pub fn publish_fix_now(&self) {
        let mut guard = self.0.lock().unwrap();
        let w = &mut *guard;
        // Tags are derived from sim time, nudge it so the tag changes even
        // if no time has passed since the last publication
        w.sim_time_s += 1e-6;
        publish_fix(w);
    }

    /// The true pose of the simulated platform.
    pub fn true_pose(&self) -> Pose {
        let w = self.0.lock().unwrap();
        Pose {
            position: w.position,
            heading_deg: w.heading_deg,
        }
    }

    /// Override the true pose, also presetting the gyro so the heading
    /// reading follows.
    pub fn teleport(&self, x: f64, y: f64, heading_deg: f64) {
        let mut guard = self.0.lock().unwrap();
        let w = &mut *guard;
        w.position = Vector2::new(x, y);
        w.heading_deg = normalize_angle(heading_deg);
        w.gyro_deg = w.heading_deg;
    }

    /// The most recent wheel commands received by the simulated motors.
    pub fn last_commands(&self) -> (f64, f64) {
        let w = self.0.lock().unwrap();
        (w.left_cmd, w.right_cmd)
    }
}

impl MotorDriver for SimMotors {
    fn set_wheel_velocities(&mut self, left: f64, right: f64) {
        let mut w = self.0.lock().unwrap();
        w.left_cmd = left;
        w.right_cmd = right;
    }

    fn brake(&mut self) {
        let mut w = self.0.lock().unwrap();
        w.left_cmd = 0.0;
        w.right_cmd = 0.0;
    }
}

impl HeadingSensor for SimGyro {
    fn heading_deg(&mut self) -> f64 {
        self.0.lock().unwrap().gyro_deg
    }

    fn set_heading_deg(&mut self, heading_deg: f64) {
        self.0.lock().unwrap().gyro_deg = heading_deg;
    }
}

impl WheelEncoders for SimEncoders {
    fn ticks(&mut self, side: Side) -> i64 {
        let w = self.0.lock().unwrap();
        match side {
            Side::Left => w.ticks_left,
            Side::Right => w.ticks_right,
        }
    }

    fn reset(&mut self, side: Side) {
        let mut w = self.0.lock().unwrap();
        match side {
            Side::Left => w.ticks_left = 0,
            Side::Right => w.ticks_right = 0,
        }
    }
}

impl FixSource for SimVps {
    fn refresh(&mut self) {
        // The simulated source publishes directly into the visible slot
    }

    fn latest(&mut self) -> Option<Fix> {
        self.0.lock().unwrap().fix
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Publish the current true position as a fix.
fn publish_fix(w: &mut World) {
    let raw = if w.config.emulate_fix_offset {
        // The estimator subtracts gain * (r / ref_range) along the bearing,
        // which for a radial scaling is inverted exactly by dividing by
        // (1 - gain / ref_range)
        w.position / (1.0 - w.config.fix_corr_gain / w.config.fix_corr_ref_range)
    }
    else {
        w.position
    };

    w.fix = Some(Fix {
        position: raw,
        heading_deg: w.heading_deg,
        timestamp_us: (w.sim_time_s * 1e6) as u64,
    });
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
