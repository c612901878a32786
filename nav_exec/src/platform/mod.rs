//! # Platform module
//!
//! Hardware abstraction for the drive platform. The four sensor/actuator
//! roles the navigation controller consumes are expressed as object-safe
//! traits, and the [`Platform`] driver wraps them with the chassis-level
//! wiring: command clamping, the mechanically-reversed orientation (which
//! swaps and negates the wheel commands and offsets the heading by 180
//! degrees), and a pause flag which brakes the motors and suppresses all
//! output until released.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
pub mod sim;

pub use params::Params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// Internal
use crate::loc::Fix;
use util::maths::clamp;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// The motor driver role: accepts signed wheel velocity commands which have
/// already been clamped to the platform's safe range.
pub trait MotorDriver: Send {
    /// Command the left and right wheel velocities.
    fn set_wheel_velocities(&mut self, left: f64, right: f64);

    /// Actively brake both wheels.
    fn brake(&mut self);
}

/// The heading sensor role (gyroscope).
pub trait HeadingSensor: Send {
    /// The absolute heading reading in degrees. Not necessarily normalised.
    fn heading_deg(&mut self) -> f64;

    /// Preset the sensor to the given heading, in degrees.
    fn set_heading_deg(&mut self, heading_deg: f64);
}

/// The wheel encoder role. Used only by the dead-reckoning fusion strategy.
pub trait WheelEncoders: Send {
    /// Ticks accumulated on the given side since the last reset.
    fn ticks(&mut self, side: Side) -> i64;

    /// Zero the tick count on the given side.
    fn reset(&mut self, side: Side);
}

/// The absolute fix source role (vision positioning).
pub trait FixSource: Send {
    /// Synchronise the locally visible fix with the source's most recent
    /// publication.
    fn refresh(&mut self);

    /// The most recent fix, or `None` if nothing has been published yet.
    /// The returned fix may be stale; freshness is detected by comparing
    /// its timestamp tag.
    fn latest(&mut self) -> Option<Fix>;
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Wheel side designator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The platform driver.
///
/// Shared between the control task and the command API, so all methods take
/// `&self`. The orientation and pause flags are atomics since they are read
/// on paths which must not block; the device handles are behind short-hold
/// mutexes.
pub struct Platform {
    params: Params,

    motors: Mutex<Box<dyn MotorDriver>>,
    heading_sensor: Mutex<Box<dyn HeadingSensor>>,
    encoders: Mutex<Box<dyn WheelEncoders>>,
    fix_source: Mutex<Box<dyn FixSource>>,

    /// True when the platform is driving in the mechanically-reversed
    /// orientation.
    reverse: AtomicBool,

    /// True when all motor output is suppressed.
    pause: AtomicBool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Platform {
    /// Create a new platform driver over the given device handles.
    pub fn new(
        params: Params,
        motors: Box<dyn MotorDriver>,
        heading_sensor: Box<dyn HeadingSensor>,
        encoders: Box<dyn WheelEncoders>,
        fix_source: Box<dyn FixSource>,
    ) -> Self {
        Self {
            params,
            motors: Mutex::new(motors),
            heading_sensor: Mutex::new(heading_sensor),
            encoders: Mutex::new(encoders),
            fix_source: Mutex::new(fix_source),
            reverse: AtomicBool::new(false),
            pause: AtomicBool::new(false),
        }
    }

    // ---- ORIENTATION ----

    /// Set the mechanically-reversed orientation flag.
    pub fn set_reversed(&self, reversed: bool) {
        self.reverse.store(reversed, Ordering::SeqCst);
    }

    /// True if the platform is in the mechanically-reversed orientation.
    pub fn is_reversed(&self) -> bool {
        self.reverse.load(Ordering::SeqCst)
    }

    // ---- PAUSE ----

    /// Suppress all motor output and brake, used while re-synchronising the
    /// pose estimate.
    pub fn pause_movement(&self) {
        self.pause.store(true, Ordering::SeqCst);
        self.motors.lock().unwrap().brake();
    }

    /// Release the pause flag.
    pub fn unpause_movement(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    /// True if motor output is currently suppressed.
    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    // ---- MOTORS ----

    /// Command the wheel velocities.
    ///
    /// Commands are clamped to the platform's safe range. In the reversed
    /// orientation left/right are swapped and negated so that "forward"
    /// tracks the direction of intended travel. While paused, output is
    /// suppressed entirely.
    pub fn set_wheel_velocities(&self, left: f64, right: f64) {
        if self.is_paused() {
            return;
        }

        let limit = self.params.max_wheel_cmd;
        let left = clamp(&left, &-limit, &limit);
        let right = clamp(&right, &-limit, &limit);

        let mut motors = self.motors.lock().unwrap();
        if self.is_reversed() {
            motors.set_wheel_velocities(-right, -left);
        }
        else {
            motors.set_wheel_velocities(left, right);
        }
    }

    // ---- HEADING ----

    /// The platform heading in degrees: the gyro reading, offset by 180
    /// degrees in the reversed orientation. Not normalised.
    pub fn heading_deg(&self) -> f64 {
        let raw = self.heading_sensor.lock().unwrap().heading_deg();

        if self.is_reversed() {
            raw + 180.0
        }
        else {
            raw
        }
    }

    /// Preset the platform heading, compensating for the reversed-mode
    /// offset so that [`Platform::heading_deg`] subsequently reads the given
    /// value.
    pub fn sync_heading_deg(&self, heading_deg: f64) {
        let raw = if self.is_reversed() {
            heading_deg - 180.0
        }
        else {
            heading_deg
        };

        self.heading_sensor.lock().unwrap().set_heading_deg(raw);
    }

    // ---- ENCODERS ----

    /// Read and zero both encoders, returning the (left, right) ticks
    /// accumulated since the previous call.
    pub fn take_encoder_ticks(&self) -> (i64, i64) {
        let mut encoders = self.encoders.lock().unwrap();

        let left = encoders.ticks(Side::Left);
        let right = encoders.ticks(Side::Right);
        encoders.reset(Side::Left);
        encoders.reset(Side::Right);

        (left, right)
    }

    // ---- FIX SOURCE ----

    /// Synchronise with the positioning source's latest publication.
    pub fn refresh_fix(&self) {
        self.fix_source.lock().unwrap().refresh();
    }

    /// The most recent fix visible after the last refresh.
    pub fn latest_fix(&self) -> Option<Fix> {
        self.fix_source.lock().unwrap().latest()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    /// Motor driver which records the last command it was given.
    #[derive(Clone, Default)]
    struct RecordingMotors {
        last: Arc<Mutex<Option<(f64, f64)>>>,
        braked: Arc<Mutex<bool>>,
    }

    impl MotorDriver for RecordingMotors {
        fn set_wheel_velocities(&mut self, left: f64, right: f64) {
            *self.last.lock().unwrap() = Some((left, right));
        }

        fn brake(&mut self) {
            *self.braked.lock().unwrap() = true;
        }
    }

    struct FixedGyro(f64);

    impl HeadingSensor for FixedGyro {
        fn heading_deg(&mut self) -> f64 {
            self.0
        }

        fn set_heading_deg(&mut self, heading_deg: f64) {
            self.0 = heading_deg;
        }
    }

    struct NoEncoders;

    impl WheelEncoders for NoEncoders {
        fn ticks(&mut self, _side: Side) -> i64 {
            0
        }

        fn reset(&mut self, _side: Side) {}
    }

    struct NoFix;

    impl FixSource for NoFix {
        fn refresh(&mut self) {}

        fn latest(&mut self) -> Option<Fix> {
            None
        }
    }

    fn test_platform(motors: RecordingMotors) -> Platform {
        Platform::new(
            Params { max_wheel_cmd: 255.0 },
            Box::new(motors),
            Box::new(FixedGyro(90.0)),
            Box::new(NoEncoders),
            Box::new(NoFix),
        )
    }

    #[test]
    fn commands_are_clamped() {
        let motors = RecordingMotors::default();
        let platform = test_platform(motors.clone());

        platform.set_wheel_velocities(400.0, -400.0);
        assert_eq!(*motors.last.lock().unwrap(), Some((255.0, -255.0)));
    }

    #[test]
    fn reversed_swaps_and_negates() {
        let motors = RecordingMotors::default();
        let platform = test_platform(motors.clone());

        platform.set_reversed(true);
        platform.set_wheel_velocities(100.0, -50.0);
        assert_eq!(*motors.last.lock().unwrap(), Some((50.0, -100.0)));
    }

    #[test]
    fn pause_suppresses_output() {
        let motors = RecordingMotors::default();
        let platform = test_platform(motors.clone());

        platform.pause_movement();
        assert!(*motors.braked.lock().unwrap());

        platform.set_wheel_velocities(100.0, 100.0);
        assert_eq!(*motors.last.lock().unwrap(), None);

        platform.unpause_movement();
        platform.set_wheel_velocities(100.0, 100.0);
        assert_eq!(*motors.last.lock().unwrap(), Some((100.0, 100.0)));
    }

    #[test]
    fn reversed_offsets_heading() {
        let motors = RecordingMotors::default();
        let platform = test_platform(motors);

        assert_eq!(platform.heading_deg(), 90.0);

        platform.set_reversed(true);
        assert_eq!(platform.heading_deg(), 270.0);

        // Presetting compensates for the offset
        platform.sync_heading_deg(45.0);
        assert_eq!(platform.heading_deg(), 45.0);
    }
}
