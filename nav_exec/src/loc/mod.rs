//! # Localisation module
//!
//! This module produces the rover's best-estimate pose each control cycle by
//! fusing the gyro heading with absolute position fixes published by the
//! overhead vision positioning source.
//!
//! Two fusion strategies are supported, selected at configuration time:
//!
//! - [`LocSource::FixOnly`]: position is taken from the absolute fix alone
//!   and is not advanced between fixes. Position is therefore stale for a
//!   few cycles at a time, which is acceptable at the control cadence.
//! - [`LocSource::DeadReckoning`]: position is advanced every cycle by
//!   integrating encoder-derived forward travel along the previous heading,
//!   and is overwritten wholesale whenever a new fix arrives.
//!
//! In both strategies the heading comes from the gyro every cycle and the
//! fix is authoritative for position when present.
//!
//! Raw fixes are reported in the frame of the elevated, off-axis sensor. A
//! range-proportional correction approximating the perspective projection
//! error is subtracted along the bearing from the sensor origin before the
//! fix is used.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
pub use params::Params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Vector2;
use serde::Deserialize;

// Internal
use util::maths::normalize_angle;
use util::module::State;
use util::params::LoadError;
use util::session::Session;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The current pose (position and heading in the field frame) of the rover.
#[derive(Debug, Copy, Clone)]
pub struct Pose {
    /// The position in the field frame.
    ///
    /// Units: field units
    pub position: Vector2<f64>,

    /// The heading in degrees, normalised into (0, 360], with 0/360 along
    /// the field X axis.
    pub heading_deg: f64,
}

/// An absolute position fix published by the vision positioning source.
#[derive(Debug, Copy, Clone)]
pub struct Fix {
    /// Raw position in the sensor frame, prior to correction.
    ///
    /// Units: field units
    pub position: Vector2<f64>,

    /// Heading in degrees. Not necessarily normalised.
    pub heading_deg: f64,

    /// Monotonically increasing publication tag. A fix is fresh when this
    /// differs from the last applied tag.
    pub timestamp_us: u64,
}

/// The localisation estimator.
///
/// Owned by the navigation controller and processed cyclically by the
/// control task under the nav data lock.
#[derive(Debug, Default, Clone)]
pub struct LocEstimator {
    params: Params,

    pose: Pose,

    /// Tag of the last applied fix, `None` until the first fix is adopted.
    last_fix_timestamp_us: Option<u64>,
}

/// Sensor readings required for one cycle of localisation processing.
#[derive(Debug, Copy, Clone, Default)]
pub struct LocInputs {
    /// Platform heading reading in degrees (gyro plus the reversed-mode
    /// offset). Not necessarily normalised.
    pub heading_deg: f64,

    /// Encoder ticks accumulated since the previous cycle, (left, right).
    pub encoder_ticks: (i64, i64),

    /// The most recent fix published by the positioning source, if any. May
    /// be stale.
    pub fix: Option<Fix>,
}

/// Status report for localisation processing.
#[derive(Debug, Copy, Clone, Default)]
pub struct LocStatusReport {
    /// True if a fresh fix was adopted this cycle.
    pub fix_applied: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Selectable pose fusion strategies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub enum LocSource {
    /// Heading from the gyro every cycle, position from the absolute fix
    /// only.
    FixOnly,

    /// Position advanced each cycle from encoder travel along the previous
    /// heading, snapped to the absolute fix whenever one arrives.
    DeadReckoning,
}

/// Potential errors that can occur during localisation processing.
#[derive(Debug, thiserror::Error)]
pub enum LocError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(#[from] LoadError),

    #[error("Non-finite sensor reading: heading {0} degrees")]
    NonFiniteHeading(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vector2::zeros(),
            heading_deg: 360.0,
        }
    }
}

impl Pose {
    /// Return the bearing from this pose to the given point, in normalised
    /// degrees.
    pub fn bearing_to_deg(&self, point: &Vector2<f64>) -> f64 {
        let delta = point - self.position;
        normalize_angle(delta.y.atan2(delta.x).to_degrees())
    }

    /// Return the euclidean distance from this pose to the given point.
    pub fn distance_to(&self, point: &Vector2<f64>) -> f64 {
        (point - self.position).norm()
    }
}

impl LocEstimator {
    /// Create a new estimator from already-loaded parameters.
    pub fn with_params(params: Params) -> Self {
        Self {
            params,
            pose: Pose::default(),
            last_fix_timestamp_us: None,
        }
    }

    /// The current best-estimate pose.
    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// The configured fusion strategy.
    pub fn source(&self) -> LocSource {
        self.params.source
    }

    /// How long to wait for the first fix at startup.
    pub fn fix_startup_timeout_s(&self) -> f64 {
        self.params.fix_startup_timeout_s
    }

    /// True if the given fix has not yet been applied.
    pub fn is_fresh(&self, fix: &Fix) -> bool {
        self.last_fix_timestamp_us != Some(fix.timestamp_us)
    }

    /// Adopt a fix wholesale: corrected position and normalised heading.
    ///
    /// Used at startup and during re-synchronisation, where the fix heading
    /// is also used to preset the gyro. Cyclic processing goes through
    /// [`State::proc`] instead, which keeps the gyro as the heading source.
    pub fn adopt_fix(&mut self, fix: &Fix) -> Pose {
        self.pose.position = self.correct_fix(&fix.position);
        self.pose.heading_deg = normalize_angle(fix.heading_deg);
        self.last_fix_timestamp_us = Some(fix.timestamp_us);

        self.pose
    }

    /// Apply the range-proportional sensor offset correction to a raw fix
    /// position.
    ///
    /// The raw fix reports position in the frame of an elevated, off-axis
    /// sensor. With range `r` and bearing `theta` from the sensor origin,
    /// an offset of magnitude `gain * (r / ref_range)` is subtracted along
    /// the bearing. The linear-in-range form matches the calibration of the
    /// correction constants.
    pub fn correct_fix(&self, raw: &Vector2<f64>) -> Vector2<f64> {
        let range = raw.norm();
        let bearing = raw.y.atan2(raw.x);

        let corr = self.params.fix_corr_gain * (range / self.params.fix_corr_ref_range);

        Vector2::new(
            raw.x - corr * bearing.cos(),
            raw.y - corr * bearing.sin(),
        )
    }
}

impl State for LocEstimator {
    type InitData = &'static str;
    type InitError = LocError;

    type InputData = LocInputs;
    type OutputData = Pose;
    type StatusReport = LocStatusReport;
    type ProcError = LocError;

    /// Initialise the estimator.
    ///
    /// Expected init data is the path to the parameter file.
    fn init(&mut self, init_data: Self::InitData, _session: &Session)
        -> Result<(), Self::InitError>
    {
        self.params = util::params::load(init_data)?;
        self.pose = Pose::default();
        self.last_fix_timestamp_us = None;

        Ok(())
    }

    /// Perform one cycle of localisation processing.
    ///
    /// Dead-reckoning advances the position along the heading of the
    /// previous cycle, then a fresh fix (if any) overwrites the position,
    /// then the heading is refreshed from the gyro reading.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        let mut report = LocStatusReport::default();

        if !input_data.heading_deg.is_finite() {
            return Err(LocError::NonFiniteHeading(input_data.heading_deg));
        }

        // Advance the dead-reckoned position along the previous heading
        if self.params.source == LocSource::DeadReckoning {
            let (left, right) = input_data.encoder_ticks;
            let travel =
                0.5 * (left + right) as f64 * self.params.units_per_tick;

            let heading_rad = self.pose.heading_deg.to_radians();
            self.pose.position += travel
                * Vector2::new(heading_rad.cos(), heading_rad.sin());
        }

        // A fresh fix is authoritative for position
        if let Some(ref fix) = input_data.fix {
            if self.is_fresh(fix) {
                self.pose.position = self.correct_fix(&fix.position);
                self.last_fix_timestamp_us = Some(fix.timestamp_us);
                report.fix_applied = true;
            }
        }

        // Heading always comes from the gyro
        self.pose.heading_deg = normalize_angle(input_data.heading_deg);

        Ok((self.pose, report))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn test_params(source: LocSource) -> Params {
        Params {
            source,
            fix_corr_gain: 443.4,
            fix_corr_ref_range: 4766.55,
            units_per_tick: 0.1,
            fix_startup_timeout_s: 1.0,
        }
    }

    fn fix_at(x: f64, y: f64, heading_deg: f64, timestamp_us: u64) -> Fix {
        Fix {
            position: Vector2::new(x, y),
            heading_deg,
            timestamp_us,
        }
    }

    #[test]
    fn correction_at_origin_is_identity() {
        let est = LocEstimator::with_params(test_params(LocSource::FixOnly));

        let corrected = est.correct_fix(&Vector2::zeros());
        assert_eq!(corrected, Vector2::zeros());
    }

    #[test]
    fn correction_magnitude_grows_with_range() {
        let est = LocEstimator::with_params(test_params(LocSource::FixOnly));

        let mut prev_corr = 0.0;
        for r in [10.0f64, 100.0, 1000.0, 4766.55].iter() {
            let raw = Vector2::new(*r, 0.0);
            let corr = (raw - est.correct_fix(&raw)).norm();
            assert!(corr > prev_corr);
            prev_corr = corr;
        }

        // At the reference range the offset magnitude equals the gain
        let raw = Vector2::new(0.0, 4766.55);
        let corr = raw - est.correct_fix(&raw);
        assert!((corr.norm() - 443.4).abs() < 1e-9);

        // The offset points along the bearing from the sensor origin
        assert!(corr.x.abs() < 1e-9);
        assert!(corr.y > 0.0);
    }

    #[test]
    fn fix_only_holds_position_between_fixes() {
        let mut est = LocEstimator::with_params(test_params(LocSource::FixOnly));
        // Disable the correction so positions can be compared directly
        est.params.fix_corr_gain = 0.0;

        let fix = fix_at(10.0, 20.0, 45.0, 100);
        let (pose, report) = est.proc(&LocInputs {
            heading_deg: 45.0,
            encoder_ticks: (50, 50),
            fix: Some(fix),
        }).unwrap();

        assert!(report.fix_applied);
        assert_eq!(pose.position, Vector2::new(10.0, 20.0));

        // Same tag again: the fix is stale, and encoder travel is ignored in
        // fix-only fusion, so the position holds
        let (pose, report) = est.proc(&LocInputs {
            heading_deg: 45.0,
            encoder_ticks: (50, 50),
            fix: Some(fix),
        }).unwrap();

        assert!(!report.fix_applied);
        assert_eq!(pose.position, Vector2::new(10.0, 20.0));
    }

    #[test]
    fn dead_reckoning_advances_along_previous_heading() {
        let mut params = test_params(LocSource::DeadReckoning);
        params.fix_corr_gain = 0.0;
        let mut est = LocEstimator::with_params(params);

        // Point the estimate along +Y
        est.pose.heading_deg = 90.0;

        // 100 mean ticks at 0.1 units/tick = 10 units of travel
        let (pose, _) = est.proc(&LocInputs {
            heading_deg: 90.0,
            encoder_ticks: (100, 100),
            fix: None,
        }).unwrap();

        assert!(pose.position.x.abs() < 1e-9);
        assert!((pose.position.y - 10.0).abs() < 1e-9);
    }

    #[test]
    fn fresh_fix_snaps_dead_reckoned_position() {
        let mut params = test_params(LocSource::DeadReckoning);
        params.fix_corr_gain = 0.0;
        let mut est = LocEstimator::with_params(params);

        // Dead-reckon away from the origin
        est.proc(&LocInputs {
            heading_deg: 360.0,
            encoder_ticks: (100, 100),
            fix: None,
        }).unwrap();

        // A fresh fix overwrites the accumulated estimate wholesale
        let (pose, report) = est.proc(&LocInputs {
            heading_deg: 360.0,
            encoder_ticks: (0, 0),
            fix: Some(fix_at(1.0, 2.0, 0.0, 7)),
        }).unwrap();

        assert!(report.fix_applied);
        assert_eq!(pose.position, Vector2::new(1.0, 2.0));
    }

    #[test]
    fn heading_is_normalised_from_gyro() {
        let mut est = LocEstimator::with_params(test_params(LocSource::FixOnly));

        let (pose, _) = est.proc(&LocInputs {
            heading_deg: -90.0,
            encoder_ticks: (0, 0),
            fix: None,
        }).unwrap();

        assert_eq!(pose.heading_deg, 270.0);
    }

    #[test]
    fn non_finite_heading_is_rejected() {
        let mut est = LocEstimator::with_params(test_params(LocSource::FixOnly));

        let result = est.proc(&LocInputs {
            heading_deg: f64::NAN,
            encoder_ticks: (0, 0),
            fix: None,
        });

        assert!(matches!(result, Err(LocError::NonFiniteHeading(_))));
    }
}
