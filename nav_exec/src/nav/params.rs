//! Parameters structure for the navigation controller

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the navigation controller.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {

    // ---- SCHEDULING ----

    /// Target period of one control cycle.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    // ---- HEADING CONTROLLER ----

    /// Proportional gain of the heading controller.
    pub rot_k_p: f64,

    /// Integral gain of the heading controller.
    pub rot_k_i: f64,

    /// Derivative gain of the heading controller.
    pub rot_k_d: f64,

    /// Largest rotation magnitude (left/right setpoint delta) in the normal
    /// orientation.
    ///
    /// Units: motor command units
    pub max_rot: f64,

    /// Largest rotation magnitude in the mechanically-reversed orientation.
    ///
    /// Units: motor command units
    pub max_rot_reversed: f64,

    /// Smallest rotation magnitude, below which static friction stalls the
    /// platform.
    ///
    /// Units: motor command units
    pub min_rot: f64,

    // ---- DRIVING ----

    /// Gain mapping remaining distance to forward velocity when approaching
    /// the target. Forward velocity is the smaller of the commanded speed
    /// and `distance * fwd_gain`.
    ///
    /// Units: motor command units/field unit
    pub fwd_gain: f64,

    // ---- TOLERANCES ----

    /// Distance below which the target position counts as reached.
    ///
    /// Units: field units
    pub pos_eps: f64,

    /// Angular error below which an in-place rotation counts as complete.
    ///
    /// Units: degrees
    pub ang_eps: f64,

    /// Angular error bound of the rotate/drive hysteresis band: drive
    /// engages when the error falls to this threshold, and is abandoned for
    /// re-alignment when the error grows back beyond it.
    ///
    /// Units: degrees
    pub ang_drive_limit: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            cycle_period_s: 0.05,
            rot_k_p: -5.0,
            rot_k_i: 0.0,
            rot_k_d: 0.2,
            max_rot: 110.0,
            max_rot_reversed: 90.0,
            min_rot: 15.0,
            fwd_gain: 40.0,
            pos_eps: 2.0,
            ang_eps: 3.0,
            ang_drive_limit: 20.0,
        }
    }
}
