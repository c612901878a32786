//! Parameters structure for the localisation estimator

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

use super::LocSource;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the localisation estimator.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {

    // ---- FUSION ----

    /// Which fusion strategy to run (see [`LocSource`]).
    pub source: LocSource,

    // ---- FIX CORRECTION ----

    /// Gain of the range-proportional fix correction. This is the offset
    /// magnitude, in field units, seen at the reference range.
    ///
    /// Units: field units
    pub fix_corr_gain: f64,

    /// Reference range at which the correction gain was calibrated.
    ///
    /// Units: field units
    pub fix_corr_ref_range: f64,

    // ---- DEAD-RECKONING ----

    /// Forward travel corresponding to one encoder tick.
    ///
    /// Units: field units/tick
    pub units_per_tick: f64,

    // ---- STARTUP ----

    /// How long to wait for the first absolute fix at initialisation before
    /// degrading to gyro-only operation.
    ///
    /// Units: seconds
    pub fix_startup_timeout_s: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            source: LocSource::FixOnly,
            fix_corr_gain: 0.0,
            fix_corr_ref_range: 1.0,
            units_per_tick: 0.0,
            fix_startup_timeout_s: 1.0,
        }
    }
}
