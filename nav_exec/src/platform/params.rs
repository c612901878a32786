//! Parameters structure for the platform driver

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the platform driver.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Symmetric clamp applied to wheel velocity commands before they reach
    /// the motor driver.
    ///
    /// Units: motor command units
    pub max_wheel_cmd: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_wheel_cmd: 255.0,
        }
    }
}
