//! # Navigation control module
//!
//! Navigation control is responsible for bringing the rover to a commanded
//! target pose. Each control cycle it refreshes the pose estimate, decides
//! which phase of the movement it is in, and produces left/right wheel
//! setpoints.
//!
//! The movement progresses through a small state machine:
//!
//! - `RotateOnly`: turn in place to a heading, ignoring position.
//! - `Rotate`: turn in place until the heading error is small enough to
//!   engage forward drive.
//! - `Drive`: translate towards the target while continuously re-aiming at
//!   it, superimposing the heading correction on the forward setpoints. If
//!   the heading error grows back past the engage threshold the machine
//!   falls back to `Rotate`, giving a hysteresis band instead of
//!   chattering at a single boundary.
//! - `Done`: terminal, the movement is complete.
//!
//! The heading correction is a PID controller on the signed heading error,
//! clamped to the platform's rotation limits and applied differentially
//! (`left += output, right -= output`).
//!
//! Commands and status queries arrive from other tasks; all shared state is
//! guarded by a single nav data lock, and completion is signalled through a
//! condition variable paired with that lock. Issuing a new command while a
//! movement is in progress supersedes it atomically.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod controllers;
mod params;
mod state;
mod task;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use controllers::{PidController, RotationLimits};
pub use params::Params;
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during navigation control operation.
#[derive(Debug, thiserror::Error)]
pub enum NavError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(#[from] util::params::LoadError),

    /// A command carried a non-finite coordinate. Rejected rather than let
    /// a NaN propagate through the controller state.
    #[error("Invalid target: {field} = {value} is not finite")]
    InvalidTarget { field: &'static str, value: f64 },
}
