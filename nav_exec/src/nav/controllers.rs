//! # Navigation controllers module
//!
//! This module provides the PID controller driving the heading correction,
//! and the clamp policy applied to its output before it becomes a
//! differential wheel command.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
use util::maths::clamp;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A PID controller.
///
/// The controller runs at the fixed control cadence: the integral
/// accumulates the per-cycle error directly and the derivative is the
/// per-cycle error delta, with no explicit time scaling. Gains are
/// calibrated against that cadence.
#[derive(Debug, Clone)]
pub struct PidController {
    /// Proportional gain
    k_p: f64,

    /// Integral gain
    k_i: f64,

    /// Derivative gain
    k_d: f64,

    /// The input value the controller drives the input towards. Zero by
    /// default: callers normally feed a signed error and track zero.
    goal: f64,

    /// When false, updates are no-ops producing zero output.
    enabled: bool,

    /// The integral accumulation
    integral: f64,

    /// Previous error, `None` until the first enabled update
    prev_error: Option<f64>,
}

/// Clamp policy for the rotation output.
///
/// The maximum magnitude differs between the normal and mechanically
/// reversed orientations; the minimum magnitude is the smallest command
/// that overcomes static friction during an in-place pivot.
#[derive(Debug, Copy, Clone)]
pub struct RotationLimits {
    pub max: f64,
    pub max_reversed: f64,
    pub min: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PidController {
    /// Create a new controller with the given gains, enabled, with a zero
    /// goal.
    pub fn new(k_p: f64, k_i: f64, k_d: f64) -> Self {
        Self {
            k_p,
            k_i,
            k_d,
            goal: 0.0,
            enabled: true,
            integral: 0.0,
            prev_error: None,
        }
    }

    /// Set the goal the input is driven towards.
    pub fn set_goal(&mut self, goal: f64) {
        self.goal = goal;
    }

    /// Enable or disable the controller. While disabled, updates have no
    /// effect.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Clear the integral accumulation and derivative history.
    ///
    /// Call when re-arming a controller after a pause, otherwise the first
    /// derivative is computed against stale history.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }

    /// Run one cycle of the controller on the given input.
    ///
    /// Returns the control output, or zero without touching the internal
    /// state if the controller is disabled.
    pub fn update(&mut self, input: f64) -> f64 {
        if !self.enabled {
            return 0.0;
        }

        let error = input - self.goal;

        self.integral += error;

        // No derivative on the first update, there is no history to
        // difference against
        let deriv = match self.prev_error {
            Some(e) => error - e,
            None => 0.0,
        };

        let out = self.k_p * error
            + self.k_i * self.integral
            + self.k_d * deriv;

        self.prev_error = Some(error);

        out
    }
}

impl RotationLimits {
    /// Clamp a rotation output to the allowed band for the current
    /// orientation.
    pub fn apply(&self, output: f64, reversed: bool) -> f64 {
        let limit = if reversed { self.max_reversed } else { self.max };

        let out = clamp(&output, &-limit, &limit);

        // Below the static friction floor, command the floor in the
        // direction of the output
        if out.abs() < self.min {
            if out > 0.0 {
                self.min
            }
            else {
                -self.min
            }
        }
        else {
            out
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
