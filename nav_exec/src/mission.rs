//! # Mission script module
//!
//! This module provides an interpreter for timed navigation command
//! scripts, allowing a mission to be described as a sequence of commands
//! executed at offsets from session start.
//!
//! Script lines have the form `time_s: <json command>;`, for example:
//!
//! ```text
//! 1.0: {"MoveTo": {"x": 1000.0, "y": 500.0, "speed": 200.0}};
//! 2.0: "WaitMovement";
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::warn;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

// Internal
use crate::nav::NavCtrl;
use crate::platform::Platform;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Settling time around a re-synchronisation, giving the platform time to
/// come to a complete stop before the fix is adopted.
const RESYNC_SETTLE_MS: u64 = 300;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A navigation command which can be issued from a mission script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NavTc {
    /// Command a full target pose.
    SetTarget { x: f64, y: f64, heading_deg: f64, speed: f64 },

    /// Drive to a point, choosing the cheaper mechanical orientation.
    MoveTo { x: f64, y: f64, speed: f64 },

    /// Drive to a point with an explicit mechanical orientation.
    MoveToDirected { x: f64, y: f64, speed: f64, reverse: bool },

    /// Turn in place to a heading.
    TurnToHeading { heading_deg: f64 },

    /// Turn in place to face a point.
    TurnToPoint { x: f64, y: f64 },

    /// Enable or disable the heading lock option.
    SetHeadingLock { locked: bool },

    /// Enable or disable the fast drive option.
    SetFastDrive { fast: bool },

    /// Pause, re-synchronise the pose estimate to the latest fix, unpause.
    Resync,

    /// Block until the current movement completes.
    WaitMovement,

    /// Block until the in-place rotation phase completes.
    WaitRotation,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0}")]
    ScriptNotFound(String),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error(
        "Script contains an invalid timestamp: {0}. \
        Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid command at {0} s: {1}")]
    InvalidTc(f64, serde_json::Error)
}

/// Commands which are due for execution.
pub enum PendingTcs {
    None,
    Some(Vec<NavTc>),
    EndOfScript
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A command which is scripted to occur at a specific time.
struct Command {
    /// The time the command is supposed to execute at
    exec_time_s: f64,

    /// The command to run
    tc: NavTc
}

/// A mission script interpreter.
///
/// After initialising with the path to the script use
/// [`MissionScript::get_pending_tcs`] to acquire the commands that need
/// executing.
pub struct MissionScript {
    _script_path: PathBuf,
    cmds: VecDeque<Command>
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MissionScript {

    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {

        // Get the path in a buffer
        let path = PathBuf::from(script_path.as_ref());

        // Check that the script file exists.
        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(
                path.to_string_lossy().to_string()));
        }

        // Load the script into a string
        let script = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) => return Err(ScriptError::ScriptLoadError(e))
        };

        Self::parse(&script, path)
    }

    /// Parse a script from a string.
    fn parse(script: &str, path: PathBuf) -> Result<Self, ScriptError> {

        // Empty queue of commands
        let mut tc_queue: VecDeque<Command> = VecDeque::new();

        // Each line is a timestamp, a colon, and a JSON payload ending in a
        // semicolon
        let re = RegexBuilder::
            new(r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);")
            .multi_line(true)
            .build()
            .unwrap();

        for cap in re.captures_iter(script) {
            // Parse the exec time
            let exec_time_s: f64 = match cap.get(1).unwrap().as_str().parse() {
                Ok(t) => t,
                Err(e) => return Err(
                    ScriptError::InvalidTimestamp(format!("{}", e)))
            };

            // Parse the command from the payload. The scripts contain JSON
            // only.
            let tc: NavTc = match serde_json::from_str(
                cap.get(3).unwrap().as_str())
            {
                Ok(c) => c,
                Err(e) => return Err(ScriptError::InvalidTc(
                    exec_time_s, e
                ))
            };

            // Build command from the match
            tc_queue.push_back(Command {
                exec_time_s,
                tc
            });
        }

        if tc_queue.is_empty() {
            return Err(ScriptError::ScriptEmpty)
        }

        Ok(MissionScript {
            _script_path: path,
            cmds: tc_queue
        })
    }

    /// Return a vector of pending commands, or `None` if nothing needs
    /// executing at the given session-relative time.
    pub fn get_pending_tcs(&mut self, current_time_s: f64) -> PendingTcs {

        // If the queue is empty the script is over and we return the end of
        // script variant
        if self.cmds.is_empty() {
            return PendingTcs::EndOfScript
        }

        let mut tc_vec: Vec<NavTc> = vec![];

        // Pop commands from the head of the queue until the exec times are
        // larger than the current time.
        while self.cmds.front().map(|c| c.exec_time_s < current_time_s) == Some(true) {
            if let Some(cmd) = self.cmds.pop_front() {
                tc_vec.push(cmd.tc);
            }
        }

        if !tc_vec.is_empty() {
            PendingTcs::Some(tc_vec)
        }
        else {
            PendingTcs::None
        }
    }

    /// Get the number of commands left in the script
    pub fn get_num_tcs(&self) -> usize {
        self.cmds.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.cmds.back() {
            Some(c) => c.exec_time_s,
            None => 0f64
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Execute a single mission command against the navigation controller.
///
/// Command failures (such as non-finite coordinates) are logged and
/// swallowed, a bad script line must not bring the mission down.
pub fn exec(nav: &NavCtrl, platform: &Platform, tc: &NavTc) {
    let result = match *tc {
        NavTc::SetTarget { x, y, heading_deg, speed } =>
            nav.set_target(x, y, heading_deg, speed),

        NavTc::MoveTo { x, y, speed } =>
            nav.move_to_point(x, y, speed),

        NavTc::MoveToDirected { x, y, speed, reverse } =>
            nav.move_to_point_directed(x, y, speed, reverse),

        NavTc::TurnToHeading { heading_deg } =>
            nav.turn_to_heading(heading_deg),

        NavTc::TurnToPoint { x, y } =>
            nav.turn_to_point(x, y),

        NavTc::SetHeadingLock { locked } => {
            nav.set_heading_lock(locked);
            Ok(())
        }

        NavTc::SetFastDrive { fast } => {
            nav.set_fast_drive(fast);
            Ok(())
        }

        NavTc::Resync => {
            platform.pause_movement();
            thread::sleep(Duration::from_millis(RESYNC_SETTLE_MS));
            nav.resync();
            platform.unpause_movement();
            Ok(())
        }

        NavTc::WaitMovement => {
            nav.wait_for_movement();
            Ok(())
        }

        NavTc::WaitRotation => {
            nav.wait_for_rotation();
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!("Command {:?} rejected: {}", tc, e);
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const SCRIPT: &str = r#"
        0.5: {"MoveTo": {"x": 1000.0, "y": 500.0, "speed": 200.0}};
        2.0: "WaitMovement";
        3.5: {"TurnToHeading": {"heading_deg": 90.0}};
    "#;

    #[test]
    fn parses_timed_commands() {
        let script =
            MissionScript::parse(SCRIPT, PathBuf::from("test")).unwrap();

        assert_eq!(script.get_num_tcs(), 3);
        assert_eq!(script.get_duration(), 3.5);
    }

    #[test]
    fn pending_commands_respect_time() {
        let mut script =
            MissionScript::parse(SCRIPT, PathBuf::from("test")).unwrap();

        // Nothing due yet
        assert!(matches!(script.get_pending_tcs(0.1), PendingTcs::None));

        // First two commands due
        match script.get_pending_tcs(2.5) {
            PendingTcs::Some(tcs) => {
                assert_eq!(tcs.len(), 2);
                assert!(matches!(tcs[0], NavTc::MoveTo { .. }));
                assert!(matches!(tcs[1], NavTc::WaitMovement));
            }
            _ => panic!("Expected pending commands"),
        }

        // Last command, then end of script
        assert!(matches!(script.get_pending_tcs(10.0), PendingTcs::Some(_)));
        assert!(matches!(script.get_pending_tcs(10.0), PendingTcs::EndOfScript));
    }

    #[test]
    fn empty_script_is_an_error() {
        assert!(matches!(
            MissionScript::parse("no commands here", PathBuf::from("test")),
            Err(ScriptError::ScriptEmpty)
        ));
    }

    #[test]
    fn invalid_command_is_an_error() {
        assert!(matches!(
            MissionScript::parse("1.0: {\"Bogus\": 1};", PathBuf::from("test")),
            Err(ScriptError::InvalidTc(_, _))
        ));
    }
}
