//! Host environment utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::env;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Environment variable giving the root of the software tree. Parameter and
/// session paths are resolved relative to this.
pub const SW_ROOT_ENV_VAR: &str = "TRITON_SW_ROOT";

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the root directory of the software tree from the environment.
pub fn get_triton_sw_root() -> Result<PathBuf, env::VarError> {
    Ok(PathBuf::from(env::var(SW_ROOT_ENV_VAR)?))
}
