//! Host platform utility functions

use std::path::PathBuf;

/// Get the root directory of the arm software installation.
///
/// This is read from the `ARM_SW_ROOT` environment variable, which must be
/// set before any executable is run.
pub fn get_arm_sw_root() -> Result<PathBuf, std::env::VarError> {
    match std::env::var("ARM_SW_ROOT") {
        Ok(s) => Ok(s.into()),
        Err(e) => Err(e),
    }
}
