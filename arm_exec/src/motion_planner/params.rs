//! Parameters structure for the motion planner

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tuning parameters for the motion planner.
///
/// Loaded from `params/motion_planner.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Maximum joint-space step when extending a tree.
    ///
    /// Units: radians
    pub extend_step_rad: f64,

    /// Interpolation step used when checking a segment for collisions.
    ///
    /// Units: radians
    pub collision_check_step_rad: f64,

    /// RRT-Connect iteration budget.
    pub max_iterations: usize,

    /// Number of shortcut smoothing passes over the raw waypoint sequence.
    pub smoothing_passes: usize,

    /// If true a JSON report of each planning attempt is saved to the
    /// session.
    pub save_report: bool,
}
