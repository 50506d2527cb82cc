//! Parameters structure for the kinematics solver

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tuning parameters for the kinematics solver.
///
/// Loaded from `params/kinematics.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Maximum number of IK descent iterations before giving up.
    pub max_iterations: usize,

    /// Number of consecutive low-movement iterations after which IK gives
    /// up.
    pub max_iterations_low_movement: usize,

    /// The acceptable position distance from a solution to the target.
    ///
    /// Units: meters
    pub pos_threshold_m: f64,

    /// The acceptable angular distance from a solution to the target
    /// orientation.
    ///
    /// Units: radians
    pub angle_threshold_rad: f64,

    /// The fraction of the remaining position error to try to move each
    /// iteration.
    pub k_position_step: f64,

    /// The fraction of the remaining orientation error to try to move each
    /// iteration.
    pub k_angle_step: f64,

    /// The joint perturbation used to estimate Jacobian columns by finite
    /// differences.
    ///
    /// Units: radians
    pub delta_theta_rad: f64,

    /// End-effector movement below this distance counts as a low-movement
    /// iteration.
    ///
    /// Units: meters
    pub epsilon_dist_m: f64,

    /// End-effector rotation below this distance counts as a low-movement
    /// iteration.
    ///
    /// Units: radians
    pub epsilon_angle_dist_rad: f64,

    /// Damping factor of the damped pseudo-inverse step.
    pub damping_lambda: f64,
}
