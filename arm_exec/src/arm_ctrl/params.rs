//! Parameters structure for the arm controller

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tuning parameters for the arm controller.
///
/// Loaded from `params/arm_ctrl.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Executor tick period, also the sim-mode echo period.
    ///
    /// Units: milliseconds
    pub spline_wait_time_ms: f64,

    /// Spline parameter lookahead used for executor pacing.
    pub d_spline_t: f64,

    /// Executor poll period while idle.
    ///
    /// Units: milliseconds
    pub idle_poll_ms: u64,

    /// Fraction of each joint's maximum speed the executor is allowed to
    /// demand.
    pub speed_derate: f64,

    /// Number of frames in a preview.
    pub preview_steps: usize,

    /// Delay between preview frames.
    ///
    /// Units: milliseconds
    pub preview_frame_ms: u64,

    /// Number of random restarts allowed when solving IK for a target pose.
    pub ik_restarts: usize,
}
