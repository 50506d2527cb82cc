//! # Arm library.
//!
//! This library exposes the modules of the arm control executable so that
//! they can be unit tested and reused by other crates in the workspace.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Arm control module - the state machine orchestrating telemetry intake,
/// target reception, planning, preview and execution.
pub mod arm_ctrl;

/// Arm model - joint geometry, limits, current configuration and cached
/// world-frame transforms.
pub mod arm_model;

/// Command client - receives operator commands from the GUI.
pub mod cmd_client;

/// Encoder guard - dud-value and temporal-jump detection over recent
/// encoder readings.
pub mod encoder_guard;

/// Kinematics solver - forward kinematics and damped-Jacobian inverse
/// kinematics over the arm chain.
pub mod kinematics;

/// Motion planner - RRT-Connect in configuration space plus the spline fit
/// over the resulting waypoints.
pub mod motion_planner;

/// Telemetry client - receives encoder readings (and the sim-mode echo).
pub mod telem_client;

/// Telemetry server - publishes transforms, setpoints and debug popups on
/// the outbound bus.
pub mod tm_server;
