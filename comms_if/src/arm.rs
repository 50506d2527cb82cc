//! # Arm Bus Messages
//!
//! Message records for each named channel on the arm bus. Inbound channels
//! carry operator commands and encoder telemetry, outbound channels carry
//! joint transforms, motor setpoints, the sim-mode telemetry echo and debug
//! popups for the GUI.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// The number of joints on the arm, named A (base) to F (grip).
pub const NUM_JOINTS: usize = 6;

// Inbound channels

/// Raw joint angles from the encoders (or the sim echo).
pub const CHAN_ARM_POSITION: &str = "/arm_position";

/// Cartesian end-effector target from the GUI.
pub const CHAN_TARGET_ORIENTATION: &str = "/target_orientation";

/// Explicit joint-angle target from the GUI.
pub const CHAN_TARGET_ANGLES: &str = "/target_angles";

/// Execute/preview confirmation from the GUI.
pub const CHAN_MOTION_EXECUTE: &str = "/motion_execute";

/// IK enable/disable from the GUI.
pub const CHAN_IK_ENABLED: &str = "/ik_enabled";

/// Simulation mode toggle from the GUI.
pub const CHAN_SIMULATION_MODE: &str = "/simulation_mode";

/// Per-joint lock flags from the GUI.
pub const CHAN_LOCK_JOINTS: &str = "/lock_joints";

/// Arm control state tag from the GUI.
pub const CHAN_ARM_CONTROL_STATE: &str = "/arm_control_state";

// Outbound channels

/// World-frame joint transforms for the GUI's 3D view.
pub const CHAN_FK_TRANSFORM: &str = "/fk_transform";

/// Joint setpoints in raw encoder units for the motor server.
pub const CHAN_IK_RA_CONTROL: &str = "/ik_ra_control";

/// Debug popups for the GUI.
pub const CHAN_DEBUG_MESSAGE: &str = "/debug_message";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Six joint angles, one per joint A to F.
///
/// Used for encoder telemetry (raw units in hardware mode, logical radians
/// in sim mode), for joint-angle targets, and for motor setpoints.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ArmPosition {
    pub joint_a: f64,
    pub joint_b: f64,
    pub joint_c: f64,
    pub joint_d: f64,
    pub joint_e: f64,
    pub joint_f: f64,
}

/// A Cartesian end-effector target, optionally with an orientation given as
/// extrinsic euler angles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TargetOrientation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,

    /// If true the solver must match the orientation as well as the
    /// position (6-DoF IK), otherwise position only (3-DoF).
    pub use_orientation: bool,
}

/// Execute or preview a planned motion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionExecute {
    /// True to preview only, false to execute the plan on the arm.
    pub preview: bool,
}

/// Enable or disable inverse kinematics control.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IkEnabled {
    pub enabled: bool,
}

/// Toggle simulation mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimulationMode {
    pub sim_mode: bool,
}

/// Per-joint lock flags. A locked joint is held at its current angle by the
/// solver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LockJoints {
    pub joint_a: bool,
    pub joint_b: bool,
    pub joint_c: bool,
    pub joint_d: bool,
    pub joint_e: bool,
    pub joint_f: bool,
}

/// The GUI's arm control state tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmControlState {
    /// One of `"idle"`, `"open-loop"` or `"closed-loop"`.
    pub state: String,
}

/// World-frame homogeneous transforms for each joint, row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FkTransform {
    pub transform_a: [[f64; 4]; 4],
    pub transform_b: [[f64; 4]; 4],
    pub transform_c: [[f64; 4]; 4],
    pub transform_d: [[f64; 4]; 4],
    pub transform_e: [[f64; 4]; 4],
    pub transform_f: [[f64; 4]; 4],
}

/// A popup message for the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugMessage {
    pub is_error: bool,
    pub message: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A parsed operator command, grouping the inbound GUI channels for
/// dispatch.
#[derive(Debug, Clone)]
pub enum ArmCmd {
    TargetOrientation(TargetOrientation),
    TargetAngles(ArmPosition),
    MotionExecute(MotionExecute),
    IkEnabled(IkEnabled),
    SimulationMode(SimulationMode),
    LockJoints(LockJoints),
    ArmControlState(ArmControlState),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ArmPosition {
    pub fn from_array(angles: [f64; NUM_JOINTS]) -> Self {
        Self {
            joint_a: angles[0],
            joint_b: angles[1],
            joint_c: angles[2],
            joint_d: angles[3],
            joint_e: angles[4],
            joint_f: angles[5],
        }
    }

    pub fn to_array(&self) -> [f64; NUM_JOINTS] {
        [
            self.joint_a,
            self.joint_b,
            self.joint_c,
            self.joint_d,
            self.joint_e,
            self.joint_f,
        ]
    }
}

impl LockJoints {
    pub fn to_array(&self) -> [bool; NUM_JOINTS] {
        [
            self.joint_a,
            self.joint_b,
            self.joint_c,
            self.joint_d,
            self.joint_e,
            self.joint_f,
        ]
    }
}

impl ArmCmd {
    /// Parse a command from a channel name and JSON payload.
    ///
    /// Returns `Ok(None)` for channels which are not operator commands.
    pub fn from_frame(
        channel: &str,
        payload: &str,
    ) -> Result<Option<Self>, crate::net::FrameError> {
        use crate::net::parse_payload;

        let cmd = match channel {
            CHAN_TARGET_ORIENTATION => Some(ArmCmd::TargetOrientation(parse_payload(payload)?)),
            CHAN_TARGET_ANGLES => Some(ArmCmd::TargetAngles(parse_payload(payload)?)),
            CHAN_MOTION_EXECUTE => Some(ArmCmd::MotionExecute(parse_payload(payload)?)),
            CHAN_IK_ENABLED => Some(ArmCmd::IkEnabled(parse_payload(payload)?)),
            CHAN_SIMULATION_MODE => Some(ArmCmd::SimulationMode(parse_payload(payload)?)),
            CHAN_LOCK_JOINTS => Some(ArmCmd::LockJoints(parse_payload(payload)?)),
            CHAN_ARM_CONTROL_STATE => Some(ArmCmd::ArmControlState(parse_payload(payload)?)),
            _ => None,
        };

        Ok(cmd)
    }

    /// The list of channels a command subscriber must subscribe to.
    pub fn channels() -> [&'static str; 7] {
        [
            CHAN_TARGET_ORIENTATION,
            CHAN_TARGET_ANGLES,
            CHAN_MOTION_EXECUTE,
            CHAN_IK_ENABLED,
            CHAN_SIMULATION_MODE,
            CHAN_LOCK_JOINTS,
            CHAN_ARM_CONTROL_STATE,
        ]
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_arm_position_array_round_trip() {
        let angles = [0.5, -0.3, 0.4, 0.0, 0.2, 0.0];
        let msg = ArmPosition::from_array(angles);
        assert_eq!(msg.to_array(), angles);
        assert_eq!(msg.joint_a, 0.5);
        assert_eq!(msg.joint_c, 0.4);
    }

    #[test]
    fn test_cmd_dispatch() {
        let cmd = ArmCmd::from_frame(CHAN_MOTION_EXECUTE, r#"{"preview": false}"#)
            .unwrap()
            .unwrap();

        match cmd {
            ArmCmd::MotionExecute(m) => assert!(!m.preview),
            _ => panic!("Wrong command variant"),
        }

        // Telemetry is not a command
        assert!(ArmCmd::from_frame(CHAN_ARM_POSITION, "{}").unwrap().is_none());
    }
}
