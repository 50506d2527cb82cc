//! Parameters structure for the arm model (the geometry document)

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Geometry and capability parameters for the arm.
///
/// Loaded from `params/arm_model.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Joint descriptions ordered from the base (joint A) to the grip
    /// (joint F).
    pub joints: Vec<JointParams>,

    /// The position of the end-effector tip in the frame of the last joint.
    ///
    /// Units: meters
    pub ee_offset_m: [f64; 3],

    /// Pairs of links which must be kept apart, with their minimum
    /// clearances. Adjacent links share a joint and are never checked.
    pub collision_pairs: Vec<CollisionPairParams>,

    /// How far beyond a joint limit a reading may fall and still be clamped
    /// to the limit rather than treated as an encoder fault.
    ///
    /// Units: radians
    pub acceptable_beyond_limit_rad: f64,
}

/// Description of a single joint.
#[derive(Debug, Clone, Deserialize)]
pub struct JointParams {
    /// Human readable joint name, e.g. `"joint_a"`.
    pub name: String,

    /// The rotation axis of the joint in its parent's frame. Need not be
    /// normalised in the file.
    pub axis: [f64; 3],

    /// Translation from the parent joint's frame to this joint's frame.
    ///
    /// Units: meters
    pub offset_m: [f64; 3],

    /// Lower and upper angle limits.
    ///
    /// Units: radians
    pub limits_rad: [f64; 2],

    /// Maximum angular speed of the joint.
    ///
    /// Units: radians/second
    pub max_speed_rads: f64,

    /// Encoder zero offset, subtracted from raw readings.
    ///
    /// Units: radians (raw)
    pub encoder_offset_rad: f64,

    /// Encoder multiplier applied after the offset, used to flip or scale
    /// raw readings into logical angles.
    pub encoder_multiplier: f64,

    /// If true the joint is held at its current angle by the solver.
    #[serde(default)]
    pub locked: bool,
}

/// A pair of links checked for self-collision.
#[derive(Debug, Clone, Deserialize)]
pub struct CollisionPairParams {
    /// Index of the first link (link `i` runs from joint `i` to joint
    /// `i + 1`, the last link ends at the end-effector tip).
    pub link_a: usize,

    /// Index of the second link.
    pub link_b: usize,

    /// Minimum allowed distance between the two link segments, accounting
    /// for the link radii.
    ///
    /// Units: meters
    pub min_clearance_m: f64,
}
