//! Arm model module
//!
//! The arm model holds the geometry of the six joint chain (A at the base to
//! F at the grip), the current joint angles, and the world-frame transforms
//! cached from the most recent forward kinematics evaluation. The model
//! performs no kinematics itself - transforms are only ever written by the
//! solver.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Isometry3, Unit, Vector3, Vector6};

// Internal
pub use params::*;
use util::maths;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// The number of joints on the arm.
pub const NUM_JOINTS: usize = 6;

/// Index of the grip joint (joint F), which is excluded from executor
/// pacing.
pub const GRIP_JOINT: usize = 5;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A single joint of the arm.
#[derive(Debug, Clone)]
pub struct Joint {
    /// Human readable name, e.g. `"joint_a"`.
    pub name: String,

    /// Unit rotation axis in the parent frame.
    pub axis: Unit<Vector3<f64>>,

    /// Translation from the parent joint frame to this joint frame.
    pub offset_m: Vector3<f64>,

    /// (lower, upper) angle limits in radians.
    pub limits_rad: (f64, f64),

    /// Maximum angular speed in radians/second.
    pub max_speed_rads: f64,

    /// Encoder zero offset in raw units.
    pub encoder_offset_rad: f64,

    /// Encoder multiplier (sign flip or scale).
    pub encoder_multiplier: f64,

    /// If true the solver holds this joint at its current angle.
    pub locked: bool,
}

/// The arm model.
#[derive(Debug, Clone)]
pub struct ArmModel {
    joints: Vec<Joint>,

    /// Current joint angles in logical radians.
    angles: Vector6<f64>,

    /// World-frame transform of each joint from the most recent FK
    /// evaluation.
    transforms: [Isometry3<f64>; NUM_JOINTS],

    /// End-effector tip position in the frame of the last joint.
    ee_offset_m: Vector3<f64>,

    /// Link pairs checked for self-collision.
    collision_pairs: Vec<CollisionPairParams>,

    /// Limit breach tolerance in radians.
    acceptable_beyond_limit_rad: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors raised when building an arm model from its geometry
/// document.
#[derive(Debug, thiserror::Error)]
pub enum ArmModelError {
    #[error("Expected {NUM_JOINTS} joints in the geometry document, found {0}")]
    WrongJointCount(usize),

    #[error("Joint {0} has a zero rotation axis")]
    ZeroAxis(String),

    #[error("Joint {0} has inverted limits ({1} > {2})")]
    InvertedLimits(String, f64, f64),

    #[error("Joint {0} has a zero encoder multiplier")]
    ZeroMultiplier(String),

    #[error("Collision pair ({0}, {1}) references adjacent or out of range links")]
    InvalidCollisionPair(usize, usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ArmModel {
    /// Build the model from its geometry parameters.
    ///
    /// All angles start at zero and all transforms at identity, so an FK
    /// evaluation is required before the transforms are meaningful.
    pub fn new(params: Params) -> Result<Self, ArmModelError> {
        if params.joints.len() != NUM_JOINTS {
            return Err(ArmModelError::WrongJointCount(params.joints.len()));
        }

        let mut joints = Vec::with_capacity(NUM_JOINTS);

        for jp in &params.joints {
            let axis = Vector3::from(jp.axis);
            if axis.norm() == 0.0 {
                return Err(ArmModelError::ZeroAxis(jp.name.clone()));
            }
            if jp.limits_rad[0] > jp.limits_rad[1] {
                return Err(ArmModelError::InvertedLimits(
                    jp.name.clone(),
                    jp.limits_rad[0],
                    jp.limits_rad[1],
                ));
            }
            if jp.encoder_multiplier == 0.0 {
                return Err(ArmModelError::ZeroMultiplier(jp.name.clone()));
            }

            joints.push(Joint {
                name: jp.name.clone(),
                axis: Unit::new_normalize(axis),
                offset_m: Vector3::from(jp.offset_m),
                limits_rad: (jp.limits_rad[0], jp.limits_rad[1]),
                max_speed_rads: jp.max_speed_rads,
                encoder_offset_rad: jp.encoder_offset_rad,
                encoder_multiplier: jp.encoder_multiplier,
                locked: jp.locked,
            });
        }

        // Link i runs from joint i to joint i + 1, with the last link ending
        // at the end-effector tip, so valid link indices are 0..NUM_JOINTS.
        for pair in &params.collision_pairs {
            let adjacent = pair.link_a.abs_diff(pair.link_b) <= 1;
            if adjacent || pair.link_a >= NUM_JOINTS || pair.link_b >= NUM_JOINTS {
                return Err(ArmModelError::InvalidCollisionPair(pair.link_a, pair.link_b));
            }
        }

        Ok(Self {
            joints,
            angles: Vector6::zeros(),
            transforms: [Isometry3::identity(); NUM_JOINTS],
            ee_offset_m: Vector3::from(params.ee_offset_m),
            collision_pairs: params.collision_pairs,
            acceptable_beyond_limit_rad: params.acceptable_beyond_limit_rad,
        })
    }

    /// Set the current joint angles.
    ///
    /// Angles breaching a limit by no more than the acceptable tolerance are
    /// clamped to the limit. Larger breaches are stored as given - rejecting
    /// those is the encoder guard's job, not the model's.
    pub fn set_angles(&mut self, angles: &Vector6<f64>) {
        let mut set = *angles;

        for (i, joint) in self.joints.iter().enumerate() {
            let (lo, hi) = joint.limits_rad;
            let tol = self.acceptable_beyond_limit_rad;

            let breach = if set[i] < lo {
                lo - set[i]
            } else if set[i] > hi {
                set[i] - hi
            } else {
                0.0
            };

            if breach > 0.0 && breach <= tol {
                set[i] = maths::clamp(&set[i], &lo, &hi);
            }
        }

        self.angles = set;
    }

    /// The current joint angle vector.
    pub fn angles(&self) -> Vector6<f64> {
        self.angles
    }

    /// The current angle of a single joint.
    pub fn angle(&self, joint: usize) -> f64 {
        self.angles[joint]
    }

    /// The (lower, upper) limits of a joint in radians.
    pub fn limits(&self, joint: usize) -> (f64, f64) {
        self.joints[joint].limits_rad
    }

    /// The maximum angular speed of a joint in radians/second.
    pub fn max_speed(&self, joint: usize) -> f64 {
        self.joints[joint].max_speed_rads
    }

    /// Whether a joint is locked.
    pub fn locked(&self, joint: usize) -> bool {
        self.joints[joint].locked
    }

    /// Lock or unlock a joint.
    pub fn set_locked(&mut self, joint: usize, locked: bool) {
        self.joints[joint].locked = locked;
    }

    /// The encoder zero offset of a joint.
    pub fn encoder_offset(&self, joint: usize) -> f64 {
        self.joints[joint].encoder_offset_rad
    }

    /// The encoder multiplier of a joint.
    pub fn encoder_multiplier(&self, joint: usize) -> f64 {
        self.joints[joint].encoder_multiplier
    }

    /// Map a raw encoder reading into a logical joint angle.
    pub fn raw_to_logical(&self, joint: usize, raw: f64) -> f64 {
        (raw - self.joints[joint].encoder_offset_rad) * self.joints[joint].encoder_multiplier
    }

    /// Map a logical joint angle into raw encoder units, the inverse of
    /// [`ArmModel::raw_to_logical`]. Used when emitting hardware setpoints.
    pub fn logical_to_raw(&self, joint: usize, angle: f64) -> f64 {
        angle / self.joints[joint].encoder_multiplier + self.joints[joint].encoder_offset_rad
    }

    /// The cached world-frame transform of a joint.
    pub fn transform(&self, joint: usize) -> &Isometry3<f64> {
        &self.transforms[joint]
    }

    /// Replace the cached world-frame transforms. Only the solver should
    /// call this.
    pub fn set_transforms(&mut self, transforms: [Isometry3<f64>; NUM_JOINTS]) {
        self.transforms = transforms;
    }

    /// The end-effector tip position in the last joint's frame.
    pub fn ee_offset(&self) -> Vector3<f64> {
        self.ee_offset_m
    }

    /// The configured self-collision link pairs.
    pub fn collision_pairs(&self) -> &[CollisionPairParams] {
        &self.collision_pairs
    }

    /// The joint descriptions.
    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    /// The limit breach tolerance in radians.
    pub fn acceptable_beyond_limit(&self) -> f64 {
        self.acceptable_beyond_limit_rad
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Path to the geometry document shipped with the workspace.
    pub const GEOM_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../params/arm_model.toml");

    /// Load the shipped geometry document into a model for tests.
    pub fn test_model() -> ArmModel {
        let params: Params = util::params::load(GEOM_PATH).expect("Failed to load test geometry");
        ArmModel::new(params).expect("Invalid test geometry")
    }
}

#[cfg(test)]
mod test {
    use super::test_util::test_model;
    use super::*;

    #[test]
    fn test_geometry_loads() {
        let model = test_model();
        assert_eq!(model.joints().len(), NUM_JOINTS);
        assert_eq!(model.angles(), Vector6::zeros());
    }

    #[test]
    fn test_set_angles_clamps_within_tolerance() {
        let mut model = test_model();
        let (lo, hi) = model.limits(1);
        let tol = model.acceptable_beyond_limit();

        // Just beyond the upper limit, within tolerance: clamped
        let mut angles = Vector6::zeros();
        angles[1] = hi + tol * 0.5;
        model.set_angles(&angles);
        assert_eq!(model.angle(1), hi);

        // Just beyond the lower limit, within tolerance: clamped
        angles[1] = lo - tol * 0.5;
        model.set_angles(&angles);
        assert_eq!(model.angle(1), lo);

        // Well beyond the limit: stored as given, the guard owns rejection
        angles[1] = hi + tol * 10.0;
        model.set_angles(&angles);
        assert_eq!(model.angle(1), hi + tol * 10.0);
    }

    #[test]
    fn test_encoder_mapping_inverse() {
        let model = test_model();

        for joint in 0..NUM_JOINTS {
            let logical = 0.37;
            let raw = model.logical_to_raw(joint, logical);
            assert!((model.raw_to_logical(joint, raw) - logical).abs() < 1e-12);
        }
    }
}
