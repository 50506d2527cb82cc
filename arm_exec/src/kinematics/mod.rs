//! Kinematics solver module
//!
//! Forward kinematics composes each joint's local transform along the parent
//! chain and caches the cumulative world-frame transforms on the model.
//! Inverse kinematics runs an iteratively-damped Jacobian descent with a
//! per-invocation backup stack, so a failed solve always leaves the model at
//! the configuration it started from.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod collision;
mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::debug;
use nalgebra::{DMatrix, DVector, Isometry3, Point3, Translation3, UnitQuaternion, Vector3, Vector6};
use rand::{rngs::SmallRng, Rng, SeedableRng};

// Internal
use crate::arm_model::{ArmModel, NUM_JOINTS};
pub use collision::segment_distance;
pub use params::*;
use util::maths::ang_dist_2pi;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The kinematics solver.
#[derive(Debug, Clone)]
pub struct KinematicsSolver {
    params: Params,

    /// Source of random starting configurations for IK restarts.
    rng: SmallRng,
}

/// A target pose for the end effector.
#[derive(Debug, Clone, Copy)]
pub struct PoseTarget {
    /// Target position in the world frame.
    ///
    /// Units: meters
    pub pos_m: Vector3<f64>,

    /// Target orientation as extrinsic euler angles (alpha, beta, gamma).
    /// Ignored unless `use_orientation` is set.
    ///
    /// Units: radians
    pub ang_rad: Vector3<f64>,

    /// If true solve 6-DoF (position and orientation), otherwise 3-DoF
    /// (position only).
    pub use_orientation: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl KinematicsSolver {
    /// Create a new solver with the given tuning parameters.
    pub fn new(params: Params) -> Self {
        Self {
            params,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Create a solver with a seeded RNG, for reproducible solves.
    pub fn with_seed(params: Params, seed: u64) -> Self {
        Self {
            params,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Run forward kinematics for the model's current angles, caching the
    /// world-frame transform of every joint on the model.
    ///
    /// FK is a pure function of the angles and geometry: identical inputs
    /// give bit-identical transforms.
    pub fn fk(&self, model: &mut ArmModel) {
        let transforms = chain_transforms(model, &model.angles());
        model.set_transforms(transforms);
    }

    /// Compute the end-effector pose (position and extrinsic euler
    /// orientation) the model would have at the given angles, without
    /// touching the model's cached state.
    pub fn ee_pose(model: &ArmModel, angles: &Vector6<f64>) -> (Vector3<f64>, Vector3<f64>) {
        let transforms = chain_transforms(model, angles);
        let last = &transforms[NUM_JOINTS - 1];

        let tip = last.transform_point(&Point3::from(model.ee_offset()));
        let (roll, pitch, yaw) = last.rotation.euler_angles();

        (tip.coords, Vector3::new(roll, pitch, yaw))
    }

    /// Solve inverse kinematics for the given target.
    ///
    /// Returns the solved angle vector and a success flag. On success the
    /// model is left at the solution with its transforms up to date; on
    /// failure the model is restored to the configuration it had on entry.
    ///
    /// If `set_random_start` is set the descent starts from a uniformly
    /// sampled configuration within the joint limits rather than the current
    /// one. The caller retries with random starts because the descent is a
    /// local method.
    pub fn ik(
        &mut self,
        model: &mut ArmModel,
        target: &PoseTarget,
        set_random_start: bool,
    ) -> (Vector6<f64>, bool) {
        let entry_angles = model.angles();

        // Backup stack owned by this invocation
        let mut backups: Vec<Vector6<f64>> = Vec::new();

        if set_random_start {
            let start = self.random_configuration(model);
            model.set_angles(&start);
            self.fk(model);
        }

        let mut prev_pose: Option<(Vector3<f64>, Vector3<f64>)> = None;
        let mut num_low_movement = 0;

        for iteration in 0..self.params.max_iterations {
            let angles = model.angles();
            let (pos, ang) = Self::ee_pose(model, &angles);

            // Remaining error to the target
            let d_pos = target.pos_m - pos;
            let d_ang = Vector3::new(
                ang_dist_2pi(ang[0], target.ang_rad[0]),
                ang_dist_2pi(ang[1], target.ang_rad[1]),
                ang_dist_2pi(ang[2], target.ang_rad[2]),
            );

            // Success: close enough in position (and orientation if asked)
            if d_pos.norm() < self.params.pos_threshold_m
                && (!target.use_orientation || d_ang.norm() < self.params.angle_threshold_rad)
            {
                debug!("IK converged after {} iterations", iteration);
                return (angles, true);
            }

            // Low-movement failure: the end effector has stopped moving
            if let Some((prev_pos, prev_ang)) = prev_pose {
                let moved_pos = (pos - prev_pos).norm();
                let moved_ang = Vector3::new(
                    ang_dist_2pi(prev_ang[0], ang[0]),
                    ang_dist_2pi(prev_ang[1], ang[1]),
                    ang_dist_2pi(prev_ang[2], ang[2]),
                )
                .norm();

                if moved_pos < self.params.epsilon_dist_m
                    && (!target.use_orientation
                        || moved_ang < self.params.epsilon_angle_dist_rad)
                {
                    num_low_movement += 1;
                } else {
                    num_low_movement = 0;
                }

                if num_low_movement >= self.params.max_iterations_low_movement {
                    break;
                }
            }
            prev_pose = Some((pos, ang));

            // Desired end-effector step this iteration
            let dim = if target.use_orientation { 6 } else { 3 };
            let mut step = DVector::zeros(dim);
            for i in 0..3 {
                step[i] = d_pos[i] * self.params.k_position_step;
            }
            if target.use_orientation {
                for i in 0..3 {
                    step[3 + i] = d_ang[i] * self.params.k_angle_step;
                }
            }

            // Finite-difference Jacobian, zero columns for locked joints
            let jacobian = self.jacobian(model, &angles, &pos, &ang, target.use_orientation);

            // Damped pseudo-inverse: dq = J^T (J J^T + lambda^2 I)^-1 step
            let lambda2 = self.params.damping_lambda * self.params.damping_lambda;
            let jjt =
                &jacobian * jacobian.transpose() + DMatrix::identity(dim, dim) * lambda2;
            let jjt_inv = match jjt.try_inverse() {
                Some(inv) => inv,
                None => break,
            };
            let d_theta = jacobian.transpose() * (jjt_inv * step);

            // Push a backup, apply the step, then validate it
            backups.push(angles);

            let mut new_angles = angles;
            for i in 0..NUM_JOINTS {
                new_angles[i] += d_theta[i];
            }

            if self.is_safe(model, &new_angles) {
                model.set_angles(&new_angles);
                self.fk(model);
            } else {
                // Unsafe step: pop the backup, restore and give up
                let backup = backups.pop().expect("Backup stack empty on restore");
                model.set_angles(&backup);
                self.fk(model);
                break;
            }
        }

        // Failure: restore the configuration the model had on entry
        model.set_angles(&entry_angles);
        self.fk(model);
        (entry_angles, false)
    }

    /// Check that a configuration is within joint limits and free of
    /// self-collisions.
    pub fn is_safe(&self, model: &ArmModel, angles: &Vector6<f64>) -> bool {
        self.limit_check(model, angles) && self.collision_check(model, angles)
    }

    /// Sample a uniform random configuration within the joint limits.
    /// Locked joints keep their current angle.
    pub fn random_configuration(&mut self, model: &ArmModel) -> Vector6<f64> {
        let mut config = model.angles();

        for i in 0..NUM_JOINTS {
            if !model.locked(i) {
                let (lo, hi) = model.limits(i);
                config[i] = self.rng.gen_range(lo..=hi);
            }
        }

        config
    }

    // -----------------------------------------------------------------------
    // PRIVATE
    // -----------------------------------------------------------------------

    /// Estimate the Jacobian column-wise via finite differences.
    fn jacobian(
        &self,
        model: &ArmModel,
        angles: &Vector6<f64>,
        pos: &Vector3<f64>,
        ang: &Vector3<f64>,
        use_orientation: bool,
    ) -> DMatrix<f64> {
        let dim = if use_orientation { 6 } else { 3 };
        let d_theta = self.params.delta_theta_rad;

        let mut jacobian = DMatrix::zeros(dim, NUM_JOINTS);

        for joint in 0..NUM_JOINTS {
            // Locked joints contribute zero columns
            if model.locked(joint) {
                continue;
            }

            let mut perturbed = *angles;
            perturbed[joint] += d_theta;

            let (pos_after, ang_after) = Self::ee_pose(model, &perturbed);

            for i in 0..3 {
                jacobian[(i, joint)] = (pos_after[i] - pos[i]) / d_theta;
            }
            if use_orientation {
                for i in 0..3 {
                    jacobian[(3 + i, joint)] = ang_dist_2pi(ang[i], ang_after[i]) / d_theta;
                }
            }
        }

        jacobian
    }

    /// Check that all angles are within their joint limits.
    fn limit_check(&self, model: &ArmModel, angles: &Vector6<f64>) -> bool {
        for i in 0..NUM_JOINTS {
            let (lo, hi) = model.limits(i);
            if angles[i] < lo || angles[i] > hi {
                return false;
            }
        }

        true
    }

    /// Check every configured link pair for clearance after a temporary FK
    /// at the given angles.
    fn collision_check(&self, model: &ArmModel, angles: &Vector6<f64>) -> bool {
        let transforms = chain_transforms(model, angles);

        // Link endpoints: each joint origin followed by the end-effector
        // tip, so link i runs from point i to point i + 1
        let mut points = [Point3::origin(); NUM_JOINTS + 1];
        for (i, transform) in transforms.iter().enumerate() {
            points[i] = Point3::from(transform.translation.vector);
        }
        points[NUM_JOINTS] =
            transforms[NUM_JOINTS - 1].transform_point(&Point3::from(model.ee_offset()));

        for pair in model.collision_pairs() {
            let dist = segment_distance(
                &points[pair.link_a],
                &points[pair.link_a + 1],
                &points[pair.link_b],
                &points[pair.link_b + 1],
            );

            if dist <= pair.min_clearance_m {
                return false;
            }
        }

        true
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Compose each joint's local transform (static offset then rotation about
/// the configured axis) along the parent chain.
fn chain_transforms(model: &ArmModel, angles: &Vector6<f64>) -> [Isometry3<f64>; NUM_JOINTS] {
    let mut transforms = [Isometry3::identity(); NUM_JOINTS];
    let mut cumulative = Isometry3::identity();

    for (i, joint) in model.joints().iter().enumerate() {
        let local = Isometry3::from_parts(
            Translation3::from(joint.offset_m),
            UnitQuaternion::from_axis_angle(&joint.axis, angles[i]),
        );

        cumulative *= local;
        transforms[i] = cumulative;
    }

    transforms
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_model::{test_util::test_model, ArmModel, CollisionPairParams, JointParams};

    const KINEMATICS_PATH: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/../params/kinematics.toml");

    fn test_solver(seed: u64) -> KinematicsSolver {
        let params: Params = util::params::load(KINEMATICS_PATH).unwrap();
        KinematicsSolver::with_seed(params, seed)
    }

    /// Run IK the way the controller does: one attempt from the current
    /// configuration then up to 25 random restarts.
    fn solve_with_restarts(
        solver: &mut KinematicsSolver,
        model: &mut ArmModel,
        target: &PoseTarget,
    ) -> (Vector6<f64>, bool) {
        let mut solution = solver.ik(model, target, false);

        for _ in 0..25 {
            if solution.1 {
                break;
            }
            solution = solver.ik(model, target, true);
        }

        solution
    }

    /// A two long link arm which can fold its forearm back onto its upper
    /// arm, used to exercise the self-collision check.
    fn fold_model() -> ArmModel {
        let joint = |name: &str, axis: [f64; 3], offset: [f64; 3]| JointParams {
            name: name.into(),
            axis,
            offset_m: offset,
            limits_rad: [-3.1416, 3.1416],
            max_speed_rads: 1.0,
            encoder_offset_rad: 0.0,
            encoder_multiplier: 1.0,
            locked: false,
        };

        let params = crate::arm_model::Params {
            joints: vec![
                joint("joint_a", [0.0, 0.0, 1.0], [0.0, 0.0, 0.1]),
                joint("joint_b", [0.0, 1.0, 0.0], [0.0, 0.0, 0.1]),
                joint("joint_c", [0.0, 1.0, 0.0], [0.5, 0.0, 0.0]),
                joint("joint_d", [1.0, 0.0, 0.0], [0.5, 0.0, 0.0]),
                joint("joint_e", [0.0, 1.0, 0.0], [0.1, 0.0, 0.0]),
                joint("joint_f", [1.0, 0.0, 0.0], [0.05, 0.0, 0.0]),
            ],
            ee_offset_m: [0.05, 0.0, 0.0],
            collision_pairs: vec![CollisionPairParams {
                link_a: 1,
                link_b: 3,
                min_clearance_m: 0.05,
            }],
            acceptable_beyond_limit_rad: 0.1,
        };

        ArmModel::new(params).unwrap()
    }

    #[test]
    fn test_fk_chain_at_zero() {
        let mut model = test_model();
        let solver = test_solver(0);

        solver.fk(&mut model);

        // At the zero configuration the chain runs straight out along +x at
        // the base height
        let tip = model
            .transform(5)
            .transform_point(&Point3::from(model.ee_offset()));
        assert!((tip.coords - Vector3::new(0.88, 0.0, 0.2)).norm() < 1e-12);

        // Joint A sits at the base offset
        assert!((model.transform(0).translation.vector - Vector3::new(0.0, 0.0, 0.1)).norm()
            < 1e-12);
    }

    #[test]
    fn test_fk_deterministic() {
        let mut model_a = test_model();
        let mut model_b = test_model();
        let solver = test_solver(0);

        let angles = Vector6::new(0.3, -0.4, 0.5, 0.1, -0.2, 0.6);
        model_a.set_angles(&angles);
        model_b.set_angles(&angles);

        solver.fk(&mut model_a);
        solver.fk(&mut model_b);
        // Run twice on the same model as well
        solver.fk(&mut model_a);

        for i in 0..NUM_JOINTS {
            assert_eq!(
                model_a.transform(i).to_homogeneous(),
                model_b.transform(i).to_homogeneous()
            );
        }
    }

    #[test]
    fn test_ik_position_only() {
        let mut model = test_model();
        let mut solver = test_solver(42);

        // The target is the FK pose of a known reachable configuration
        let goal_config = Vector6::new(0.4, -0.5, 0.6, 0.0, 0.3, 0.0);
        let (goal_pos, _) = KinematicsSolver::ee_pose(&model, &goal_config);

        let target = PoseTarget {
            pos_m: goal_pos,
            ang_rad: Vector3::zeros(),
            use_orientation: false,
        };

        let (solution, success) = solve_with_restarts(&mut solver, &mut model, &target);
        assert!(success, "IK failed to find a reachable position target");

        // IK consistency: the solution's end effector is within threshold
        let (pos, _) = KinematicsSolver::ee_pose(&model, &solution);
        assert!((pos - goal_pos).norm() <= 0.05);

        // The model is left at the solution
        assert_eq!(model.angles(), solution);
        assert!(solver.is_safe(&model, &solution));
    }

    #[test]
    fn test_ik_with_orientation() {
        let mut model = test_model();
        let mut solver = test_solver(7);

        let goal_config = Vector6::new(0.3, -0.6, 0.9, 0.2, -0.4, 0.1);
        let (goal_pos, goal_ang) = KinematicsSolver::ee_pose(&model, &goal_config);

        let target = PoseTarget {
            pos_m: goal_pos,
            ang_rad: goal_ang,
            use_orientation: true,
        };

        // Start near the solution, as the operator would after jogging
        let start = goal_config.add_scalar(0.1);
        model.set_angles(&start);
        solver.fk(&mut model);

        let (solution, success) = solve_with_restarts(&mut solver, &mut model, &target);
        assert!(success, "IK failed to converge on a full pose target");

        let (pos, ang) = KinematicsSolver::ee_pose(&model, &solution);
        assert!((pos - goal_pos).norm() <= 0.05);
        let ang_err = Vector3::new(
            ang_dist_2pi(ang[0], goal_ang[0]),
            ang_dist_2pi(ang[1], goal_ang[1]),
            ang_dist_2pi(ang[2], goal_ang[2]),
        );
        assert!(ang_err.norm() <= 0.02);
    }

    #[test]
    fn test_ik_failure_restores_entry_angles() {
        let mut model = test_model();
        let mut solver = test_solver(3);

        let entry = Vector6::new(0.2, -0.3, 0.4, 0.0, 0.1, 0.0);
        model.set_angles(&entry);
        solver.fk(&mut model);

        // Far outside the arm's reach
        let target = PoseTarget {
            pos_m: Vector3::new(5.0, 0.0, 0.0),
            ang_rad: Vector3::zeros(),
            use_orientation: false,
        };

        let (returned, success) = solver.ik(&mut model, &target, false);
        assert!(!success);
        assert_eq!(returned, entry);
        assert_eq!(model.angles(), entry);

        // A random-start failure restores the entry configuration too
        let (_, success) = solver.ik(&mut model, &target, true);
        assert!(!success);
        assert_eq!(model.angles(), entry);
    }

    #[test]
    fn test_is_safe_limits() {
        let model = test_model();
        let solver = test_solver(0);

        assert!(solver.is_safe(&model, &Vector6::zeros()));

        let mut beyond = Vector6::zeros();
        beyond[1] = model.limits(1).1 + 0.5;
        assert!(!solver.is_safe(&model, &beyond));
    }

    #[test]
    fn test_is_safe_self_collision() {
        let model = fold_model();
        let solver = test_solver(0);

        // Forearm folded back over the upper arm: links 1 and 3 nearly
        // touch
        let folded = Vector6::new(0.0, 0.0, 3.1, 0.0, 0.0, 0.0);
        assert!(!solver.is_safe(&model, &folded));

        // A moderate elbow bend is fine
        let bent = Vector6::new(0.0, 0.0, 1.0, 0.0, 0.0, 0.0);
        assert!(solver.is_safe(&model, &bent));
    }

    #[test]
    fn test_locked_joint_keeps_angle() {
        let mut model = test_model();
        let mut solver = test_solver(11);

        model.set_locked(0, true);

        // Random configurations never move a locked joint
        for _ in 0..10 {
            let config = solver.random_configuration(&model);
            assert_eq!(config[0], model.angle(0));
        }
    }
}
