//! Motion planner module
//!
//! Plans collision-free joint-space paths with a bidirectional RRT-Connect,
//! smooths the resulting waypoints with random shortcutting, and fits a
//! cubic spline which the executor queries by its normalised parameter.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod spline;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use nalgebra::Vector6;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::Serialize;

// Internal
use crate::arm_model::{ArmModel, NUM_JOINTS};
use crate::kinematics::KinematicsSolver;
pub use params::*;
pub use spline::Spline;
use util::maths;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The motion planner.
#[derive(Debug, Clone)]
pub struct MotionPlanner {
    params: Params,

    /// Source of configuration-space samples.
    rng: SmallRng,

    /// The waypoints of the most recent successful plan.
    path: Option<Vec<Vector6<f64>>>,

    /// The spline fitted over the most recent successful plan.
    spline: Option<Spline>,
}

/// A node in one of the two search trees.
#[derive(Debug, Clone)]
struct TreeNode {
    config: Vector6<f64>,
    parent: Option<usize>,
}

/// Report on a planning attempt, saved as JSON into the session.
#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub success: bool,
    pub iterations_used: usize,
    pub start_tree_size: usize,
    pub goal_tree_size: usize,
    pub raw_waypoints: usize,
    pub smoothed_waypoints: usize,
}

/// Result of extending a tree towards a configuration.
enum Extend {
    /// A new node was added, not yet at the target.
    Advanced(usize),

    /// A new node was added at the target itself.
    Reached(usize),

    /// No progress was possible.
    Trapped,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MotionPlanner {
    /// Create a new planner with the given tuning parameters.
    pub fn new(params: Params) -> Self {
        Self {
            params,
            rng: SmallRng::from_entropy(),
            path: None,
            spline: None,
        }
    }

    /// Create a planner with a seeded RNG, for reproducible plans.
    pub fn with_seed(params: Params, seed: u64) -> Self {
        Self {
            params,
            rng: SmallRng::seed_from_u64(seed),
            path: None,
            spline: None,
        }
    }

    /// Plan a path from the model's current configuration to the goal.
    ///
    /// On success the smoothed waypoints and their spline replace any
    /// previous plan and `true` is returned. On failure the previous plan is
    /// discarded and `false` is returned.
    pub fn rrt_connect(
        &mut self,
        model: &ArmModel,
        solver: &KinematicsSolver,
        goal: &Vector6<f64>,
    ) -> bool {
        let start = model.angles();

        // A previous plan is stale the moment a new one is requested
        self.path = None;
        self.spline = None;

        if !solver.is_safe(model, &start) {
            warn!("Planner rejected an unsafe start configuration");
            return false;
        }
        if !solver.is_safe(model, goal) {
            warn!("Planner rejected an unsafe goal configuration");
            return false;
        }

        let mut report = PlanReport {
            success: false,
            iterations_used: 0,
            start_tree_size: 1,
            goal_tree_size: 1,
            raw_waypoints: 0,
            smoothed_waypoints: 0,
        };

        let raw_path = self.search(model, solver, &start, goal, &mut report);

        let found = match raw_path {
            Some(mut path) => {
                report.raw_waypoints = path.len();

                self.shortcut(model, solver, &mut path);
                report.smoothed_waypoints = path.len();

                info!(
                    "Path planned: {} waypoints ({} after smoothing)",
                    report.raw_waypoints, report.smoothed_waypoints
                );

                self.spline = Some(Spline::fit(&path));
                self.path = Some(path);
                report.success = true;
                true
            }
            None => {
                warn!(
                    "Planner exhausted its budget of {} iterations",
                    self.params.max_iterations
                );
                false
            }
        };

        if self.params.save_report {
            util::session::save_with_timestamp("motion_planner/report.json", &report);
        }

        found
    }

    /// Query the current spline at parameter `t` in [0, 1].
    pub fn get_spline_pos(&self, t: f64) -> Option<Vector6<f64>> {
        self.spline.as_ref().map(|s| s.pos(t))
    }

    /// The waypoints of the most recent successful plan.
    pub fn path(&self) -> Option<&[Vector6<f64>]> {
        self.path.as_deref()
    }

    /// The spline of the most recent successful plan.
    pub fn spline_ref(&self) -> Option<&Spline> {
        self.spline.as_ref()
    }

    /// True if a plan is currently loaded.
    pub fn has_plan(&self) -> bool {
        self.spline.is_some()
    }

    /// Discard the current plan.
    pub fn clear(&mut self) {
        self.path = None;
        self.spline = None;
    }

    /// Install a spline directly, bypassing the search. Used by tests of
    /// the executor.
    #[cfg(test)]
    pub(crate) fn install_spline(&mut self, waypoints: &[Vector6<f64>]) {
        self.spline = Some(Spline::fit(waypoints));
        self.path = Some(waypoints.to_vec());
    }

    // -----------------------------------------------------------------------
    // PRIVATE
    // -----------------------------------------------------------------------

    /// The bidirectional search itself. Returns the raw waypoint sequence
    /// from start to goal, or `None` if the iteration budget was exhausted.
    fn search(
        &mut self,
        model: &ArmModel,
        solver: &KinematicsSolver,
        start: &Vector6<f64>,
        goal: &Vector6<f64>,
        report: &mut PlanReport,
    ) -> Option<Vec<Vector6<f64>>> {
        // A direct segment needs no trees at all
        if self.segment_free(model, solver, start, goal) {
            debug!("Direct segment to goal is collision-free");
            return Some(vec![*start, *goal]);
        }

        let mut tree_a = vec![TreeNode {
            config: *start,
            parent: None,
        }];
        let mut tree_b = vec![TreeNode {
            config: *goal,
            parent: None,
        }];

        // Tracks which tree is currently rooted at the start
        let mut a_is_start = true;

        for iteration in 0..self.params.max_iterations {
            report.iterations_used = iteration + 1;

            let q_rand = self.sample(model, start);

            // Extend the first tree one step towards the sample
            if let Extend::Advanced(new_idx) | Extend::Reached(new_idx) =
                self.extend(model, solver, &mut tree_a, &q_rand)
            {
                // Then greedily connect the second tree to the new node
                let q_new = tree_a[new_idx].config;

                loop {
                    match self.extend(model, solver, &mut tree_b, &q_new) {
                        Extend::Advanced(_) => continue,
                        Extend::Reached(b_idx) => {
                            let (start_size, goal_size) = if a_is_start {
                                (tree_a.len(), tree_b.len())
                            } else {
                                (tree_b.len(), tree_a.len())
                            };
                            report.start_tree_size = start_size;
                            report.goal_tree_size = goal_size;

                            debug!(
                                "Trees connected after {} iterations ({} + {} nodes)",
                                iteration + 1,
                                tree_a.len(),
                                tree_b.len()
                            );

                            return Some(join_trees(
                                &tree_a, new_idx, &tree_b, b_idx, a_is_start,
                            ));
                        }
                        Extend::Trapped => break,
                    }
                }
            }

            std::mem::swap(&mut tree_a, &mut tree_b);
            a_is_start = !a_is_start;
        }

        None
    }

    /// Sample a configuration uniformly from the joint-limit
    /// hyper-rectangle. Locked joints stay at their start value.
    fn sample(&mut self, model: &ArmModel, start: &Vector6<f64>) -> Vector6<f64> {
        let mut config = *start;

        for i in 0..NUM_JOINTS {
            if !model.locked(i) {
                let (lo, hi) = model.limits(i);
                config[i] = self.rng.gen_range(lo..=hi);
            }
        }

        config
    }

    /// Extend a tree one step towards the target configuration.
    fn extend(
        &mut self,
        model: &ArmModel,
        solver: &KinematicsSolver,
        tree: &mut Vec<TreeNode>,
        target: &Vector6<f64>,
    ) -> Extend {
        let nearest = nearest_node(tree, target);
        let nearest_config = tree[nearest].config;

        let diff = target - nearest_config;
        let dist = config_dist(&nearest_config, target);

        if dist == 0.0 {
            return Extend::Trapped;
        }

        let reached = dist <= self.params.extend_step_rad;
        let q_new = if reached {
            *target
        } else {
            nearest_config + diff * (self.params.extend_step_rad / dist)
        };

        if !solver.is_safe(model, &q_new)
            || !self.segment_free(model, solver, &nearest_config, &q_new)
        {
            return Extend::Trapped;
        }

        tree.push(TreeNode {
            config: q_new,
            parent: Some(nearest),
        });
        let new_idx = tree.len() - 1;

        if reached {
            Extend::Reached(new_idx)
        } else {
            Extend::Advanced(new_idx)
        }
    }

    /// Check that the straight joint-space segment between two safe
    /// configurations stays safe when interpolated at the collision check
    /// step.
    fn segment_free(
        &self,
        model: &ArmModel,
        solver: &KinematicsSolver,
        from: &Vector6<f64>,
        to: &Vector6<f64>,
    ) -> bool {
        let dist = config_dist(from, to);
        let steps = (dist / self.params.collision_check_step_rad).ceil() as usize;

        for k in 1..=steps {
            let s = k as f64 / steps as f64;
            let config = from + (to - from) * s;

            if !solver.is_safe(model, &config) {
                return false;
            }
        }

        true
    }

    /// Shortcut smoothing: repeatedly try to replace the subpath between
    /// two random non-adjacent waypoints with a direct segment.
    fn shortcut(
        &mut self,
        model: &ArmModel,
        solver: &KinematicsSolver,
        path: &mut Vec<Vector6<f64>>,
    ) {
        for _ in 0..self.params.smoothing_passes {
            if path.len() < 3 {
                break;
            }

            let i = self.rng.gen_range(0..path.len() - 2);
            let j = self.rng.gen_range(i + 2..path.len());

            if self.segment_free(model, solver, &path[i], &path[j]) {
                path.drain(i + 1..j);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Euclidean distance between two configurations in angle space.
///
/// The unwrap is safe since both configurations have the same dimentions.
pub(crate) fn config_dist(a: &Vector6<f64>, b: &Vector6<f64>) -> f64 {
    maths::norm(a.as_slice(), b.as_slice()).unwrap()
}

/// Index of the tree node closest (euclidean in angle space) to the target.
fn nearest_node(tree: &[TreeNode], target: &Vector6<f64>) -> usize {
    let mut best = 0;
    let mut best_dist = f64::MAX;

    for (i, node) in tree.iter().enumerate() {
        let dist = config_dist(&node.config, target);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }

    best
}

/// Join the two trees at their shared configuration into a single waypoint
/// sequence running from the start to the goal.
fn join_trees(
    tree_a: &[TreeNode],
    a_idx: usize,
    tree_b: &[TreeNode],
    b_idx: usize,
    a_is_start: bool,
) -> Vec<Vector6<f64>> {
    let branch_a = root_branch(tree_a, a_idx);
    let branch_b = root_branch(tree_b, b_idx);

    // branch_a ends at the connection node, branch_b also ends there (the
    // connect step pushed an identical configuration), so drop one copy
    let (mut path, tail) = if a_is_start {
        (branch_a, branch_b)
    } else {
        (branch_b, branch_a)
    };

    for config in tail.into_iter().rev().skip(1) {
        path.push(config);
    }

    // The tail was root-to-connection, reversed it runs connection-to-root,
    // so the path now ends at the other tree's root
    path
}

/// The configurations from the tree root to the given node, root first.
fn root_branch(tree: &[TreeNode], mut idx: usize) -> Vec<Vector6<f64>> {
    let mut branch = vec![tree[idx].config];

    while let Some(parent) = tree[idx].parent {
        branch.push(tree[parent].config);
        idx = parent;
    }

    branch.reverse();
    branch
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_model::test_util::test_model;
    use crate::kinematics;

    const PLANNER_PATH: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/../params/motion_planner.toml");
    const KINEMATICS_PATH: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/../params/kinematics.toml");

    fn test_planner(seed: u64) -> MotionPlanner {
        let params: Params = util::params::load(PLANNER_PATH).unwrap();
        MotionPlanner::with_seed(params, seed)
    }

    fn test_solver() -> KinematicsSolver {
        let params: kinematics::Params = util::params::load(KINEMATICS_PATH).unwrap();
        KinematicsSolver::with_seed(params, 0)
    }

    #[test]
    fn test_plan_connects_start_and_goal() {
        let model = test_model();
        let solver = test_solver();
        let mut planner = test_planner(42);

        let goal = Vector6::new(0.5, -0.3, 0.4, 0.0, 0.2, 0.0);

        assert!(planner.rrt_connect(&model, &solver, &goal));

        let path = planner.path().unwrap();
        assert!((path[0] - model.angles()).norm() < 1e-12);
        assert!((path[path.len() - 1] - goal).norm() < 1e-12);

        // The spline interpolates the endpoints
        assert!((planner.get_spline_pos(0.0).unwrap() - model.angles()).norm() < 1e-9);
        assert!((planner.get_spline_pos(1.0).unwrap() - goal).norm() < 1e-9);
    }

    #[test]
    fn test_planned_path_is_safe() {
        let model = test_model();
        let solver = test_solver();
        let mut planner = test_planner(7);

        let goal = Vector6::new(-0.8, 0.6, -0.9, 0.5, -0.4, 0.3);
        assert!(planner.rrt_connect(&model, &solver, &goal));

        let path = planner.path().unwrap();

        // Every waypoint and every interpolated consecutive pair is safe
        for pair in path.windows(2) {
            assert!(solver.is_safe(&model, &pair[0]));

            let dist = (pair[1] - pair[0]).norm();
            let steps = (dist / 0.01).ceil().max(1.0) as usize;
            for k in 0..=steps {
                let config = pair[0] + (pair[1] - pair[0]) * (k as f64 / steps as f64);
                assert!(solver.is_safe(&model, &config));
            }
        }
    }

    #[test]
    fn test_plan_rejects_unsafe_goal() {
        let model = test_model();
        let solver = test_solver();
        let mut planner = test_planner(0);

        // Goal beyond joint limits is not plannable
        let mut goal = Vector6::zeros();
        goal[1] = model.limits(1).1 + 1.0;

        assert!(!planner.rrt_connect(&model, &solver, &goal));
        assert!(!planner.has_plan());
    }

    #[test]
    fn test_new_plan_discards_old() {
        let model = test_model();
        let solver = test_solver();
        let mut planner = test_planner(1);

        let goal = Vector6::new(0.3, -0.2, 0.3, 0.0, 0.1, 0.0);
        assert!(planner.rrt_connect(&model, &solver, &goal));
        assert!(planner.has_plan());

        // A failed plan discards the previous spline
        let mut bad_goal = Vector6::zeros();
        bad_goal[0] = 100.0;
        assert!(!planner.rrt_connect(&model, &solver, &bad_goal));
        assert!(!planner.has_plan());
        assert!(planner.get_spline_pos(0.5).is_none());
    }
}
