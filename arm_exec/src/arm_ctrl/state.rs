//! Implementations for the ArmCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use nalgebra::{Vector3, Vector6};
use std::sync::atomic::Ordering;

// Internal
use super::{Flags, Params};
use crate::arm_model::{ArmModel, GRIP_JOINT, NUM_JOINTS};
use crate::encoder_guard::EncoderGuard;
use crate::kinematics::{KinematicsSolver, PoseTarget};
use crate::motion_planner::{MotionPlanner, Spline};
use crate::tm_server::BusSender;
use comms_if::arm::{
    ArmControlState, ArmPosition, IkEnabled, LockJoints, MotionExecute, SimulationMode,
    TargetOrientation,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Arm controller state.
///
/// Owns the model, solver, planner and guard, and routes every bus message
/// through its handler methods. Lives behind the shared mutex; anything
/// needing the model or the current plan goes through here.
pub struct ArmCtrl {
    pub(crate) params: Params,

    pub(crate) model: ArmModel,

    pub(crate) solver: KinematicsSolver,

    pub(crate) planner: MotionPlanner,

    pub(crate) guard: EncoderGuard,

    pub(crate) state: ControllerState,

    pub(crate) control_mode: ControlMode,

    /// Message describing the most recent encoder fault, published when an
    /// execution aborts.
    pub(crate) encoder_error_message: String,

    pub(crate) bus: BusSender,
}

/// Everything a preview needs, cloned out of the controller so the preview
/// loop can run without holding the shared mutex.
pub(crate) struct PreviewData {
    pub model: ArmModel,
    pub solver: KinematicsSolver,
    pub spline: Spline,
    pub steps: usize,
    pub frame_ms: u64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The controller's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Nothing planned, telemetry tracking only.
    Idle,

    /// A plan exists and its preview is streaming to the GUI.
    Previewing,

    /// Preview finished, waiting for the operator to confirm execution.
    AwaitingExecute,

    /// The executor is driving the arm along the spline.
    Executing,
}

/// The GUI's arm control mode tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Idle,
    OpenLoop,
    ClosedLoop,
}

/// A target for planning, either a Cartesian pose or explicit joint angles.
pub(crate) enum TargetSpec {
    Pose(PoseTarget),
    Angles(Vector6<f64>),
}

/// Outcome of one executor tick.
#[derive(Debug)]
pub(crate) enum TickOutcome {
    /// Advance the parameter and issue the setpoint.
    Advance {
        new_t: f64,
        setpoint: Vector6<f64>,
    },

    /// The spline has been fully traversed.
    Finished,

    /// There is no plan to execute.
    NoPlan,

    /// The next spline configuration failed the safety check.
    Unsafe,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ControlMode {
    /// Parse the GUI's state tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "idle" => Some(ControlMode::Idle),
            "open-loop" => Some(ControlMode::OpenLoop),
            "closed-loop" => Some(ControlMode::ClosedLoop),
            _ => None,
        }
    }
}

impl ArmCtrl {
    /// Assemble the controller from its initialised modules.
    pub fn new(
        params: Params,
        model: ArmModel,
        solver: KinematicsSolver,
        planner: MotionPlanner,
        guard: EncoderGuard,
        bus: BusSender,
    ) -> Self {
        Self {
            params,
            model,
            solver,
            planner,
            guard,
            state: ControllerState::Idle,
            control_mode: ControlMode::Idle,
            encoder_error_message: String::new(),
            bus,
        }
    }

    /// The current controller state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Handle one encoder telemetry message.
    ///
    /// Readings are mapped from raw encoder units in hardware mode, run
    /// through the guard, and applied to the model unless a preview is in
    /// progress. Updated transforms are published for the GUI.
    pub fn telemetry(&mut self, flags: &Flags, msg: &ArmPosition) {
        let mut readings = msg.to_array();

        // The sim echo publishes logical angles, hardware publishes raw
        // encoder units
        if !flags.sim_mode.load(Ordering::Relaxed) {
            for (i, reading) in readings.iter_mut().enumerate() {
                *reading = self.model.raw_to_logical(i, *reading);
            }
        }

        let sanitized = self.guard.sanitize(&readings, &self.model);

        if sanitized.error_raised {
            self.encoder_error_message = sanitized.message.clone();
            if !flags.encoder_error.swap(true, Ordering::Relaxed) {
                warn!("{}", sanitized.message);
            }
        } else {
            flags.encoder_error.store(false, Ordering::Relaxed);
        }

        // While previewing the model tracks the hypothetical plan states,
        // not telemetry
        if !flags.previewing.load(Ordering::Relaxed) {
            self.model.set_angles(&Vector6::from(sanitized.angles));
            self.solver.fk(&mut self.model);
            self.bus.publish_transforms(&self.model);
        }
    }

    /// Process a new target, running IK (for pose targets) and the planner
    /// synchronously.
    ///
    /// Returns the data for the preview loop on success. On any failure a
    /// popup has been published and the controller is back in Idle.
    pub(crate) fn process_target(
        &mut self,
        flags: &Flags,
        target: TargetSpec,
    ) -> Option<PreviewData> {
        // A new target supersedes any execution in progress
        flags.enable_execute.store(false, Ordering::Relaxed);
        if self.state == ControllerState::Executing {
            info!("Execution cancelled by new target");
        }
        self.state = ControllerState::Idle;

        let goal = match target {
            TargetSpec::Pose(pose) => {
                debug!(
                    "Target position: ({:.3}, {:.3}, {:.3}), use_orientation: {}",
                    pose.pos_m[0], pose.pos_m[1], pose.pos_m[2], pose.use_orientation
                );

                let current = self.model.angles();
                if !self.solver.is_safe(&self.model, &current) {
                    warn!("Starting position not safe, adjust the arm in open loop");
                    self.bus.publish_debug(false, "Unsafe Starting Position");
                    return None;
                }

                // Solve IK on a scratch copy, retrying from random starting
                // configurations since the descent is a local method
                let mut hypo = self.model.clone();
                let mut solution = self.solver.ik(&mut hypo, &pose, false);

                for restart in 0..self.params.ik_restarts {
                    if solution.1 {
                        debug!("Solved IK after {} random restarts", restart);
                        break;
                    }
                    solution = self.solver.ik(&mut hypo, &pose, true);
                }

                if !solution.1 {
                    warn!("No IK solution found, try a different configuration");
                    self.bus.publish_debug(false, "No IK solution");
                    return None;
                }

                solution.0
            }
            TargetSpec::Angles(angles) => angles,
        };

        if !self
            .planner
            .rrt_connect(&self.model, &self.solver, &goal)
        {
            self.bus.publish_debug(false, "Unable to plan path!");
            return None;
        }

        // Hand the plan to the preview loop, which runs without the lock
        let spline = self.planner_spline_clone();

        self.state = ControllerState::Previewing;
        flags.previewing.store(true, Ordering::Relaxed);
        flags.ik_enabled.store(true, Ordering::Relaxed);

        Some(PreviewData {
            model: self.model.clone(),
            solver: self.solver.clone(),
            spline,
            steps: self.params.preview_steps,
            frame_ms: self.params.preview_frame_ms,
        })
    }

    /// Handle an execute/preview confirmation.
    pub fn motion_execute(&mut self, flags: &Flags, msg: &MotionExecute) {
        if msg.preview {
            // Preview-only doubles as a cancel while executing
            if self.state == ControllerState::Executing {
                info!("Execution cancelled by operator");
                flags.enable_execute.store(false, Ordering::Relaxed);
                self.state = ControllerState::Idle;
            }
        } else if self.state == ControllerState::AwaitingExecute && self.planner.has_plan() {
            info!("Motion Executing!");
            self.state = ControllerState::Executing;
            flags.enable_execute.store(true, Ordering::Relaxed);
        } else {
            warn!("Execute confirm ignored: no plan awaiting execution");
        }
    }

    /// Handle an IK enable/disable message. Disabling cancels any execution
    /// and republishes the live transforms.
    pub fn ik_enabled(&mut self, flags: &Flags, msg: &IkEnabled) {
        flags.ik_enabled.store(msg.enabled, Ordering::Relaxed);

        if !msg.enabled {
            flags.enable_execute.store(false, Ordering::Relaxed);
            self.state = ControllerState::Idle;
            self.bus.publish_transforms(&self.model);
        }
    }

    /// Handle a simulation mode toggle.
    pub fn simulation_mode(&mut self, flags: &Flags, msg: &SimulationMode) {
        info!("Simulation mode: {}", msg.sim_mode);
        flags.sim_mode.store(msg.sim_mode, Ordering::Relaxed);

        // Window history from the other telemetry source is meaningless
        self.guard.reset();
    }

    /// Handle a joint lock update.
    pub fn lock_joints(&mut self, msg: &LockJoints) {
        let locks = msg.to_array();
        info!("Joint locks: {:?}", locks);

        for (i, locked) in locks.iter().enumerate() {
            self.model.set_locked(i, *locked);
        }
    }

    /// Handle a control state tag from the GUI.
    pub fn arm_control_state(&mut self, msg: &ArmControlState) {
        match ControlMode::from_tag(&msg.state) {
            Some(mode) => {
                info!("Arm control state: {:?}", mode);
                self.control_mode = mode;
            }
            None => warn!("Unknown arm control state tag: {:?}", msg.state),
        }
    }

    /// One executor tick: pace the spline parameter so the slowest of
    /// joints A..E moves at its derated speed limit, then produce the next
    /// setpoint.
    ///
    /// Joint F (the grip) is excluded from pacing.
    pub(crate) fn executor_tick(&mut self, spline_t: f64, sim_mode: bool) -> TickOutcome {
        let lookahead_t = spline_t + self.params.d_spline_t;

        let final_angles = match self.planner.get_spline_pos(lookahead_t) {
            Some(angles) => angles,
            None => return TickOutcome::NoPlan,
        };
        let init_angles = self.model.angles();

        // Time in ms the slowest joint needs to cover the lookahead at its
        // derated speed
        let mut max_time_ms = -1.0;
        for i in 0..GRIP_JOINT {
            let max_speed = self.model.max_speed(i) * self.params.speed_derate;
            let joint_time = (final_angles[i] - init_angles[i]).abs() / (max_speed / 1000.0);

            if joint_time > max_time_ms {
                max_time_ms = joint_time;
            }
        }

        let mut new_t = if max_time_ms > 0.0 {
            spline_t + self.params.d_spline_t * (self.params.spline_wait_time_ms / max_time_ms)
        } else {
            // Joints A..E are already at the lookahead point
            lookahead_t
        };

        // The final setpoint lands exactly on the end of the spline, so the
        // arm reaches the planned target before the execution finishes
        if new_t >= 1.0 {
            if spline_t >= 1.0 {
                return TickOutcome::Finished;
            }
            new_t = 1.0;
        }

        let mut setpoint = match self.planner.get_spline_pos(new_t) {
            Some(angles) => angles,
            None => return TickOutcome::NoPlan,
        };

        // Never demand an angle beyond a joint limit, and never publish a
        // configuration which fails the safety check
        for i in 0..NUM_JOINTS {
            let (lo, hi) = self.model.limits(i);
            setpoint[i] = setpoint[i].clamp(lo, hi);
        }
        if !self.solver.is_safe(&self.model, &setpoint) {
            return TickOutcome::Unsafe;
        }

        // In sim mode the setpoint becomes the current state directly; the
        // echo thread then feeds it back as telemetry
        if sim_mode {
            self.model.set_angles(&setpoint);
        }

        TickOutcome::Advance { new_t, setpoint }
    }

    /// Convert a logical setpoint into raw encoder units for the motor
    /// channel.
    pub(crate) fn setpoint_to_raw(&self, setpoint: &Vector6<f64>) -> Vector6<f64> {
        let mut raw = *setpoint;
        for i in 0..NUM_JOINTS {
            raw[i] = self.model.logical_to_raw(i, setpoint[i]);
        }
        raw
    }

    /// Clone the planner's current spline.
    fn planner_spline_clone(&self) -> Spline {
        // has_plan was checked by the caller
        self.planner
            .spline_ref()
            .expect("No spline to clone")
            .clone()
    }
}

/// Build a pose target from the GUI message.
impl From<&TargetOrientation> for PoseTarget {
    fn from(msg: &TargetOrientation) -> Self {
        PoseTarget {
            pos_m: Vector3::new(msg.x, msg.y, msg.z),
            ang_rad: Vector3::new(msg.alpha, msg.beta, msg.gamma),
            use_orientation: msg.use_orientation,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_model::test_util::test_model;
    use crate::tm_server;
    use comms_if::{arm::DebugMessage, net};
    use std::sync::mpsc::Receiver;

    const KINEMATICS_PATH: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/../params/kinematics.toml");
    const PLANNER_PATH: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/../params/motion_planner.toml");
    const GUARD_PATH: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/../params/encoder_guard.toml");
    const CTRL_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../params/arm_ctrl.toml");

    fn build_ctrl() -> (ArmCtrl, Flags, Receiver<String>) {
        let model = test_model();
        let solver = KinematicsSolver::with_seed(
            util::params::load(KINEMATICS_PATH).unwrap(),
            0,
        );
        let planner = MotionPlanner::with_seed(util::params::load(PLANNER_PATH).unwrap(), 42);
        let guard = EncoderGuard::new(util::params::load(GUARD_PATH).unwrap());
        let params: Params = util::params::load(CTRL_PATH).unwrap();

        let (bus, rx) = tm_server::channel();

        (
            ArmCtrl::new(params, model, solver, planner, guard, bus),
            Flags::new(),
            rx,
        )
    }

    /// All debug popups published so far.
    fn debug_messages(rx: &Receiver<String>) -> Vec<DebugMessage> {
        let mut messages = Vec::new();

        while let Ok(frame) = rx.try_recv() {
            if let Ok(("/debug_message", payload)) = net::split_frame(&frame) {
                messages.push(net::parse_payload(payload).unwrap());
            }
        }

        messages
    }

    #[test]
    fn test_target_angles_through_execution() {
        let (mut ctrl, flags, _rx) = build_ctrl();

        let goal = Vector6::new(0.5, -0.3, 0.4, 0.0, 0.2, 0.0);

        // Target accepted: plan made, preview pending
        let preview = ctrl.process_target(&flags, TargetSpec::Angles(goal));
        assert!(preview.is_some());
        assert_eq!(ctrl.state, ControllerState::Previewing);
        assert!(flags.previewing.load(Ordering::Relaxed));
        assert!(ctrl.planner.has_plan());

        // Preview completes (normally done by the preview loop)
        ctrl.state = ControllerState::AwaitingExecute;
        flags.previewing.store(false, Ordering::Relaxed);

        // Operator confirms execution
        ctrl.motion_execute(&flags, &MotionExecute { preview: false });
        assert_eq!(ctrl.state, ControllerState::Executing);
        assert!(flags.enable_execute.load(Ordering::Relaxed));

        // Drive the executor in sim mode until the spline completes,
        // checking the bounded-rate property on every tick
        let tick_s = ctrl.params.spline_wait_time_ms / 1000.0;
        let derate = ctrl.params.speed_derate;

        let mut spline_t = 0.0;
        let mut finished = false;

        for _ in 0..10_000 {
            let before = ctrl.model.angles();

            match ctrl.executor_tick(spline_t, true) {
                TickOutcome::Advance { new_t, setpoint } => {
                    assert!(new_t > spline_t, "Spline parameter must grow");

                    for i in 0..GRIP_JOINT {
                        let bound = ctrl.model.max_speed(i) * derate * tick_s;
                        assert!(
                            (setpoint[i] - before[i]).abs() <= bound + 1e-9,
                            "Joint {} moved faster than its derated speed",
                            i
                        );
                    }

                    spline_t = new_t;
                }
                TickOutcome::Finished => {
                    finished = true;
                    break;
                }
                other => panic!("Unexpected tick outcome: {:?}", other),
            }
        }

        assert!(finished, "Execution never finished");
        assert!((ctrl.model.angles() - goal).norm() < 1e-6);
    }

    #[test]
    fn test_unsafe_start_rejected() {
        let (mut ctrl, flags, rx) = build_ctrl();

        // Preset the model beyond a joint limit
        let mut bad = Vector6::zeros();
        bad[1] = ctrl.model.limits(1).1 + 1.0;
        ctrl.model.set_angles(&bad);

        let target = TargetSpec::Pose(PoseTarget {
            pos_m: Vector3::new(0.5, 0.0, 0.3),
            ang_rad: Vector3::zeros(),
            use_orientation: false,
        });

        assert!(ctrl.process_target(&flags, target).is_none());
        assert_eq!(ctrl.state, ControllerState::Idle);
        assert!(!ctrl.planner.has_plan());

        let messages = debug_messages(&rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "Unsafe Starting Position");
        assert!(!messages[0].is_error);
    }

    #[test]
    fn test_plan_failure_surfaced() {
        let (mut ctrl, flags, rx) = build_ctrl();

        // A goal beyond joint limits cannot be planned
        let mut goal = Vector6::zeros();
        goal[2] = ctrl.model.limits(2).1 + 1.0;

        assert!(ctrl
            .process_target(&flags, TargetSpec::Angles(goal))
            .is_none());
        assert_eq!(ctrl.state, ControllerState::Idle);

        let messages = debug_messages(&rx);
        assert!(messages
            .iter()
            .any(|m| m.message == "Unable to plan path!"));
    }

    #[test]
    fn test_telemetry_updates_model() {
        let (mut ctrl, flags, rx) = build_ctrl();

        let readings = [0.1, -0.2, 0.3, 0.05, 0.15, 0.2];
        ctrl.telemetry(&flags, &ArmPosition::from_array(readings));

        assert!((ctrl.model.angles() - Vector6::from(readings)).norm() < 1e-12);
        assert!(!flags.encoder_error.load(Ordering::Relaxed));

        // Transforms were published for the GUI
        let mut saw_transforms = false;
        while let Ok(frame) = rx.try_recv() {
            if frame.starts_with("/fk_transform ") {
                saw_transforms = true;
            }
        }
        assert!(saw_transforms);
    }

    #[test]
    fn test_telemetry_ignored_while_previewing() {
        let (mut ctrl, flags, _rx) = build_ctrl();

        flags.previewing.store(true, Ordering::Relaxed);

        let readings = [0.4, -0.1, 0.2, 0.0, 0.1, 0.0];
        ctrl.telemetry(&flags, &ArmPosition::from_array(readings));

        // The guard still ran but the model was not touched
        assert_eq!(ctrl.model.angles(), Vector6::zeros());
    }

    #[test]
    fn test_persistent_fault_raises_flag() {
        let (mut ctrl, flags, _rx) = build_ctrl();

        // Healthy telemetry fills the windows
        for _ in 0..5 {
            ctrl.telemetry(&flags, &ArmPosition::from_array([0.2; NUM_JOINTS]));
        }
        assert!(!flags.encoder_error.load(Ordering::Relaxed));

        // Joint C jumps wildly
        let mut readings = [0.2; NUM_JOINTS];
        readings[2] = 1.5;
        ctrl.telemetry(&flags, &ArmPosition::from_array(readings));

        assert!(flags.encoder_error.load(Ordering::Relaxed));
        assert!(ctrl.encoder_error_message.contains(", 2"));

        // The bad value never reached the model
        assert!((ctrl.model.angle(2) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_ik_disable_cancels_execution() {
        let (mut ctrl, flags, rx) = build_ctrl();

        ctrl.state = ControllerState::Executing;
        flags.enable_execute.store(true, Ordering::Relaxed);
        flags.ik_enabled.store(true, Ordering::Relaxed);

        ctrl.ik_enabled(&flags, &IkEnabled { enabled: false });

        assert_eq!(ctrl.state, ControllerState::Idle);
        assert!(!flags.enable_execute.load(Ordering::Relaxed));
        assert!(!flags.ik_enabled.load(Ordering::Relaxed));

        // The live transforms were republished
        let mut saw_transforms = false;
        while let Ok(frame) = rx.try_recv() {
            if frame.starts_with("/fk_transform ") {
                saw_transforms = true;
            }
        }
        assert!(saw_transforms);
    }

    #[test]
    fn test_executor_pacing_excludes_grip() {
        let (mut ctrl, _flags, _rx) = build_ctrl();

        // The grip (joint F) sweeps much further than the paced joints
        let goal = Vector6::new(0.3, 0.3, 0.3, 0.3, 0.3, 1.0);
        ctrl.planner
            .install_spline(&[Vector6::zeros(), goal]);

        let tick_s = ctrl.params.spline_wait_time_ms / 1000.0;
        let derate = ctrl.params.speed_derate;

        match ctrl.executor_tick(0.0, true) {
            TickOutcome::Advance { setpoint, .. } => {
                // Joints A..E respect their derated speed
                for i in 0..GRIP_JOINT {
                    let bound = ctrl.model.max_speed(i) * derate * tick_s;
                    assert!(setpoint[i].abs() <= bound + 1e-9);
                }

                // Joint F is allowed to exceed its own derated bound
                let grip_bound = ctrl.model.max_speed(GRIP_JOINT) * derate * tick_s;
                assert!(setpoint[GRIP_JOINT].abs() > grip_bound);
            }
            other => panic!("Expected an Advance tick, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_confirm_without_plan_ignored() {
        let (mut ctrl, flags, _rx) = build_ctrl();

        ctrl.motion_execute(&flags, &MotionExecute { preview: false });

        assert_eq!(ctrl.state, ControllerState::Idle);
        assert!(!flags.enable_execute.load(Ordering::Relaxed));
    }
}
