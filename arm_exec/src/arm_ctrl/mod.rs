//! Arm control module
//!
//! The controller is a single state object ([`ArmCtrl`]) living behind a
//! mutex shared by the command, telemetry, executor and sim-echo threads.
//! Cross-thread gating (execution enable, sim mode, encoder faults) goes
//! through atomic flags so the executor observes a cancellation within one
//! tick without having to hold the model lock.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod executor;
mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::info;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

// Internal
pub use executor::executor_thread;
pub use params::*;
pub use state::{ArmCtrl, ControlMode, ControllerState};
use state::{PreviewData, TargetSpec};

use crate::tm_server::BusSender;
use comms_if::arm::{ArmCmd, CHAN_ARM_POSITION};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// State shared between the controller threads.
pub struct Shared {
    /// The controller itself. The telemetry handler and the executor both
    /// mutate the model, so they serialise through this mutex.
    pub ctrl: Mutex<ArmCtrl>,

    /// Cross-thread gating flags.
    pub flags: Flags,
}

/// The flag set read from every thread. Writes that gate the model happen
/// while the writer also holds the controller mutex; the atomics are what
/// let the executor and echo threads observe changes promptly.
pub struct Flags {
    /// The executor drives the arm while this is set.
    pub enable_execute: AtomicBool,

    /// Sim mode: setpoints are echoed back as telemetry instead of being
    /// sent to the motors.
    pub sim_mode: AtomicBool,

    /// IK control enabled by the GUI.
    pub ik_enabled: AtomicBool,

    /// A preview is streaming; telemetry must not touch the model.
    pub previewing: AtomicBool,

    /// The guard flagged the latest telemetry as faulty.
    pub encoder_error: AtomicBool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Flags {
    /// Flags at startup: sim mode on, everything else off.
    pub fn new() -> Self {
        Self {
            enable_execute: AtomicBool::new(false),
            sim_mode: AtomicBool::new(true),
            ik_enabled: AtomicBool::new(false),
            previewing: AtomicBool::new(false),
            encoder_error: AtomicBool::new(false),
        }
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    pub fn new(ctrl: ArmCtrl) -> Self {
        Self {
            ctrl: Mutex::new(ctrl),
            flags: Flags::new(),
        }
    }

    /// Lock the controller, panicking on a poisoned mutex since a panicked
    /// control thread leaves no safe state to continue from.
    pub fn lock(&self) -> std::sync::MutexGuard<'_, ArmCtrl> {
        self.ctrl.lock().expect("ArmCtrl mutex poisoned")
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Dispatch one operator command to the controller.
///
/// Target commands run IK and the planner synchronously under the lock,
/// then stream the preview without it, so telemetry keeps flowing between
/// frames.
pub fn handle_cmd(shared: &Shared, bus: &BusSender, cmd: &ArmCmd) {
    let preview = match cmd {
        ArmCmd::TargetOrientation(msg) => {
            info!(
                "Received target: ({:.3}, {:.3}, {:.3})",
                msg.x, msg.y, msg.z
            );
            let target = TargetSpec::Pose(msg.into());
            shared.lock().process_target(&shared.flags, target)
        }
        ArmCmd::TargetAngles(msg) => {
            info!("Received target angles");
            let target = TargetSpec::Angles(msg.to_array().into());
            shared.lock().process_target(&shared.flags, target)
        }
        ArmCmd::MotionExecute(msg) => {
            shared.lock().motion_execute(&shared.flags, msg);
            None
        }
        ArmCmd::IkEnabled(msg) => {
            shared.lock().ik_enabled(&shared.flags, msg);
            None
        }
        ArmCmd::SimulationMode(msg) => {
            shared.lock().simulation_mode(&shared.flags, msg);
            None
        }
        ArmCmd::LockJoints(msg) => {
            shared.lock().lock_joints(msg);
            None
        }
        ArmCmd::ArmControlState(msg) => {
            shared.lock().arm_control_state(msg);
            None
        }
    };

    if let Some(data) = preview {
        run_preview(shared, bus, data);
    }
}

/// Sim-mode echo thread: while sim mode is active, periodically publish the
/// model's current angles as synthesized telemetry.
pub fn encoder_echo_thread(shared: Arc<Shared>, bus: BusSender) {
    let period_ms = {
        let ctrl = shared.lock();
        ctrl.params.spline_wait_time_ms as u64
    };

    loop {
        if shared.flags.sim_mode.load(Ordering::Relaxed) {
            let angles = {
                let ctrl = shared.lock();
                ctrl.model.angles()
            };

            bus.publish_config(CHAN_ARM_POSITION, &angles);
        }

        thread::sleep(Duration::from_millis(period_ms));
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Stream the preview of a fresh plan to the GUI.
///
/// Runs on hypothetical copies of the model and solver so the live model is
/// never mutated, and without holding the controller lock so telemetry
/// sanitisation continues between frames.
fn run_preview(shared: &Shared, bus: &BusSender, data: PreviewData) {
    info!("Previewing...");

    let PreviewData {
        model: mut hypo,
        solver,
        spline,
        steps,
        frame_ms,
    } = data;

    for step in 0..=steps {
        let t = step as f64 / steps as f64;

        let target = spline.pos(t);
        hypo.set_angles(&target);
        solver.fk(&mut hypo);
        bus.publish_transforms(&hypo);

        thread::sleep(Duration::from_millis(frame_ms));
    }

    info!("Preview Done");
    bus.publish_debug(false, "Preview Done");

    {
        let mut ctrl = shared.lock();
        ctrl.state = ControllerState::AwaitingExecute;
    }
    shared.flags.previewing.store(false, Ordering::Relaxed);
}
