//! Executor thread
//!
//! Persistent loop driving the physical (or simulated) arm along the
//! current spline. While `enable_execute` is clear the loop idles on a slow
//! poll; while set it ticks the spline every `spline_wait_time_ms`,
//! checking the encoder fault flag before every setpoint. Cancellation via
//! the atomic flags therefore takes effect within one tick.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{error, info, warn};
use std::sync::{atomic::Ordering, Arc};
use std::thread;
use std::time::Duration;

// Internal
use super::state::TickOutcome;
use super::{ControllerState, Shared};
use crate::tm_server::BusSender;
use comms_if::arm::{CHAN_ARM_POSITION, CHAN_IK_RA_CONTROL};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Run the executor loop. Never returns.
pub fn executor_thread(shared: Arc<Shared>, bus: BusSender) {
    // Tick timing is fixed at init
    let (tick_ms, idle_ms, window_len) = {
        let ctrl = shared.lock();
        (
            ctrl.params.spline_wait_time_ms as u64,
            ctrl.params.idle_poll_ms,
            ctrl.guard.window_len(),
        )
    };

    let mut spline_t = 0.0;

    loop {
        if !shared.flags.enable_execute.load(Ordering::Relaxed) {
            spline_t = 0.0;
            thread::sleep(Duration::from_millis(idle_ms));
            continue;
        }

        // A persistent encoder fault aborts the execution before any
        // further setpoint is issued
        if shared.flags.encoder_error.load(Ordering::Relaxed) {
            abort_on_encoder_error(&shared, &bus, window_len);
            spline_t = 0.0;
            continue;
        }

        let sim_mode = shared.flags.sim_mode.load(Ordering::Relaxed);

        {
            let mut ctrl = shared.lock();

            match ctrl.executor_tick(spline_t, sim_mode) {
                TickOutcome::Advance { new_t, setpoint } => {
                    spline_t = new_t;

                    // In hardware mode convert through the inverse encoder
                    // mapping and publish to the motor channel; in sim mode
                    // the tick already applied the setpoint to the model
                    if !sim_mode {
                        let raw = ctrl.setpoint_to_raw(&setpoint);
                        bus.publish_config(CHAN_IK_RA_CONTROL, &raw);
                    }
                }
                TickOutcome::Finished => {
                    info!("Finished executing!");

                    shared.flags.enable_execute.store(false, Ordering::Relaxed);
                    shared.flags.ik_enabled.store(false, Ordering::Relaxed);
                    spline_t = 0.0;

                    ctrl.state = ControllerState::Idle;
                    ctrl.planner.clear();
                }
                TickOutcome::NoPlan => {
                    warn!("Execution enabled with no plan loaded");

                    shared.flags.enable_execute.store(false, Ordering::Relaxed);
                    spline_t = 0.0;
                    ctrl.state = ControllerState::Idle;
                }
                TickOutcome::Unsafe => {
                    error!("Next spline configuration is unsafe, aborting execution");
                    bus.publish_debug(true, "Unsafe spline configuration, aborting");

                    shared.flags.enable_execute.store(false, Ordering::Relaxed);
                    spline_t = 0.0;
                    ctrl.state = ControllerState::Idle;
                    ctrl.planner.clear();
                }
            }
        }

        thread::sleep(Duration::from_millis(tick_ms));
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Abort the running execution after a persistent encoder fault: clear the
/// gating flags, surface the fault to the operator, and in sim mode flood
/// the telemetry echo with the current healthy angles so the guard windows
/// recover.
fn abort_on_encoder_error(shared: &Shared, bus: &BusSender, window_len: usize) {
    shared.flags.enable_execute.store(false, Ordering::Relaxed);
    shared.flags.ik_enabled.store(false, Ordering::Relaxed);

    let mut ctrl = shared.lock();

    error!("Aborting execution: {}", ctrl.encoder_error_message);
    bus.publish_debug(true, &ctrl.encoder_error_message);

    if shared.flags.sim_mode.load(Ordering::Relaxed) {
        let angles = ctrl.model.angles();
        for _ in 0..window_len {
            bus.publish_config(CHAN_ARM_POSITION, &angles);
        }
    }

    ctrl.state = ControllerState::Idle;
    ctrl.planner.clear();
}
