//! Main arm-side executable entry point.
//!
//! # Architecture
//!
//! The executable is a long-lived service structured around four threads
//! plus the main command loop:
//!
//!     - Telemetry thread: sanitises each incoming encoder message and
//!       updates the model
//!     - Executor thread: drives the arm along the planned spline while
//!       execution is enabled
//!     - Sim-echo thread: in sim mode, feeds commanded angles back as
//!       telemetry
//!     - Telemetry server thread: owns the outbound PUB socket
//!     - Main loop: receives operator commands and dispatches them to the
//!       controller, running IK and the planner synchronously

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::info;
use std::sync::Arc;
use std::thread;

// Internal
use arm_lib::{
    arm_ctrl::{self, ArmCtrl, Shared},
    arm_model::ArmModel,
    cmd_client::CmdClient,
    encoder_guard::EncoderGuard,
    kinematics::KinematicsSolver,
    motion_planner::MotionPlanner,
    telem_client, tm_server,
};
use comms_if::net::{zmq, MonitoredSocket, NetParams, SocketOptions};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("arm_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution
    info!("Rover Arm Control Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams =
        util::params::load("params/net.toml").wrap_err("Could not load net params")?;

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let model_params = util::params::load("params/arm_model.toml")
        .wrap_err("Could not load the arm geometry document")?;
    let model = ArmModel::new(model_params).wrap_err("Invalid arm geometry document")?;
    info!("ArmModel init complete");

    let solver = KinematicsSolver::new(
        util::params::load("params/kinematics.toml")
            .wrap_err("Could not load kinematics params")?,
    );
    info!("KinematicsSolver init complete");

    let planner = MotionPlanner::new(
        util::params::load("params/motion_planner.toml")
            .wrap_err("Could not load motion planner params")?,
    );
    info!("MotionPlanner init complete");

    let guard = EncoderGuard::new(
        util::params::load("params/encoder_guard.toml")
            .wrap_err("Could not load encoder guard params")?,
    );
    info!("EncoderGuard init complete");

    let ctrl_params = util::params::load("params/arm_ctrl.toml")
        .wrap_err("Could not load arm controller params")?;

    info!("Module initialisation complete\n");

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = zmq::Context::new();

    // Outbound publisher, bound by this process
    let out_socket = MonitoredSocket::new(
        &zmq_ctx,
        zmq::PUB,
        SocketOptions {
            bind: true,
            block_on_first_connect: false,
            ..Default::default()
        },
        &net_params.out_endpoint,
    )
    .wrap_err("Failed to bind the outbound bus")?;

    let (bus, bus_rx) = tm_server::channel();

    let cmd_client =
        CmdClient::new(&zmq_ctx, &net_params).wrap_err("Failed to initialise the CmdClient")?;

    let telem_socket = telem_client::telem_socket(&zmq_ctx, &net_params)
        .wrap_err("Failed to initialise the telemetry subscriber")?;

    info!("Network initialisation complete");

    // ---- SPAWN THREADS ----

    let ctrl = ArmCtrl::new(ctrl_params, model, solver, planner, guard, bus.clone());
    let shared = Arc::new(Shared::new(ctrl));

    thread::spawn(move || tm_server::tm_server_thread(out_socket, bus_rx));

    {
        let shared = shared.clone();
        thread::spawn(move || telem_client::telem_thread(telem_socket, shared));
    }

    {
        let shared = shared.clone();
        let bus = bus.clone();
        thread::spawn(move || arm_ctrl::executor_thread(shared, bus));
    }

    {
        let shared = shared.clone();
        let bus = bus.clone();
        thread::spawn(move || arm_ctrl::encoder_echo_thread(shared, bus));
    }

    info!("Threads started, beginning command loop\n");

    // ---- MAIN LOOP ----

    loop {
        match cmd_client.recv() {
            Ok(Some(cmd)) => arm_ctrl::handle_cmd(&shared, &bus, &cmd),
            Ok(None) => (),
            Err(e) => return Err(e).wrap_err("Error receiving operator commands"),
        }
    }
}
