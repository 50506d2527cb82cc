//! # Telemetry Client
//!
//! Background thread subscribing to encoder telemetry. The socket connects
//! both to the encoder bridge and to this process's own publisher, so the
//! sim-mode echo arrives through exactly the same path as hardware
//! telemetry.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use log::{error, warn};

use comms_if::{
    arm::{ArmPosition, CHAN_ARM_POSITION},
    net::{self, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

use crate::arm_ctrl::Shared;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TelemClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not connect to {0}: {1}")]
    ConnectError(String, comms_if::net::zmq::Error),

    #[error("Could not subscribe to {0}: {1}")]
    SubscribeError(String, comms_if::net::zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Create the telemetry subscriber socket.
pub fn telem_socket(
    ctx: &comms_if::net::zmq::Context,
    params: &NetParams,
) -> Result<MonitoredSocket, TelemClientError> {
    let socket_options = SocketOptions {
        block_on_first_connect: false,
        connect_timeout: 1000,
        recv_timeout: 100,
        ..Default::default()
    };

    let socket = MonitoredSocket::new(
        ctx,
        comms_if::net::zmq::SUB,
        socket_options,
        &params.telem_endpoint,
    )
    .map_err(TelemClientError::SocketError)?;

    // Also pick up our own published echo
    socket
        .connect(&params.loopback_endpoint)
        .map_err(|e| TelemClientError::ConnectError(params.loopback_endpoint.clone(), e))?;

    socket
        .set_subscribe(CHAN_ARM_POSITION.as_bytes())
        .map_err(|e| TelemClientError::SubscribeError(CHAN_ARM_POSITION.into(), e))?;

    Ok(socket)
}

/// Telemetry thread: sanitize each incoming reading vector and apply it to
/// the model. Never returns.
pub fn telem_thread(socket: MonitoredSocket, shared: Arc<Shared>) {
    loop {
        let msg = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                warn!("Non UTF-8 frame on the telemetry bus");
                continue;
            }
            Err(comms_if::net::zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!("Error receiving telemetry: {:?}", e);
                continue;
            }
        };

        let payload = match net::split_frame(&msg) {
            Ok((CHAN_ARM_POSITION, payload)) => payload,
            Ok((channel, _)) => {
                warn!("Unexpected channel on the telemetry bus: {}", channel);
                continue;
            }
            Err(e) => {
                warn!("Malformed telemetry frame: {}", e);
                continue;
            }
        };

        let position: ArmPosition = match net::parse_payload(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!("Could not parse telemetry: {}", e);
                continue;
            }
        };

        let mut ctrl = shared.lock();
        ctrl.telemetry(&shared.flags, &position);
    }
}
