//! # Command Client
//!
//! Subscribes to the operator command channels published by the GUI and
//! parses each frame into an [`ArmCmd`] for the dispatcher.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;

use comms_if::{
    arm::ArmCmd,
    net::{self, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct CmdClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CmdClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not subscribe to {0}: {1}")]
    SubscribeError(String, comms_if::net::zmq::Error),

    #[error("Could not receive a command: {0}")]
    RecvError(comms_if::net::zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CmdClient {
    /// Create a new command client connected to the GUI's command endpoint.
    pub fn new(
        ctx: &comms_if::net::zmq::Context,
        params: &NetParams,
    ) -> Result<Self, CmdClientError> {
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
            &params.cmd_endpoint,
        )
        .map_err(CmdClientError::SocketError)?;

        for channel in ArmCmd::channels() {
            socket
                .set_subscribe(channel.as_bytes())
                .map_err(|e| CmdClientError::SubscribeError(channel.into(), e))?;
        }

        Ok(Self { socket })
    }

    /// Receive the next command, blocking up to the socket's receive
    /// timeout. Returns `Ok(None)` when no command arrived in time or a
    /// malformed frame was skipped.
    pub fn recv(&self) -> Result<Option<ArmCmd>, CmdClientError> {
        let msg = match self.socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                warn!("Non UTF-8 frame on the command bus");
                return Ok(None);
            }
            Err(comms_if::net::zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(CmdClientError::RecvError(e)),
        };

        let (channel, payload) = match net::split_frame(&msg) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Malformed command frame: {}", e);
                return Ok(None);
            }
        };

        match ArmCmd::from_frame(channel, payload) {
            Ok(Some(cmd)) => Ok(Some(cmd)),
            Ok(None) => {
                warn!("Unexpected channel on the command bus: {}", channel);
                Ok(None)
            }
            Err(e) => {
                warn!("Could not parse {} command: {}", channel, e);
                Ok(None)
            }
        }
    }
}
