//! # Communications Interface
//!
//! This crate defines the interface between the arm control executable and
//! the other processes it talks to: the operator GUI, the encoder telemetry
//! feed and the motor server. It provides:
//!
//! - [`net`]: networking abstractions over ZMQ, the transport chosen for the
//!   software, including the channel-tagged frame format used on the bus.
//! - [`arm`]: the message records carried on each named bus channel.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod arm;
pub mod net;
