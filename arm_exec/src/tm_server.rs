//! # Telemetry Server
//!
//! The outbound side of the arm bus. All publishing goes through a single
//! PUB socket owned by the server thread; the rest of the software hands
//! frames to it over an mpsc channel via [`BusSender`] handles. Serialising
//! the publishes through one thread means the sim-mode echo can never
//! deadlock against a handler holding the model lock.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc::{self, Receiver, Sender};

use log::warn;
use nalgebra::{Isometry3, Vector6};
use serde::Serialize;

use comms_if::{
    arm::{ArmPosition, DebugMessage, FkTransform, CHAN_DEBUG_MESSAGE, CHAN_FK_TRANSFORM},
    net::{self, MonitoredSocket},
};

use crate::arm_model::{ArmModel, NUM_JOINTS};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A cloneable handle used to publish messages on the outbound bus.
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: Sender<String>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl BusSender {
    /// Publish a message on the given channel.
    ///
    /// Failures are logged rather than propagated - losing a telemetry
    /// frame must never bring down a control thread.
    pub fn publish<T: Serialize>(&self, channel: &str, msg: &T) {
        match net::frame(channel, msg) {
            Ok(frame) => {
                if self.tx.send(frame).is_err() {
                    warn!("Outbound bus closed, dropping {} message", channel);
                }
            }
            Err(e) => warn!("Could not serialise {} message: {}", channel, e),
        }
    }

    /// Publish a popup message for the operator.
    pub fn publish_debug(&self, is_error: bool, message: &str) {
        self.publish(
            CHAN_DEBUG_MESSAGE,
            &DebugMessage {
                is_error,
                message: message.into(),
            },
        );
    }

    /// Publish the model's cached world-frame transforms.
    pub fn publish_transforms(&self, model: &ArmModel) {
        let transforms = FkTransform {
            transform_a: matrix_rows(model.transform(0)),
            transform_b: matrix_rows(model.transform(1)),
            transform_c: matrix_rows(model.transform(2)),
            transform_d: matrix_rows(model.transform(3)),
            transform_e: matrix_rows(model.transform(4)),
            transform_f: matrix_rows(model.transform(5)),
        };

        self.publish(CHAN_FK_TRANSFORM, &transforms);
    }

    /// Publish a joint-angle vector on the given channel.
    pub fn publish_config(&self, channel: &str, angles: &Vector6<f64>) {
        let mut array = [0.0; NUM_JOINTS];
        array.copy_from_slice(angles.as_slice());

        self.publish(channel, &ArmPosition::from_array(array));
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Create the outbound bus channel: a sender handle for the control threads
/// and the receiver drained by the server thread.
pub fn channel() -> (BusSender, Receiver<String>) {
    let (tx, rx) = mpsc::channel();
    (BusSender { tx }, rx)
}

/// Server thread: drains the outbound channel into the PUB socket. Exits
/// when every sender handle has been dropped.
pub fn tm_server_thread(socket: MonitoredSocket, rx: Receiver<String>) {
    while let Ok(frame) = rx.recv() {
        if let Err(e) = socket.send(frame.as_str(), 0) {
            warn!("Could not publish on the outbound bus: {}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Convert a transform into a row-major homogeneous matrix.
fn matrix_rows(iso: &Isometry3<f64>) -> [[f64; 4]; 4] {
    let h = iso.to_homogeneous();

    let mut rows = [[0.0; 4]; 4];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = h[(r, c)];
        }
    }

    rows
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::arm::CHAN_IK_RA_CONTROL;

    #[test]
    fn test_publish_config_frame() {
        let (bus, rx) = channel();

        bus.publish_config(
            CHAN_IK_RA_CONTROL,
            &Vector6::new(0.1, 0.2, 0.3, 0.4, 0.5, 0.6),
        );

        let frame = rx.try_recv().unwrap();
        let (channel, payload) = net::split_frame(&frame).unwrap();
        assert_eq!(channel, CHAN_IK_RA_CONTROL);

        let msg: ArmPosition = net::parse_payload(payload).unwrap();
        assert_eq!(msg.joint_c, 0.3);
        assert_eq!(msg.joint_f, 0.6);
    }

    #[test]
    fn test_matrix_rows_row_major() {
        use nalgebra::{Translation3, UnitQuaternion};

        let iso = Isometry3::from_parts(
            Translation3::new(1.0, 2.0, 3.0),
            UnitQuaternion::identity(),
        );

        let rows = matrix_rows(&iso);

        // Translation sits in the last column of each row
        assert_eq!(rows[0][3], 1.0);
        assert_eq!(rows[1][3], 2.0);
        assert_eq!(rows[2][3], 3.0);
        assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);
    }
}
