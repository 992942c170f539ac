//! Outbound notifications
//!
//! Both background loops report to the user interface through one unbounded
//! channel. Events arrive in the order their causes were processed; a dropped
//! receiver is not an error, the loops keep running.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::EcgSample;
use crate::session::ConnectionState;

/// A notification for the user interface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DcmEvent {
    /// The session state machine moved to a new state
    ConnectionStateChanged {
        /// State entered
        state: ConnectionState,
        /// Device serial number and/or a prompt for the user
        info: String,
    },
    /// One batch of ECG samples
    EcgData(EcgSample),
    /// Outcome of a parameter write, checked against the device's echo
    ParameterVerification {
        /// Whether the echo matched the block that was sent
        success: bool,
        /// Message to show the user
        message: String,
    },
    /// User-facing notice from a registration request
    Notice {
        /// Message to show the user
        message: String,
    },
}

/// Producer side of the event channel, cloned into both loops
pub type EventSender = mpsc::UnboundedSender<DcmEvent>;
/// Consumer side of the event channel
pub type EventReceiver = mpsc::UnboundedReceiver<DcmEvent>;

/// Create the event channel shared by the transport and the session manager
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

pub(crate) fn emit(tx: &EventSender, event: DcmEvent) {
    // Receiver gone means nobody is listening any more
    let _ = tx.send(event);
}
