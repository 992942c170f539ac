//! Protocol errors

use thiserror::Error;

/// Errors that can occur while encoding, decoding or exchanging frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Opening or configuring the port failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Reading or writing the port failed
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// No open connection, or the session ended mid-read
    #[error("Not connected to pacemaker")]
    NotConnected,

    /// A frame or payload had the wrong length
    #[error("Malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        /// Required length
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// The first byte of a frame is neither ECG nor parameter echo
    #[error("Unknown control byte {0:#04x}")]
    UnknownControlByte(u8),

    /// The echoed parameter block differs from the one sent
    #[error(
        "The received parameters were not the same as the sent ones! \
         Please restart the DCM/Pacemaker or try a different Pacemaker!"
    )]
    ParameterMismatch,

    /// A parameter required by the block is not set
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// A name that is not one of the 18 parameters
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// A value that cannot be packed into its field
    #[error("Parameter '{name}' does not fit its wire type: {value}")]
    ParameterOutOfRange {
        /// Parameter display name
        name: String,
        /// Offending value
        value: String,
    },
}

impl ProtocolError {
    /// Whether this error comes from a parameter set that does not match the schema
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::MissingParameter(_)
                | ProtocolError::UnknownParameter(_)
                | ProtocolError::ParameterOutOfRange { .. }
        )
    }
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        ProtocolError::SerialError(e.to_string())
    }
}
