//! Pacemaker Serial Protocol
//!
//! Fixed-size binary frames exchanged with the pacemaker over a USB CDC serial
//! link. The DCM always writes one outbound frame (ECG request or parameter
//! block) and then reads exactly one inbound frame.
//!
//! Inbound frame layout:
//! - 1 byte: control byte (0 = ECG data, 1 = parameter echo)
//! - 80 bytes: payload (20 little-endian `f32` samples, or the echoed
//!   parameter block followed by filler)

mod error;
pub mod framing;
pub mod packet;
pub mod params;
pub mod serial;
pub mod stream;

pub use error::ProtocolError;
pub use framing::FrameAssembler;
pub use packet::{
    decode_ecg, decode_frame, decode_parameters, encode_ecg_frame, encode_ecg_request,
    encode_parameter_echo, encode_parameter_write, parameters_equal, ControlByte, EcgSample,
    Frame,
};
pub use params::{FieldKind, Parameter, ParameterSet, ParameterValue};
pub use serial::{eligible_devices, list_ports, open_port, DeviceDescriptor, PortInfo};
pub use stream::{PortOpener, SerialChannel, SerialLink, SystemPortOpener};

/// Default baud rate for pacemaker communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default per-read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// SEGGER J-Link CDC vendor ID used by the pacemaker board
pub const PACEMAKER_VID: u16 = 0x1366;

/// SEGGER J-Link CDC product ID used by the pacemaker board
pub const PACEMAKER_PID: u16 = 0x1015;

/// Number of samples per channel in one ECG packet
pub const ECG_SAMPLES_PER_CHANNEL: usize = 10;

/// Number of `f32` values in one ECG packet (atrial then ventricular)
pub const ECG_NUM_FLOATS: usize = ECG_SAMPLES_PER_CHANNEL * 2;

/// Size of the ECG payload in bytes
pub const ECG_NUM_BYTES: usize = ECG_NUM_FLOATS * 4;

/// Size of the packed parameter block in bytes
pub const PARAMS_NUM_BYTES: usize = params::block_len();

/// Size of one inbound frame: control byte plus the larger payload
pub const FRAME_SIZE: usize = 1 + if ECG_NUM_BYTES > PARAMS_NUM_BYTES {
    ECG_NUM_BYTES
} else {
    PARAMS_NUM_BYTES
};

/// Size of every outbound frame
pub const OUTBOUND_FRAME_SIZE: usize = PARAMS_NUM_BYTES;

/// Marker byte that opens an ECG request
pub const ECG_REQUEST_MARKER: u8 = 0x55;
