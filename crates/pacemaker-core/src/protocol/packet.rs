//! Packet encoding/decoding
//!
//! Outbound frames are either the constant ECG request or a parameter block.
//! Inbound frames are exactly [`FRAME_SIZE`] bytes: control byte then payload.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use super::{
    ParameterSet, ProtocolError, ECG_NUM_BYTES, ECG_REQUEST_MARKER, ECG_SAMPLES_PER_CHANNEL,
    FRAME_SIZE, OUTBOUND_FRAME_SIZE, PARAMS_NUM_BYTES,
};

/// Inbound frame type, from the first byte of the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlByte {
    /// Payload is an ECG packet
    Ecg,
    /// Payload starts with an echo of the last parameter block
    ParameterEcho,
}

impl ControlByte {
    /// Wire value
    pub fn as_u8(self) -> u8 {
        match self {
            ControlByte::Ecg => 0,
            ControlByte::ParameterEcho => 1,
        }
    }
}

impl TryFrom<u8> for ControlByte {
    type Error = ProtocolError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            0 => Ok(ControlByte::Ecg),
            1 => Ok(ControlByte::ParameterEcho),
            other => Err(ProtocolError::UnknownControlByte(other)),
        }
    }
}

/// One inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw control byte
    pub control: u8,
    /// Frame payload (always `FRAME_SIZE - 1` bytes)
    pub payload: Vec<u8>,
}

impl Frame {
    /// Decoded control byte
    pub fn kind(&self) -> Result<ControlByte, ProtocolError> {
        ControlByte::try_from(self.control)
    }
}

/// One polling interval of ECG samples
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EcgSample {
    /// Atrial channel, oldest sample first
    pub atrial: [f32; ECG_SAMPLES_PER_CHANNEL],
    /// Ventricular channel, oldest sample first
    pub ventricular: [f32; ECG_SAMPLES_PER_CHANNEL],
}

/// Pack a parameter set into an outbound parameter frame
pub fn encode_parameter_write(params: &ParameterSet) -> Result<Vec<u8>, ProtocolError> {
    Ok(params.to_block()?.to_vec())
}

/// The constant ECG request frame: marker byte then zero padding
pub fn encode_ecg_request() -> Vec<u8> {
    let mut bytes = vec![0u8; OUTBOUND_FRAME_SIZE];
    bytes[0] = ECG_REQUEST_MARKER;
    bytes
}

/// Build a full inbound parameter-echo frame, as the pacemaker sends it
pub fn encode_parameter_echo(params: &ParameterSet) -> Result<Vec<u8>, ProtocolError> {
    let block = params.to_block()?;
    let mut bytes = vec![0u8; FRAME_SIZE];
    bytes[0] = ControlByte::ParameterEcho.as_u8();
    bytes[1..1 + PARAMS_NUM_BYTES].copy_from_slice(&block);
    Ok(bytes)
}

/// Build a full inbound ECG frame, as the pacemaker sends it
pub fn encode_ecg_frame(sample: &EcgSample) -> Vec<u8> {
    let mut bytes = vec![0u8; FRAME_SIZE];
    bytes[0] = ControlByte::Ecg.as_u8();
    let values: Vec<f32> = sample
        .atrial
        .iter()
        .chain(sample.ventricular.iter())
        .copied()
        .collect();
    LittleEndian::write_f32_into(&values, &mut bytes[1..1 + ECG_NUM_BYTES]);
    bytes
}

/// Split a raw inbound frame into control byte and payload
pub fn decode_frame(raw: &[u8]) -> Result<Frame, ProtocolError> {
    if raw.len() != FRAME_SIZE {
        return Err(ProtocolError::MalformedFrame {
            expected: FRAME_SIZE,
            actual: raw.len(),
        });
    }

    Ok(Frame {
        control: raw[0],
        payload: raw[1..].to_vec(),
    })
}

/// Interpret a payload as 20 packed floats: 10 atrial then 10 ventricular
pub fn decode_ecg(payload: &[u8]) -> Result<EcgSample, ProtocolError> {
    if payload.len() < ECG_NUM_BYTES {
        return Err(ProtocolError::MalformedFrame {
            expected: ECG_NUM_BYTES,
            actual: payload.len(),
        });
    }

    let half = ECG_NUM_BYTES / 2;
    let mut sample = EcgSample {
        atrial: [0.0; ECG_SAMPLES_PER_CHANNEL],
        ventricular: [0.0; ECG_SAMPLES_PER_CHANNEL],
    };
    LittleEndian::read_f32_into(&payload[..half], &mut sample.atrial);
    LittleEndian::read_f32_into(&payload[half..ECG_NUM_BYTES], &mut sample.ventricular);
    Ok(sample)
}

/// Reconstruct the parameter set echoed in a control-1 payload
pub fn decode_parameters(payload: &[u8]) -> Result<ParameterSet, ProtocolError> {
    ParameterSet::from_block(payload)
}

/// Byte-exact comparison of the sent block against the first block-length
/// bytes of the echo
pub fn parameters_equal(sent: &[u8], echoed: &[u8]) -> bool {
    echoed.len() >= PARAMS_NUM_BYTES && sent == &echoed[..PARAMS_NUM_BYTES]
}
