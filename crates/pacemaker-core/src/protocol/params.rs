//! Pacemaker parameter schema
//!
//! The parameter block is 18 fields packed back to back, little-endian, in the
//! order of [`Parameter::ALL`]. Reordering the list breaks compatibility with
//! the pacemaker firmware.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::{ProtocolError, PARAMS_NUM_BYTES};

/// Wire type of a single parameter field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Unsigned byte
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// 32-bit float
    F32,
}

impl FieldKind {
    /// Encoded size in bytes
    pub const fn size(self) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::U16 => 2,
            FieldKind::F32 => 4,
        }
    }

    /// Whether the field carries an integer
    pub const fn is_integer(self) -> bool {
        !matches!(self, FieldKind::F32)
    }

    const fn max_integer(self) -> i64 {
        match self {
            FieldKind::U8 => u8::MAX as i64,
            FieldKind::U16 => u16::MAX as i64,
            FieldKind::F32 => 0,
        }
    }
}

/// A programmable pacemaker parameter
///
/// Variants are declared in wire order; the derived `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Parameter {
    /// Bradycardia pacing mode code
    #[serde(rename = "Pacing Mode")]
    PacingMode,
    /// Lowest pacing rate, in ppm
    #[serde(rename = "Lower Rate Limit")]
    LowerRateLimit,
    /// Highest tracking rate, in ppm
    #[serde(rename = "Upper Rate Limit")]
    UpperRateLimit,
    /// Atrial pulse amplitude, in volts
    #[serde(rename = "Atrial Amplitude")]
    AtrialAmplitude,
    /// Atrial pulse width, in ms
    #[serde(rename = "Atrial Pulse Width")]
    AtrialPulseWidth,
    /// Atrial sensing threshold, in mV
    #[serde(rename = "Atrial Sensitivity")]
    AtrialSensitivity,
    /// Ventricular pulse amplitude, in volts
    #[serde(rename = "Ventricular Amplitude")]
    VentricularAmplitude,
    /// Ventricular pulse width, in ms
    #[serde(rename = "Ventricular Pulse Width")]
    VentricularPulseWidth,
    /// Ventricular sensing threshold, in mV
    #[serde(rename = "Ventricular Sensitivity")]
    VentricularSensitivity,
    /// Ventricular refractory period, in ms
    #[serde(rename = "VRP")]
    Vrp,
    /// Atrial refractory period, in ms
    #[serde(rename = "ARP")]
    Arp,
    /// Post-ventricular atrial refractory period, in ms
    #[serde(rename = "PVARP")]
    Pvarp,
    /// Atrial to ventricular delay, in ms
    #[serde(rename = "Fixed AV Delay")]
    FixedAvDelay,
    /// Highest rate-adaptive pacing rate, in ppm
    #[serde(rename = "Maximum Sensor Rate")]
    MaximumSensorRate,
    /// Time to speed up under activity, in s
    #[serde(rename = "Reaction Time")]
    ReactionTime,
    /// Rate-adaptive gain
    #[serde(rename = "Response Factor")]
    ResponseFactor,
    /// Time to slow down after activity, in min
    #[serde(rename = "Recovery Time")]
    RecoveryTime,
    /// Accelerometer activity level code
    #[serde(rename = "Activity Threshold")]
    ActivityThreshold,
}

impl Parameter {
    /// Every parameter, in wire order
    pub const ALL: [Parameter; 18] = [
        Parameter::PacingMode,
        Parameter::LowerRateLimit,
        Parameter::UpperRateLimit,
        Parameter::AtrialAmplitude,
        Parameter::AtrialPulseWidth,
        Parameter::AtrialSensitivity,
        Parameter::VentricularAmplitude,
        Parameter::VentricularPulseWidth,
        Parameter::VentricularSensitivity,
        Parameter::Vrp,
        Parameter::Arp,
        Parameter::Pvarp,
        Parameter::FixedAvDelay,
        Parameter::MaximumSensorRate,
        Parameter::ReactionTime,
        Parameter::ResponseFactor,
        Parameter::RecoveryTime,
        Parameter::ActivityThreshold,
    ];

    /// Display name, as used by the DCM user interface
    pub const fn name(self) -> &'static str {
        match self {
            Parameter::PacingMode => "Pacing Mode",
            Parameter::LowerRateLimit => "Lower Rate Limit",
            Parameter::UpperRateLimit => "Upper Rate Limit",
            Parameter::AtrialAmplitude => "Atrial Amplitude",
            Parameter::AtrialPulseWidth => "Atrial Pulse Width",
            Parameter::AtrialSensitivity => "Atrial Sensitivity",
            Parameter::VentricularAmplitude => "Ventricular Amplitude",
            Parameter::VentricularPulseWidth => "Ventricular Pulse Width",
            Parameter::VentricularSensitivity => "Ventricular Sensitivity",
            Parameter::Vrp => "VRP",
            Parameter::Arp => "ARP",
            Parameter::Pvarp => "PVARP",
            Parameter::FixedAvDelay => "Fixed AV Delay",
            Parameter::MaximumSensorRate => "Maximum Sensor Rate",
            Parameter::ReactionTime => "Reaction Time",
            Parameter::ResponseFactor => "Response Factor",
            Parameter::RecoveryTime => "Recovery Time",
            Parameter::ActivityThreshold => "Activity Threshold",
        }
    }

    /// Wire type of this parameter
    pub const fn kind(self) -> FieldKind {
        match self {
            Parameter::AtrialAmplitude
            | Parameter::AtrialSensitivity
            | Parameter::VentricularAmplitude
            | Parameter::VentricularSensitivity => FieldKind::F32,
            Parameter::Vrp | Parameter::Arp | Parameter::Pvarp | Parameter::FixedAvDelay => {
                FieldKind::U16
            }
            _ => FieldKind::U8,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Parameter::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownParameter(s.to_string()))
    }
}

/// Total size of the packed parameter block
pub(crate) const fn block_len() -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < Parameter::ALL.len() {
        total += Parameter::ALL[i].kind().size();
        i += 1;
    }
    total
}

/// A numeric parameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f32),
}

impl ParameterValue {
    /// Value as a float, whatever its representation
    pub fn as_f32(self) -> f32 {
        match self {
            ParameterValue::Int(v) => v as f32,
            ParameterValue::Float(v) => v,
        }
    }

    /// Integral value within `0..=max`, if this value is one
    fn as_integer(self, max: i64) -> Option<i64> {
        let v = match self {
            ParameterValue::Int(v) => v,
            ParameterValue::Float(v) if v.is_finite() && v.fract() == 0.0 => v as i64,
            ParameterValue::Float(_) => return None,
        };
        (0..=max).contains(&v).then_some(v)
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<u8> for ParameterValue {
    fn from(v: u8) -> Self {
        ParameterValue::Int(v as i64)
    }
}

impl From<u16> for ParameterValue {
    fn from(v: u16) -> Self {
        ParameterValue::Int(v as i64)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        ParameterValue::Int(v as i64)
    }
}

impl From<f32> for ParameterValue {
    fn from(v: f32) -> Self {
        ParameterValue::Float(v)
    }
}

/// A set of named parameter values, iterated in wire order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<Parameter, ParameterValue>,
}

impl ParameterSet {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from display names, as supplied by a form or a JSON object
    pub fn from_named<I, S, V>(entries: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = (S, V)>,
        S: AsRef<str>,
        V: Into<ParameterValue>,
    {
        let mut set = Self::new();
        for (name, value) in entries {
            set.insert(name.as_ref().parse()?, value.into());
        }
        Ok(set)
    }

    /// Set a value, returning the previous one
    pub fn insert(&mut self, param: Parameter, value: ParameterValue) -> Option<ParameterValue> {
        self.values.insert(param, value)
    }

    /// Builder-style insert
    pub fn with(mut self, param: Parameter, value: impl Into<ParameterValue>) -> Self {
        self.values.insert(param, value.into());
        self
    }

    /// Value of a parameter, if set
    pub fn get(&self, param: Parameter) -> Option<ParameterValue> {
        self.values.get(&param).copied()
    }

    /// Unset a parameter, returning its value
    pub fn remove(&mut self, param: Parameter) -> Option<ParameterValue> {
        self.values.remove(&param)
    }

    /// Number of parameters set
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no parameter is set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate values in wire order
    pub fn iter(&self) -> impl Iterator<Item = (Parameter, ParameterValue)> + '_ {
        self.values.iter().map(|(p, v)| (*p, *v))
    }

    /// Pack the set into the fixed parameter block
    pub fn to_block(&self) -> Result<[u8; PARAMS_NUM_BYTES], ProtocolError> {
        let mut block = [0u8; PARAMS_NUM_BYTES];
        let mut offset = 0;

        for param in Parameter::ALL {
            let value = self
                .get(param)
                .ok_or_else(|| ProtocolError::MissingParameter(param.name().to_string()))?;
            let kind = param.kind();
            let field = &mut block[offset..offset + kind.size()];

            if kind.is_integer() {
                let v = value.as_integer(kind.max_integer()).ok_or_else(|| {
                    ProtocolError::ParameterOutOfRange {
                        name: param.name().to_string(),
                        value: value.to_string(),
                    }
                })?;
                match kind {
                    FieldKind::U8 => field[0] = v as u8,
                    _ => LittleEndian::write_u16(field, v as u16),
                }
            } else {
                LittleEndian::write_f32(field, value.as_f32());
            }

            offset += kind.size();
        }

        Ok(block)
    }

    /// Unpack a parameter block; trailing bytes beyond the block are ignored
    pub fn from_block(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < PARAMS_NUM_BYTES {
            return Err(ProtocolError::MalformedFrame {
                expected: PARAMS_NUM_BYTES,
                actual: data.len(),
            });
        }

        let mut set = Self::new();
        let mut offset = 0;
        for param in Parameter::ALL {
            let kind = param.kind();
            let field = &data[offset..offset + kind.size()];
            let value = match kind {
                FieldKind::U8 => ParameterValue::Int(field[0] as i64),
                FieldKind::U16 => ParameterValue::Int(LittleEndian::read_u16(field) as i64),
                FieldKind::F32 => ParameterValue::Float(LittleEndian::read_f32(field)),
            };
            set.insert(param, value);
            offset += kind.size();
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nominal() -> ParameterSet {
        ParameterSet::new()
            .with(Parameter::PacingMode, 3u8)
            .with(Parameter::LowerRateLimit, 60u8)
            .with(Parameter::UpperRateLimit, 120u8)
            .with(Parameter::AtrialAmplitude, 3.5f32)
            .with(Parameter::AtrialPulseWidth, 1u8)
            .with(Parameter::AtrialSensitivity, 0.75f32)
            .with(Parameter::VentricularAmplitude, 3.5f32)
            .with(Parameter::VentricularPulseWidth, 1u8)
            .with(Parameter::VentricularSensitivity, 2.5f32)
            .with(Parameter::Vrp, 320u16)
            .with(Parameter::Arp, 250u16)
            .with(Parameter::Pvarp, 250u16)
            .with(Parameter::FixedAvDelay, 150u16)
            .with(Parameter::MaximumSensorRate, 120u8)
            .with(Parameter::ReactionTime, 30u8)
            .with(Parameter::ResponseFactor, 8u8)
            .with(Parameter::RecoveryTime, 5u8)
            .with(Parameter::ActivityThreshold, 4u8)
    }

    #[test]
    fn test_block_len() {
        assert_eq!(block_len(), 34);
    }

    #[test]
    fn test_field_offsets() {
        let block = nominal().to_block().expect("encode");
        assert_eq!(&block[0..3], &[3, 60, 120]);
        assert_eq!(LittleEndian::read_f32(&block[3..7]), 3.5);
        assert_eq!(block[7], 1);
        assert_eq!(LittleEndian::read_u16(&block[21..23]), 320);
        assert_eq!(&block[29..34], &[120, 30, 8, 5, 4]);
    }

    #[test]
    fn test_missing_parameter() {
        let mut params = nominal();
        params.remove(Parameter::Pvarp);
        let err = params.to_block().unwrap_err();
        assert!(matches!(err, ProtocolError::MissingParameter(ref n) if n == "PVARP"));
        assert!(err.is_schema_error());
    }

    #[test]
    fn test_integer_field_rejects_fraction_and_overflow() {
        let params = nominal().with(Parameter::LowerRateLimit, 60.5f32);
        assert!(params.to_block().unwrap_err().is_schema_error());

        let params = nominal().with(Parameter::UpperRateLimit, 256i64);
        assert!(params.to_block().is_err());

        let params = nominal().with(Parameter::Vrp, -1i64);
        assert!(params.to_block().is_err());
    }

    #[test]
    fn test_integral_float_accepted_for_integer_field() {
        let a = nominal().with(Parameter::LowerRateLimit, 60.0f32);
        assert_eq!(a.to_block().unwrap(), nominal().to_block().unwrap());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Fixed AV Delay".parse::<Parameter>().unwrap(), Parameter::FixedAvDelay);
        assert_eq!("pvarp".parse::<Parameter>().unwrap(), Parameter::Pvarp);
        assert!("Heart Rate".parse::<Parameter>().is_err());
    }

    #[test]
    fn test_json_keys_are_display_names() {
        let json = serde_json::to_value(nominal()).unwrap();
        assert_eq!(json["Lower Rate Limit"], 60);
        assert_eq!(json["Atrial Amplitude"], 3.5);

        let back: ParameterSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, nominal());
    }
}
