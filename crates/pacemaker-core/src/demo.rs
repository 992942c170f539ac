//! Demo Mode - Simulated pacemaker for testing
//!
//! Speaks the pacemaker wire protocol without hardware: ECG requests are
//! answered with synthetic atrial/ventricular traces paced at the programmed
//! lower rate limit, and parameter blocks are echoed back. A [`DemoBus`] plays
//! the role of the USB bus so pacemakers can be plugged and unplugged.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::{
    encode_ecg_frame, ControlByte, EcgSample, Parameter, ParameterSet, PortInfo, PortOpener,
    ProtocolError, SerialLink, ECG_REQUEST_MARKER, ECG_SAMPLES_PER_CHANNEL, FRAME_SIZE,
    OUTBOUND_FRAME_SIZE, PACEMAKER_PID, PACEMAKER_VID, PARAMS_NUM_BYTES,
};
use crate::session::DeviceEnumerator;

/// Time between two ECG samples
const SAMPLE_PERIOD_MS: f32 = 10.0;

/// How long an empty read waits before timing out
const READ_POLL: Duration = Duration::from_millis(1);

/// Synthetic ECG waveform generator
struct EcgGenerator {
    /// Simulation time in milliseconds
    time_ms: f32,
    /// Pacing interval derived from the lower rate limit
    beat_interval_ms: f32,
    /// Atrial to ventricular delay
    av_delay_ms: f32,
    atrial_amplitude: f32,
    ventricular_amplitude: f32,
    rng: StdRng,
}

impl EcgGenerator {
    fn new() -> Self {
        Self {
            time_ms: 0.0,
            beat_interval_ms: 1000.0, // 60 ppm
            av_delay_ms: 150.0,
            atrial_amplitude: 3.5,
            ventricular_amplitude: 3.5,
            rng: StdRng::from_entropy(),
        }
    }

    /// Follow newly programmed parameters
    fn program(&mut self, params: &ParameterSet) {
        if let Some(lrl) = params.get(Parameter::LowerRateLimit) {
            let ppm = lrl.as_f32();
            if ppm > 0.0 {
                self.beat_interval_ms = 60_000.0 / ppm;
            }
        }
        if let Some(delay) = params.get(Parameter::FixedAvDelay) {
            self.av_delay_ms = delay.as_f32();
        }
        if let Some(amp) = params.get(Parameter::AtrialAmplitude) {
            self.atrial_amplitude = amp.as_f32();
        }
        if let Some(amp) = params.get(Parameter::VentricularAmplitude) {
            self.ventricular_amplitude = amp.as_f32();
        }
    }

    /// Pulse of the given width centered `at` ms into the beat
    fn pulse(phase_ms: f32, at: f32, width: f32) -> f32 {
        let d = phase_ms - at;
        if d.abs() > width {
            0.0
        } else {
            0.5 * (1.0 + (PI * d / width).cos())
        }
    }

    fn next_batch(&mut self) -> EcgSample {
        let mut sample = EcgSample {
            atrial: [0.0; ECG_SAMPLES_PER_CHANNEL],
            ventricular: [0.0; ECG_SAMPLES_PER_CHANNEL],
        };

        for i in 0..ECG_SAMPLES_PER_CHANNEL {
            let phase = self.time_ms % self.beat_interval_ms;
            let noise_a = self.rng.gen_range(-0.02..0.02);
            let noise_v = self.rng.gen_range(-0.02..0.02);

            sample.atrial[i] = 0.5
                + self.atrial_amplitude * Self::pulse(phase, 10.0, 10.0)
                + 0.3 * Self::pulse(phase, 60.0, 40.0)
                + noise_a;
            sample.ventricular[i] = 0.5
                + self.ventricular_amplitude * Self::pulse(phase, self.av_delay_ms, 15.0)
                + 0.4 * Self::pulse(phase, self.av_delay_ms + 250.0, 60.0)
                + noise_v;

            self.time_ms += SAMPLE_PERIOD_MS;
        }

        sample
    }
}

struct DemoState {
    /// Bytes waiting to be read by the host
    to_host: VecDeque<u8>,
    /// Partial outbound frame written by the host
    from_host: Vec<u8>,
    generator: EcgGenerator,
    last_parameters: Option<ParameterSet>,
    /// Maximum bytes handed out per read (None = everything buffered)
    chunk_size: Option<usize>,
    corrupt_echo: bool,
    connected: bool,
    ecg_requests: usize,
    parameter_writes: usize,
    /// Most replies ever queued for the host at once
    max_pending_replies: usize,
}

impl DemoState {
    fn handle_frame(&mut self, frame: &[u8]) {
        let pending = self.to_host.len().div_ceil(FRAME_SIZE) + 1;
        self.max_pending_replies = self.max_pending_replies.max(pending);

        if frame[0] == ECG_REQUEST_MARKER && frame[1..].iter().all(|&b| b == 0) {
            self.ecg_requests += 1;
            let batch = self.generator.next_batch();
            self.to_host.extend(encode_ecg_frame(&batch));
            return;
        }

        self.parameter_writes += 1;
        if let Ok(params) = ParameterSet::from_block(frame) {
            self.generator.program(&params);
            self.last_parameters = Some(params);
        }

        let mut echo = vec![0u8; FRAME_SIZE];
        echo[0] = ControlByte::ParameterEcho.as_u8();
        echo[1..1 + PARAMS_NUM_BYTES].copy_from_slice(&frame[..PARAMS_NUM_BYTES]);
        if self.corrupt_echo {
            echo[1] ^= 0xFF;
        }
        self.to_host.extend(echo);
    }
}

/// A simulated pacemaker; clones share the same device
#[derive(Clone)]
pub struct DemoPacemaker {
    inner: Arc<Mutex<DemoState>>,
}

impl Default for DemoPacemaker {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoPacemaker {
    /// A connected pacemaker answering every request at once
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DemoState {
                to_host: VecDeque::new(),
                from_host: Vec::new(),
                generator: EcgGenerator::new(),
                last_parameters: None,
                chunk_size: None,
                corrupt_echo: false,
                connected: true,
                ecg_requests: 0,
                parameter_writes: 0,
                max_pending_replies: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DemoState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver responses at most `size` bytes per read
    pub fn with_chunk_size(self, size: usize) -> Self {
        self.lock().chunk_size = Some(size.max(1));
        self
    }

    /// Flip bits in every parameter echo from now on
    pub fn set_corrupt_echo(&self, corrupt: bool) {
        self.lock().corrupt_echo = corrupt;
    }

    /// Parameters most recently written to the device
    pub fn last_parameters(&self) -> Option<ParameterSet> {
        self.lock().last_parameters.clone()
    }

    /// ECG requests answered so far
    pub fn ecg_requests(&self) -> usize {
        self.lock().ecg_requests
    }

    /// Parameter blocks received so far
    pub fn parameter_writes(&self) -> usize {
        self.lock().parameter_writes
    }

    /// Most replies that were waiting to be read at any one time, counting
    /// the reply to the frame just written. A host that waits for each reply
    /// before writing again keeps this at 1.
    pub fn max_pending_replies(&self) -> usize {
        self.lock().max_pending_replies
    }

    /// Simulate the cable being pulled: all I/O fails from now on
    pub fn disconnect(&self) {
        let mut state = self.lock();
        state.connected = false;
        state.to_host.clear();
        state.from_host.clear();
    }

    /// Simulate the cable being plugged back in
    pub fn reconnect(&self) {
        self.lock().connected = true;
    }

    /// Whether the simulated cable is plugged in
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

impl Read for DemoPacemaker {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.lock();
            if !state.connected {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            if !state.to_host.is_empty() {
                let limit = state.chunk_size.unwrap_or(usize::MAX);
                let n = buf.len().min(limit).min(state.to_host.len());
                for (dst, src) in buf.iter_mut().zip(state.to_host.drain(..n)) {
                    *dst = src;
                }
                return Ok(n);
            }
        }

        thread::sleep(READ_POLL);
        Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
    }
}

impl Write for DemoPacemaker {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if !state.connected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }

        state.from_host.extend_from_slice(buf);
        while state.from_host.len() >= OUTBOUND_FRAME_SIZE {
            let frame: Vec<u8> = state.from_host.drain(..OUTBOUND_FRAME_SIZE).collect();
            state.handle_frame(&frame);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for DemoPacemaker {
    fn try_clone(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(self.clone()))
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.lock().to_host.clear();
        Ok(())
    }
}

/// A simulated USB bus with pacemakers attached to named ports
#[derive(Clone, Default)]
pub struct DemoBus {
    attached: Arc<Mutex<Vec<(PortInfo, DemoPacemaker)>>>,
}

impl DemoBus {
    /// An empty bus
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(PortInfo, DemoPacemaker)>> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a pacemaker with the given serial number on `port`
    pub fn plug(&self, serial_number: &str, port: &str) -> DemoPacemaker {
        self.plug_with_id(serial_number, port, PACEMAKER_VID, PACEMAKER_PID)
    }

    /// Attach a device with an arbitrary USB identity
    pub fn plug_with_id(&self, serial_number: &str, port: &str, vid: u16, pid: u16) -> DemoPacemaker {
        let device = DemoPacemaker::new();
        self.plug_device(serial_number, port, vid, pid, device.clone());
        device
    }

    /// Attach an existing simulated device, e.g. one that was unplugged before
    pub fn plug_device(&self, serial_number: &str, port: &str, vid: u16, pid: u16, device: DemoPacemaker) {
        device.reconnect();
        let info = PortInfo {
            name: port.to_string(),
            vid: Some(vid),
            pid: Some(pid),
            product: Some("J-Link".to_string()),
            serial_number: Some(serial_number.to_string()),
        };
        let mut attached = self.lock();
        attached.retain(|(p, _)| p.name != port);
        attached.push((info, device));
    }

    /// Detach whatever is plugged into `port`
    pub fn unplug(&self, port: &str) -> Option<DemoPacemaker> {
        let mut attached = self.lock();
        let idx = attached.iter().position(|(p, _)| p.name == port)?;
        let (_, device) = attached.remove(idx);
        device.disconnect();
        Some(device)
    }
}

impl DeviceEnumerator for DemoBus {
    fn scan(&self) -> Vec<PortInfo> {
        self.lock().iter().map(|(p, _)| p.clone()).collect()
    }
}

impl PortOpener for DemoBus {
    fn open(&self, path: &str) -> Result<Box<dyn SerialLink>, ProtocolError> {
        self.lock()
            .iter()
            .find(|(p, _)| p.name == path)
            .map(|(_, d)| Box::new(d.clone()) as Box<dyn SerialLink>)
            .ok_or_else(|| ProtocolError::SerialError(format!("No such port: {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_ecg, decode_frame, encode_ecg_request};

    fn read_all(dev: &mut DemoPacemaker) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        while let Ok(n) = dev.read(&mut buf) {
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_ecg_request_is_answered() {
        let mut dev = DemoPacemaker::new();
        dev.write_all(&encode_ecg_request()).unwrap();

        let raw = read_all(&mut dev);
        let frame = decode_frame(&raw).unwrap();
        assert_eq!(frame.control, 0);
        let sample = decode_ecg(&frame.payload).unwrap();
        assert!(sample.atrial.iter().all(|v| v.is_finite()));
        assert_eq!(dev.ecg_requests(), 1);
    }

    #[test]
    fn test_chunked_delivery() {
        let mut dev = DemoPacemaker::new().with_chunk_size(7);
        dev.write_all(&encode_ecg_request()).unwrap();

        let mut buf = [0u8; 256];
        assert_eq!(dev.read(&mut buf).unwrap(), 7);
        assert_eq!(read_all(&mut dev).len(), FRAME_SIZE - 7);
    }

    #[test]
    fn test_split_write_is_reassembled() {
        let mut dev = DemoPacemaker::new();
        let req = encode_ecg_request();
        dev.write_all(&req[..5]).unwrap();
        assert_eq!(dev.ecg_requests(), 0);
        dev.write_all(&req[5..]).unwrap();
        assert_eq!(dev.ecg_requests(), 1);
    }

    #[test]
    fn test_unplugged_device_errors() {
        let bus = DemoBus::new();
        let dev = bus.plug("SN1", "/dev/ttyACM0");
        assert_eq!(bus.scan().len(), 1);
        assert!(bus.open("/dev/ttyACM0").is_ok());

        bus.unplug("/dev/ttyACM0");
        assert!(bus.scan().is_empty());
        assert!(bus.open("/dev/ttyACM0").is_err());

        let mut handle = dev.clone();
        assert!(handle.write(&[0]).is_err());
    }

    #[test]
    fn test_pipelined_requests_are_counted() {
        let mut dev = DemoPacemaker::new();
        dev.write_all(&encode_ecg_request()).unwrap();
        read_all(&mut dev);
        dev.write_all(&encode_ecg_request()).unwrap();
        assert_eq!(dev.max_pending_replies(), 1);

        // Second request before the first reply was read
        dev.write_all(&encode_ecg_request()).unwrap();
        assert_eq!(dev.max_pending_replies(), 2);
    }

    #[test]
    fn test_generator_follows_lower_rate_limit() {
        let mut gen = EcgGenerator::new();
        gen.program(&ParameterSet::new().with(Parameter::LowerRateLimit, 120u8));
        assert_eq!(gen.beat_interval_ms, 500.0);
    }
}
