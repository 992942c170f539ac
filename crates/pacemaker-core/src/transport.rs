//! Serial transport
//!
//! Runs the request/response loop against the bound pacemaker on a dedicated
//! thread. Every iteration writes one outbound frame (a pending parameter block,
//! otherwise an ECG request) and then reads exactly one inbound frame.
//!
//! All state the loop shares with the control operations lives behind a single
//! mutex that is held for one read-or-mutate at a time. Writes happen under the
//! lock; reads go through a cloned handle outside it, so binding, unbinding and
//! stopping never wait on a slow device. A session counter bumped by every
//! rebind lets the reader notice that the port it was reading from is gone.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::events::{emit, DcmEvent, EventSender};
use crate::protocol::{
    decode_ecg, decode_frame, encode_ecg_request, encode_parameter_write, parameters_equal,
    ControlByte, FrameAssembler, ParameterSet, PortOpener, ProtocolError, SerialLink, FRAME_SIZE,
};

/// Message reported when the device echoed the parameters back unchanged
pub const PARAMS_VERIFIED_MESSAGE: &str = "Successfully sent parameters!";

struct TransportState {
    /// Target port path
    port: Option<String>,
    /// Open connection used for writes
    link: Option<Box<dyn SerialLink>>,
    /// Bumped whenever the binding changes or the link is closed
    session: u64,
    pending_write: bool,
    /// Last parameter block handed to the device
    sent_data: Vec<u8>,
    assembler: FrameAssembler,
    running: bool,
}

impl TransportState {
    fn close(&mut self) {
        if self.link.take().is_some() {
            info!("Closed serial port {}", self.port.as_deref().unwrap_or("<unbound>"));
        }
        self.session = self.session.wrapping_add(1);
    }
}

struct Shared {
    state: Mutex<TransportState>,
    opener: Box<dyn PortOpener>,
    events: EventSender,
    config: TransportConfig,
}

/// Outcome of one loop iteration
enum Step {
    Stopped,
    Unbound,
    OpenFailed,
    Opened,
    Exchanged,
}

/// Read handle owned by the loop, tagged with the session it was opened for
struct Reader {
    session: u64,
    link: Box<dyn SerialLink>,
}

/// Owns the serial connection to the pacemaker and the polling thread
pub struct SerialTransport {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    /// Create a transport; the polling thread starts with [`SerialTransport::start`]
    pub fn new(config: TransportConfig, opener: Box<dyn PortOpener>, events: EventSender) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TransportState {
                    port: None,
                    link: None,
                    session: 0,
                    pending_write: false,
                    sent_data: Vec::new(),
                    assembler: FrameAssembler::new(FRAME_SIZE),
                    running: false,
                }),
                opener,
                events,
                config,
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the polling thread. Calling it on a running transport is a no-op.
    pub fn start(&self) -> io::Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.shared.lock();
            if state.running {
                return Ok(());
            }
            state.running = true;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("dcm-serial".to_string())
            .spawn(move || shared.run());

        match spawned {
            Ok(h) => {
                *handle = Some(h);
                Ok(())
            }
            Err(e) => {
                self.shared.lock().running = false;
                Err(e)
            }
        }
    }

    /// Point the transport at a port; stale framing from a previous device is dropped
    pub fn bind_port(&self, path: &str) {
        info!("Binding serial transport to {}", path);
        let mut state = self.shared.lock();
        state.close();
        state.port = Some(path.to_string());
        state.assembler.clear();
    }

    /// Close the connection if open and forget the target port
    pub fn unbind_port(&self) {
        let mut state = self.shared.lock();
        state.close();
        if let Some(port) = state.port.take() {
            info!("Unbound serial transport from {}", port);
        }
    }

    /// Queue a parameter block for the next write
    ///
    /// The block replaces any write still pending. Its verification arrives
    /// later as a [`DcmEvent::ParameterVerification`].
    pub fn enqueue_parameter_write(&self, params: &ParameterSet) -> Result<(), ProtocolError> {
        let data = encode_parameter_write(params)?;
        let mut state = self.shared.lock();
        state.sent_data = data;
        state.pending_write = true;
        debug!("Queued parameter block ({} bytes)", state.sent_data.len());
        Ok(())
    }

    /// Stop the polling thread and close the connection
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            state.running = false;
            state.close();
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Serial transport thread panicked");
            }
        }
    }

    /// Currently bound port path
    pub fn bound_port(&self) -> Option<String> {
        self.shared.lock().port.clone()
    }

    /// Whether a connection is currently open
    pub fn is_open(&self) -> bool {
        self.shared.lock().link.is_some()
    }

    /// Whether the polling thread is running
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self) {
        debug!("Serial transport loop started");
        let mut reader: Option<Reader> = None;

        loop {
            match self.step(&mut reader) {
                Ok(Step::Stopped) => break,
                Ok(Step::Unbound) => thread::sleep(self.config.idle_interval()),
                Ok(Step::OpenFailed) => thread::sleep(self.config.open_retry()),
                Ok(Step::Opened) | Ok(Step::Exchanged) => {}
                Err(ProtocolError::NotConnected) => {
                    debug!("Serial session ended while waiting for a frame");
                }
                Err(e) => {
                    warn!("Serial exchange failed: {}", e);
                    thread::sleep(self.config.error_backoff());
                }
            }
        }

        debug!("Serial transport loop stopped");
    }

    fn step(&self, reader: &mut Option<Reader>) -> Result<Step, ProtocolError> {
        let session = {
            let mut state = self.lock();
            if !state.running {
                return Ok(Step::Stopped);
            }

            let Some(port) = state.port.clone() else {
                *reader = None;
                return Ok(Step::Unbound);
            };

            if state.link.is_none() {
                *reader = None;
                return Ok(self.open(&mut state, &port, reader));
            }

            // Link and reader are always opened and dropped together
            debug_assert_eq!(reader.as_ref().map(|r| r.session), Some(state.session));

            let outbound = if state.pending_write {
                state.pending_write = false;
                state.sent_data.clone()
            } else {
                encode_ecg_request()
            };

            if let Some(link) = state.link.as_mut() {
                link.write_all(&outbound)?;
                link.flush()?;
            }
            state.session
        };

        let Some(reader) = reader.as_mut() else {
            return Err(ProtocolError::NotConnected);
        };
        let raw = self.read_frame(session, reader)?;
        self.dispatch(&raw)?;
        Ok(Step::Exchanged)
    }

    /// Open the bound port; failures are expected while the device enumerates
    fn open(&self, state: &mut TransportState, port: &str, reader: &mut Option<Reader>) -> Step {
        let link = match self.opener.open(port) {
            Ok(link) => link,
            Err(e) => {
                debug!("Could not open {}: {}", port, e);
                return Step::OpenFailed;
            }
        };

        let read_link = match link.try_clone() {
            Ok(read_link) => read_link,
            Err(e) => {
                debug!("Could not clone handle for {}: {}", port, e);
                return Step::OpenFailed;
            }
        };

        state.link = Some(link);
        *reader = Some(Reader {
            session: state.session,
            link: read_link,
        });
        info!("Opened serial port {}", port);
        Step::Opened
    }

    /// Block until one whole frame is buffered, or the session ends
    fn read_frame(&self, session: u64, reader: &mut Reader) -> Result<Vec<u8>, ProtocolError> {
        let mut chunk = [0u8; FRAME_SIZE];

        loop {
            {
                let mut state = self.lock();
                if !state.running || state.session != session {
                    return Err(ProtocolError::NotConnected);
                }
                if let Some(frame) = state.assembler.next_frame() {
                    return Ok(frame);
                }
            }

            let n = match reader.link.read(&mut chunk) {
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    0
                }
                Err(e) => return Err(e.into()),
            };

            if n > 0 {
                let mut state = self.lock();
                if state.session == session {
                    state.assembler.push(&chunk[..n]);
                }
            }
        }
    }

    fn dispatch(&self, raw: &[u8]) -> Result<(), ProtocolError> {
        let frame = decode_frame(raw)?;

        match frame.kind()? {
            ControlByte::Ecg => {
                let sample = decode_ecg(&frame.payload)?;
                emit(&self.events, DcmEvent::EcgData(sample));
            }
            ControlByte::ParameterEcho => {
                let verified = {
                    let state = self.lock();
                    parameters_equal(&state.sent_data, &frame.payload)
                };

                let message = if verified {
                    info!("{}", PARAMS_VERIFIED_MESSAGE);
                    PARAMS_VERIFIED_MESSAGE.to_string()
                } else {
                    let message = ProtocolError::ParameterMismatch.to_string();
                    warn!("{}", message);
                    message
                };

                emit(
                    &self.events,
                    DcmEvent::ParameterVerification {
                        success: verified,
                        message,
                    },
                );
            }
        }

        Ok(())
    }
}
