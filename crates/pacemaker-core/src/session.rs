//! Device session management
//!
//! Polls the attached serial devices, keeps track of which pacemaker is the
//! current one and binds the [`SerialTransport`] to it.
//!
//! The state machine only ever services one device. The first pacemaker seen
//! is registered automatically and remembered, so replugging it registers it
//! again without user action; any other pacemaker stays CONNECTED until the
//! user asks to register it. State change requests made by the user interface
//! are applied at the start of the next scan, never mid-scan.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{DcmConfig, SessionConfig};
use crate::events::{emit, DcmEvent, EventSender};
use crate::protocol::{
    eligible_devices, list_ports, DeviceDescriptor, ParameterSet, PortInfo, PortOpener,
    ProtocolError, SystemPortOpener,
};
use crate::transport::SerialTransport;

/// Connection state of the current pacemaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No pacemaker bound
    NotConnected,
    /// A pacemaker is attached but is not the active session
    Connected,
    /// The pacemaker is the active session and is being polled
    Registered,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::NotConnected => "NOT_CONNECTED",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Registered => "REGISTERED",
        };
        f.write_str(s)
    }
}

/// Source of attached serial ports
pub trait DeviceEnumerator: Send + Sync {
    /// Ports attached right now
    fn scan(&self) -> Vec<PortInfo>;
}

/// Enumerates the ports of this machine
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnumerator;

impl DeviceEnumerator for SystemEnumerator {
    fn scan(&self) -> Vec<PortInfo> {
        list_ports()
    }
}

/// Result of a registration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The connected pacemaker will be registered on the next scan
    Requested,
    /// The pacemaker is already the active session
    AlreadyRegistered,
    /// Several pacemakers are attached and none is current
    ReplugRequired,
    /// No pacemaker is attached
    NoDevice,
}

impl RegistrationOutcome {
    /// Notice to show the user, if any
    pub fn notice(self) -> Option<&'static str> {
        match self {
            RegistrationOutcome::Requested => None,
            RegistrationOutcome::AlreadyRegistered => Some("Already registered this pacemaker!"),
            RegistrationOutcome::ReplugRequired => {
                Some("Please unplug and replug the pacemaker you want to connect to!")
            }
            RegistrationOutcome::NoDevice => Some("Please plug in a pacemaker!"),
        }
    }
}

/// Side effect requested by one state machine tick
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Point the transport at this port
    BindPort(String),
    /// Release the transport's port
    UnbindPort,
    /// Send an event to the user interface
    Emit(DcmEvent),
}

/// Discovery state machine, advanced once per scan
#[derive(Debug, Clone)]
pub struct SessionMachine {
    current: ConnectionState,
    previous: ConnectionState,
    desired: ConnectionState,
    active_device: Option<DeviceDescriptor>,
    first_serial_number: Option<String>,
    old_devices: Vec<DeviceDescriptor>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    /// A machine with no device seen yet
    pub fn new() -> Self {
        Self {
            current: ConnectionState::NotConnected,
            previous: ConnectionState::NotConnected,
            desired: ConnectionState::NotConnected,
            active_device: None,
            first_serial_number: None,
            old_devices: Vec::new(),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.current
    }

    /// Pacemaker the session is about, if any
    pub fn active_device(&self) -> Option<&DeviceDescriptor> {
        self.active_device.as_ref()
    }

    /// Serial number of the first pacemaker ever registered
    pub fn remembered_serial_number(&self) -> Option<&str> {
        self.first_serial_number.as_deref()
    }

    /// Advance the machine with the eligible devices found by one scan
    pub fn tick(&mut self, devices: Vec<DeviceDescriptor>) -> Vec<SessionAction> {
        let added: Vec<DeviceDescriptor> = devices
            .iter()
            .filter(|d| !self.old_devices.contains(d))
            .cloned()
            .collect();
        let removed: Vec<DeviceDescriptor> = self
            .old_devices
            .iter()
            .filter(|d| !devices.contains(d))
            .cloned()
            .collect();

        if self.current != self.desired {
            info!("Connection state {} -> {}", self.current, self.desired);
            self.current = self.desired;
        }

        let mut actions = Vec::new();

        match self.current {
            ConnectionState::NotConnected => {
                if let Some(device) = added.first() {
                    self.desired = match self.first_serial_number.as_deref() {
                        None => {
                            self.first_serial_number = Some(device.serial_number.clone());
                            ConnectionState::Registered
                        }
                        Some(first) if first == device.serial_number => {
                            ConnectionState::Registered
                        }
                        Some(_) => ConnectionState::Connected,
                    };
                    debug!(
                        "Pacemaker {} appeared on {}",
                        device.serial_number, device.port_path
                    );
                    self.active_device = Some(device.clone());
                }
            }
            ConnectionState::Connected => {
                if self.previous == ConnectionState::NotConnected {
                    if let Some(device) = &self.active_device {
                        actions.push(SessionAction::Emit(DcmEvent::ConnectionStateChanged {
                            state: ConnectionState::Connected,
                            info: format!(
                                "{}, press New Patient to register",
                                device.serial_number
                            ),
                        }));
                    }
                }
                self.handle_removed(&removed, &mut actions);
            }
            ConnectionState::Registered => {
                if self.previous != ConnectionState::Registered {
                    if let Some(device) = &self.active_device {
                        actions.push(SessionAction::BindPort(device.port_path.clone()));
                        actions.push(SessionAction::Emit(DcmEvent::ConnectionStateChanged {
                            state: ConnectionState::Registered,
                            info: device.serial_number.clone(),
                        }));
                    }
                }
                self.handle_removed(&removed, &mut actions);
            }
        }

        self.old_devices = devices;
        self.previous = self.current;
        actions
    }

    /// Drop the session if the current pacemaker was unplugged
    fn handle_removed(&mut self, removed: &[DeviceDescriptor], actions: &mut Vec<SessionAction>) {
        let Some(active) = &self.active_device else {
            return;
        };
        let Some(gone) = removed.iter().find(|d| d.same_device(active)) else {
            return;
        };

        info!("Pacemaker {} was unplugged", gone.serial_number);
        self.desired = ConnectionState::NotConnected;
        actions.push(SessionAction::Emit(DcmEvent::ConnectionStateChanged {
            state: ConnectionState::NotConnected,
            info: gone.serial_number.clone(),
        }));
        actions.push(SessionAction::UnbindPort);
        self.active_device = None;
    }

    /// Ask for the connected pacemaker to become the registered one
    pub fn request_registration(&mut self) -> RegistrationOutcome {
        if self.current == ConnectionState::Connected {
            self.desired = ConnectionState::Registered;
            RegistrationOutcome::Requested
        } else if self.active_device.is_some() {
            RegistrationOutcome::AlreadyRegistered
        } else if !self.old_devices.is_empty() {
            RegistrationOutcome::ReplugRequired
        } else {
            RegistrationOutcome::NoDevice
        }
    }
}

struct ManagerShared {
    machine: Mutex<SessionMachine>,
    transport: SerialTransport,
    enumerator: Box<dyn DeviceEnumerator>,
    events: EventSender,
    config: SessionConfig,
    running: AtomicBool,
}

/// Supervises pacemaker discovery and owns the serial transport
pub struct DeviceSessionManager {
    shared: Arc<ManagerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSessionManager {
    /// Create a manager and the transport it owns; nothing runs until
    /// [`DeviceSessionManager::start`]
    pub fn new(
        config: DcmConfig,
        enumerator: Box<dyn DeviceEnumerator>,
        opener: Box<dyn PortOpener>,
        events: EventSender,
    ) -> Self {
        let transport = SerialTransport::new(config.transport, opener, events.clone());
        Self {
            shared: Arc::new(ManagerShared {
                machine: Mutex::new(SessionMachine::new()),
                transport,
                enumerator,
                events,
                config: config.session,
                running: AtomicBool::new(false),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Manager for the serial ports of this machine
    pub fn with_system_ports(config: DcmConfig, events: EventSender) -> Self {
        let opener = SystemPortOpener {
            baud_rate: config.transport.baud_rate,
            read_timeout: config.transport.read_timeout(),
        };
        Self::new(config, Box::new(SystemEnumerator), Box::new(opener), events)
    }

    /// Start the transport and the discovery thread
    pub fn start(&self) -> std::io::Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.shared.transport.start() {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("dcm-discovery".to_string())
            .spawn(move || shared.run())
        {
            Ok(h) => {
                *handle = Some(h);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.transport.stop();
                Err(e)
            }
        }
    }

    /// Register the connected pacemaker, or tell the user why not
    pub fn register_active_device(&self) -> RegistrationOutcome {
        let outcome = self.shared.machine().request_registration();
        if let Some(notice) = outcome.notice() {
            info!("{}", notice);
            emit(
                &self.shared.events,
                DcmEvent::Notice {
                    message: notice.to_string(),
                },
            );
        }
        outcome
    }

    /// Queue a parameter set for the pacemaker
    ///
    /// Forwarded whatever the connection state; the verification event reports
    /// whether the device accepted it.
    pub fn send_parameters_to_device(&self, params: &ParameterSet) -> Result<(), ProtocolError> {
        self.shared.transport.enqueue_parameter_write(params)
    }

    /// Stop discovery and the transport, releasing the serial port
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Discovery thread panicked");
            }
        }

        self.shared.transport.stop();
    }

    /// Snapshot of the connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.machine().state()
    }

    /// Snapshot of the current pacemaker
    pub fn active_device(&self) -> Option<DeviceDescriptor> {
        self.shared.machine().active_device().cloned()
    }

    /// The owned transport
    pub fn transport(&self) -> &SerialTransport {
        &self.shared.transport
    }
}

impl Drop for DeviceSessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ManagerShared {
    fn machine(&self) -> MutexGuard<'_, SessionMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self) {
        debug!("Discovery loop started");
        emit(
            &self.events,
            DcmEvent::ConnectionStateChanged {
                state: ConnectionState::NotConnected,
                info: String::new(),
            },
        );

        while self.running.load(Ordering::SeqCst) {
            let ports = self.enumerator.scan();
            let devices = eligible_devices(&ports, self.config.vendor_id, self.config.product_id);
            let actions = self.machine().tick(devices);

            for action in actions {
                match action {
                    SessionAction::BindPort(path) => self.transport.bind_port(&path),
                    SessionAction::UnbindPort => self.transport.unbind_port(),
                    SessionAction::Emit(event) => emit(&self.events, event),
                }
            }

            thread::sleep(self.config.scan_interval());
        }

        debug!("Discovery loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn device(serial: &str, port: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            serial_number: serial.to_string(),
            vendor_id: 0x1366,
            product_id: 0x1015,
            port_path: port.to_string(),
        }
    }

    fn state_event(state: ConnectionState, info: &str) -> SessionAction {
        SessionAction::Emit(DcmEvent::ConnectionStateChanged {
            state,
            info: info.to_string(),
        })
    }

    #[test]
    fn test_first_device_registers_and_is_remembered() {
        let mut m = SessionMachine::new();
        let d = device("D1", "/dev/ttyACM0");

        assert!(m.tick(vec![d.clone()]).is_empty());
        assert_eq!(m.state(), ConnectionState::NotConnected);
        assert_eq!(m.remembered_serial_number(), Some("D1"));

        let actions = m.tick(vec![d.clone()]);
        assert_eq!(m.state(), ConnectionState::Registered);
        assert_eq!(
            actions,
            vec![
                SessionAction::BindPort("/dev/ttyACM0".to_string()),
                state_event(ConnectionState::Registered, "D1"),
            ]
        );

        // Steady state emits nothing
        assert!(m.tick(vec![d]).is_empty());
    }

    #[test]
    fn test_second_device_is_ignored_while_registered() {
        let mut m = SessionMachine::new();
        let d1 = device("D1", "/dev/ttyACM0");
        let d2 = device("D2", "/dev/ttyACM1");

        m.tick(vec![d1.clone()]);
        m.tick(vec![d1.clone()]);
        assert!(m.tick(vec![d1.clone(), d2.clone()]).is_empty());
        assert!(m.tick(vec![d1.clone(), d2]).is_empty());

        assert_eq!(m.state(), ConnectionState::Registered);
        assert_eq!(m.active_device(), Some(&d1));
    }

    #[test]
    fn test_unplug_unbinds() {
        let mut m = SessionMachine::new();
        let d = device("D1", "/dev/ttyACM0");
        m.tick(vec![d.clone()]);
        m.tick(vec![d]);

        let actions = m.tick(vec![]);
        assert_eq!(
            actions,
            vec![
                state_event(ConnectionState::NotConnected, "D1"),
                SessionAction::UnbindPort,
            ]
        );
        assert!(m.active_device().is_none());

        m.tick(vec![]);
        assert_eq!(m.state(), ConnectionState::NotConnected);
    }

    #[test]
    fn test_remembered_device_replug_registers_directly() {
        let mut m = SessionMachine::new();
        let d = device("D1", "/dev/ttyACM0");
        m.tick(vec![d.clone()]);
        m.tick(vec![d.clone()]);
        m.tick(vec![]);
        m.tick(vec![]);

        // Replugged on a different port
        let replugged = device("D1", "/dev/ttyACM3");
        assert!(m.tick(vec![replugged.clone()]).is_empty());
        let actions = m.tick(vec![replugged]);
        assert_eq!(m.state(), ConnectionState::Registered);
        assert_eq!(actions[0], SessionAction::BindPort("/dev/ttyACM3".to_string()));
    }

    #[test]
    fn test_other_device_needs_registration() {
        let mut m = SessionMachine::new();
        let d1 = device("D1", "/dev/ttyACM0");
        let d2 = device("D2", "/dev/ttyACM1");
        m.tick(vec![d1.clone()]);
        m.tick(vec![d1]);
        m.tick(vec![]);
        m.tick(vec![]);

        m.tick(vec![d2.clone()]);
        let actions = m.tick(vec![d2.clone()]);
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(
            actions,
            vec![state_event(
                ConnectionState::Connected,
                "D2, press New Patient to register"
            )]
        );
        assert_eq!(m.request_registration(), RegistrationOutcome::Requested);

        // Applied on the next tick, not immediately
        assert_eq!(m.state(), ConnectionState::Connected);
        let actions = m.tick(vec![d2]);
        assert_eq!(m.state(), ConnectionState::Registered);
        assert_eq!(actions[0], SessionAction::BindPort("/dev/ttyACM1".to_string()));
    }

    #[test]
    fn test_connected_device_unplugged() {
        let mut m = SessionMachine::new();
        let d1 = device("D1", "/dev/ttyACM0");
        let d2 = device("D2", "/dev/ttyACM1");
        m.tick(vec![d1.clone()]);
        m.tick(vec![d1]);
        m.tick(vec![]);
        m.tick(vec![d2.clone()]);
        m.tick(vec![d2]);
        assert_eq!(m.state(), ConnectionState::Connected);

        let actions = m.tick(vec![]);
        assert_eq!(
            actions,
            vec![
                state_event(ConnectionState::NotConnected, "D2"),
                SessionAction::UnbindPort,
            ]
        );
    }

    #[test]
    fn test_registration_notices() {
        let mut m = SessionMachine::new();
        assert_eq!(m.request_registration(), RegistrationOutcome::NoDevice);

        let d = device("D1", "/dev/ttyACM0");
        m.tick(vec![d.clone()]);
        m.tick(vec![d.clone()]);
        assert_eq!(m.request_registration(), RegistrationOutcome::AlreadyRegistered);

        // Unplug the registered device while another stays attached
        let other = device("D2", "/dev/ttyACM1");
        m.tick(vec![d, other.clone()]);
        m.tick(vec![other]);
        assert_eq!(m.request_registration(), RegistrationOutcome::ReplugRequired);
        assert_eq!(
            RegistrationOutcome::ReplugRequired.notice(),
            Some("Please unplug and replug the pacemaker you want to connect to!")
        );
    }
}
