//! Serial port handling
//!
//! Port enumeration, pacemaker identification and low-level port setup.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::time::Duration;
use tracing::debug;

use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
            serial_number,
        }
    }
}

/// An attached USB serial device, as seen by one discovery scan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    /// USB serial number, the identity of the pacemaker
    pub serial_number: String,

    /// USB vendor ID
    pub vendor_id: u16,

    /// USB product ID
    pub product_id: u16,

    /// Port the device enumerated on (e.g., "/dev/ttyACM0" or "COM3")
    pub port_path: String,
}

impl DeviceDescriptor {
    /// Descriptor for a USB port; non-USB ports have no identity
    pub fn from_port(port: &PortInfo) -> Option<Self> {
        Some(Self {
            serial_number: port.serial_number.clone().unwrap_or_default(),
            vendor_id: port.vid?,
            product_id: port.pid?,
            port_path: port.name.clone(),
        })
    }

    /// Whether the device has the given USB identity
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vendor_id == vid && self.product_id == pid
    }

    /// Same physical device, regardless of the port it enumerated on
    pub fn same_device(&self, other: &DeviceDescriptor) -> bool {
        self.serial_number == other.serial_number
    }
}

/// Keep only the devices with the given USB identity, preserving order
pub fn eligible_devices(ports: &[PortInfo], vid: u16, pid: u16) -> Vec<DeviceDescriptor> {
    ports
        .iter()
        .filter_map(DeviceDescriptor::from_port)
        .filter(|d| d.matches(vid, pid))
        .collect()
}

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports in deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            debug!("serial port enumeration failed: {}", e);
            Vec::new()
        }
    };
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports.dedup_by(|a, b| a.name == b.name);
    ports
}

/// Open a serial port for pacemaker communication (8N1, no flow control)
pub fn open_port(
    name: &str,
    baud_rate: Option<u32>,
    read_timeout: Option<Duration>,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    let timeout = read_timeout.unwrap_or(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS));

    let mut port = serialport::new(name, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()?;

    // The J-Link CDC bridge only forwards data once DTR is asserted
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!("failed to set DTR high on {}: {} (continuing)", name, e);
    }

    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(name: &str, vid: u16, pid: u16, serial: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: Some(vid),
            pid: Some(pid),
            product: None,
            serial_number: Some(serial.to_string()),
        }
    }

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let mut names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyACM10",
        ];
        names.sort_by_key(|n| port_sort_key(n));

        assert_eq!(
            names,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_eligible_devices() {
        let ports = vec![
            usb("/dev/ttyACM0", 0x1366, 0x1015, "000621000000"),
            usb("/dev/ttyACM1", 0x2341, 0x0043, "arduino"),
            PortInfo {
                name: "/dev/ttyS0".to_string(),
                vid: None,
                pid: None,
                product: None,
                serial_number: None,
            },
            usb("/dev/ttyACM2", 0x1366, 0x1015, "000621000001"),
        ];

        let found = eligible_devices(&ports, 0x1366, 0x1015);
        let serials: Vec<&str> = found.iter().map(|d| d.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["000621000000", "000621000001"]);
        assert_eq!(found[1].port_path, "/dev/ttyACM2");
    }

    #[test]
    fn test_same_device_ignores_port() {
        let a = DeviceDescriptor::from_port(&usb("/dev/ttyACM0", 1, 2, "X")).unwrap();
        let b = DeviceDescriptor::from_port(&usb("/dev/ttyACM3", 1, 2, "X")).unwrap();
        assert!(a.same_device(&b));
        assert_ne!(a, b);
    }
}
