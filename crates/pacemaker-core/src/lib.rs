//! # Pacemaker Core Library
//!
//! Communication core of the DCM (device controller/monitor), the programmer
//! application a pacemaker is connected to.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Hot-plug discovery of pacemakers on USB serial ports
//! - A session state machine (not connected / connected / registered)
//! - The fixed-size binary frame protocol (ECG data, parameter blocks)
//! - Parameter write verification against the device's echo
//! - A simulated pacemaker for demo mode and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use pacemaker_core::prelude::*;
//!
//! let (tx, mut rx) = event_channel();
//! let manager = DeviceSessionManager::with_system_ports(DcmConfig::default(), tx);
//! manager.start()?;
//!
//! while let Some(event) = rx.blocking_recv() {
//!     if let DcmEvent::EcgData(sample) = event {
//!         println!("atrial: {:?}", sample.atrial);
//!     }
//! }
//! ```

pub mod config;
pub mod demo;
pub mod ecg;
pub mod events;
pub mod protocol;
pub mod session;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, DcmConfig, SessionConfig, TransportConfig};
    pub use crate::demo::{DemoBus, DemoPacemaker};
    pub use crate::ecg::{Chamber, EcgTrace};
    pub use crate::events::{event_channel, DcmEvent, EventReceiver, EventSender};
    pub use crate::protocol::{
        DeviceDescriptor, EcgSample, Parameter, ParameterSet, ParameterValue, ProtocolError,
    };
    pub use crate::session::{
        ConnectionState, DeviceEnumerator, DeviceSessionManager, RegistrationOutcome,
    };
    pub use crate::transport::SerialTransport;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
