//! Helpers shared by the transport and session tests

#![allow(dead_code)]

use std::time::Duration;

use pacemaker_core::config::{DcmConfig, SessionConfig, TransportConfig};
use pacemaker_core::events::{DcmEvent, EventReceiver};
use pacemaker_core::protocol::{Parameter, ParameterSet};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Loop timings short enough for tests
pub fn fast_config() -> DcmConfig {
    DcmConfig {
        transport: TransportConfig {
            idle_interval_ms: 5,
            open_retry_ms: 5,
            error_backoff_ms: 5,
            ..TransportConfig::default()
        },
        session: SessionConfig {
            scan_interval_ms: 5,
            ..SessionConfig::default()
        },
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pacemaker_core=debug")
        .with_test_writer()
        .try_init();
}

/// Wait for the first event matching `pred`, skipping the others
pub async fn wait_for<F>(rx: &mut EventReceiver, mut pred: F) -> DcmEvent
where
    F: FnMut(&DcmEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `cond` until it holds or the timeout expires
pub async fn eventually<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}

pub fn nominal_params() -> ParameterSet {
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
