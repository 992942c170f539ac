//! Headless DCM monitor
//!
//! Runs the pacemaker communication core without a user interface and prints
//! every event it produces as one JSON line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use pacemaker_core::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Port name the simulated pacemaker is attached to in demo mode
const DEMO_PORT: &str = "/dev/ttyDEMO0";
const DEMO_SERIAL: &str = "000000123456";

#[derive(Parser, Debug)]
#[command(author, version, about = "Monitor a pacemaker from the command line")]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Parameter set (JSON) to send once a pacemaker is registered
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Register a connected pacemaker that is not the remembered one
    #[arg(short, long)]
    register: bool,

    /// Talk to a simulated pacemaker instead of the serial ports
    #[arg(long)]
    demo: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_params(path: &Path) -> Result<ParameterSet> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
    let params: ParameterSet = serde_json::from_str(&text)
        .with_context(|| format!("Invalid parameter file {}", path.display()))?;
    // Reject incomplete sets before any device is involved
    params
        .to_block()
        .with_context(|| format!("Incomplete parameter set in {}", path.display()))?;
    Ok(params)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => DcmConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DcmConfig::default(),
    };
    let mut pending_params = args.params.as_deref().map(load_params).transpose()?;

    let (tx, mut rx) = event_channel();
    let manager = if args.demo {
        let bus = DemoBus::new();
        bus.plug(DEMO_SERIAL, DEMO_PORT);
        info!("Demo mode: simulated pacemaker {} on {}", DEMO_SERIAL, DEMO_PORT);
        DeviceSessionManager::new(config, Box::new(bus.clone()), Box::new(bus), tx)
    } else {
        DeviceSessionManager::with_system_ports(config, tx)
    };
    manager.start().context("Failed to start the DCM threads")?;
    info!("DCM monitor {} running (Ctrl+C to stop)", pacemaker_core::VERSION);

    let mut trace = EcgTrace::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);

                if let DcmEvent::ConnectionStateChanged { state, .. } = &event {
                    match state {
                        ConnectionState::Connected if args.register => {
                            manager.register_active_device();
                        }
                        ConnectionState::Registered => {
                            if let Some(params) = pending_params.take() {
                                manager
                                    .send_parameters_to_device(&params)
                                    .context("Failed to queue parameters")?;
                            }
                        }
                        _ => {}
                    }
                }

                if trace.observe(&event) && matches!(event, DcmEvent::EcgData(_)) {
                    debug!(
                        "ECG batch {}: atrial {:?}, ventricular {:?}",
                        trace.batches(),
                        trace.latest(Chamber::Atrial),
                        trace.latest(Chamber::Ventricular)
                    );
                }

                if let DcmEvent::ParameterVerification { success: false, message } = &event {
                    warn!("{}", message);
                }
            }
            signal = &mut ctrl_c => {
                signal.context("Failed to listen for Ctrl+C")?;
                info!("Stopping");
                break;
            }
        }
    }

    manager.stop();
    Ok(())
}
