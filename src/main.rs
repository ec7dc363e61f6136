//! Command-line GATT explorer
//! Scans for a device whose name contains the given text, connects to it,
//! waits for its GATT tree to resolve, prints the tree as JSON and
//! disconnects.

use std::env;
use std::time::Duration;

use anyhow::Result;
use gatt_central::core::bluetooth::BluestBackend;
use gatt_central::logging::{setup_logging, LoggingDelegate};
use gatt_central::{CentralManager, CentralUpdate, GattError, Registry, ScanConfig};
use log::{info, warn};
use tokio::sync::mpsc::unbounded_channel;

/// How long to look for the device.
const SCAN_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a connection, including discovery, may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = setup_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("gatt-central");
    let Some(target) = args.get(1).map(|name| name.to_lowercase()) else {
        eprintln!("Usage: {} <DEVICE_NAME> [CONFIG_PATH]", program);
        std::process::exit(1);
    };
    let config = match args.get(2) {
        Some(path) => ScanConfig::load_config(path).await?,
        None => ScanConfig::default(),
    };

    let (event_tx, mut events) = unbounded_channel();
    let (update_tx, mut updates) = unbounded_channel();
    let backend = BluestBackend::new(event_tx).await?;
    let mut manager = CentralManager::new(backend, Registry::default(), config)
        .with_delegate(LoggingDelegate::wrapping(update_tx));

    info!("Scanning for a device named like {:?}...", target);
    manager.start_scanning()?;

    let deadline = tokio::time::sleep(SCAN_TIMEOUT);
    tokio::pin!(deadline);
    let mut connecting: Option<String> = None;

    loop {
        tokio::select! {
            Some(event) = events.recv() => manager.handle_event(event),
            Some(update) = updates.recv() => match update {
                CentralUpdate::Updated if connecting.is_none() => {
                    let found = manager
                        .devices()
                        .iter()
                        .find(|device| device.name().is_some_and(|name| name.to_lowercase().contains(&target)))
                        .map(|device| device.identifier().to_string());
                    if let Some(identifier) = found {
                        info!("Found {}, connecting...", identifier);
                        manager.stop_scanning();
                        manager.connect(&identifier)?;
                        deadline.as_mut().reset(tokio::time::Instant::now() + CONNECT_TIMEOUT);
                        connecting = Some(identifier);
                    }
                }
                CentralUpdate::PeripheralConnected(identifier) => {
                    if let Some(snapshot) = manager.snapshot(&identifier) {
                        println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    }
                    manager.disconnect(&identifier)?;
                }
                CentralUpdate::PeripheralWillDisconnect(identifier) => {
                    info!("Done with {}", identifier);
                    break;
                }
                CentralUpdate::Error { error: GattError::UnexpectedDisconnection(_), .. } => break,
                _ => {}
            },
            _ = &mut deadline => {
                match connecting.take() {
                    Some(identifier) => {
                        manager.report_connection_timeout(&identifier)?;
                    }
                    None => warn!("No device matching {:?} found", target),
                }
                break;
            }
        }
    }

    manager.stop_scanning();
    Ok(())
}
