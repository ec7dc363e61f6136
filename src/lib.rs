//! GATT central library
//! Discovers Bluetooth Low Energy peripherals and keeps a cached, fully
//! resolved tree of their services, characteristics and descriptors.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;

pub use config::{ScanConfig, ScanCriteria};
pub use core::bluetooth::{
    AttributeHandle, CentralBackend, CentralDelegate, CentralEvent, CentralManager, CentralUpdate,
    GattError, Registry,
};
