//! Core functionality of the GATT central
//! This module contains the engine that drives a Bluetooth LE adapter

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{CentralDelegate, CentralEvent, CentralManager, GattError, Registry};
