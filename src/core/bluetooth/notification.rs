//! Notifications the engine sends to the application
//! A single delegate receives every update, on the same serial context that
//! feeds events to the central manager.

use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::types::AttributeHandle;

/// Observer of the central manager. Every method is optional.
///
/// Notifications carry identifiers and handles rather than references into
/// the tree: the delegate is called while the manager is mid-update, and
/// re-pulls whatever state it needs afterwards.
pub trait CentralDelegate {
    /// Something in the device list or a GATT tree changed.
    fn updated(&mut self) {}

    fn powered_on(&mut self) {}

    /// A peripheral connected and its GATT tree fully resolved.
    fn peripheral_connected(&mut self, _peripheral: &str) {}

    fn peripheral_will_disconnect(&mut self, _peripheral: &str) {}

    /// Name or RSSI changed.
    fn peripheral_info_changed(&mut self, _peripheral: &str) {}

    fn peripheral_ready_for_write(&mut self, _peripheral: &str) {}

    /// A previously resolved service was rediscovered.
    fn service_changed(&mut self, _peripheral: &str, _service: AttributeHandle) {}

    fn characteristic_write_complete(&mut self, _peripheral: &str, _characteristic: AttributeHandle) {}

    fn characteristic_notification_state_changed(
        &mut self,
        _peripheral: &str,
        _characteristic: AttributeHandle,
        _notifying: bool,
    ) {
    }

    fn characteristic_value_changed(
        &mut self,
        _peripheral: &str,
        _characteristic: AttributeHandle,
        _value: &[u8],
    ) {
    }

    fn descriptor_value_changed(&mut self, _peripheral: &str, _descriptor: AttributeHandle, _value: &[u8]) {}

    fn descriptor_write_complete(&mut self, _peripheral: &str, _descriptor: AttributeHandle) {}

    /// Every error the engine reports. `source` is the peripheral involved,
    /// if any.
    fn handle_error(&mut self, _error: &GattError, _source: Option<&str>) {}
}

/// Owned form of a delegate notification, for channel delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralUpdate {
    Updated,
    PoweredOn,
    PeripheralConnected(String),
    PeripheralWillDisconnect(String),
    PeripheralInfoChanged(String),
    PeripheralReadyForWrite(String),
    ServiceChanged {
        peripheral: String,
        service: AttributeHandle,
    },
    CharacteristicWriteComplete {
        peripheral: String,
        characteristic: AttributeHandle,
    },
    CharacteristicNotificationStateChanged {
        peripheral: String,
        characteristic: AttributeHandle,
        notifying: bool,
    },
    CharacteristicValueChanged {
        peripheral: String,
        characteristic: AttributeHandle,
        value: Vec<u8>,
    },
    DescriptorValueChanged {
        peripheral: String,
        descriptor: AttributeHandle,
        value: Vec<u8>,
    },
    DescriptorWriteComplete {
        peripheral: String,
        descriptor: AttributeHandle,
    },
    Error {
        error: GattError,
        source: Option<String>,
    },
}

fn emit(sender: &UnboundedSender<CentralUpdate>, update: CentralUpdate) {
    if let Err(e) = sender.send(update) {
        debug!("Update receiver is gone, dropping {:?}", e.0);
    }
}

/// Forwards every notification into a channel for a single consumer.
impl CentralDelegate for UnboundedSender<CentralUpdate> {
    fn updated(&mut self) {
        emit(self, CentralUpdate::Updated);
    }

    fn powered_on(&mut self) {
        emit(self, CentralUpdate::PoweredOn);
    }

    fn peripheral_connected(&mut self, peripheral: &str) {
        emit(self, CentralUpdate::PeripheralConnected(peripheral.to_string()));
    }

    fn peripheral_will_disconnect(&mut self, peripheral: &str) {
        emit(self, CentralUpdate::PeripheralWillDisconnect(peripheral.to_string()));
    }

    fn peripheral_info_changed(&mut self, peripheral: &str) {
        emit(self, CentralUpdate::PeripheralInfoChanged(peripheral.to_string()));
    }

    fn peripheral_ready_for_write(&mut self, peripheral: &str) {
        emit(self, CentralUpdate::PeripheralReadyForWrite(peripheral.to_string()));
    }

    fn service_changed(&mut self, peripheral: &str, service: AttributeHandle) {
        emit(
            self,
            CentralUpdate::ServiceChanged {
                peripheral: peripheral.to_string(),
                service,
            },
        );
    }

    fn characteristic_write_complete(&mut self, peripheral: &str, characteristic: AttributeHandle) {
        emit(
            self,
            CentralUpdate::CharacteristicWriteComplete {
                peripheral: peripheral.to_string(),
                characteristic,
            },
        );
    }

    fn characteristic_notification_state_changed(
        &mut self,
        peripheral: &str,
        characteristic: AttributeHandle,
        notifying: bool,
    ) {
        emit(
            self,
            CentralUpdate::CharacteristicNotificationStateChanged {
                peripheral: peripheral.to_string(),
                characteristic,
                notifying,
            },
        );
    }

    fn characteristic_value_changed(
        &mut self,
        peripheral: &str,
        characteristic: AttributeHandle,
        value: &[u8],
    ) {
        emit(
            self,
            CentralUpdate::CharacteristicValueChanged {
                peripheral: peripheral.to_string(),
                characteristic,
                value: value.to_vec(),
            },
        );
    }

    fn descriptor_value_changed(&mut self, peripheral: &str, descriptor: AttributeHandle, value: &[u8]) {
        emit(
            self,
            CentralUpdate::DescriptorValueChanged {
                peripheral: peripheral.to_string(),
                descriptor,
                value: value.to_vec(),
            },
        );
    }

    fn descriptor_write_complete(&mut self, peripheral: &str, descriptor: AttributeHandle) {
        emit(
            self,
            CentralUpdate::DescriptorWriteComplete {
                peripheral: peripheral.to_string(),
                descriptor,
            },
        );
    }

    fn handle_error(&mut self, error: &GattError, source: Option<&str>) {
        emit(
            self,
            CentralUpdate::Error {
                error: error.clone(),
                source: source.map(str::to_string),
            },
        );
    }
}
