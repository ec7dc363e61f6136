use log::{debug, error, info, LevelFilter, SetLoggerError};

use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::notification::CentralDelegate;
use crate::core::bluetooth::types::AttributeHandle;
use crate::core::bluetooth::value::ValueView;

/// Initializes `env_logger` at `Info`, letting `RUST_LOG` override it.
pub fn setup_logging() -> Result<(), SetLoggerError> {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .try_init()?;
    info!("Logging initialized");
    Ok(())
}

/// A delegate that logs every notification, then hands it on to an inner
/// delegate if there is one.
#[derive(Default)]
pub struct LoggingDelegate {
    inner: Option<Box<dyn CentralDelegate>>,
}

impl LoggingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrapping(inner: impl CentralDelegate + 'static) -> Self {
        Self {
            inner: Some(Box::new(inner)),
        }
    }

    fn forward(&mut self, f: impl FnOnce(&mut dyn CentralDelegate)) {
        if let Some(inner) = self.inner.as_deref_mut() {
            f(inner);
        }
    }
}

impl CentralDelegate for LoggingDelegate {
    fn updated(&mut self) {
        debug!("Central state updated");
        self.forward(|d| d.updated());
    }

    fn powered_on(&mut self) {
        info!("Bluetooth adapter powered on");
        self.forward(|d| d.powered_on());
    }

    fn peripheral_connected(&mut self, peripheral: &str) {
        info!("Peripheral {} connected and resolved", peripheral);
        self.forward(|d| d.peripheral_connected(peripheral));
    }

    fn peripheral_will_disconnect(&mut self, peripheral: &str) {
        info!("Peripheral {} is disconnecting", peripheral);
        self.forward(|d| d.peripheral_will_disconnect(peripheral));
    }

    fn peripheral_info_changed(&mut self, peripheral: &str) {
        debug!("Peripheral {} info changed", peripheral);
        self.forward(|d| d.peripheral_info_changed(peripheral));
    }

    fn peripheral_ready_for_write(&mut self, peripheral: &str) {
        debug!("Peripheral {} is ready to write without response", peripheral);
        self.forward(|d| d.peripheral_ready_for_write(peripheral));
    }

    fn service_changed(&mut self, peripheral: &str, service: AttributeHandle) {
        info!("Service {} of {} changed", service, peripheral);
        self.forward(|d| d.service_changed(peripheral, service));
    }

    fn characteristic_write_complete(&mut self, peripheral: &str, characteristic: AttributeHandle) {
        debug!("Write to {} on {} complete", characteristic, peripheral);
        self.forward(|d| d.characteristic_write_complete(peripheral, characteristic));
    }

    fn characteristic_notification_state_changed(
        &mut self,
        peripheral: &str,
        characteristic: AttributeHandle,
        notifying: bool,
    ) {
        info!(
            "Notifications for {} on {} {}",
            characteristic,
            peripheral,
            if notifying { "enabled" } else { "disabled" }
        );
        self.forward(|d| d.characteristic_notification_state_changed(peripheral, characteristic, notifying));
    }

    fn characteristic_value_changed(&mut self, peripheral: &str, characteristic: AttributeHandle, value: &[u8]) {
        debug!("{} on {} = {}", characteristic, peripheral, value.hex_value().unwrap_or_default());
        self.forward(|d| d.characteristic_value_changed(peripheral, characteristic, value));
    }

    fn descriptor_value_changed(&mut self, peripheral: &str, descriptor: AttributeHandle, value: &[u8]) {
        debug!("{} on {} = {}", descriptor, peripheral, value.hex_value().unwrap_or_default());
        self.forward(|d| d.descriptor_value_changed(peripheral, descriptor, value));
    }

    fn descriptor_write_complete(&mut self, peripheral: &str, descriptor: AttributeHandle) {
        debug!("Write to {} on {} complete", descriptor, peripheral);
        self.forward(|d| d.descriptor_write_complete(peripheral, descriptor));
    }

    fn handle_error(&mut self, error: &GattError, source: Option<&str>) {
        error!(
            "[{}] {} (source: {})",
            error.slug(),
            error.layered_description().join(" > "),
            source.unwrap_or("-")
        );
        self.forward(|d| d.handle_error(error, source));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::notification::CentralUpdate;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn forwards_to_the_wrapped_delegate() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (tx, mut rx) = unbounded_channel();
        let mut delegate = LoggingDelegate::wrapping(tx);

        delegate.powered_on();
        delegate.service_changed("AA:BB", AttributeHandle(3));
        delegate.handle_error(&GattError::Unauthorized, None);

        assert_eq!(rx.try_recv().ok(), Some(CentralUpdate::PoweredOn));
        assert_eq!(
            rx.try_recv().ok(),
            Some(CentralUpdate::ServiceChanged {
                peripheral: "AA:BB".into(),
                service: AttributeHandle(3),
            })
        );
        assert!(matches!(
            rx.try_recv(),
            Ok(CentralUpdate::Error { error: GattError::Unauthorized, source: None })
        ));
    }

    #[test]
    fn works_without_an_inner_delegate() {
        let mut delegate = LoggingDelegate::new();
        delegate.updated();
        delegate.characteristic_value_changed("AA:BB", AttributeHandle(1), &[0x57]);
    }
}
