//! Error taxonomy for the GATT engine
//!
//! Errors nest: each layer wraps the error of the layer below together with
//! its own identifier, so a failing descriptor read surfaces as
//! `PeripheralError { ServiceError { CharacteristicError { DescriptorError { .. } } } }`.
//! [`GattError::layered_description`] flattens that chain into a breadcrumb.

use serde::Serialize;
use thiserror::Error;

/// Identifying snapshot of an advertised device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub identifier: String,
    pub name: Option<String>,
    pub rssi: i32,
}

impl std::fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.identifier, name),
            None => write!(f, "{}", self.identifier),
        }
    }
}

/// Every error the engine reports to its delegate.
#[derive(Debug, Clone, Error)]
pub enum GattError {
    #[error("the Bluetooth adapter is unavailable")]
    AdapterUnavailable,

    #[error("the application is not authorized to use Bluetooth")]
    Unauthorized,

    #[error("connection to {0} timed out")]
    ConnectionTimeout(Box<DeviceSummary>),

    #[error("peripheral {0} disconnected unexpectedly")]
    UnexpectedDisconnection(String),

    #[error("peripheral {id}{}", suffix(.error))]
    PeripheralError {
        error: Option<Box<GattError>>,
        id: String,
    },

    #[error("service {id}{}", suffix(.error))]
    ServiceError {
        error: Option<Box<GattError>>,
        id: String,
    },

    #[error("characteristic {id}{}", suffix(.error))]
    CharacteristicError {
        error: Option<Box<GattError>>,
        id: String,
    },

    #[error("descriptor {id}{}", suffix(.error))]
    DescriptorError {
        error: Option<Box<GattError>>,
        id: String,
    },

    #[error("internal error {id}{}", suffix(.error))]
    InternalError {
        error: Option<Box<GattError>>,
        id: String,
    },

    /// Description of an error raised by the platform Bluetooth stack.
    #[error("{0}")]
    Platform(String),
}

fn suffix(error: &Option<Box<GattError>>) -> String {
    match error {
        Some(inner) => format!(": {}", inner),
        None => String::new(),
    }
}

/// Equality is textual: two errors are equal when they describe themselves
/// identically.
impl PartialEq for GattError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for GattError {}

impl GattError {
    pub fn platform(description: impl Into<String>) -> Self {
        Self::Platform(description.into())
    }

    pub fn peripheral(id: impl Into<String>, error: Option<GattError>) -> Self {
        Self::PeripheralError {
            error: error.map(Box::new),
            id: id.into(),
        }
    }

    pub fn service(id: impl Into<String>, error: Option<GattError>) -> Self {
        Self::ServiceError {
            error: error.map(Box::new),
            id: id.into(),
        }
    }

    pub fn characteristic(id: impl Into<String>, error: Option<GattError>) -> Self {
        Self::CharacteristicError {
            error: error.map(Box::new),
            id: id.into(),
        }
    }

    pub fn descriptor(id: impl Into<String>, error: Option<GattError>) -> Self {
        Self::DescriptorError {
            error: error.map(Box::new),
            id: id.into(),
        }
    }

    pub fn internal(id: impl Into<String>, error: Option<GattError>) -> Self {
        Self::InternalError {
            error: error.map(Box::new),
            id: id.into(),
        }
    }

    /// Machine-friendly name of the error kind.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::AdapterUnavailable => "adapter_unavailable",
            Self::Unauthorized => "unauthorized",
            Self::ConnectionTimeout(_) => "connection_timeout",
            Self::UnexpectedDisconnection(_) => "unexpected_disconnection",
            Self::PeripheralError { .. } => "peripheral_error",
            Self::ServiceError { .. } => "service_error",
            Self::CharacteristicError { .. } => "characteristic_error",
            Self::DescriptorError { .. } => "descriptor_error",
            Self::InternalError { .. } => "internal_error",
            Self::Platform(_) => "platform_error",
        }
    }

    /// Depth of a nested kind in the GATT hierarchy, its id and wrapped error.
    fn layer(&self) -> Option<(u8, &str, Option<&GattError>)> {
        let (rank, error, id) = match self {
            Self::PeripheralError { error, id } => (0, error, id),
            Self::ServiceError { error, id } => (1, error, id),
            Self::CharacteristicError { error, id } => (2, error, id),
            Self::DescriptorError { error, id } => (3, error, id),
            Self::InternalError { error, id } => (4, error, id),
            _ => return None,
        };
        Some((rank, id.as_str(), error.as_deref()))
    }

    /// The first error in the chain that is not a nested kind.
    pub fn innermost(&self) -> Option<&GattError> {
        let mut current = self;
        loop {
            match current.layer() {
                Some((_, _, Some(inner))) => current = inner,
                Some((_, _, None)) => return None,
                None => return Some(current),
            }
        }
    }

    /// Flattens the error into display fragments.
    ///
    /// The first element is the slug of this error. Then come the ids of every
    /// nested layer ordered from the peripheral down to the descriptor (the
    /// order the error was wrapped in does not matter), and finally the
    /// description of the innermost non-nested error, when there is one.
    pub fn layered_description(&self) -> Vec<String> {
        let mut crumbs: Vec<(u8, &str)> = Vec::new();
        let mut current = Some(self);
        let mut innermost = None;
        while let Some(error) = current {
            match error.layer() {
                Some((rank, id, inner)) => {
                    if !id.is_empty() {
                        crumbs.push((rank, id));
                    }
                    current = inner;
                }
                None => {
                    innermost = Some(error);
                    current = None;
                }
            }
        }
        crumbs.sort_by_key(|(rank, _)| *rank);

        let mut ret = vec![self.slug().to_string()];
        ret.extend(crumbs.into_iter().map(|(_, id)| id.to_string()));
        if let Some(error) = innermost {
            ret.push(error.to_string());
        }
        ret
    }
}

/// Refusal of a request by the hardware backend, before anything was sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("no Bluetooth adapter is available")]
    AdapterUnavailable,

    #[error("unknown peripheral {0}")]
    UnknownPeripheral(String),

    #[error("unknown attribute {0}")]
    UnknownAttribute(String),

    #[error("peripheral {0} is not connected")]
    NotConnected(String),

    #[error("{0}")]
    Platform(String),
}

impl From<BackendError> for GattError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::AdapterUnavailable => GattError::AdapterUnavailable,
            other => GattError::Platform(other.to_string()),
        }
    }
}
