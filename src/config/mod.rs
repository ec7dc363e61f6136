//! Scan configuration consumed by the central manager.

use std::path::Path;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::core::bluetooth::constants::{uuid_from_str, DEFAULT_MINIMUM_RSSI};

/// Allow-lists applied while scanning and discovering. Empty lists do not
/// restrict anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanCriteria {
    /// Peripheral identifiers
    pub peripherals: Vec<String>,
    /// Service UUIDs, in 16-bit, 32-bit or 128-bit form
    pub services: Vec<String>,
    /// Characteristic UUIDs
    pub characteristics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Advertisements weaker than this (dBm) are ignored
    pub minimum_rssi: i32,
    pub discover_only_connectable: bool,
    pub allow_empty_names: bool,
    pub criteria: ScanCriteria,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            minimum_rssi: DEFAULT_MINIMUM_RSSI,
            discover_only_connectable: false,
            allow_empty_names: false,
            criteria: ScanCriteria::default(),
        }
    }
}

impl ScanConfig {
    /// Loads the config from a JSON file, using defaults when it is missing.
    pub async fn load_config(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Scan config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config = Self::from_json(&config_json)?;

        info!("Scan config loaded from {:?}", path);
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Service UUIDs to scan and discover for. Unparseable entries are
    /// skipped with a warning.
    pub fn service_filter(&self) -> Vec<Uuid> {
        parse_uuids(&self.criteria.services)
    }

    /// Characteristic UUIDs to discover in every service.
    pub fn characteristic_filter(&self) -> Vec<Uuid> {
        parse_uuids(&self.criteria.characteristics)
    }

    pub fn allows_peripheral(&self, identifier: &str) -> bool {
        self.criteria.peripherals.is_empty()
            || self
                .criteria
                .peripherals
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(identifier))
    }
}

fn parse_uuids(values: &[String]) -> Vec<Uuid> {
    values
        .iter()
        .filter_map(|value| {
            let uuid = uuid_from_str(value);
            if uuid.is_none() {
                warn!("Ignoring invalid UUID {:?} in scan criteria", value);
            }
            uuid
        })
        .collect()
}
