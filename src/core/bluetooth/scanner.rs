//! Scan-time filtering of advertisements
//! Checks run in a fixed order and the first failing one decides the
//! rejection reason, which is only logged.

use thiserror::Error;

use crate::config::ScanConfig;
use crate::core::bluetooth::types::AdvertisementData;

/// Why an advertisement was not staged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("signal {rssi} dBm is below the minimum of {minimum} dBm")]
    WeakSignal { rssi: i32, minimum: i32 },

    #[error("advertisement is not connectable")]
    NotConnectable,

    #[error("advertisement has no name")]
    EmptyName,

    #[error("peripheral is not in the allow-list")]
    NotAllowed,

    #[error("peripheral is ignored")]
    Ignored,
}

pub struct ScanFilter<'a> {
    config: &'a ScanConfig,
    ignored: &'a [String],
}

impl<'a> ScanFilter<'a> {
    pub fn new(config: &'a ScanConfig, ignored: &'a [String]) -> Self {
        Self { config, ignored }
    }

    pub fn check(&self, identifier: &str, advertisement: &AdvertisementData, rssi: i32) -> Result<(), Rejection> {
        if rssi < self.config.minimum_rssi {
            return Err(Rejection::WeakSignal {
                rssi,
                minimum: self.config.minimum_rssi,
            });
        }
        if self.config.discover_only_connectable && !advertisement.is_connectable {
            return Err(Rejection::NotConnectable);
        }
        if !self.config.allow_empty_names && advertisement.name().is_none() {
            return Err(Rejection::EmptyName);
        }
        if !self.config.allows_peripheral(identifier) {
            return Err(Rejection::NotAllowed);
        }
        if self.ignored.iter().any(|ignored| ignored == identifier) {
            return Err(Rejection::Ignored);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config(minimum_rssi: i32) -> ScanConfig {
        ScanConfig {
            minimum_rssi,
            ..ScanConfig::default()
        }
    }

    #[rstest]
    #[case(-80, Err(Rejection::WeakSignal { rssi: -80, minimum: -70 }))]
    #[case(-70, Ok(()))]
    #[case(-60, Ok(()))]
    fn minimum_rssi(#[case] rssi: i32, #[case] expected: Result<(), Rejection>) {
        let config = config(-70);
        let filter = ScanFilter::new(&config, &[]);
        let advertisement = AdvertisementData::named("Thermo1", true);
        assert_eq!(filter.check("AA:BB", &advertisement, rssi), expected);
    }

    #[rstest]
    #[case(false, false, "Thermo1", Ok(()))]
    #[case(true, false, "Thermo1", Err(Rejection::NotConnectable))]
    #[case(true, true, "Thermo1", Ok(()))]
    #[case(false, true, "  ", Err(Rejection::EmptyName))]
    fn connectable_and_name(
        #[case] only_connectable: bool,
        #[case] connectable: bool,
        #[case] name: &str,
        #[case] expected: Result<(), Rejection>,
    ) {
        let config = ScanConfig {
            discover_only_connectable: only_connectable,
            ..ScanConfig::default()
        };
        let filter = ScanFilter::new(&config, &[]);
        let advertisement = AdvertisementData::named(name, connectable);
        assert_eq!(filter.check("AA:BB", &advertisement, -50), expected);
    }

    #[test]
    fn empty_names_allowed_when_configured() {
        let config = ScanConfig {
            allow_empty_names: true,
            ..ScanConfig::default()
        };
        let filter = ScanFilter::new(&config, &[]);
        assert_eq!(filter.check("AA:BB", &AdvertisementData::default(), -50), Ok(()));
    }

    #[test]
    fn allow_list_and_ignored() {
        let mut config = ScanConfig::default();
        config.criteria.peripherals = vec!["AA:BB".into(), "CC:DD".into()];
        let ignored = vec!["CC:DD".to_string()];
        let filter = ScanFilter::new(&config, &ignored);
        let advertisement = AdvertisementData::named("Thermo1", true);

        assert_eq!(filter.check("AA:BB", &advertisement, -50), Ok(()));
        assert_eq!(filter.check("EE:FF", &advertisement, -50), Err(Rejection::NotAllowed));
        assert_eq!(filter.check("CC:DD", &advertisement, -50), Err(Rejection::Ignored));
    }
}
