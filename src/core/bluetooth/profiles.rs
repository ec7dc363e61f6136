//! Specialised interpreters for well-known GATT elements
//! This module contains the profile traits the registry constructs and the
//! built-in Bluetooth SIG profiles: battery, current time, device information
//! and the standard descriptors.

use std::any::Any;
use std::fmt::Debug;

use chrono::{NaiveDate, NaiveDateTime};
use enumset::EnumSet;

use crate::core::bluetooth::types::{ExtendedProperty, RawCharacteristic, RawDescriptor, RawService};
use crate::core::bluetooth::value::ValueView;

/// Lets a profile trait object be downcast to its concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Interpretation attached to a service.
pub trait ServiceProfile: AsAny + Debug {
    /// Name of the profile, `None` for the generic fallback.
    fn name(&self) -> Option<&'static str>;
}

/// Interpretation attached to a characteristic.
pub trait CharacteristicProfile: AsAny + Debug {
    fn name(&self) -> Option<&'static str>;

    /// Renders a value the way this profile understands it.
    fn display_value(&self, _value: &[u8]) -> Option<String> {
        None
    }
}

/// Interpretation attached to a descriptor.
pub trait DescriptorProfile: AsAny + Debug {
    fn name(&self) -> Option<&'static str>;

    fn display_value(&self, _value: &[u8]) -> Option<String> {
        None
    }
}

// Services

#[derive(Debug, Default)]
pub struct GenericService;

impl GenericService {
    pub fn create(_raw: &RawService) -> Box<dyn ServiceProfile> {
        Box::new(GenericService)
    }
}

impl ServiceProfile for GenericService {
    fn name(&self) -> Option<&'static str> {
        None
    }
}

#[derive(Debug, Default)]
pub struct BatteryService;

impl BatteryService {
    pub fn create(_raw: &RawService) -> Box<dyn ServiceProfile> {
        Box::new(BatteryService)
    }
}

impl ServiceProfile for BatteryService {
    fn name(&self) -> Option<&'static str> {
        Some("Battery")
    }
}

#[derive(Debug, Default)]
pub struct CurrentTimeService;

impl CurrentTimeService {
    pub fn create(_raw: &RawService) -> Box<dyn ServiceProfile> {
        Box::new(CurrentTimeService)
    }
}

impl ServiceProfile for CurrentTimeService {
    fn name(&self) -> Option<&'static str> {
        Some("Current Time")
    }
}

#[derive(Debug, Default)]
pub struct DeviceInformationService;

impl DeviceInformationService {
    pub fn create(_raw: &RawService) -> Box<dyn ServiceProfile> {
        Box::new(DeviceInformationService)
    }
}

impl ServiceProfile for DeviceInformationService {
    fn name(&self) -> Option<&'static str> {
        Some("Device Information")
    }
}

// Characteristics

#[derive(Debug, Default)]
pub struct GenericCharacteristic;

impl GenericCharacteristic {
    pub fn create(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Box::new(GenericCharacteristic)
    }
}

impl CharacteristicProfile for GenericCharacteristic {
    fn name(&self) -> Option<&'static str> {
        None
    }
}

/// Battery Level (0x2A19): one byte, percent of full charge.
#[derive(Debug, Default)]
pub struct BatteryLevel;

impl BatteryLevel {
    pub fn create(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Box::new(BatteryLevel)
    }

    /// The level in percent, `None` when out of the 0-100 range.
    pub fn level(&self, value: &[u8]) -> Option<u8> {
        value.u8_value().filter(|level| *level <= 100)
    }
}

impl CharacteristicProfile for BatteryLevel {
    fn name(&self) -> Option<&'static str> {
        Some("Battery Level")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        self.level(value).map(|level| format!("{}%", level))
    }
}

/// Decoded Current Time (0x2A2B) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentTimeValue {
    pub date_time: NaiveDateTime,
    /// 1 = Monday .. 7 = Sunday, 0 = unknown.
    pub day_of_week: u8,
    /// Fractions of a second in 1/256 units.
    pub fractions256: u8,
    pub adjust_reason: u8,
}

/// Current Time (0x2A2B): exact time 256 plus adjust reason, 10 bytes.
#[derive(Debug, Default)]
pub struct CurrentTime;

impl CurrentTime {
    pub fn create(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Box::new(CurrentTime)
    }

    pub fn decode(&self, value: &[u8]) -> Option<CurrentTimeValue> {
        if value.len() < 10 {
            return None;
        }
        let year = u16::from_le_bytes([value[0], value[1]]);
        let date = NaiveDate::from_ymd_opt(year as i32, value[2] as u32, value[3] as u32)?;
        let date_time = date.and_hms_opt(value[4] as u32, value[5] as u32, value[6] as u32)?;
        Some(CurrentTimeValue {
            date_time,
            day_of_week: value[7],
            fractions256: value[8],
            adjust_reason: value[9],
        })
    }
}

impl CharacteristicProfile for CurrentTime {
    fn name(&self) -> Option<&'static str> {
        Some("Current Time")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        self.decode(value)
            .map(|time| time.date_time.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

/// Local Time Information (0x2A0F): time zone and DST offset.
#[derive(Debug, Default)]
pub struct LocalTimeInformation;

impl LocalTimeInformation {
    pub fn create(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Box::new(LocalTimeInformation)
    }

    /// Offset from UTC in minutes, time zone plus DST. `None` when either
    /// part is the "unknown" sentinel.
    pub fn utc_offset_minutes(&self, value: &[u8]) -> Option<i32> {
        let time_zone = *value.first()? as i8;
        let dst = *value.get(1)?;
        if time_zone == -128 || dst == 255 {
            return None;
        }
        // Both fields count quarter hours.
        Some((time_zone as i32 + dst as i32) * 15)
    }
}

impl CharacteristicProfile for LocalTimeInformation {
    fn name(&self) -> Option<&'static str> {
        Some("Local Time Information")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        let minutes = self.utc_offset_minutes(value)?;
        let sign = if minutes < 0 { '-' } else { '+' };
        Some(format!("UTC{}{:02}:{:02}", sign, minutes.abs() / 60, minutes.abs() % 60))
    }
}

/// System ID (0x2A23): 40-bit manufacturer identifier then 24-bit OUI.
#[derive(Debug, Default)]
pub struct SystemId;

impl SystemId {
    pub fn create(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Box::new(SystemId)
    }

    pub fn manufacturer_identifier(&self, value: &[u8]) -> Option<u64> {
        value.u64_value().map(|raw| raw & 0xFF_FFFF_FFFF)
    }

    pub fn organizationally_unique_identifier(&self, value: &[u8]) -> Option<u32> {
        value.u64_value().map(|raw| (raw >> 40) as u32)
    }
}

impl CharacteristicProfile for SystemId {
    fn name(&self) -> Option<&'static str> {
        Some("System ID")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        Some(format!(
            "{:06X}-{:010X}",
            self.organizationally_unique_identifier(value)?,
            self.manufacturer_identifier(value)?
        ))
    }
}

/// One of the UTF-8 strings of the Device Information service.
#[derive(Debug)]
pub struct DeviceInformationString {
    label: &'static str,
}

impl DeviceInformationString {
    pub fn label(&self) -> &'static str {
        self.label
    }

    fn boxed(label: &'static str) -> Box<dyn CharacteristicProfile> {
        Box::new(DeviceInformationString { label })
    }

    pub fn manufacturer_name(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Self::boxed("Manufacturer Name")
    }

    pub fn model_number(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Self::boxed("Model Number")
    }

    pub fn serial_number(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Self::boxed("Serial Number")
    }

    pub fn hardware_revision(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Self::boxed("Hardware Revision")
    }

    pub fn firmware_revision(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Self::boxed("Firmware Revision")
    }

    pub fn software_revision(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        Self::boxed("Software Revision")
    }
}

impl CharacteristicProfile for DeviceInformationString {
    fn name(&self) -> Option<&'static str> {
        Some(self.label)
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        value.string_value()
    }
}

// Descriptors

#[derive(Debug, Default)]
pub struct GenericDescriptor;

impl GenericDescriptor {
    pub fn create(_raw: &RawDescriptor) -> Box<dyn DescriptorProfile> {
        Box::new(GenericDescriptor)
    }
}

impl DescriptorProfile for GenericDescriptor {
    fn name(&self) -> Option<&'static str> {
        None
    }
}

/// Characteristic Extended Properties (0x2900).
#[derive(Debug, Default)]
pub struct ExtendedProperties;

impl ExtendedProperties {
    pub fn create(_raw: &RawDescriptor) -> Box<dyn DescriptorProfile> {
        Box::new(ExtendedProperties)
    }

    pub fn decode(&self, value: &[u8]) -> Option<EnumSet<ExtendedProperty>> {
        value.u16_value().map(ExtendedProperty::from_bits)
    }
}

impl DescriptorProfile for ExtendedProperties {
    fn name(&self) -> Option<&'static str> {
        Some("Characteristic Extended Properties")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        let flags = self.decode(value)?;
        Some(format!("{:?}", flags.iter().collect::<Vec<_>>()))
    }
}

/// Characteristic User Description (0x2901).
#[derive(Debug, Default)]
pub struct UserDescription;

impl UserDescription {
    pub fn create(_raw: &RawDescriptor) -> Box<dyn DescriptorProfile> {
        Box::new(UserDescription)
    }
}

impl DescriptorProfile for UserDescription {
    fn name(&self) -> Option<&'static str> {
        Some("Characteristic User Description")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        value.string_value()
    }
}

/// Client Characteristic Configuration (0x2902).
#[derive(Debug, Default)]
pub struct ClientCharacteristicConfiguration;

impl ClientCharacteristicConfiguration {
    pub fn create(_raw: &RawDescriptor) -> Box<dyn DescriptorProfile> {
        Box::new(ClientCharacteristicConfiguration)
    }

    pub fn is_notifying(&self, value: &[u8]) -> bool {
        value.u16_value().is_some_and(|bits| bits & 0x0001 != 0)
    }

    pub fn is_indicating(&self, value: &[u8]) -> bool {
        value.u16_value().is_some_and(|bits| bits & 0x0002 != 0)
    }
}

impl DescriptorProfile for ClientCharacteristicConfiguration {
    fn name(&self) -> Option<&'static str> {
        Some("Client Characteristic Configuration")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        value.u16_value()?;
        Some(format!(
            "notify: {}, indicate: {}",
            self.is_notifying(value),
            self.is_indicating(value)
        ))
    }
}

/// Server Characteristic Configuration (0x2903).
#[derive(Debug, Default)]
pub struct ServerCharacteristicConfiguration;

impl ServerCharacteristicConfiguration {
    pub fn create(_raw: &RawDescriptor) -> Box<dyn DescriptorProfile> {
        Box::new(ServerCharacteristicConfiguration)
    }

    pub fn is_broadcasting(&self, value: &[u8]) -> bool {
        value.u16_value().is_some_and(|bits| bits & 0x0001 != 0)
    }
}

impl DescriptorProfile for ServerCharacteristicConfiguration {
    fn name(&self) -> Option<&'static str> {
        Some("Server Characteristic Configuration")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        value.u16_value()?;
        Some(format!("broadcast: {}", self.is_broadcasting(value)))
    }
}

/// Decoded Characteristic Presentation Format (0x2904) value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationFormatValue {
    pub format: u8,
    pub exponent: i8,
    pub unit: u16,
    pub namespace: u8,
    pub description: u16,
}

/// Characteristic Presentation Format (0x2904), 7 bytes.
#[derive(Debug, Default)]
pub struct PresentationFormat;

impl PresentationFormat {
    pub fn create(_raw: &RawDescriptor) -> Box<dyn DescriptorProfile> {
        Box::new(PresentationFormat)
    }

    pub fn decode(&self, value: &[u8]) -> Option<PresentationFormatValue> {
        if value.len() < 7 {
            return None;
        }
        Some(PresentationFormatValue {
            format: value[0],
            exponent: value[1] as i8,
            unit: u16::from_le_bytes([value[2], value[3]]),
            namespace: value[4],
            description: u16::from_le_bytes([value[5], value[6]]),
        })
    }
}

impl DescriptorProfile for PresentationFormat {
    fn name(&self) -> Option<&'static str> {
        Some("Characteristic Presentation Format")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        let format = self.decode(value)?;
        Some(format!(
            "format 0x{:02X}, exponent {}, unit 0x{:04X}",
            format.format, format.exponent, format.unit
        ))
    }
}

/// Valid Range (0x2906): lower then upper bound, each half the value.
#[derive(Debug, Default)]
pub struct ValidRange;

impl ValidRange {
    pub fn create(_raw: &RawDescriptor) -> Box<dyn DescriptorProfile> {
        Box::new(ValidRange)
    }

    /// Both bounds as raw little-endian byte slices.
    pub fn bounds<'a>(&self, value: &'a [u8]) -> Option<(&'a [u8], &'a [u8])> {
        if value.is_empty() || value.len() % 2 != 0 {
            return None;
        }
        Some(value.split_at(value.len() / 2))
    }
}

impl DescriptorProfile for ValidRange {
    fn name(&self) -> Option<&'static str> {
        Some("Valid Range")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        let (lower, upper) = self.bounds(value)?;
        Some(format!("{} ..= {}", lower.int_value()?, upper.int_value()?))
    }
}
