//! Constants used throughout the GATT engine
//! This module contains the well-known Bluetooth SIG UUIDs the built-in
//! profiles are keyed on, scan defaults, and UUID string helpers.

use uuid::Uuid;

/// The Bluetooth base UUID (0000xxxx-0000-1000-8000-00805F9B34FB)
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Minimum RSSI that accepts every advertisement
pub const DEFAULT_MINIMUM_RSSI: i32 = -100;

/// RSSI reported when the platform did not supply one
pub const UNKNOWN_RSSI: i32 = -127;

/// Standard Bluetooth Service UUIDs
pub const UUID_CURRENT_TIME_SERVICE: &str = "1805";
pub const UUID_DEVICE_INFORMATION_SERVICE: &str = "180A";
pub const UUID_BATTERY_SERVICE: &str = "180F";

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_LOCAL_TIME_INFORMATION: &str = "2A0F";
pub const UUID_BATTERY_LEVEL: &str = "2A19";
pub const UUID_SYSTEM_ID: &str = "2A23";
pub const UUID_MODEL_NUMBER: &str = "2A24";
pub const UUID_SERIAL_NUMBER: &str = "2A25";
pub const UUID_FIRMWARE_REVISION: &str = "2A26";
pub const UUID_HARDWARE_REVISION: &str = "2A27";
pub const UUID_SOFTWARE_REVISION: &str = "2A28";
pub const UUID_MANUFACTURER_NAME: &str = "2A29";
pub const UUID_CURRENT_TIME: &str = "2A2B";

/// Standard Bluetooth Descriptor UUIDs
pub const UUID_EXTENDED_PROPERTIES: &str = "2900";
pub const UUID_USER_DESCRIPTION: &str = "2901";
pub const UUID_CLIENT_CHARACTERISTIC_CONFIGURATION: &str = "2902";
pub const UUID_SERVER_CHARACTERISTIC_CONFIGURATION: &str = "2903";
pub const UUID_PRESENTATION_FORMAT: &str = "2904";
pub const UUID_VALID_RANGE: &str = "2906";

/// Expands a 16-bit or 32-bit SIG-assigned number onto the base UUID.
pub const fn uuid_from_short(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Parses a GATT UUID string.
///
/// Accepts the 16-bit ("2A19") and 32-bit ("00002A19") shorthand forms as
/// well as any full 128-bit form `uuid` understands. Surrounding whitespace
/// and an optional `0x` prefix are ignored. Returns `None` for empty or
/// malformed input.
pub fn uuid_from_str(value: &str) -> Option<Uuid> {
    let trimmed = value.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    match trimmed.len() {
        0 => None,
        4 | 8 => u32::from_str_radix(trimmed, 16).ok().map(uuid_from_short),
        _ => Uuid::parse_str(trimmed).ok(),
    }
}

/// Returns the 16-bit form of a UUID built on the base UUID, if it is one.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let mask: u128 = !(0xFFFF_FFFF_u128 << 96);
    if value & mask != BLUETOOTH_BASE_UUID {
        return None;
    }
    u16::try_from(value >> 96).ok()
}

/// Human-readable form: "2A19" for SIG UUIDs, the hyphenated form otherwise.
pub fn display_uuid(uuid: &Uuid) -> String {
    match short_uuid(uuid) {
        Some(short) => format!("{:04X}", short),
        None => uuid.hyphenated().to_string().to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_forms_expand_onto_base_uuid() {
        let expected = Uuid::parse_str("00002a19-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(uuid_from_str("2A19"), Some(expected));
        assert_eq!(uuid_from_str("2a19"), Some(expected));
        assert_eq!(uuid_from_str("0x2A19"), Some(expected));
        assert_eq!(uuid_from_str("00002A19"), Some(expected));
        assert_eq!(uuid_from_str("00002a19-0000-1000-8000-00805f9b34fb"), Some(expected));
    }

    #[test]
    fn empty_and_malformed_strings_do_not_parse() {
        assert_eq!(uuid_from_str(""), None);
        assert_eq!(uuid_from_str("   "), None);
        assert_eq!(uuid_from_str("ZZZZ"), None);
        assert_eq!(uuid_from_str("12345"), None);
    }

    #[test]
    fn display_uses_short_form_for_sig_uuids() {
        assert_eq!(display_uuid(&uuid_from_short(0x180F)), "180F");
        let vendor = Uuid::from_u128(0x4f63756c_7573_2054_6872_65656d6f7465);
        assert_eq!(short_uuid(&vendor), None);
        assert_eq!(display_uuid(&vendor), "4F63756C-7573-2054-6872-65656D6F7465");
    }
}
