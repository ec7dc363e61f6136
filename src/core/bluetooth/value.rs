//! Typed views over the opaque value of a characteristic or descriptor.
//!
//! GATT values are little-endian. Integer views read the leading bytes and
//! return `None` when the value is too short.

/// Reinterpretation of a cached attribute value.
pub trait ValueView {
    /// The raw cached value, `None` until it has been read or notified.
    fn value(&self) -> Option<&[u8]>;

    /// UTF-8 text with trailing NUL padding removed.
    fn string_value(&self) -> Option<String> {
        let bytes = self.value()?;
        let text = std::str::from_utf8(bytes).ok()?;
        Some(text.trim_end_matches('\0').to_string())
    }

    /// Signed integer of 1 to 8 bytes, sign-extended from its top byte.
    fn int_value(&self) -> Option<i64> {
        let bytes = self.value()?;
        if bytes.is_empty() || bytes.len() > 8 {
            return None;
        }
        let mut buffer = [0u8; 8];
        buffer[..bytes.len()].copy_from_slice(bytes);
        let shift = 64 - 8 * bytes.len() as u32;
        Some(i64::from_le_bytes(buffer).wrapping_shl(shift).wrapping_shr(shift))
    }

    /// `true` when the first byte is non-zero.
    fn bool_value(&self) -> Option<bool> {
        self.value()?.first().map(|byte| *byte != 0)
    }

    /// IEEE-754 float of 4 (single) or 8 (double) bytes.
    fn double_value(&self) -> Option<f64> {
        let bytes = self.value()?;
        match bytes.len() {
            4 => Some(f32::from_le_bytes(bytes.try_into().ok()?) as f64),
            8 => Some(f64::from_le_bytes(bytes.try_into().ok()?)),
            _ => None,
        }
    }

    fn u8_value(&self) -> Option<u8> {
        self.value()?.first().copied()
    }

    fn u16_value(&self) -> Option<u16> {
        let bytes = self.value()?.get(..2)?;
        Some(u16::from_le_bytes(bytes.try_into().ok()?))
    }

    fn u32_value(&self) -> Option<u32> {
        let bytes = self.value()?.get(..4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    fn u64_value(&self) -> Option<u64> {
        let bytes = self.value()?.get(..8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Upper-case hex, one byte per pair.
    fn hex_value(&self) -> Option<String> {
        let bytes = self.value()?;
        Some(bytes.iter().map(|byte| format!("{:02X}", byte)).collect())
    }
}

impl ValueView for [u8] {
    fn value(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl ValueView for Vec<u8> {
    fn value(&self) -> Option<&[u8]> {
        Some(self.as_slice())
    }
}
