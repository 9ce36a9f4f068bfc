use crate::codec::CodecError;

/// Decodes a short decimal mantissa: a 1, 2, 4 or 8-byte little-endian
/// signed integer. The scale is table metadata, not part of the wire value.
pub fn decimal_short_to_i64(raw: &[u8]) -> Result<i64, CodecError> {
    match raw.len() {
        1 => Ok(i8::from_le_bytes([raw[0]]) as i64),
        2 => Ok(i16::from_le_bytes([raw[0], raw[1]]) as i64),
        4 => Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64),
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            Ok(i64::from_le_bytes(bytes))
        }
        width => Err(CodecError::InvalidDecimalWidth(width)),
    }
}

/// Decodes a 16-byte little-endian long decimal mantissa.
pub fn decimal_long_to_i128(raw: &[u8; 16]) -> i128 {
    i128::from_le_bytes(*raw)
}

/// Byte-reverses a 16-byte little-endian wire decimal into the engine's
/// big-endian canonical form.
pub fn decimal_long_to_be_bytes(raw: &[u8; 16]) -> [u8; 16] {
    let mut out = *raw;
    out.reverse();
    out
}
