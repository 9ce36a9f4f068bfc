use crate::codec::CodecError;

const HIGH_SURROGATE_START: u16 = 0xD800;
const HIGH_SURROGATE_END: u16 = 0xDBFF;
const LOW_SURROGATE_START: u16 = 0xDC00;
const LOW_SURROGATE_END: u16 = 0xDFFF;

/// Converts a UTF-16LE byte sequence into a UTF-8 string.
///
/// Surrogate pairs are combined into code points >= 0x10000. An odd byte
/// count or a high surrogate at the end of the input is a truncation error;
/// an unpaired surrogate in the middle of the stream decodes as U+FFFD.
pub fn utf16le_to_utf8(input: &[u8]) -> Result<String, CodecError> {
    if input.len() % 2 != 0 {
        return Err(CodecError::TruncatedUtf16);
    }
    let units: Vec<u16> = input
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let mut out = String::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        let unit = units[i];
        match unit {
            HIGH_SURROGATE_START..=HIGH_SURROGATE_END => {
                if i + 1 >= units.len() {
                    return Err(CodecError::TruncatedUtf16);
                }
                let low = units[i + 1];
                if (LOW_SURROGATE_START..=LOW_SURROGATE_END).contains(&low) {
                    let code_point = 0x10000
                        + (((unit - HIGH_SURROGATE_START) as u32) << 10)
                        + (low - LOW_SURROGATE_START) as u32;
                    match char::from_u32(code_point) {
                        Some(c) => out.push(c),
                        None => out.push('\u{FFFD}'),
                    }
                    i += 2;
                } else {
                    // unpaired high surrogate, the next unit is re-examined
                    out.push('\u{FFFD}');
                    i += 1;
                }
            }
            LOW_SURROGATE_START..=LOW_SURROGATE_END => {
                out.push('\u{FFFD}');
                i += 1;
            }
            _ => {
                match char::from_u32(unit as u32) {
                    Some(c) => out.push(c),
                    None => out.push('\u{FFFD}'),
                }
                i += 1;
            }
        }
    }
    Ok(out)
}
