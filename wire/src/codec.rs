use thiserror::Error;

/// Errors produced while decoding wire payloads.
///
/// Decoding never panics; a malformed or short buffer always surfaces as a
/// typed error so the connection handler can isolate the failure.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    #[error("{0} trailing bytes after last row")]
    TrailingBytes(usize),

    #[error("truncated utf-16 input")]
    TruncatedUtf16,

    #[error("invalid utf-8 in varchar payload")]
    InvalidUtf8,

    #[error("invalid calendar field: {0}")]
    InvalidCalendar(String),

    #[error("invalid decimal width: {0} bytes")]
    InvalidDecimalWidth(usize),

    #[error("unknown compression flag {0}")]
    UnknownCompression(u32),

    #[error("malformed schema handshake: {0}")]
    MalformedSchema(String),
}

/// A checked cursor over a borrowed byte slice.
///
/// All multi-byte integers on the wire are big-endian.
pub struct DecodeWindow<'a> {
    buf: &'a [u8],
}

impl<'a> DecodeWindow<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn read_bytes(&mut self, nb_bytes: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < nb_bytes {
            return Err(CodecError::Underflow {
                needed: nb_bytes,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(nb_bytes);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let raw = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let raw = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        let raw = self.read_bytes(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(i64::from_be_bytes(bytes))
    }
}

pub fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn put_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Writes a `[u32 len][bytes]` frame.
pub fn put_len_prefixed(buf: &mut Vec<u8>, payload: &[u8]) {
    put_u32(buf, payload.len() as u32);
    buf.extend_from_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_integers() {
        let mut buf = vec![];
        put_u16(&mut buf, 0xBEEF);
        put_u32(&mut buf, 0xCAFE_FEED);
        put_i32(&mut buf, -42);
        put_i64(&mut buf, i64::MIN);
        let mut window = DecodeWindow::new(&buf);
        assert_eq!(window.read_u16().unwrap(), 0xBEEF);
        assert_eq!(window.read_u32().unwrap(), 0xCAFE_FEED);
        assert_eq!(window.read_i32().unwrap(), -42);
        assert_eq!(window.read_i64().unwrap(), i64::MIN);
        assert!(window.is_empty());
    }

    #[test]
    fn test_big_endian_layout() {
        let mut buf = vec![];
        put_u32(&mut buf, 1);
        assert_eq!(buf, [0, 0, 0, 1]);
    }

    #[test]
    fn test_underflow() {
        let mut window = DecodeWindow::new(&[0, 1]);
        let err = window.read_u32().unwrap_err();
        assert!(matches!(
            err,
            CodecError::Underflow {
                needed: 4,
                remaining: 2
            }
        ));
    }
}
