use crate::codec::{put_i32, put_i64, put_u16, put_u32};

/// One wire value for the reference encoder.
///
/// This mirrors what the producer-side export operator writes. The connector
/// itself never encodes row data; the encoder exists for integration tests
/// and load-generation tooling.
#[derive(Debug, Clone)]
pub enum WireValue {
    Null,
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Varchar(String),
    /// days since 1970-01-01
    Date(i32),
    /// picoseconds since midnight
    TimePicos(i64),
    /// microseconds since epoch
    TimestampMicros(i64),
    /// unscaled short decimal mantissa
    DecimalShort(i64),
    /// unscaled long decimal mantissa, written big-endian
    DecimalLong(i128),
    /// raw payload with varchar framing
    Opaque(Vec<u8>),
}

/// Encodes rows into an uncompressed batch payload:
/// `[u32 row_count]` then per row, per column, `[u8 null][payload]`.
pub fn encode_batch(rows: &[Vec<WireValue>]) -> Vec<u8> {
    let mut payload = vec![];
    put_u32(&mut payload, rows.len() as u32);
    for row in rows {
        for value in row {
            encode_value(&mut payload, value);
        }
    }
    payload
}

fn encode_value(payload: &mut Vec<u8>, value: &WireValue) {
    if matches!(value, WireValue::Null) {
        payload.push(1);
        return;
    }
    payload.push(0);
    match value {
        WireValue::Null => {}
        WireValue::Int32(v) => put_i32(payload, *v),
        WireValue::Int64(v) => put_i64(payload, *v),
        WireValue::Float64(v) => put_i64(payload, v.to_bits() as i64),
        WireValue::Varchar(text) => {
            put_u16(payload, text.len() as u16);
            payload.extend_from_slice(text.as_bytes());
        }
        WireValue::Date(days) => put_i32(payload, *days),
        WireValue::TimePicos(picos) => put_i64(payload, *picos),
        WireValue::TimestampMicros(micros) => put_i64(payload, *micros),
        WireValue::DecimalShort(unscaled) => put_i64(payload, *unscaled),
        WireValue::DecimalLong(unscaled) => payload.extend_from_slice(&unscaled.to_be_bytes()),
        WireValue::Opaque(raw) => {
            put_u16(payload, raw.len() as u16);
            payload.extend_from_slice(raw);
        }
    }
}
