use crate::batch::{Batch, Column, ColumnValues};
use crate::codec::{CodecError, DecodeWindow};
use crate::schema::{ColumnSchema, LogicalType};
use crate::temporal::{normalize_time_picos, normalize_timestamp_micros};
use crate::utf16::utf16le_to_utf8;

/// Per-query decoding knobs.
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Offset of the producer's wall clock from UTC, in seconds. Applied to
    /// TIME and TIMESTAMP values (the `producer-timezone` setting).
    pub producer_utc_offset_seconds: i32,
    /// When set, varchar payloads carry UTF-16LE code units instead of UTF-8.
    pub varchar_utf16: bool,
}

/// Parses an uncompressed batch payload into a columnar [`Batch`].
///
/// Payload layout: `[u32 row_count]` followed by `row_count` rows; each row
/// holds, per schema column, one null-indicator byte and, when non-null, a
/// type-specific payload.
pub fn decode_batch(
    payload: &[u8],
    schema: &ColumnSchema,
    options: &DecodeOptions,
) -> Result<Batch, CodecError> {
    let mut window = DecodeWindow::new(payload);
    let row_count = window.read_u32()? as usize;
    let mut columns: Vec<Column> = schema
        .columns
        .iter()
        .map(|desc| Column::with_capacity(desc.logical_type, row_count))
        .collect();
    for _row in 0..row_count {
        for (desc, column) in schema.columns.iter().zip(columns.iter_mut()) {
            let is_null = window.read_u8()? != 0;
            if is_null {
                column.push_null();
            } else {
                decode_value(&mut window, desc.logical_type, column, options)?;
            }
        }
    }
    if !window.is_empty() {
        return Err(CodecError::TrailingBytes(window.remaining()));
    }
    Ok(Batch { row_count, columns })
}

fn decode_value(
    window: &mut DecodeWindow<'_>,
    logical_type: LogicalType,
    column: &mut Column,
    options: &DecodeOptions,
) -> Result<(), CodecError> {
    column.nulls.push(false);
    match &mut column.values {
        ColumnValues::Int32(values) => values.push(window.read_i32()?),
        ColumnValues::Int64(values) => values.push(window.read_i64()?),
        ColumnValues::Float64(values) => values.push(f64::from_bits(window.read_i64()? as u64)),
        ColumnValues::Varchar(values) => {
            let nb_bytes = window.read_u16()? as usize;
            let raw = window.read_bytes(nb_bytes)?;
            let text = if logical_type == LogicalType::Opaque {
                hex_string(raw)
            } else if options.varchar_utf16 {
                utf16le_to_utf8(raw)?
            } else {
                String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)?
            };
            values.push(text);
        }
        ColumnValues::Date(values) => values.push(window.read_i32()?),
        ColumnValues::TimePicos(values) => values.push(normalize_time_picos(
            window.read_i64()?,
            options.producer_utc_offset_seconds,
        )),
        ColumnValues::TimestampMicros(values) => values.push(normalize_timestamp_micros(
            window.read_i64()?,
            options.producer_utc_offset_seconds,
        )),
        ColumnValues::DecimalShort(values) => values.push(window.read_i64()?),
        ColumnValues::DecimalLong(values) => {
            let raw = window.read_bytes(16)?;
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(raw);
            values.push(i128::from_be_bytes(bytes));
        }
    }
    Ok(())
}

fn hex_string(raw: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(raw.len() * 2);
    for byte in raw {
        out.push(DIGITS[(byte >> 4) as usize] as char);
        out.push(DIGITS[(byte & 0x0F) as usize] as char);
    }
    out
}
