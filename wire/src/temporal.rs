use crate::codec::CodecError;
use chrono::{Datelike, NaiveDate};

/// `NaiveDate::num_days_from_ce()` for 1970-01-01.
const EPOCH_CE_DAYS: i32 = 719_163;

pub const PICOS_PER_MICRO: i64 = 1_000_000;
pub const PICOS_PER_SECOND: i64 = 1_000_000_000_000;
pub const PICOS_PER_DAY: i64 = 24 * 3600 * PICOS_PER_SECOND;
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Decodes the producer's packed DATE into days since 1970-01-01.
///
/// The producer encodes a date as `(year-1900)*10000 + month*100 + day`,
/// which goes negative for pre-1900 years. The remainder correction keeps
/// month/day positive in that case.
pub fn producer_date_to_epoch_days(encoded: i32) -> Result<i32, CodecError> {
    let mut year_offset = encoded / 10000;
    let mut month_day = encoded % 10000;
    if month_day < 0 {
        year_offset -= 1;
        month_day += 10000;
    }
    let year = year_offset + 1900;
    let month = (month_day / 100) as u32;
    let day = (month_day % 100) as u32;
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| CodecError::InvalidCalendar(format!("{year:04}-{month:02}-{day:02}")))?;
    Ok(date.num_days_from_ce() - EPOCH_CE_DAYS)
}

/// Decodes the producer's 6-byte TIME into picoseconds since midnight.
///
/// Layout: `[u32 seconds scaled by 1e6][u8 hour][u8 minute]`.
pub fn producer_time_to_picos(raw: &[u8; 6]) -> i64 {
    let scaled_seconds = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64;
    let hour = (raw[4] % 24) as i64;
    let minute = (raw[5] % 60) as i64;
    (hour * 3600 + minute * 60) * PICOS_PER_SECOND + scaled_seconds * PICOS_PER_MICRO
}

/// Decodes the producer's 10-byte TIMESTAMP into microseconds since epoch.
///
/// Layout: `[u32 seconds scaled by 1e6][u16 year][u8 month][u8 day][u8 hour][u8 minute]`.
pub fn producer_timestamp_to_micros(raw: &[u8; 10]) -> Result<i64, CodecError> {
    let scaled_seconds = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64;
    let year = u16::from_be_bytes([raw[4], raw[5]]) as i32;
    let month = raw[6] as u32;
    let day = raw[7] as u32;
    let hour = raw[8] as u32;
    let minute = raw[9] as u32;
    let day_time = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or_else(|| {
            CodecError::InvalidCalendar(format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}"))
        })?;
    Ok(day_time.and_utc().timestamp() * MICROS_PER_SECOND + scaled_seconds)
}

/// Shifts a timestamp from the producer's wall clock to UTC.
pub fn normalize_timestamp_micros(micros: i64, producer_utc_offset_seconds: i32) -> i64 {
    micros - producer_utc_offset_seconds as i64 * MICROS_PER_SECOND
}

/// Shifts a time-of-day from the producer's wall clock to UTC, wrapping at
/// the day boundary.
pub fn normalize_time_picos(picos: i64, producer_utc_offset_seconds: i32) -> i64 {
    let shifted = picos - producer_utc_offset_seconds as i64 * PICOS_PER_SECOND;
    shifted.rem_euclid(PICOS_PER_DAY)
}
