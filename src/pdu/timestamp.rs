//! Service-centre timestamp (SCTS) codec.
//!
//! Seven octets, each a nibble-swapped BCD pair: year, month, day, hour,
//! minute, second, then a timezone octet counting quarter hours with bit 3
//! of the raw octet as the algebraic sign. Two-digit years are taken to be
//! 2000-2099.

use super::DecodeError;
use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike};

/// Decode a 7-byte SCTS field into a timezone-aware datetime.
pub fn decode_scts(bytes: &[u8; 7]) -> Result<DateTime<FixedOffset>, DecodeError> {
    let year = 2000 + swap_bcd(bytes[0], "year")? as i32;
    let month = swap_bcd(bytes[1], "month")? as u32;
    let day = swap_bcd(bytes[2], "day")? as u32;
    let hour = swap_bcd(bytes[3], "hour")? as u32;
    let minute = swap_bcd(bytes[4], "minute")? as u32;
    let second = swap_bcd(bytes[5], "second")? as u32;

    // Timezone: quarter hours, BCD with the sign carried in bit 3.
    let tz = bytes[6];
    let quarters = ((tz & 0x07) * 10 + (tz >> 4)) as i32;
    if tz & 0x07 > 0x05 || tz >> 4 > 9 || quarters > 79 {
        return Err(DecodeError::InvalidTimestamp("timezone"));
    }
    let mut offset_secs = quarters * 15 * 60;
    if tz & 0x08 != 0 {
        offset_secs = -offset_secs;
    }

    let offset = FixedOffset::east_opt(offset_secs)
        .ok_or(DecodeError::InvalidTimestamp("timezone"))?;
    offset
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .ok_or(DecodeError::InvalidTimestamp("calendar fields"))
}

/// Encode a datetime as a 7-byte SCTS field using its own UTC offset.
pub fn encode_scts(dt: &DateTime<FixedOffset>) -> [u8; 7] {
    let offset_secs = dt.offset().local_minus_utc();
    let quarters = (offset_secs.abs() / (15 * 60)) as u8;
    let mut tz = ((quarters % 10) << 4) | (quarters / 10);
    if offset_secs < 0 {
        tz |= 0x08;
    }
    [
        to_swapped_bcd((dt.year() % 100) as u8),
        to_swapped_bcd(dt.month() as u8),
        to_swapped_bcd(dt.day() as u8),
        to_swapped_bcd(dt.hour() as u8),
        to_swapped_bcd(dt.minute() as u8),
        to_swapped_bcd(dt.second() as u8),
        tz,
    ]
}

fn swap_bcd(byte: u8, field: &'static str) -> Result<u8, DecodeError> {
    let low = byte & 0x0F;
    let high = byte >> 4;
    if low > 9 || high > 9 {
        return Err(DecodeError::InvalidTimestamp(field));
    }
    Ok(low * 10 + high)
}

fn to_swapped_bcd(value: u8) -> u8 {
    ((value % 10) << 4) | (value / 10)
}
