//! Field encodings shared by the parsers and the command builders.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Raw temperatures meaning "not available".
const TEMP_UNAVAILABLE: [u16; 3] = [0x7FFF, 0x7EFF, 0x31FF];

/// Signed centidegrees, big-endian. `None` when the sensor reports no value.
pub fn temp_from_bytes(bytes: &[u8]) -> Option<f64> {
    let raw = u16::from_be_bytes([*bytes.first()?, *bytes.get(1)?]);
    if TEMP_UNAVAILABLE.contains(&raw) {
        return None;
    }
    Some(f64::from(raw as i16) / 100.0)
}

pub fn temp_to_bytes(value: Option<f64>) -> [u8; 2] {
    match value {
        Some(celsius) => ((celsius * 100.0).round() as i16).to_be_bytes(),
        None => [0x7F, 0xFF],
    }
}

/// Half-percent units, `0xC8` is 100%.
pub fn percent_from_byte(byte: u8) -> Option<f64> {
    (byte <= 200).then(|| f64::from(byte) / 200.0)
}

pub fn bool_from_byte(byte: u8) -> Option<bool> {
    match byte {
        0x00 => Some(false),
        0xC8 => Some(true),
        _ => None,
    }
}

/// Six bytes `mm HH dd MM YYYY`, or seven with a leading seconds byte
/// (bit 7 of the seconds byte is a DST flag). All-`FF` means unset.
pub fn dtm_from_bytes(bytes: &[u8]) -> Option<NaiveDateTime> {
    if bytes.iter().all(|b| *b == 0xFF) {
        return None;
    }
    let (second, rest) = match bytes.len() {
        7 => (u32::from(bytes[0] & 0x7F), &bytes[1..]),
        6 => (0, bytes),
        _ => return None,
    };
    let year = i32::from(u16::from_be_bytes([rest[4], rest[5]]));
    NaiveDate::from_ymd_opt(year, u32::from(rest[3]), u32::from(rest[2]))?.and_hms_opt(
        u32::from(rest[1]),
        u32::from(rest[0]),
        second,
    )
}

pub fn dtm_to_bytes(value: Option<NaiveDateTime>) -> [u8; 6] {
    let Some(dtm) = value else {
        return [0xFF; 6];
    };
    let [year_hi, year_lo] = (dtm.year() as u16).to_be_bytes();
    [
        dtm.minute() as u8,
        dtm.hour() as u8,
        dtm.day() as u8,
        dtm.month() as u8,
        year_hi,
        year_lo,
    ]
}

pub fn dtm_to_bytes_with_seconds(dtm: NaiveDateTime) -> [u8; 7] {
    let mut out = [0u8; 7];
    out[0] = dtm.second() as u8;
    out[1..].copy_from_slice(&dtm_to_bytes(Some(dtm)));
    out
}

/// ASCII text, terminated by the first `00` or `7F` byte.
pub fn text_from_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|b| **b != 0x00 && **b != 0x7F)
        .map(|b| if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '?' })
        .collect()
}

/// ASCII text padded with `00` to `width` bytes.
pub fn text_to_bytes(text: &str, width: usize) -> Vec<u8> {
    let mut out: Vec<u8> = text.bytes().take(width).collect();
    out.resize(width, 0x00);
    out
}
