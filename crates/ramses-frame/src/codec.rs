use std::fmt::Write as _;

use bytes::Bytes;
use chrono::{NaiveDateTime, NaiveTime};

use crate::address::{format_slot, parse_slot, Address};
use crate::checksum;
use crate::code::Code;
use crate::error::{DecodeError, Result};
use crate::verb::Verb;

/// Largest payload the one-byte radio length field can describe.
pub const MAX_PAYLOAD: usize = 255;

/// Timestamp format used in packet logs.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// A decoded RAMSES-II frame.
///
/// Immutable once built. `src` and `dst` are derived from the three raw
/// address slots, which are kept so that [`encode_frame`] reproduces the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    dtm: NaiveDateTime,
    rssi: Option<u16>,
    verb: Verb,
    seqn: Option<u8>,
    addrs: [Option<Address>; 3],
    src: Address,
    dst: Address,
    code: Code,
    payload: Bytes,
}

impl Frame {
    /// Build an outbound frame.
    ///
    /// ` I` frames use the `src -- dst` slot layout (`dst == src` for an
    /// announcement), everything else uses `src dst --`.
    pub fn new(
        verb: Verb,
        src: Address,
        dst: Address,
        code: Code,
        payload: impl Into<Bytes>,
        dtm: NaiveDateTime,
    ) -> Self {
        let addrs = match verb {
            Verb::Info => [Some(src), None, Some(dst)],
            _ => [Some(src), Some(dst), None],
        };
        Self {
            dtm,
            rssi: None,
            verb,
            seqn: None,
            addrs,
            src,
            dst,
            code,
            payload: payload.into(),
        }
    }

    /// Build a frame from raw address slots, validating their combination.
    pub fn from_slots(
        verb: Verb,
        addrs: [Option<Address>; 3],
        code: Code,
        payload: impl Into<Bytes>,
        dtm: NaiveDateTime,
    ) -> Result<Self> {
        let payload: Bytes = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(DecodeError::malformed(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD}",
                payload.len()
            )));
        }
        let (src, dst) = resolve_slots(&addrs)?;
        Ok(Self {
            dtm,
            rssi: None,
            verb,
            seqn: None,
            addrs,
            src,
            dst,
            code,
            payload,
        })
    }

    /// Attach a signal-quality reading.
    pub fn with_rssi(mut self, rssi: u16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Attach a sequence number.
    pub fn with_seqn(mut self, seqn: u8) -> Self {
        self.seqn = Some(seqn);
        self
    }

    /// Replace the timestamp.
    pub fn with_dtm(mut self, dtm: NaiveDateTime) -> Self {
        self.dtm = dtm;
        self
    }

    /// Reception (or creation) timestamp.
    pub fn dtm(&self) -> NaiveDateTime {
        self.dtm
    }

    pub fn rssi(&self) -> Option<u16> {
        self.rssi
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn seqn(&self) -> Option<u8> {
        self.seqn
    }

    /// The three raw address slots.
    pub fn addrs(&self) -> &[Option<Address>; 3] {
        &self.addrs
    }

    pub fn src(&self) -> Address {
        self.src
    }

    pub fn dst(&self) -> Address {
        self.dst
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes, as carried in the length field.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as upper-case hex.
    pub fn payload_hex(&self) -> String {
        to_hex(&self.payload)
    }

    /// True when the frame is addressed to everyone: an announcement
    /// (`dst == src`) or the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        self.dst == self.src || self.dst.is_broadcast()
    }

    /// Render as a packet-log line: timestamp, RSSI (`...` if unknown), frame.
    pub fn to_log_line(&self) -> String {
        let rssi = match self.rssi {
            Some(rssi) => format!("{rssi:03}"),
            None => "...".to_string(),
        };
        format!(
            "{} {rssi} {}",
            self.dtm.format(LOG_TIMESTAMP_FORMAT),
            encode_frame(self)
        )
    }
}

/// Codec options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameConfig {
    /// Require and verify a trailing two-hex-digit RF checksum on decode, and
    /// append one on encode. Gateways running evofw3 or HGI80 firmware verify
    /// the checksum themselves and omit it, so this is off by default.
    pub checksum: bool,
}

/// Decode one line with the default configuration.
pub fn decode_frame(line: &str, received_at: NaiveDateTime) -> Result<Frame> {
    decode_frame_with(line, received_at, &FrameConfig::default())
}

/// Decode one line.
///
/// Line format:
/// ```text
/// [timestamp] [rssi] verb seqn addr0 addr1 addr2 code len payload [checksum] [* error] [# comment]
/// 2024-01-01T10:00:00.123456 045  I --- 01:145038 --:------ 01:145038 3B00 002 FCC8
/// ```
/// A timestamp embedded in the line takes precedence over `received_at`.
pub fn decode_frame_with(
    line: &str,
    received_at: NaiveDateTime,
    config: &FrameConfig,
) -> Result<Frame> {
    let (body, gateway_error) = split_annotations(line);

    let fields = match parse_fields(body, received_at, config) {
        Ok(fields) => fields,
        Err(err) => {
            return Err(match gateway_error {
                Some(reported) => gateway_failure(reported),
                None => err,
            })
        }
    };

    if fields.payload.len() % 2 != 0 {
        return Err(DecodeError::malformed("odd number of hex digits"));
    }
    if fields.payload.len() / 2 != fields.declared {
        return Err(DecodeError::LengthMismatch {
            declared: fields.declared,
            actual: fields.payload.len() / 2,
        });
    }
    let payload = from_hex(fields.payload)?;

    if let Some(reported) = gateway_error {
        return Err(gateway_failure(reported));
    }

    let mut addrs = [None; 3];
    for (slot, text) in addrs.iter_mut().zip(fields.slots) {
        *slot = parse_slot(text)?;
    }

    let mut frame = Frame::from_slots(fields.verb, addrs, fields.code, payload, fields.dtm)?;
    frame.rssi = fields.rssi;
    frame.seqn = fields.seqn;

    if config.checksum {
        let expected = frame.checksum();
        let found = fields.checksum.and_then(|text| u8::from_str_radix(text, 16).ok());
        if found != Some(expected) {
            return Err(DecodeError::ChecksumInvalid(format!(
                "expected {expected:02X}, found {}",
                fields.checksum.unwrap_or("nothing")
            )));
        }
    }

    Ok(frame)
}

/// Encode a frame as a line to transmit (no timestamp, no RSSI, no terminator).
pub fn encode_frame(frame: &Frame) -> String {
    let mut line = String::with_capacity(64 + frame.payload.len() * 2);
    line.push_str(frame.verb.as_wire());
    match frame.seqn {
        Some(seqn) => {
            let _ = write!(line, " {seqn:03}");
        }
        None => line.push_str(" ---"),
    }
    for slot in &frame.addrs {
        line.push(' ');
        line.push_str(&format_slot(slot.as_ref()));
    }
    let _ = write!(line, " {} {:03}", frame.code, frame.payload.len());
    if !frame.payload.is_empty() {
        line.push(' ');
        line.push_str(&to_hex(&frame.payload));
    }
    line
}

/// Encode a frame, appending the RF checksum when the configuration asks for it.
pub fn encode_frame_with(frame: &Frame, config: &FrameConfig) -> String {
    let mut line = encode_frame(frame);
    if config.checksum {
        let _ = write!(line, " {:02X}", frame.checksum());
    }
    line
}

/// Derive `(src, dst)` from the three address slots.
pub fn resolve_slots(addrs: &[Option<Address>; 3]) -> Result<(Address, Address)> {
    match *addrs {
        [Some(src), None, Some(dst)] => Ok((src, dst)),
        [Some(src), Some(dst), None] => Ok((src, dst)),
        [None, None, Some(src)] => Ok((src, src)),
        _ => Err(DecodeError::bad_address(
            addrs
                .iter()
                .map(|slot| format_slot(slot.as_ref()))
                .collect::<Vec<_>>()
                .join(" "),
            "invalid address combination",
        )),
    }
}

struct Fields<'a> {
    dtm: NaiveDateTime,
    rssi: Option<u16>,
    verb: Verb,
    seqn: Option<u8>,
    slots: [&'a str; 3],
    code: Code,
    declared: usize,
    payload: &'a str,
    checksum: Option<&'a str>,
}

fn parse_fields<'a>(
    body: &'a str,
    received_at: NaiveDateTime,
    config: &FrameConfig,
) -> Result<Fields<'a>> {
    let tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(DecodeError::malformed("empty line"));
    }

    let mut idx = 0;
    let mut dtm = received_at;
    if let Some(parsed) = parse_timestamp(tokens[0], received_at) {
        dtm = parsed;
        idx += 1;
    }

    let mut rssi = None;
    if let Some(token) = tokens.get(idx) {
        if *token == "..." {
            idx += 1;
        } else if token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()) {
            rssi = token.parse().ok();
            idx += 1;
        }
    }

    let rest = &tokens[idx..];
    if rest.len() < 7 {
        return Err(DecodeError::malformed(format!(
            "expected at least 7 fields, found {}",
            rest.len()
        )));
    }

    let verb: Verb = rest[0].parse()?;
    let seqn = parse_seqn(rest[1])?;
    let code: Code = rest[5].parse()?;
    let declared = parse_length(rest[6])?;

    let (payload, checksum) = match (&rest[7..], config.checksum) {
        ([], _) => ("", None),
        ([payload], false) => (*payload, None),
        ([checksum], true) if declared == 0 => ("", Some(*checksum)),
        ([payload], true) => (*payload, None),
        ([payload, checksum], true) => (*payload, Some(*checksum)),
        (extra, _) => {
            return Err(DecodeError::malformed(format!(
                "unexpected trailing fields ({} extra)",
                extra.len()
            )))
        }
    };

    Ok(Fields {
        dtm,
        rssi,
        verb,
        seqn,
        slots: [rest[2], rest[3], rest[4]],
        code,
        declared,
        payload,
        checksum,
    })
}

fn parse_timestamp(token: &str, received_at: NaiveDateTime) -> Option<NaiveDateTime> {
    if token.contains('T') && token.contains('-') {
        return NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S%.f").ok();
    }
    if token.len() >= 8 && token.as_bytes().get(2) == Some(&b':') && token.matches(':').count() == 2 {
        return NaiveTime::parse_from_str(token, "%H:%M:%S%.f")
            .ok()
            .map(|time| received_at.date().and_time(time));
    }
    None
}

fn parse_seqn(token: &str) -> Result<Option<u8>> {
    if token == "---" {
        return Ok(None);
    }
    if token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()) {
        return token
            .parse::<u8>()
            .map(Some)
            .map_err(|_| DecodeError::malformed(format!("sequence number out of range: {token}")));
    }
    Err(DecodeError::malformed(format!("invalid sequence field {token:?}")))
}

fn parse_length(token: &str) -> Result<usize> {
    if token.len() != 3 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::malformed(format!("invalid length field {token:?}")));
    }
    let declared: usize = token
        .parse()
        .map_err(|_| DecodeError::malformed(format!("invalid length field {token:?}")))?;
    if declared > MAX_PAYLOAD {
        return Err(DecodeError::malformed(format!(
            "declared length {declared} exceeds {MAX_PAYLOAD}"
        )));
    }
    Ok(declared)
}

/// Split off `# comment`, then `* gateway error`, then `< hint`.
fn split_annotations(line: &str) -> (&str, Option<&str>) {
    let line = line.trim_end_matches(['\r', '\n']);
    let line = match line.split_once('#') {
        Some((body, _comment)) => body,
        None => line,
    };
    let (line, error) = match line.split_once('*') {
        Some((body, error)) => (body, Some(error.trim())),
        None => (line, None),
    };
    let line = match line.split_once('<') {
        Some((body, _hint)) => body,
        None => line,
    };
    (line.trim(), error)
}

fn gateway_failure(reported: &str) -> DecodeError {
    if reported.to_ascii_lowercase().contains("checksum") {
        DecodeError::ChecksumInvalid(reported.to_string())
    } else {
        DecodeError::Gateway(reported.to_string())
    }
}

/// Upper-case hex rendering of `bytes`.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Parse an even-length hex string.
pub fn from_hex(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(DecodeError::malformed("odd number of hex digits"));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| DecodeError::malformed(format!("invalid hex in payload {text:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    #[test]
    fn test_decode_announcement() {
        let frame = decode_frame(
            "045  I --- 01:145038 --:------ 01:145038 3B00 002 FCC8",
            at(10, 0, 0),
        )
        .unwrap();

        assert_eq!(frame.rssi(), Some(45));
        assert_eq!(frame.verb(), Verb::Info);
        assert_eq!(frame.seqn(), None);
        assert_eq!(frame.src(), addr("01:145038"));
        assert_eq!(frame.dst(), addr("01:145038"));
        assert!(frame.is_broadcast());
        assert_eq!(frame.code(), Code::new(0x3B00));
        assert_eq!(frame.payload().as_ref(), &[0xFC, 0xC8]);
        assert_eq!(frame.dtm(), at(10, 0, 0));
    }

    #[test]
    fn test_decode_request_and_sensor_broadcast() {
        let rq = decode_frame(
            "063 RQ --- 18:013393 01:145038 --:------ 30C9 001 00",
            at(10, 0, 0),
        )
        .unwrap();
        assert_eq!(rq.src(), addr("18:013393"));
        assert_eq!(rq.dst(), addr("01:145038"));
        assert!(!rq.is_broadcast());

        let dts = decode_frame(
            "067  I --- --:------ --:------ 12:193204 30C9 003 0108C3",
            at(10, 0, 0),
        )
        .unwrap();
        assert_eq!(dts.src(), addr("12:193204"));
        assert_eq!(dts.dst(), addr("12:193204"));
    }

    #[test]
    fn test_embedded_timestamp_overrides_received_at() {
        let frame = decode_frame(
            "2024-03-01T21:05:10.123456 053 RP --- 01:145038 18:013393 --:------ 0006 004 00050008",
            at(0, 0, 0),
        )
        .unwrap();
        assert_eq!(
            frame.dtm(),
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_micro_opt(21, 5, 10, 123_456)
                .unwrap()
        );
    }

    #[test]
    fn test_time_only_prefix_uses_received_date() {
        let frame = decode_frame(
            "16:10:34.288 053 RQ --- 30:071715 01:145038 --:------ 0006 001 00",
            at(0, 0, 0),
        )
        .unwrap();
        assert_eq!(frame.dtm().date(), at(0, 0, 0).date());
        assert_eq!(frame.dtm().time().format("%H:%M:%S").to_string(), "16:10:34");
    }

    #[test]
    fn test_unknown_rssi_and_sequence_number() {
        let frame = decode_frame(
            "... RQ 003 18:000730 01:145038 --:------ 1F09 001 00",
            at(0, 0, 0),
        )
        .unwrap();
        assert_eq!(frame.rssi(), None);
        assert_eq!(frame.seqn(), Some(3));
    }

    #[test]
    fn test_comment_and_hint_are_ignored() {
        let frame = decode_frame(
            "045  I --- 04:189076 --:------ 01:145038 1060 003 026401 < hint # battery",
            at(0, 0, 0),
        )
        .unwrap();
        assert_eq!(frame.dst(), addr("01:145038"));
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn test_length_mismatch() {
        let err = decode_frame(
            "045  I --- 01:145038 --:------ 01:145038 3B00 003 FCC8",
            at(0, 0, 0),
        )
        .unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthMismatch {
                declared: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_odd_payload_digits_are_malformed() {
        let err = decode_frame(
            "045  I --- 01:145038 --:------ 01:145038 3B00 002 FCC",
            at(0, 0, 0),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_from_slots_rejects_oversize_payload() {
        let ctl: Address = "01:145038".parse().unwrap();
        let err = Frame::from_slots(
            Verb::Info,
            [Some(ctl), None, Some(ctl)],
            Code::new(0x0404),
            vec![0u8; MAX_PAYLOAD + 1],
            at(0, 0, 0),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));

        let frame = Frame::from_slots(
            Verb::Info,
            [Some(ctl), None, Some(ctl)],
            Code::new(0x0404),
            vec![0u8; MAX_PAYLOAD],
            at(0, 0, 0),
        )
        .unwrap();
        assert_eq!(frame.len(), MAX_PAYLOAD);
    }

    #[test]
    fn test_length_checked_before_addresses() {
        let err = decode_frame(
            "045  I --- 01:XXXXXX --:------ 01:145038 3B00 003 FCC8",
            at(0, 0, 0),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { .. }));
    }

    #[test]
    fn test_gateway_checksum_annotation() {
        let err = decode_frame(
            "000  I --- 08:004102 --:------ 08:004102 3B00 002 FCC8 * Checksum error",
            at(0, 0, 0),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::ChecksumInvalid(msg) if msg == "Checksum error"));
    }

    #[test]
    fn test_gateway_annotation_on_truncated_line() {
        let err = decode_frame("000  I --- 08:004102 * Truncated", at(0, 0, 0)).unwrap_err();
        assert!(matches!(err, DecodeError::Gateway(msg) if msg == "Truncated"));
    }

    #[test]
    fn test_bad_address() {
        let err = decode_frame(
            "045 RQ --- 18:01339 01:145038 --:------ 30C9 001 00",
            at(0, 0, 0),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::BadAddress { .. }));

        let err = decode_frame(
            "045 RQ --- --:------ 01:145038 --:------ 30C9 001 00",
            at(0, 0, 0),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::BadAddress { reason, .. } if reason.contains("combination")));
    }

    #[test]
    fn test_malformed_lines() {
        for line in [
            "",
            "# evofw3 0.7.1",
            "!V",
            "045 XX --- 01:145038 --:------ 01:145038 3B00 002 FCC8",
            "045  I -?- 01:145038 --:------ 01:145038 3B00 002 FCC8",
            "045  I --- 01:145038 --:------ 01:145038 3BZ0 002 FCC8",
            "045  I --- 01:145038 --:------ 01:145038 3B00 02 FCC8",
            "045  I --- 01:145038 --:------ 01:145038 3B00 002 FCC8 EXTRA",
            "045  I --- 01:145038 --:------ 01:145038 3B00 002 FCZZ",
        ] {
            assert!(
                matches!(decode_frame(line, at(0, 0, 0)), Err(DecodeError::Malformed(_))),
                "{line:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let frame = Frame::new(
            Verb::Request,
            Address::HGI_DEFAULT,
            addr("01:145038"),
            Code::new(0x30C9),
            vec![0x00],
            at(0, 0, 0),
        );
        assert_eq!(
            encode_frame(&frame),
            "RQ --- 18:000730 01:145038 --:------ 30C9 001 00"
        );

        let info = Frame::new(
            Verb::Info,
            addr("01:145038"),
            addr("01:145038"),
            Code::new(0x1F09),
            vec![0xFF, 0x07, 0x3F],
            at(0, 0, 0),
        );
        assert_eq!(
            encode_frame(&info),
            " I --- 01:145038 --:------ 01:145038 1F09 003 FF073F"
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let frame = Frame::new(
            Verb::Write,
            Address::HGI_DEFAULT,
            addr("01:145038"),
            Code::new(0x2309),
            vec![0x01, 0x07, 0xD0],
            at(12, 30, 0),
        );
        let decoded = decode_frame(&encode_frame(&frame), frame.dtm()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_log_line_roundtrip() {
        let frame = decode_frame(
            "045  I --- 01:145038 --:------ 01:145038 3B00 002 FCC8",
            at(8, 15, 0),
        )
        .unwrap();
        let line = frame.to_log_line();
        assert!(line.starts_with("2024-03-01T08:15:00.000000 045  I --- "));
        assert_eq!(decode_frame(&line, at(0, 0, 0)).unwrap(), frame);
    }

    #[test]
    fn test_checksum_mode() {
        let config = FrameConfig { checksum: true };
        let frame = Frame::new(
            Verb::Request,
            Address::HGI_DEFAULT,
            addr("01:145038"),
            Code::new(0x0004),
            vec![0x01, 0x00],
            at(0, 0, 0),
        );
        let line = encode_frame_with(&frame, &config);
        assert_eq!(decode_frame_with(&line, frame.dtm(), &config).unwrap(), frame);

        let mut corrupted = line.clone();
        let last = corrupted.pop().unwrap();
        corrupted.push(if last == '0' { '1' } else { '0' });
        assert!(matches!(
            decode_frame_with(&corrupted, frame.dtm(), &config),
            Err(DecodeError::ChecksumInvalid(_))
        ));

        let missing = encode_frame(&frame);
        assert!(matches!(
            decode_frame_with(&missing, frame.dtm(), &config),
            Err(DecodeError::ChecksumInvalid(_))
        ));
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(to_hex(&[0x00, 0xAB, 0x7F]), "00AB7F");
        assert_eq!(from_hex("00ab7F").unwrap(), vec![0x00, 0xAB, 0x7F]);
        assert!(from_hex("0").is_err());
    }
}
