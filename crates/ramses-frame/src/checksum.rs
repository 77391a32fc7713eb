//! Radio encoding and the RF checksum.
//!
//! On air a frame is:
//! ```text
//! ┌────────┬──────────────────┬────────┬──────────┬────────┬─────────┬──────────┐
//! │ Header │ Addresses        │ Seqn   │ Code     │ Length │ Payload │ Checksum │
//! │ (1B)   │ (1-3 x 3B)       │ (0-1B) │ (2B BE)  │ (1B)   │ (N B)   │ (1B)     │
//! └────────┴──────────────────┴────────┴──────────┴────────┴─────────┴──────────┘
//! ```
//! Header bits 4-5 carry the verb, bits 2-3 the address mode, bit 1 flags a
//! sequence byte. The checksum byte makes the sum of all bytes zero mod 256.

use crate::address::Address;
use crate::codec::Frame;

const SEQN_FLAG: u8 = 0x02;

/// Address-mode bits: which of the three slots are present.
fn address_mode(slots: &[Option<Address>; 3]) -> u8 {
    match slots {
        [None, None, Some(_)] => 0x04,
        [Some(_), None, Some(_)] => 0x08,
        [Some(_), Some(_), None] => 0x0C,
        _ => 0x00,
    }
}

/// Radio bytes of `frame`, excluding the checksum.
pub fn radio_body(frame: &Frame) -> Vec<u8> {
    let slots = frame.addrs();
    let mut header = frame.verb().header_bits() | address_mode(slots);
    if frame.seqn().is_some() {
        header |= SEQN_FLAG;
    }

    let mut out = Vec::with_capacity(12 + frame.payload().len());
    out.push(header);
    for addr in slots.iter().flatten() {
        out.extend_from_slice(&addr.to_bytes());
    }
    if let Some(seqn) = frame.seqn() {
        out.push(seqn);
    }
    out.extend_from_slice(&frame.code().to_bytes());
    // frames are capped at MAX_PAYLOAD on every checked path
    out.push(u8::try_from(frame.payload().len()).unwrap_or(u8::MAX));
    out.extend_from_slice(frame.payload());
    out
}

/// Checksum byte for `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

/// True when `bytes` (checksum included) sum to zero.
pub fn verify(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) == 0
}

impl Frame {
    /// Full radio encoding, checksum included.
    pub fn to_radio_bytes(&self) -> Vec<u8> {
        let mut bytes = radio_body(self);
        bytes.push(checksum(&bytes));
        bytes
    }

    /// RF checksum of this frame.
    pub fn checksum(&self) -> u8 {
        checksum(&radio_body(self))
    }
}
