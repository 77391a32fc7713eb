use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DecodeError, Result};

/// Highest device class representable in the 6-bit class field.
pub const MAX_CLASS: u8 = 63;
/// Highest device id representable in the 18-bit id field.
pub const MAX_ID: u32 = (1 << 18) - 1;

/// Text of an empty address slot.
pub const NULL_SLOT: &str = "--:------";

/// A RAMSES-II device address: device class plus numeric id.
///
/// Text form is `TT:NNNNNN` (both decimal); inside payloads the same address
/// appears as 24-bit hex, `(class << 18) | id`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    class: u8,
    id: u32,
}

impl Address {
    /// The all-devices broadcast address, `63:262142`.
    pub const BROADCAST: Address = Address {
        class: 63,
        id: 262_142,
    };

    /// Placeholder source used for gateway transmissions, `18:000730`.
    ///
    /// The HGI80 replaces it with its own id on air.
    pub const HGI_DEFAULT: Address = Address { class: 18, id: 730 };

    /// Build an address, checking field ranges.
    pub fn new(class: u8, id: u32) -> Result<Self> {
        if class > MAX_CLASS {
            return Err(DecodeError::bad_address(
                format!("{class:02}:{id:06}"),
                format!("device class exceeds {MAX_CLASS}"),
            ));
        }
        if id > MAX_ID {
            return Err(DecodeError::bad_address(
                format!("{class:02}:{id:06}"),
                format!("device id exceeds {MAX_ID}"),
            ));
        }
        Ok(Self { class, id })
    }

    /// Device class prefix (e.g. `1` for a controller).
    pub fn class(&self) -> u8 {
        self.class
    }

    /// Numeric id within the class.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Packed 24-bit form.
    pub fn to_u24(&self) -> u32 {
        (u32::from(self.class) << 18) | self.id
    }

    /// Unpack the 24-bit form.
    pub fn from_u24(value: u32) -> Result<Self> {
        if value > 0x00FF_FFFF {
            return Err(DecodeError::bad_address(
                format!("{value:X}"),
                "value exceeds 24 bits",
            ));
        }
        Self::new((value >> 18) as u8, value & MAX_ID)
    }

    /// Parse the 6-hex-digit payload form, e.g. `06368E` for `01:145038`.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 6 {
            return Err(DecodeError::bad_address(hex, "expected 6 hex digits"));
        }
        let value = u32::from_str_radix(hex, 16)
            .map_err(|_| DecodeError::bad_address(hex, "not hexadecimal"))?;
        Self::from_u24(value)
    }

    /// Render the 6-hex-digit payload form.
    pub fn to_hex(&self) -> String {
        format!("{:06X}", self.to_u24())
    }

    /// Radio bytes, most significant first.
    pub fn to_bytes(&self) -> [u8; 3] {
        let v = self.to_u24();
        [(v >> 16) as u8, (v >> 8) as u8, v as u8]
    }

    /// True for the all-devices broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// True for gateway interfaces (class 18).
    pub fn is_gateway(&self) -> bool {
        self.class == 18
    }
}

/// Parse one address slot; `--:------` is an empty slot.
pub fn parse_slot(text: &str) -> Result<Option<Address>> {
    if text == NULL_SLOT {
        return Ok(None);
    }
    text.parse().map(Some)
}

/// Render one address slot.
pub fn format_slot(slot: Option<&Address>) -> String {
    match slot {
        Some(addr) => addr.to_string(),
        None => NULL_SLOT.to_string(),
    }
}

impl FromStr for Address {
    type Err = DecodeError;

    fn from_str(text: &str) -> Result<Self> {
        let (class, id) = text
            .split_once(':')
            .ok_or_else(|| DecodeError::bad_address(text, "expected TT:NNNNNN"))?;
        if class.len() != 2 || id.len() != 6 {
            return Err(DecodeError::bad_address(text, "expected TT:NNNNNN"));
        }
        if !class.bytes().chain(id.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(DecodeError::bad_address(text, "non-decimal digits"));
        }
        let class: u8 = class
            .parse()
            .map_err(|_| DecodeError::bad_address(text, "invalid class"))?;
        let id: u32 = id
            .parse()
            .map_err(|_| DecodeError::bad_address(text, "invalid id"))?;
        Self::new(class, id)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:06}", self.class, self.id)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
