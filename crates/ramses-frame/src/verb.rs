use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Frame verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Verb {
    /// ` I`: unsolicited information / announcement.
    #[serde(rename = "I")]
    Info,
    /// `RQ`: request.
    #[serde(rename = "RQ")]
    Request,
    /// `RP`: reply to a request.
    #[serde(rename = "RP")]
    Reply,
    /// ` W`: write.
    #[serde(rename = "W")]
    Write,
}

impl Verb {
    /// Two-character wire form, space padded.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Verb::Info => " I",
            Verb::Request => "RQ",
            Verb::Reply => "RP",
            Verb::Write => " W",
        }
    }

    /// Trimmed form, as used in logs.
    pub fn as_str(&self) -> &'static str {
        self.as_wire().trim_start()
    }

    /// Packet-type bits of the radio header byte.
    pub fn header_bits(&self) -> u8 {
        match self {
            Verb::Request => 0x00,
            Verb::Info => 0x10,
            Verb::Write => 0x20,
            Verb::Reply => 0x30,
        }
    }
}

impl FromStr for Verb {
    type Err = DecodeError;

    fn from_str(text: &str) -> Result<Self, DecodeError> {
        match text.trim() {
            "I" => Ok(Verb::Info),
            "RQ" => Ok(Verb::Request),
            "RP" => Ok(Verb::Reply),
            "W" => Ok(Verb::Write),
            other => Err(DecodeError::malformed(format!("unknown verb {other:?}"))),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_forms_are_two_chars() {
        for verb in [Verb::Info, Verb::Request, Verb::Reply, Verb::Write] {
            assert_eq!(verb.as_wire().len(), 2);
            assert_eq!(verb.as_wire().parse::<Verb>().unwrap(), verb);
        }
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!("XX".parse::<Verb>().is_err());
    }
}
