use chrono::NaiveDateTime;
use ramses_frame::{encode_frame, Address, Code, Frame, Verb};
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::payload::{Payload, Record};

/// A decoded frame together with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    frame: Frame,
    name: &'static str,
    payload: Payload,
    array: bool,
}

impl Message {
    pub(crate) fn new(frame: Frame, name: &'static str, payload: Payload, array: bool) -> Self {
        Self {
            frame,
            name,
            payload,
            array,
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    /// Schema name of the code (`"unknown"` for opaque payloads).
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Parsed records; empty for opaque and malformed payloads.
    pub fn records(&self) -> &[Record] {
        self.payload.records()
    }

    /// False when the code is known but its payload failed to parse.
    pub fn is_valid(&self) -> bool {
        !self.payload.is_malformed()
    }

    /// True when the payload is a per-zone array.
    pub fn is_array(&self) -> bool {
        self.array
    }

    pub fn src(&self) -> Address {
        self.frame.src()
    }

    pub fn dst(&self) -> Address {
        self.frame.dst()
    }

    pub fn code(&self) -> Code {
        self.frame.code()
    }

    pub fn verb(&self) -> Verb {
        self.frame.verb()
    }

    pub fn dtm(&self) -> NaiveDateTime {
        self.frame.dtm()
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Wire form of the underlying frame.
    pub fn encode(&self) -> String {
        encode_frame(&self.frame)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Message", 8)?;
        state.serialize_field("dtm", &self.frame.dtm())?;
        state.serialize_field("verb", &self.frame.verb())?;
        state.serialize_field("src", &self.frame.src())?;
        state.serialize_field("dst", &self.frame.dst())?;
        state.serialize_field("code", &self.frame.code())?;
        state.serialize_field("name", self.name)?;
        state.serialize_field("raw", &self.frame.payload_hex())?;
        state.serialize_field("payload", &self.payload)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use crate::payload::{FieldKind, Value};
    use crate::registry::Registry;

    #[test]
    fn accessors_follow_the_frame() {
        let at = "2024-01-01T12:00:00".parse().unwrap();
        let line = "RP --- 01:145038 18:013393 --:------ 2309 003 0107D0";
        let msg = Registry::global().decode(line, at).unwrap();

        assert_eq!(msg.name(), "setpoint");
        assert_eq!(msg.src().to_string(), "01:145038");
        assert_eq!(msg.dst().to_string(), "18:013393");
        assert_eq!(msg.len(), 3);
        assert_eq!(msg.dtm(), at);
        assert_eq!(msg.encode(), line);
        assert_eq!(
            msg.records()[0].get(FieldKind::Setpoint),
            Some(&Value::Float(20.0))
        );
    }

    #[test]
    fn serializes_for_output() {
        let at = "2024-01-01T12:00:00".parse().unwrap();
        let msg = Registry::global()
            .decode(" I --- 04:189076 --:------ 01:145038 30C9 003 0107D0", at)
            .unwrap();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["verb"], "I");
        assert_eq!(json["code"], "30C9");
        assert_eq!(json["raw"], "0107D0");
        assert_eq!(json["payload"]["kind"], "parsed");
    }
}
