use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use ramses_frame::{decode_frame_with, Code, DecodeError, Frame, FrameConfig, Verb, MAX_PAYLOAD};

use crate::codes;
use crate::config::RegistryConfig;
use crate::device::DeviceType;
use crate::error::{Result, SchemaError};
use crate::message::Message;
use crate::parsers::{self, ParseContext, Parser};
use crate::payload::Payload;

const ALL_VERBS: &[Verb] = &[Verb::Info, Verb::Request, Verb::Reply, Verb::Write];
const NO_WRITE: &[Verb] = &[Verb::Info, Verb::Request, Verb::Reply];
const QUERY_ONLY: &[Verb] = &[Verb::Request, Verb::Reply];

/// How the first payload byte of a code is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// No index; the payload describes the sender or the whole system.
    None,
    /// Zone index, or a domain index from `F0` up.
    Zone,
    /// DHW circuit index.
    Dhw,
    /// Domain index (`FA`, `FC`, ...).
    Domain,
}

impl IndexKind {
    /// True when requests and replies for the code are matched on the first payload byte.
    pub fn is_indexed(&self) -> bool {
        matches!(self, IndexKind::Zone | IndexKind::Dhw)
    }
}

/// Schema of one command code.
#[derive(Clone)]
pub struct CommandSchema {
    pub code: Code,
    pub name: &'static str,
    pub verbs: &'static [Verb],
    pub index: IndexKind,
    /// Codes sent by controllers as one record per zone.
    pub array: bool,
    parser: Option<Parser>,
}

impl CommandSchema {
    fn new(
        code: Code,
        name: &'static str,
        verbs: &'static [Verb],
        index: IndexKind,
        parser: Parser,
    ) -> Self {
        Self {
            code,
            name,
            verbs,
            index,
            array: false,
            parser: Some(parser),
        }
    }

    fn with_array(mut self) -> Self {
        self.array = true;
        self
    }

    fn opaque(code: Code) -> Self {
        Self {
            code,
            name: "unknown",
            verbs: ALL_VERBS,
            index: IndexKind::None,
            array: false,
            parser: None,
        }
    }

    /// True for the fallback schema of an unknown code.
    pub fn is_opaque(&self) -> bool {
        self.parser.is_none()
    }

    pub fn allows(&self, verb: Verb) -> bool {
        self.verbs.contains(&verb)
    }

    /// Whether `frame` carries this code in its per-zone array form.
    pub fn has_array(&self, frame: &Frame) -> bool {
        self.array
            && frame.verb() == Verb::Info
            && frame.src() == frame.dst()
            && DeviceType::of(&frame.src()).announces_arrays()
    }

    /// Parse `frame`'s payload. Never fails: parser errors become [`Payload::Malformed`].
    pub fn parse(&self, frame: &Frame, config: &RegistryConfig) -> Payload {
        let Some(parser) = self.parser else {
            return Payload::Opaque;
        };
        let ctx = ParseContext {
            frame,
            payload: frame.payload(),
            array: self.has_array(frame),
            max_zones: config.max_zones,
        };
        match parser(&ctx) {
            Ok(records) => Payload::Parsed { records },
            Err(reason) => Payload::Malformed { reason },
        }
    }
}

impl std::fmt::Debug for CommandSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSchema")
            .field("code", &self.code)
            .field("name", &self.name)
            .field("index", &self.index)
            .field("array", &self.array)
            .field("opaque", &self.is_opaque())
            .finish()
    }
}

/// Code-keyed registry of payload schemas.
///
/// Lookups are total: a code without a schema resolves to an opaque
/// fallback, so inbound traffic never fails on an unknown code.
#[derive(Debug)]
pub struct Registry {
    schemas: HashMap<Code, CommandSchema>,
    config: RegistryConfig,
}

impl Registry {
    /// Registry with the built-in schemas and default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Registry with the built-in schemas and explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        let schemas = builtin_schemas()
            .into_iter()
            .map(|schema| (schema.code, schema))
            .collect();
        Self { schemas, config }
    }

    /// Shared registry with default config, built on first use.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Schema for `code`; an opaque schema when the code is unknown.
    pub fn lookup(&self, code: Code) -> CommandSchema {
        self.schemas
            .get(&code)
            .cloned()
            .unwrap_or_else(|| CommandSchema::opaque(code))
    }

    /// Check if a code has a registered schema.
    pub fn has_schema(&self, code: Code) -> bool {
        self.schemas.contains_key(&code)
    }

    /// Codes that have registered schemas, sorted.
    pub fn codes(&self) -> Vec<Code> {
        let mut codes: Vec<Code> = self.schemas.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    /// Attach a typed payload to a decoded frame.
    pub fn interpret(&self, frame: Frame) -> Message {
        let schema = self.lookup(frame.code());
        let payload = schema.parse(&frame, &self.config);
        let array = schema.has_array(&frame);
        if let Payload::Malformed { reason } = &payload {
            tracing::debug!(code = %frame.code(), reason = %reason, "payload failed its schema");
        }
        Message::new(frame, schema.name, payload, array)
    }

    /// Decode a gateway line into a [`Message`].
    pub fn decode(
        &self,
        line: &str,
        received_at: NaiveDateTime,
    ) -> std::result::Result<Message, DecodeError> {
        self.decode_with(line, received_at, &FrameConfig::default())
    }

    /// Decode with explicit codec options.
    pub fn decode_with(
        &self,
        line: &str,
        received_at: NaiveDateTime,
        frame_config: &FrameConfig,
    ) -> std::result::Result<Message, DecodeError> {
        let frame = decode_frame_with(line, received_at, frame_config)?;
        Ok(self.interpret(frame))
    }

    /// Validate an outbound frame: known code, allowed verb, parseable payload.
    pub fn validate(&self, frame: &Frame) -> Result<()> {
        let code = frame.code();
        if frame.len() > MAX_PAYLOAD {
            return Err(SchemaError::PayloadTooLong {
                code,
                len: frame.len(),
                limit: MAX_PAYLOAD,
            });
        }
        let Some(schema) = self.schemas.get(&code) else {
            if self.config.fail_on_unknown_code {
                return Err(SchemaError::UnknownCode(code));
            }
            return Ok(());
        };
        if !schema.allows(frame.verb()) {
            return Err(SchemaError::VerbNotAllowed {
                code,
                verb: frame.verb(),
            });
        }
        match schema.parse(frame, &self.config) {
            Payload::Malformed { reason } => Err(SchemaError::PayloadMismatch { code, reason }),
            _ => Ok(()),
        }
    }

    /// Get registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_schemas() -> Vec<CommandSchema> {
    use IndexKind::{Dhw, Domain, None as NoIndex, Zone};

    vec![
        CommandSchema::new(codes::ZONE_NAME, "zone_name", ALL_VERBS, Zone, parsers::zone_name),
        CommandSchema::new(
            codes::SCHEDULE_SYNC,
            "schedule_sync",
            QUERY_ONLY,
            NoIndex,
            parsers::schedule_sync,
        ),
        CommandSchema::new(
            codes::RELAY_DEMAND,
            "relay_demand",
            NO_WRITE,
            Zone,
            parsers::relay_demand,
        ),
        CommandSchema::new(
            codes::RELAY_FAILSAFE,
            "relay_failsafe",
            NO_WRITE,
            Zone,
            parsers::relay_failsafe,
        ),
        CommandSchema::new(codes::ZONE_CONFIG, "zone_config", ALL_VERBS, Zone, parsers::zone_config)
            .with_array(),
        CommandSchema::new(
            codes::ZONE_DEVICES,
            "zone_devices",
            NO_WRITE,
            Zone,
            parsers::zone_devices,
        ),
        CommandSchema::new(
            codes::DEVICE_BATTERY,
            "device_battery",
            NO_WRITE,
            NoIndex,
            parsers::device_battery,
        ),
        CommandSchema::new(codes::DHW_PARAMS, "dhw_params", ALL_VERBS, Dhw, parsers::dhw_params),
        CommandSchema::new(codes::DHW_TEMP, "dhw_temp", NO_WRITE, Dhw, parsers::dhw_temp),
        CommandSchema::new(
            codes::OUTDOOR_TEMP,
            "outdoor_temp",
            NO_WRITE,
            NoIndex,
            parsers::outdoor_temp,
        ),
        CommandSchema::new(
            codes::INDOOR_HUMIDITY,
            "indoor_humidity",
            NO_WRITE,
            NoIndex,
            parsers::indoor_humidity,
        ),
        CommandSchema::new(
            codes::WINDOW_STATE,
            "window_state",
            NO_WRITE,
            Zone,
            parsers::window_state,
        ),
        CommandSchema::new(
            codes::SYSTEM_SYNC,
            "system_sync",
            ALL_VERBS,
            NoIndex,
            parsers::system_sync,
        ),
        CommandSchema::new(codes::DHW_MODE, "dhw_mode", ALL_VERBS, Dhw, parsers::dhw_mode),
        CommandSchema::new(codes::RF_BIND, "rf_bind", ALL_VERBS, NoIndex, parsers::rf_bind),
        CommandSchema::new(
            codes::BOILER_SETPOINT,
            "boiler_setpoint",
            NO_WRITE,
            NoIndex,
            parsers::boiler_setpoint,
        ),
        CommandSchema::new(codes::SETPOINT, "setpoint", ALL_VERBS, Zone, parsers::setpoint)
            .with_array(),
        CommandSchema::new(codes::ZONE_MODE, "zone_mode", ALL_VERBS, Zone, parsers::zone_mode),
        CommandSchema::new(
            codes::SYSTEM_MODE,
            "system_mode",
            ALL_VERBS,
            NoIndex,
            parsers::system_mode,
        ),
        CommandSchema::new(
            codes::TEMPERATURE,
            "temperature",
            NO_WRITE,
            Zone,
            parsers::temperature,
        )
        .with_array(),
        CommandSchema::new(codes::DATETIME, "datetime", ALL_VERBS, NoIndex, parsers::datetime),
        CommandSchema::new(
            codes::HEAT_DEMAND,
            "heat_demand",
            NO_WRITE,
            Zone,
            parsers::heat_demand,
        )
        .with_array(),
        CommandSchema::new(
            codes::ACTUATOR_SYNC,
            "actuator_sync",
            NO_WRITE,
            Domain,
            parsers::actuator_sync,
        ),
        CommandSchema::new(
            codes::ACTUATOR_STATE,
            "actuator_state",
            NO_WRITE,
            NoIndex,
            parsers::actuator_state,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use ramses_frame::{Address, Verb};

    use super::*;
    use crate::payload::{FieldKind, Index, Value};

    fn dtm() -> NaiveDateTime {
        "2024-01-01T12:00:00".parse().unwrap()
    }

    #[test]
    fn lookup_is_total() {
        let registry = Registry::new();
        let unknown = registry.lookup(Code::new(0x7FFF));
        assert!(unknown.is_opaque());
        assert_eq!(unknown.name, "unknown");
        assert!(!registry.has_schema(Code::new(0x7FFF)));

        let known = registry.lookup(codes::TEMPERATURE);
        assert!(!known.is_opaque());
        assert_eq!(known.name, "temperature");
    }

    #[test]
    fn every_builtin_code_is_listed() {
        let registry = Registry::new();
        let codes = registry.codes();
        assert_eq!(codes.len(), 24);
        assert!(codes.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn unknown_code_decodes_to_opaque_payload() {
        let msg = Registry::global()
            .decode(" I --- 01:145038 --:------ 01:145038 0100 005 00FFFFFFFF", dtm())
            .unwrap();
        assert!(msg.payload().is_opaque());
        assert!(msg.is_valid());
    }

    #[test]
    fn array_form_only_for_controller_announcements() {
        let registry = Registry::new();
        let array = registry
            .decode(" I --- 01:145038 --:------ 01:145038 2309 006 0007D0010834", dtm())
            .unwrap();
        assert!(array.is_array());
        assert_eq!(array.records().len(), 2);

        let single = registry
            .decode(" I --- 04:189076 --:------ 04:189076 2309 003 0107D0", dtm())
            .unwrap();
        assert!(!single.is_array());
        assert_eq!(single.records()[0].index, Index::Zone(1));
    }

    #[test]
    fn malformed_payload_is_flagged_not_rejected() {
        let msg = Registry::new()
            .decode(" I --- 04:189076 --:------ 01:145038 30C9 002 0107", dtm())
            .unwrap();
        assert!(!msg.is_valid());
        assert!(msg.payload().is_malformed());
    }

    #[test]
    fn max_zones_is_configurable() {
        let registry = Registry::with_config(RegistryConfig {
            max_zones: 16,
            ..RegistryConfig::default()
        });
        let msg = registry
            .decode(" I --- 04:189076 --:------ 01:145038 30C9 003 0E07D0", dtm())
            .unwrap();
        assert!(msg.is_valid());
        assert_eq!(msg.records()[0].get(FieldKind::Temperature), Some(&Value::Float(20.0)));

        let msg = Registry::new()
            .decode(" I --- 04:189076 --:------ 01:145038 30C9 003 0E07D0", dtm())
            .unwrap();
        assert!(!msg.is_valid());
    }

    #[test]
    fn validate_outbound() {
        let registry = Registry::new();
        let hgi = Address::HGI_DEFAULT;
        let ctl: Address = "01:145038".parse().unwrap();

        let ok = Frame::new(Verb::Request, hgi, ctl, codes::TEMPERATURE, vec![0x01], dtm());
        assert!(registry.validate(&ok).is_ok());

        let unknown = Frame::new(Verb::Request, hgi, ctl, Code::new(0x7FFF), vec![0x00], dtm());
        assert!(matches!(
            registry.validate(&unknown),
            Err(SchemaError::UnknownCode(_))
        ));

        let bad_verb = Frame::new(Verb::Write, hgi, ctl, codes::TEMPERATURE, vec![0x01], dtm());
        assert!(matches!(
            registry.validate(&bad_verb),
            Err(SchemaError::VerbNotAllowed { .. })
        ));

        let bad_payload = Frame::new(Verb::Write, hgi, ctl, codes::SETPOINT, vec![0x01], dtm());
        assert!(matches!(
            registry.validate(&bad_payload),
            Err(SchemaError::PayloadMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_oversize_payload() {
        let registry = Registry::with_config(RegistryConfig {
            fail_on_unknown_code: false,
            ..RegistryConfig::default()
        });
        let hgi = Address::HGI_DEFAULT;
        let ctl: Address = "01:145038".parse().unwrap();

        let huge = Frame::new(Verb::Write, hgi, ctl, Code::new(0x7FFF), vec![0u8; 300], dtm());
        assert!(matches!(
            registry.validate(&huge),
            Err(SchemaError::PayloadTooLong { len: 300, limit: 255, .. })
        ));

        let largest = Frame::new(Verb::Write, hgi, ctl, Code::new(0x7FFF), vec![0u8; 255], dtm());
        assert!(registry.validate(&largest).is_ok());
    }

    #[test]
    fn permissive_registry_passes_unknown_codes() {
        let registry = Registry::with_config(RegistryConfig {
            fail_on_unknown_code: false,
            ..RegistryConfig::default()
        });
        let frame = Frame::new(
            Verb::Request,
            Address::HGI_DEFAULT,
            "01:145038".parse().unwrap(),
            Code::new(0x7FFF),
            vec![0x00],
            dtm(),
        );
        assert!(registry.validate(&frame).is_ok());
    }
}
