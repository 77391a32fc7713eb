//! Outbound commands and the replies they expect.
//!
//! Builders address the controller from the gateway placeholder `18:000730`;
//! the gateway firmware substitutes its own id on transmit.

use std::fmt;

use bytes::Bytes;
use chrono::{Local, NaiveDateTime};
use ramses_frame::{encode_frame, Address, Code, Frame, Verb};

use crate::codes;
use crate::error::{Result, SchemaError};
use crate::payload::{DeviceRole, SystemMode, ZoneMode};
use crate::registry::Registry;
use crate::units::{dtm_to_bytes, dtm_to_bytes_with_seconds, temp_to_bytes, text_to_bytes};

const MAX_NAME_LEN: usize = 20;
const MIN_SETPOINT: f64 = 5.0;
const MAX_SETPOINT: f64 = 35.0;

/// Send priority. Commands are sent in priority order, FIFO within a class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    High,
    #[default]
    Default,
    Low,
}

/// True when `actual` answers for `expected`, treating the gateway
/// placeholder as any gateway-class address.
pub fn address_matches(expected: Address, actual: Address) -> bool {
    expected == actual
        || (expected == Address::HGI_DEFAULT && actual.is_gateway())
        || (actual == Address::HGI_DEFAULT && expected.is_gateway())
}

/// Shape of the frame that completes a command.
///
/// A request expects a reply from its destination back to its source; a
/// write expects the destination to announce the new value. For indexed
/// codes the first payload byte (zone or DHW index) must match as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPredicate {
    pub verb: Verb,
    pub code: Code,
    pub src: Address,
    pub dst: Option<Address>,
    pub context: Option<u8>,
}

impl ReplyPredicate {
    /// Expected reply for `frame`, or `None` for verbs that expect nothing.
    pub fn for_frame(frame: &Frame, indexed: bool) -> Option<Self> {
        let context = if indexed {
            frame.payload().first().copied()
        } else {
            None
        };
        match frame.verb() {
            Verb::Request => Some(Self {
                verb: Verb::Reply,
                code: frame.code(),
                src: frame.dst(),
                dst: Some(frame.src()),
                context,
            }),
            Verb::Write => Some(Self {
                verb: Verb::Info,
                code: frame.code(),
                src: frame.dst(),
                dst: None,
                context,
            }),
            Verb::Info | Verb::Reply => None,
        }
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        frame.verb() == self.verb
            && frame.code() == self.code
            && frame.src() == self.src
            && self
                .dst
                .is_none_or(|dst| address_matches(dst, frame.dst()))
            && self
                .context
                .is_none_or(|ctx| frame.payload().first() == Some(&ctx))
    }
}

/// Requested zone mode for [`Command::set_zone_mode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoneModeRequest {
    FollowSchedule,
    Permanent { setpoint: f64 },
    Countdown { setpoint: f64, minutes: u32 },
    Temporary { setpoint: f64, until: NaiveDateTime },
}

/// Requested DHW mode for [`Command::set_dhw_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhwModeRequest {
    FollowSchedule,
    Permanent { active: bool },
    Temporary { active: bool, until: NaiveDateTime },
}

/// A frame to transmit, with its expected reply and send options.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    frame: Frame,
    reply: Option<ReplyPredicate>,
    priority: Priority,
    retries: Option<u8>,
}

impl Command {
    pub fn new(verb: Verb, src: Address, dst: Address, code: Code, payload: impl Into<Bytes>) -> Self {
        let frame = Frame::new(verb, src, dst, code, payload, Local::now().naive_local());
        Self::from_frame(frame)
    }

    /// Wrap an already built frame, deriving the expected reply from the registry.
    pub fn from_frame(frame: Frame) -> Self {
        let indexed = Registry::global().lookup(frame.code()).index.is_indexed();
        let reply = ReplyPredicate::for_frame(&frame, indexed);
        Self {
            frame,
            reply,
            priority: Priority::Default,
            retries: None,
        }
    }

    fn request(ctl: Address, code: Code, payload: impl Into<Bytes>) -> Self {
        Self::new(Verb::Request, Address::HGI_DEFAULT, ctl, code, payload)
    }

    fn write(ctl: Address, code: Code, payload: impl Into<Bytes>) -> Self {
        Self::new(Verb::Write, Address::HGI_DEFAULT, ctl, code, payload)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the dispatcher's retry budget for this command.
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Complete on the echo alone, ignoring any answer from the destination.
    pub fn without_reply(mut self) -> Self {
        self.reply = None;
        self
    }

    /// Send from `src` instead of the gateway placeholder.
    pub fn with_src(self, src: Address) -> Self {
        let frame = &self.frame;
        let rebuilt = Frame::new(
            frame.verb(),
            src,
            frame.dst(),
            frame.code(),
            frame.payload().clone(),
            frame.dtm(),
        );
        let rebuilt = Self::from_frame(rebuilt);
        Self {
            priority: self.priority,
            retries: self.retries,
            reply: self.reply.and(rebuilt.reply),
            frame: rebuilt.frame,
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn verb(&self) -> Verb {
        self.frame.verb()
    }

    pub fn code(&self) -> Code {
        self.frame.code()
    }

    pub fn src(&self) -> Address {
        self.frame.src()
    }

    pub fn dst(&self) -> Address {
        self.frame.dst()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn retries(&self) -> Option<u8> {
        self.retries
    }

    pub fn expected_reply(&self) -> Option<&ReplyPredicate> {
        self.reply.as_ref()
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Wire form, as written to the gateway.
    pub fn to_line(&self) -> String {
        encode_frame(&self.frame)
    }

    /// RF bind frame (`1FC9`) listing one `idx code device` entry per code.
    ///
    /// An offer (` I` from `device` to itself) also lists `1FC9`. The binding
    /// handshake resends these on its own timers, so they expect no reply.
    pub fn rf_bind(verb: Verb, device: Address, dst: Address, idx: u8, bind_codes: &[Code]) -> Self {
        let offer = verb == Verb::Info && dst == device;
        let trailer = (offer && !bind_codes.contains(&codes::RF_BIND)).then_some(codes::RF_BIND);
        let mut payload = Vec::with_capacity(6 * (bind_codes.len() + 1));
        for code in bind_codes.iter().copied().chain(trailer) {
            payload.push(idx);
            payload.extend_from_slice(&code.to_bytes());
            payload.extend_from_slice(&device.to_bytes());
        }
        Self::new(verb, device, dst, codes::RF_BIND, payload).without_reply()
    }

    pub fn get_zone_name(ctl: Address, zone: u8) -> Self {
        Self::request(ctl, codes::ZONE_NAME, vec![zone, 0x00])
    }

    pub fn set_zone_name(ctl: Address, zone: u8, name: &str) -> Result<Self> {
        if !name.is_ascii() || name.len() > MAX_NAME_LEN {
            return Err(SchemaError::InvalidArgument(format!(
                "zone name must be at most {MAX_NAME_LEN} ASCII characters"
            )));
        }
        let mut payload = vec![zone, 0x00];
        payload.extend(text_to_bytes(name, MAX_NAME_LEN));
        Ok(Self::write(ctl, codes::ZONE_NAME, payload))
    }

    pub fn get_zone_config(ctl: Address, zone: u8) -> Self {
        Self::request(ctl, codes::ZONE_CONFIG, vec![zone])
    }

    pub fn get_zone_devices(ctl: Address, zone: u8, role: DeviceRole) -> Self {
        Self::request(ctl, codes::ZONE_DEVICES, vec![zone, role.to_byte()])
    }

    pub fn get_zone_temp(ctl: Address, zone: u8) -> Self {
        Self::request(ctl, codes::TEMPERATURE, vec![zone])
    }

    pub fn get_zone_setpoint(ctl: Address, zone: u8) -> Self {
        Self::request(ctl, codes::SETPOINT, vec![zone])
    }

    /// Set a zone setpoint; `None` reverts to the scheduled value.
    pub fn set_zone_setpoint(ctl: Address, zone: u8, setpoint: Option<f64>) -> Result<Self> {
        if let Some(value) = setpoint {
            check_setpoint(value)?;
        }
        let [hi, lo] = temp_to_bytes(setpoint);
        Ok(Self::write(ctl, codes::SETPOINT, vec![zone, hi, lo]))
    }

    pub fn get_zone_mode(ctl: Address, zone: u8) -> Self {
        Self::request(ctl, codes::ZONE_MODE, vec![zone])
    }

    pub fn set_zone_mode(ctl: Address, zone: u8, request: ZoneModeRequest) -> Result<Self> {
        let (mode, setpoint, duration, until) = match request {
            ZoneModeRequest::FollowSchedule => (ZoneMode::FollowSchedule, None, None, None),
            ZoneModeRequest::Permanent { setpoint } => {
                (ZoneMode::PermanentOverride, Some(setpoint), None, None)
            }
            ZoneModeRequest::Countdown { setpoint, minutes } => {
                if minutes == 0 || minutes > 0x00FF_FFFE {
                    return Err(SchemaError::InvalidArgument(format!(
                        "countdown of {minutes} minutes is out of range"
                    )));
                }
                (ZoneMode::CountdownOverride, Some(setpoint), Some(minutes), None)
            }
            ZoneModeRequest::Temporary { setpoint, until } => {
                (ZoneMode::TemporaryOverride, Some(setpoint), None, Some(until))
            }
        };
        if let Some(value) = setpoint {
            check_setpoint(value)?;
        }

        let mut payload = vec![zone];
        payload.extend(temp_to_bytes(setpoint));
        payload.push(mode.to_byte());
        match duration {
            Some(minutes) => payload.extend(&minutes.to_be_bytes()[1..]),
            None => payload.extend([0xFF; 3]),
        }
        payload.extend(dtm_to_bytes(until));
        Ok(Self::write(ctl, codes::ZONE_MODE, payload))
    }

    pub fn get_system_mode(ctl: Address) -> Self {
        Self::request(ctl, codes::SYSTEM_MODE, vec![0xFF])
    }

    /// Set the system mode, permanently or until `until`.
    pub fn set_system_mode(ctl: Address, mode: SystemMode, until: Option<NaiveDateTime>) -> Self {
        let mut payload = vec![mode.to_byte()];
        payload.extend(dtm_to_bytes(until));
        payload.push(u8::from(until.is_some()));
        Self::write(ctl, codes::SYSTEM_MODE, payload)
    }

    pub fn get_dhw_temp(ctl: Address) -> Self {
        Self::request(ctl, codes::DHW_TEMP, vec![0x00])
    }

    pub fn get_dhw_mode(ctl: Address) -> Self {
        Self::request(ctl, codes::DHW_MODE, vec![0x00])
    }

    pub fn get_dhw_params(ctl: Address) -> Self {
        Self::request(ctl, codes::DHW_PARAMS, vec![0x00])
    }

    pub fn set_dhw_mode(ctl: Address, request: DhwModeRequest) -> Self {
        let (active, mode, until) = match request {
            DhwModeRequest::FollowSchedule => (0xFF, ZoneMode::FollowSchedule, None),
            DhwModeRequest::Permanent { active } => {
                (u8::from(active), ZoneMode::PermanentOverride, None)
            }
            DhwModeRequest::Temporary { active, until } => {
                (u8::from(active), ZoneMode::TemporaryOverride, Some(until))
            }
        };
        let mut payload = vec![0x00, active, mode.to_byte(), 0xFF, 0xFF, 0xFF];
        if let Some(until) = until {
            payload.extend(dtm_to_bytes(Some(until)));
        }
        Self::write(ctl, codes::DHW_MODE, payload)
    }

    pub fn get_outdoor_temp(ctl: Address) -> Self {
        Self::request(ctl, codes::OUTDOOR_TEMP, vec![0x00])
    }

    pub fn get_system_time(ctl: Address) -> Self {
        Self::request(ctl, codes::DATETIME, vec![0x00])
    }

    pub fn set_system_time(ctl: Address, dtm: NaiveDateTime) -> Self {
        let mut payload = vec![0x00, 0x60];
        payload.extend(dtm_to_bytes_with_seconds(dtm));
        Self::write(ctl, codes::DATETIME, payload)
    }

    pub fn get_schedule_version(ctl: Address) -> Self {
        Self::request(ctl, codes::SCHEDULE_SYNC, vec![0x00])
    }
}

fn check_setpoint(value: f64) -> Result<()> {
    if (MIN_SETPOINT..=MAX_SETPOINT).contains(&value) {
        return Ok(());
    }
    Err(SchemaError::InvalidArgument(format!(
        "setpoint {value} is outside {MIN_SETPOINT}..={MAX_SETPOINT}"
    )))
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

#[cfg(test)]
mod tests {
    use ramses_frame::decode_frame;

    use super::*;
    use crate::payload::{FieldKind, Value};

    fn ctl() -> Address {
        "01:145038".parse().unwrap()
    }

    fn dtm(text: &str) -> NaiveDateTime {
        text.parse().unwrap()
    }

    #[test]
    fn request_line_shape() {
        let cmd = Command::get_zone_temp(ctl(), 2);
        assert_eq!(
            cmd.to_line(),
            "RQ --- 18:000730 01:145038 --:------ 30C9 001 02"
        );
        assert_eq!(cmd.priority(), Priority::Default);
    }

    #[test]
    fn request_expects_swapped_reply_with_context() {
        let cmd = Command::get_zone_setpoint(ctl(), 1);
        let predicate = cmd.expected_reply().unwrap();
        assert_eq!(predicate.verb, Verb::Reply);
        assert_eq!(predicate.context, Some(0x01));

        let at = dtm("2024-01-01T12:00:00");
        let reply = decode_frame("RP --- 01:145038 18:013393 --:------ 2309 003 0107D0", at).unwrap();
        assert!(predicate.matches(&reply), "placeholder matches the real gateway id");

        let other_zone =
            decode_frame("RP --- 01:145038 18:013393 --:------ 2309 003 0207D0", at).unwrap();
        assert!(!predicate.matches(&other_zone));

        let other_dst =
            decode_frame("RP --- 01:145038 04:189076 --:------ 2309 003 0107D0", at).unwrap();
        assert!(!predicate.matches(&other_dst));
    }

    #[test]
    fn write_expects_announcement_from_destination() {
        let cmd = Command::set_zone_setpoint(ctl(), 1, Some(21.5)).unwrap();
        assert_eq!(cmd.frame().payload().as_ref(), &[0x01, 0x08, 0x66]);

        let predicate = cmd.expected_reply().unwrap();
        assert_eq!(predicate.verb, Verb::Info);
        let at = dtm("2024-01-01T12:00:00");
        let announce =
            decode_frame(" I --- 01:145038 --:------ 18:013393 2309 003 010866", at).unwrap();
        assert!(predicate.matches(&announce));
    }

    #[test]
    fn system_mode_needs_no_context() {
        let cmd = Command::get_system_mode(ctl());
        assert_eq!(cmd.expected_reply().unwrap().context, None);

        let at = dtm("2024-01-01T12:00:00");
        let reply = decode_frame(
            "RP --- 01:145038 18:000730 --:------ 2E04 008 00FFFFFFFFFFFF00",
            at,
        )
        .unwrap();
        assert!(cmd.expected_reply().unwrap().matches(&reply));
    }

    #[test]
    fn info_commands_expect_nothing() {
        let cmd = Command::new(
            Verb::Info,
            Address::HGI_DEFAULT,
            Address::HGI_DEFAULT,
            codes::SYSTEM_SYNC,
            vec![0x00, 0x0B, 0xB8],
        );
        assert!(!cmd.expects_reply());
    }

    #[test]
    fn builders_produce_valid_frames() {
        let until = dtm("2024-03-01T18:30:00");
        let registry = Registry::global();
        let commands = vec![
            Command::get_zone_name(ctl(), 0),
            Command::set_zone_name(ctl(), 0, "Kitchen").unwrap(),
            Command::get_zone_config(ctl(), 3),
            Command::get_zone_devices(ctl(), 1, DeviceRole::ZoneActuator),
            Command::get_zone_mode(ctl(), 4),
            Command::set_zone_mode(ctl(), 4, ZoneModeRequest::FollowSchedule).unwrap(),
            Command::set_zone_mode(ctl(), 4, ZoneModeRequest::Permanent { setpoint: 19.0 }).unwrap(),
            Command::set_zone_mode(
                ctl(),
                4,
                ZoneModeRequest::Countdown {
                    setpoint: 19.0,
                    minutes: 90,
                },
            )
            .unwrap(),
            Command::set_zone_mode(
                ctl(),
                4,
                ZoneModeRequest::Temporary {
                    setpoint: 19.0,
                    until,
                },
            )
            .unwrap(),
            Command::get_system_mode(ctl()),
            Command::set_system_mode(ctl(), SystemMode::Away, Some(until)),
            Command::set_system_mode(ctl(), SystemMode::Auto, None),
            Command::get_dhw_temp(ctl()),
            Command::get_dhw_mode(ctl()),
            Command::get_dhw_params(ctl()),
            Command::set_dhw_mode(ctl(), DhwModeRequest::FollowSchedule),
            Command::set_dhw_mode(ctl(), DhwModeRequest::Temporary { active: true, until }),
            Command::get_outdoor_temp(ctl()),
            Command::get_system_time(ctl()),
            Command::set_system_time(ctl(), until),
            Command::get_schedule_version(ctl()),
        ];
        for cmd in commands {
            registry
                .validate(cmd.frame())
                .unwrap_or_else(|err| panic!("{cmd}: {err}"));
        }
    }

    #[test]
    fn zone_mode_payload_decodes_back() {
        let until = dtm("2024-03-01T18:30:00");
        let cmd = Command::set_zone_mode(
            ctl(),
            2,
            ZoneModeRequest::Temporary {
                setpoint: 18.5,
                until,
            },
        )
        .unwrap();
        let msg = Registry::global().interpret(cmd.frame().clone());
        let record = &msg.records()[0];
        assert_eq!(record.get(FieldKind::Setpoint), Some(&Value::Float(18.5)));
        assert_eq!(record.get(FieldKind::ModeUntil), Some(&Value::DateTime(until)));
        assert_eq!(
            record.get(FieldKind::ZoneMode),
            Some(&Value::Label("temporary_override"))
        );
    }

    #[test]
    fn argument_checks() {
        assert!(Command::set_zone_setpoint(ctl(), 1, Some(40.0)).is_err());
        assert!(Command::set_zone_setpoint(ctl(), 1, None).is_ok());
        assert!(Command::set_zone_name(ctl(), 1, "a name far too long for a zone").is_err());
        assert!(Command::set_zone_mode(
            ctl(),
            1,
            ZoneModeRequest::Countdown {
                setpoint: 20.0,
                minutes: 0
            }
        )
        .is_err());
    }

    #[test]
    fn rf_bind_offer_lists_bind_code_last() {
        let sensor: Address = "07:045960".parse().unwrap();
        let offer = Command::rf_bind(Verb::Info, sensor, sensor, 0x00, &[codes::DHW_TEMP]);
        assert_eq!(
            offer.to_line(),
            " I --- 07:045960 --:------ 07:045960 1FC9 012 0012601CB388001FC91CB388"
        );
        assert!(!offer.expects_reply());
        Registry::global().validate(offer.frame()).unwrap();

        let accept = Command::rf_bind(Verb::Write, ctl(), sensor, 0x00, &[codes::DHW_TEMP]);
        assert_eq!(accept.frame().len(), 6);
        assert!(!accept.expects_reply());
        assert!(!accept.with_src("18:013393".parse().unwrap()).expects_reply());
    }

    #[test]
    fn with_src_keeps_options() {
        let gateway: Address = "18:013393".parse().unwrap();
        let cmd = Command::get_zone_temp(ctl(), 0)
            .with_priority(Priority::High)
            .with_retries(1)
            .with_src(gateway);
        assert_eq!(cmd.src(), gateway);
        assert_eq!(cmd.priority(), Priority::High);
        assert_eq!(cmd.retries(), Some(1));
        assert_eq!(cmd.expected_reply().unwrap().dst, Some(gateway));
    }
}
