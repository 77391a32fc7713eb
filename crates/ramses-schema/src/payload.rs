//! Typed payload values.
//!
//! A parsed payload is a list of [`Record`]s. Most codes yield a single
//! record; controller announcements of per-zone state yield one record per
//! zone. Each record carries the index it applies to and its typed fields.

use std::fmt;

use chrono::NaiveDateTime;
use ramses_frame::{Address, Code};
use serde::Serialize;

/// Decoded payload of a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Payload decoded under its code's schema.
    Parsed { records: Vec<Record> },
    /// No schema for this code; only the raw bytes are available.
    Opaque,
    /// Known code whose payload failed its parser.
    Malformed { reason: String },
}

impl Payload {
    pub fn records(&self) -> &[Record] {
        match self {
            Payload::Parsed { records } => records,
            _ => &[],
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Payload::Malformed { .. })
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Payload::Opaque)
    }
}

/// What a record applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Index {
    /// The sending device, or the system as a whole.
    None,
    /// A heating zone.
    Zone(u8),
    /// A DHW circuit (`00`, or `01` for a second valve).
    Dhw(u8),
    /// A domain such as `FA` (DHW) or `FC` (heat source).
    Domain(u8),
}

impl Index {
    pub fn zone(&self) -> Option<u8> {
        match self {
            Index::Zone(idx) => Some(*idx),
            _ => None,
        }
    }

    /// True for the DHW circuit, addressed either by DHW index or by domain `FA`.
    pub fn is_dhw(&self) -> bool {
        matches!(self, Index::Dhw(_) | Index::Domain(crate::codes::DOMAIN_DHW))
    }
}

/// One indexed group of fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub index: Index,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(index: Index) -> Self {
        Self {
            index,
            fields: Vec::new(),
        }
    }

    pub fn with(mut self, kind: FieldKind, value: impl Into<Value>) -> Self {
        self.fields.push(Field {
            kind,
            value: value.into(),
        });
        self
    }

    pub fn get(&self, kind: FieldKind) -> Option<&Value> {
        self.fields
            .iter()
            .find(|field| field.kind == kind)
            .map(|field| &field.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub kind: FieldKind,
    pub value: Value,
}

/// A field value. `Null` is a sensor's "not available" marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Label(&'static str),
    DateTime(NaiveDateTime),
    Address(Address),
    Addresses(Vec<Address>),
    Code(Code),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            Value::Label(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_addresses(&self) -> &[Address] {
        match self {
            Value::Addresses(values) => values,
            Value::Address(value) => std::slice::from_ref(value),
            _ => &[],
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("-"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Text(value) => f.write_str(value),
            Value::Label(value) => f.write_str(value),
            Value::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%dT%H:%M:%S")),
            Value::Address(value) => write!(f, "{value}"),
            Value::Addresses(values) => {
                let joined: Vec<String> = values.iter().map(Address::to_string).collect();
                f.write_str(&joined.join(","))
            }
            Value::Code(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&'static str> for Value {
    fn from(value: &'static str) -> Self {
        Value::Label(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<Address> for Value {
    fn from(value: Address) -> Self {
        Value::Address(value)
    }
}

impl From<Vec<Address>> for Value {
    fn from(value: Vec<Address>) -> Self {
        Value::Addresses(value)
    }
}

impl From<Code> for Value {
    fn from(value: Code) -> Self {
        Value::Code(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Staleness class of a field. Each class has its own age threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    Measurement,
    Setting,
    Configuration,
    Diagnostic,
}

/// Every field a parser can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Temperature,
    HeatDemand,
    RelayDemand,
    WindowOpen,
    RelativeHumidity,
    DewpointTemp,
    ModulationLevel,
    BoilerSetpoint,
    ActuatorSync,
    Setpoint,
    ZoneMode,
    ModeUntil,
    ModeDuration,
    SystemMode,
    DhwActive,
    DhwMode,
    ZoneName,
    MinTemp,
    MaxTemp,
    LocalOverride,
    OpenWindowFunction,
    MultiroomMode,
    RelayFailsafe,
    DhwSetpoint,
    DhwOverrun,
    DhwDifferential,
    DeviceRole,
    ZoneDevices,
    BindCode,
    BindDevice,
    BatteryLow,
    BatteryLevel,
    RemainingSeconds,
    ChangeCounter,
    DateTime,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Temperature => "temperature",
            FieldKind::HeatDemand => "heat_demand",
            FieldKind::RelayDemand => "relay_demand",
            FieldKind::WindowOpen => "window_open",
            FieldKind::RelativeHumidity => "relative_humidity",
            FieldKind::DewpointTemp => "dewpoint_temp",
            FieldKind::ModulationLevel => "modulation_level",
            FieldKind::BoilerSetpoint => "boiler_setpoint",
            FieldKind::ActuatorSync => "actuator_sync",
            FieldKind::Setpoint => "setpoint",
            FieldKind::ZoneMode => "zone_mode",
            FieldKind::ModeUntil => "mode_until",
            FieldKind::ModeDuration => "mode_duration",
            FieldKind::SystemMode => "system_mode",
            FieldKind::DhwActive => "dhw_active",
            FieldKind::DhwMode => "dhw_mode",
            FieldKind::ZoneName => "zone_name",
            FieldKind::MinTemp => "min_temp",
            FieldKind::MaxTemp => "max_temp",
            FieldKind::LocalOverride => "local_override",
            FieldKind::OpenWindowFunction => "openwindow_function",
            FieldKind::MultiroomMode => "multiroom_mode",
            FieldKind::RelayFailsafe => "relay_failsafe",
            FieldKind::DhwSetpoint => "dhw_setpoint",
            FieldKind::DhwOverrun => "dhw_overrun",
            FieldKind::DhwDifferential => "dhw_differential",
            FieldKind::DeviceRole => "device_role",
            FieldKind::ZoneDevices => "zone_devices",
            FieldKind::BindCode => "bind_code",
            FieldKind::BindDevice => "bind_device",
            FieldKind::BatteryLow => "battery_low",
            FieldKind::BatteryLevel => "battery_level",
            FieldKind::RemainingSeconds => "remaining_seconds",
            FieldKind::ChangeCounter => "change_counter",
            FieldKind::DateTime => "datetime",
        }
    }

    pub fn class(&self) -> FieldClass {
        match self {
            FieldKind::Temperature
            | FieldKind::HeatDemand
            | FieldKind::RelayDemand
            | FieldKind::WindowOpen
            | FieldKind::RelativeHumidity
            | FieldKind::DewpointTemp
            | FieldKind::ModulationLevel
            | FieldKind::BoilerSetpoint
            | FieldKind::ActuatorSync => FieldClass::Measurement,
            FieldKind::Setpoint
            | FieldKind::ZoneMode
            | FieldKind::ModeUntil
            | FieldKind::ModeDuration
            | FieldKind::SystemMode
            | FieldKind::DhwActive
            | FieldKind::DhwMode => FieldClass::Setting,
            FieldKind::ZoneName
            | FieldKind::MinTemp
            | FieldKind::MaxTemp
            | FieldKind::LocalOverride
            | FieldKind::OpenWindowFunction
            | FieldKind::MultiroomMode
            | FieldKind::RelayFailsafe
            | FieldKind::DhwSetpoint
            | FieldKind::DhwOverrun
            | FieldKind::DhwDifferential
            | FieldKind::DeviceRole
            | FieldKind::ZoneDevices
            | FieldKind::BindCode
            | FieldKind::BindDevice => FieldClass::Configuration,
            FieldKind::BatteryLow
            | FieldKind::BatteryLevel
            | FieldKind::RemainingSeconds
            | FieldKind::ChangeCounter
            | FieldKind::DateTime => FieldClass::Diagnostic,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for FieldKind {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, String> {
        ALL_FIELDS
            .iter()
            .copied()
            .find(|kind| kind.name() == text)
            .ok_or_else(|| format!("unknown field {text:?}"))
    }
}

const ALL_FIELDS: [FieldKind; 35] = [
    FieldKind::Temperature,
    FieldKind::HeatDemand,
    FieldKind::RelayDemand,
    FieldKind::WindowOpen,
    FieldKind::RelativeHumidity,
    FieldKind::DewpointTemp,
    FieldKind::ModulationLevel,
    FieldKind::BoilerSetpoint,
    FieldKind::ActuatorSync,
    FieldKind::Setpoint,
    FieldKind::ZoneMode,
    FieldKind::ModeUntil,
    FieldKind::ModeDuration,
    FieldKind::SystemMode,
    FieldKind::DhwActive,
    FieldKind::DhwMode,
    FieldKind::ZoneName,
    FieldKind::MinTemp,
    FieldKind::MaxTemp,
    FieldKind::LocalOverride,
    FieldKind::OpenWindowFunction,
    FieldKind::MultiroomMode,
    FieldKind::RelayFailsafe,
    FieldKind::DhwSetpoint,
    FieldKind::DhwOverrun,
    FieldKind::DhwDifferential,
    FieldKind::DeviceRole,
    FieldKind::ZoneDevices,
    FieldKind::BindCode,
    FieldKind::BindDevice,
    FieldKind::BatteryLow,
    FieldKind::BatteryLevel,
    FieldKind::RemainingSeconds,
    FieldKind::ChangeCounter,
    FieldKind::DateTime,
];

/// Zone (and DHW) operating mode, byte 3 of `2349` and byte 2 of `1F41`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneMode {
    FollowSchedule,
    AdvancedOverride,
    PermanentOverride,
    CountdownOverride,
    TemporaryOverride,
}

impl ZoneMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ZoneMode::FollowSchedule),
            0x01 => Some(ZoneMode::AdvancedOverride),
            0x02 => Some(ZoneMode::PermanentOverride),
            0x03 => Some(ZoneMode::CountdownOverride),
            0x04 => Some(ZoneMode::TemporaryOverride),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ZoneMode::FollowSchedule => 0x00,
            ZoneMode::AdvancedOverride => 0x01,
            ZoneMode::PermanentOverride => 0x02,
            ZoneMode::CountdownOverride => 0x03,
            ZoneMode::TemporaryOverride => 0x04,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ZoneMode::FollowSchedule => "follow_schedule",
            ZoneMode::AdvancedOverride => "advanced_override",
            ZoneMode::PermanentOverride => "permanent_override",
            ZoneMode::CountdownOverride => "countdown_override",
            ZoneMode::TemporaryOverride => "temporary_override",
        }
    }
}

/// System-wide mode, byte 0 of `2E04`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemMode {
    Auto,
    HeatOff,
    EcoBoost,
    Away,
    DayOff,
    DayOffEco,
    AutoWithReset,
    Custom,
}

impl SystemMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(SystemMode::Auto),
            0x01 => Some(SystemMode::HeatOff),
            0x02 => Some(SystemMode::EcoBoost),
            0x03 => Some(SystemMode::Away),
            0x04 => Some(SystemMode::DayOff),
            0x05 => Some(SystemMode::DayOffEco),
            0x06 => Some(SystemMode::AutoWithReset),
            0x07 => Some(SystemMode::Custom),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            SystemMode::Auto => 0x00,
            SystemMode::HeatOff => 0x01,
            SystemMode::EcoBoost => 0x02,
            SystemMode::Away => 0x03,
            SystemMode::DayOff => 0x04,
            SystemMode::DayOffEco => 0x05,
            SystemMode::AutoWithReset => 0x06,
            SystemMode::Custom => 0x07,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SystemMode::Auto => "auto",
            SystemMode::HeatOff => "heat_off",
            SystemMode::EcoBoost => "eco_boost",
            SystemMode::Away => "away",
            SystemMode::DayOff => "day_off",
            SystemMode::DayOffEco => "day_off_eco",
            SystemMode::AutoWithReset => "auto_with_reset",
            SystemMode::Custom => "custom",
        }
    }
}

impl std::str::FromStr for SystemMode {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, String> {
        (0x00..=0x07)
            .filter_map(SystemMode::from_byte)
            .find(|mode| mode.label() == text)
            .ok_or_else(|| format!("unknown system mode {text:?}"))
    }
}

/// Device role in a `000C` zone_devices listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    ZoneActuator,
    ZoneSensor,
    RadiatorActuator,
    UfhActuator,
    ValveActuator,
    MixActuator,
    OutdoorSensor,
    DhwSensor,
    HotwaterValve,
    HeatingValve,
    ApplianceControl,
    ElectricActuator,
    Unknown(u8),
}

impl DeviceRole {
    /// Role for the role byte and the listing index (`0E` at index `01` is the heating valve).
    pub fn from_bytes(role: u8, index: u8) -> Self {
        match role {
            0x00 => DeviceRole::ZoneActuator,
            0x04 => DeviceRole::ZoneSensor,
            0x08 => DeviceRole::RadiatorActuator,
            0x09 => DeviceRole::UfhActuator,
            0x0A => DeviceRole::ValveActuator,
            0x0B => DeviceRole::MixActuator,
            0x0C => DeviceRole::OutdoorSensor,
            0x0D => DeviceRole::DhwSensor,
            0x0E if index == 0x01 => DeviceRole::HeatingValve,
            0x0E => DeviceRole::HotwaterValve,
            0x0F => DeviceRole::ApplianceControl,
            0x11 => DeviceRole::ElectricActuator,
            other => DeviceRole::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            DeviceRole::ZoneActuator => 0x00,
            DeviceRole::ZoneSensor => 0x04,
            DeviceRole::RadiatorActuator => 0x08,
            DeviceRole::UfhActuator => 0x09,
            DeviceRole::ValveActuator => 0x0A,
            DeviceRole::MixActuator => 0x0B,
            DeviceRole::OutdoorSensor => 0x0C,
            DeviceRole::DhwSensor => 0x0D,
            DeviceRole::HotwaterValve | DeviceRole::HeatingValve => 0x0E,
            DeviceRole::ApplianceControl => 0x0F,
            DeviceRole::ElectricActuator => 0x11,
            DeviceRole::Unknown(byte) => byte,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceRole::ZoneActuator => "zone_actuator",
            DeviceRole::ZoneSensor => "zone_sensor",
            DeviceRole::RadiatorActuator => "rad_actuator",
            DeviceRole::UfhActuator => "ufh_actuator",
            DeviceRole::ValveActuator => "val_actuator",
            DeviceRole::MixActuator => "mix_actuator",
            DeviceRole::OutdoorSensor => "outdoor_sensor",
            DeviceRole::DhwSensor => "dhw_sensor",
            DeviceRole::HotwaterValve => "hotwater_valve",
            DeviceRole::HeatingValve => "heating_valve",
            DeviceRole::ApplianceControl => "appliance_control",
            DeviceRole::ElectricActuator => "ele_actuator",
            DeviceRole::Unknown(_) => "unknown",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [
            DeviceRole::ZoneActuator,
            DeviceRole::ZoneSensor,
            DeviceRole::RadiatorActuator,
            DeviceRole::UfhActuator,
            DeviceRole::ValveActuator,
            DeviceRole::MixActuator,
            DeviceRole::OutdoorSensor,
            DeviceRole::DhwSensor,
            DeviceRole::HotwaterValve,
            DeviceRole::HeatingValve,
            DeviceRole::ApplianceControl,
            DeviceRole::ElectricActuator,
        ]
        .into_iter()
        .find(|role| role.label() == label)
    }

    /// Roles listed against the DHW circuit rather than a zone.
    pub fn is_dhw(self) -> bool {
        matches!(
            self,
            DeviceRole::DhwSensor | DeviceRole::HotwaterValve | DeviceRole::HeatingValve
        )
    }
}
