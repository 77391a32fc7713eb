//! Per-code payload parsers.
//!
//! A parser turns the raw payload of one frame into typed [`Record`]s, or
//! explains why it cannot. Parsers never panic: every slice access goes
//! through a length check first.
//!
//! Requests usually carry only a context (zone index, DHW index) and parse to
//! a record without fields.

use ramses_frame::{Address, Code, Frame, Verb};

use crate::codes::{DOMAIN_DHW, DOMAIN_HEATER};
use crate::payload::{DeviceRole, FieldKind, Index, Record, SystemMode, Value, ZoneMode};
use crate::units::{
    bool_from_byte, dtm_from_bytes, percent_from_byte, temp_from_bytes, text_from_bytes,
};

pub(crate) type ParseResult = Result<Vec<Record>, String>;

/// Signature shared by every parser.
pub(crate) type Parser = fn(&ParseContext<'_>) -> ParseResult;

/// Everything a parser may look at besides the payload bytes.
pub(crate) struct ParseContext<'a> {
    pub frame: &'a Frame,
    pub payload: &'a [u8],
    pub array: bool,
    pub max_zones: u8,
}

impl ParseContext<'_> {
    fn is_request(&self) -> bool {
        self.frame.verb() == Verb::Request
    }

    fn len(&self) -> usize {
        self.payload.len()
    }

    fn byte(&self, at: usize) -> Result<u8, String> {
        self.payload
            .get(at)
            .copied()
            .ok_or_else(|| format!("payload too short: no byte {at}"))
    }

    fn expect_len(&self, allowed: &[usize]) -> Result<(), String> {
        if allowed.contains(&self.len()) {
            return Ok(());
        }
        Err(format!(
            "unexpected length {} (expected {:?})",
            self.len(),
            allowed
        ))
    }

    fn zone(&self, byte: u8) -> Result<Index, String> {
        if byte < self.max_zones {
            Ok(Index::Zone(byte))
        } else {
            Err(format!("invalid zone index {byte:02X}"))
        }
    }

    fn zone_or_domain(&self, byte: u8) -> Result<Index, String> {
        if byte >= 0xF0 {
            Ok(Index::Domain(byte))
        } else {
            self.zone(byte)
        }
    }

    /// Record carrying only the request context, indexed by `index`.
    fn context(&self, index: Index) -> ParseResult {
        Ok(vec![Record::new(index)])
    }
}

fn chunked(
    payload: &[u8],
    size: usize,
    mut parse: impl FnMut(&[u8]) -> Result<Record, String>,
) -> ParseResult {
    if payload.is_empty() || payload.len() % size != 0 {
        return Err(format!(
            "expected a multiple of {size} bytes, got {}",
            payload.len()
        ));
    }
    payload.chunks(size).map(&mut parse).collect()
}

pub(crate) fn zone_name(ctx: &ParseContext<'_>) -> ParseResult {
    let idx = ctx.zone(ctx.byte(0)?)?;
    if ctx.is_request() && ctx.len() <= 2 {
        return ctx.context(idx);
    }
    ctx.expect_len(&[22])?;

    let name = &ctx.payload[2..];
    let record = Record::new(idx);
    if name.iter().all(|b| *b == 0x7F) {
        return Ok(vec![record]);
    }
    Ok(vec![record.with(FieldKind::ZoneName, text_from_bytes(name))])
}

pub(crate) fn schedule_sync(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() {
        return ctx.context(Index::None);
    }
    ctx.expect_len(&[4])?;
    if ctx.payload[1..] == [0xFF, 0xFF, 0xFF] {
        return ctx.context(Index::None);
    }
    let counter = u16::from_be_bytes([ctx.payload[2], ctx.payload[3]]);
    Ok(vec![
        Record::new(Index::None).with(FieldKind::ChangeCounter, i64::from(counter))
    ])
}

pub(crate) fn relay_demand(ctx: &ParseContext<'_>) -> ParseResult {
    let idx = ctx.zone_or_domain(ctx.byte(0)?)?;
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(idx);
    }
    let demand = percent_from_byte(ctx.byte(1)?);
    Ok(vec![Record::new(idx).with(FieldKind::RelayDemand, demand)])
}

pub(crate) fn relay_failsafe(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(ctx.zone_or_domain(ctx.byte(0)?)?);
    }
    chunked(ctx.payload, 3, |seqx| {
        let enabled = match seqx[1] {
            0x00 => Value::Bool(false),
            0x01 => Value::Bool(true),
            _ => Value::Null,
        };
        Ok(Record::new(ctx.zone_or_domain(seqx[0])?).with(FieldKind::RelayFailsafe, enabled))
    })
}

pub(crate) fn zone_config(ctx: &ParseContext<'_>) -> ParseResult {
    let parse = |seqx: &[u8]| -> Result<Record, String> {
        let bitmap = seqx[1];
        Ok(Record::new(ctx.zone(seqx[0])?)
            .with(FieldKind::MinTemp, temp_from_bytes(&seqx[2..4]))
            .with(FieldKind::MaxTemp, temp_from_bytes(&seqx[4..6]))
            .with(FieldKind::LocalOverride, bitmap & 0x01 == 0)
            .with(FieldKind::OpenWindowFunction, bitmap & 0x02 == 0)
            .with(FieldKind::MultiroomMode, bitmap & 0x10 == 0))
    };

    if ctx.array {
        return chunked(ctx.payload, 6, parse);
    }
    if ctx.is_request() && ctx.len() <= 2 {
        return ctx.context(ctx.zone(ctx.byte(0)?)?);
    }
    ctx.expect_len(&[6])?;
    Ok(vec![parse(ctx.payload)?])
}

pub(crate) fn zone_devices(ctx: &ParseContext<'_>) -> ParseResult {
    let idx_byte = ctx.byte(0)?;
    let role = DeviceRole::from_bytes(ctx.byte(1)?, idx_byte);
    let index = match role {
        role if role.is_dhw() => Index::Domain(DOMAIN_DHW),
        DeviceRole::ApplianceControl => Index::Domain(DOMAIN_HEATER),
        _ => ctx.zone(idx_byte)?,
    };
    let record = Record::new(index).with(FieldKind::DeviceRole, role.label());
    if ctx.is_request() {
        return Ok(vec![record]);
    }

    if ctx.len() % 6 != 0 {
        return Err(format!("expected a multiple of 6 bytes, got {}", ctx.len()));
    }
    let mut devices = Vec::new();
    for seqx in ctx.payload.chunks(6) {
        if seqx[0] != idx_byte {
            return Err(format!(
                "mixed indices in listing: {:02X} != {idx_byte:02X}",
                seqx[0]
            ));
        }
        if seqx[2] == 0x7F {
            continue;
        }
        let value = u32::from_be_bytes([0, seqx[3], seqx[4], seqx[5]]);
        let device = Address::from_u24(value).map_err(|err| err.to_string())?;
        devices.push(device);
    }
    Ok(vec![record.with(FieldKind::ZoneDevices, devices)])
}

pub(crate) fn device_battery(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(Index::None);
    }
    ctx.expect_len(&[3])?;
    let low = match ctx.payload[2] {
        0x00 => true,
        0x01 => false,
        other => return Err(format!("invalid battery state {other:02X}")),
    };
    Ok(vec![Record::new(Index::None)
        .with(FieldKind::BatteryLow, low)
        .with(FieldKind::BatteryLevel, percent_from_byte(ctx.payload[1]))])
}

pub(crate) fn dhw_params(ctx: &ParseContext<'_>) -> ParseResult {
    let idx = dhw_index(ctx.byte(0)?)?;
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(idx);
    }
    ctx.expect_len(&[3, 6])?;

    let setpoint = temp_from_bytes(&ctx.payload[1..3]).filter(|t| *t != 255.0);
    let mut record = Record::new(idx).with(FieldKind::DhwSetpoint, setpoint);
    if ctx.len() == 6 {
        record = record
            .with(FieldKind::DhwOverrun, i64::from(ctx.payload[3]))
            .with(FieldKind::DhwDifferential, temp_from_bytes(&ctx.payload[4..6]));
    }
    Ok(vec![record])
}

fn dhw_index(byte: u8) -> Result<Index, String> {
    match byte {
        0x00 | 0x01 => Ok(Index::Dhw(byte)),
        other => Err(format!("invalid DHW index {other:02X}")),
    }
}

pub(crate) fn dhw_temp(ctx: &ParseContext<'_>) -> ParseResult {
    let idx = dhw_index(ctx.byte(0)?)?;
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(idx);
    }
    ctx.expect_len(&[3])?;
    Ok(vec![Record::new(idx).with(
        FieldKind::Temperature,
        temp_from_bytes(&ctx.payload[1..3]),
    )])
}

pub(crate) fn outdoor_temp(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(Index::None);
    }
    ctx.expect_len(&[3])?;
    Ok(vec![Record::new(Index::None).with(
        FieldKind::Temperature,
        temp_from_bytes(&ctx.payload[1..3]),
    )])
}

pub(crate) fn indoor_humidity(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(Index::None);
    }
    ctx.expect_len(&[2, 6])?;

    let humidity = match ctx.payload[1] {
        0xEF => None,
        value if value <= 100 => Some(f64::from(value) / 100.0),
        value => return Err(format!("invalid relative humidity {value:02X}")),
    };
    let mut record = Record::new(Index::None).with(FieldKind::RelativeHumidity, humidity);
    if ctx.len() == 6 {
        record = record
            .with(FieldKind::Temperature, temp_from_bytes(&ctx.payload[2..4]))
            .with(FieldKind::DewpointTemp, temp_from_bytes(&ctx.payload[4..6]));
    }
    Ok(vec![record])
}

pub(crate) fn window_state(ctx: &ParseContext<'_>) -> ParseResult {
    let idx = ctx.zone_or_domain(ctx.byte(0)?)?;
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(idx);
    }
    ctx.expect_len(&[3])?;
    Ok(vec![
        Record::new(idx).with(FieldKind::WindowOpen, bool_from_byte(ctx.payload[1]))
    ])
}

pub(crate) fn system_sync(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(Index::None);
    }
    ctx.expect_len(&[3])?;
    if !matches!(ctx.payload[0], 0x00 | 0x01 | 0xF8 | 0xFF) {
        return Err(format!("invalid sync domain {:02X}", ctx.payload[0]));
    }
    let tenths = u16::from_be_bytes([ctx.payload[1], ctx.payload[2]]);
    Ok(vec![Record::new(Index::None).with(
        FieldKind::RemainingSeconds,
        f64::from(tenths) / 10.0,
    )])
}

pub(crate) fn dhw_mode(ctx: &ParseContext<'_>) -> ParseResult {
    let idx = dhw_index(ctx.byte(0)?)?;
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(idx);
    }
    ctx.expect_len(&[6, 12])?;

    let active = match ctx.payload[1] {
        0x00 => Value::Bool(false),
        0x01 => Value::Bool(true),
        0xFF => Value::Null,
        other => return Err(format!("invalid DHW state {other:02X}")),
    };
    let mode = ZoneMode::from_byte(ctx.payload[2])
        .ok_or_else(|| format!("unknown DHW mode {:02X}", ctx.payload[2]))?;

    let record = Record::new(idx)
        .with(FieldKind::DhwActive, active)
        .with(FieldKind::DhwMode, mode.label());
    match (mode, ctx.len()) {
        (ZoneMode::TemporaryOverride, 12) => Ok(vec![record.with(
            FieldKind::ModeUntil,
            dtm_from_bytes(&ctx.payload[6..12]),
        )]),
        (ZoneMode::TemporaryOverride, _) => Err("temporary DHW mode needs an end time".into()),
        (_, 6) => Ok(vec![record]),
        (_, _) => Err(format!("unexpected length {} for DHW mode", ctx.len())),
    }
}

pub(crate) fn rf_bind(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() && ctx.len() < 6 {
        return ctx.context(Index::None);
    }
    chunked(ctx.payload, 6, |seqx| {
        let index = match seqx[0] {
            byte if byte >= 0xF0 => Index::Domain(byte),
            byte if byte < ctx.max_zones => Index::Zone(byte),
            _ => Index::None,
        };
        let code = Code::new(u16::from_be_bytes([seqx[1], seqx[2]]));
        let value = u32::from_be_bytes([0, seqx[3], seqx[4], seqx[5]]);
        let device = Address::from_u24(value).map_err(|err| err.to_string())?;
        Ok(Record::new(index)
            .with(FieldKind::BindCode, code)
            .with(FieldKind::BindDevice, device))
    })
}

pub(crate) fn boiler_setpoint(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(Index::None);
    }
    ctx.expect_len(&[3])?;
    Ok(vec![Record::new(Index::None).with(
        FieldKind::BoilerSetpoint,
        temp_from_bytes(&ctx.payload[1..3]),
    )])
}

pub(crate) fn setpoint(ctx: &ParseContext<'_>) -> ParseResult {
    let parse = |seqx: &[u8]| -> Result<Record, String> {
        Ok(Record::new(ctx.zone(seqx[0])?)
            .with(FieldKind::Setpoint, temp_from_bytes(&seqx[1..3])))
    };

    if ctx.array {
        return chunked(ctx.payload, 3, parse);
    }
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(ctx.zone(ctx.byte(0)?)?);
    }
    ctx.expect_len(&[3])?;
    Ok(vec![parse(ctx.payload)?])
}

pub(crate) fn zone_mode(ctx: &ParseContext<'_>) -> ParseResult {
    let idx = ctx.zone(ctx.byte(0)?)?;
    if ctx.is_request() && ctx.len() <= 2 {
        return ctx.context(idx);
    }
    ctx.expect_len(&[4, 7, 13])?;

    let mode = ZoneMode::from_byte(ctx.payload[3])
        .ok_or_else(|| format!("unknown zone mode {:02X}", ctx.payload[3]))?;
    let mut record = Record::new(idx)
        .with(FieldKind::ZoneMode, mode.label())
        .with(FieldKind::Setpoint, temp_from_bytes(&ctx.payload[1..3]));

    if ctx.len() >= 7 && ctx.payload[4..7] != [0xFF, 0xFF, 0xFF] {
        let minutes = u32::from_be_bytes([0, ctx.payload[4], ctx.payload[5], ctx.payload[6]]);
        record = record.with(FieldKind::ModeDuration, i64::from(minutes));
    }
    if ctx.len() >= 13 {
        record = record.with(FieldKind::ModeUntil, dtm_from_bytes(&ctx.payload[7..13]));
    }
    Ok(vec![record])
}

pub(crate) fn system_mode(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(Index::None);
    }
    ctx.expect_len(&[8])?;

    let mode = SystemMode::from_byte(ctx.payload[0])
        .ok_or_else(|| format!("unknown system mode {:02X}", ctx.payload[0]))?;
    let until = match ctx.payload[7] {
        0x00 => None,
        _ => dtm_from_bytes(&ctx.payload[1..7]),
    };
    Ok(vec![Record::new(Index::None)
        .with(FieldKind::SystemMode, mode.label())
        .with(FieldKind::ModeUntil, until)])
}

pub(crate) fn temperature(ctx: &ParseContext<'_>) -> ParseResult {
    let parse = |seqx: &[u8]| -> Result<Record, String> {
        Ok(Record::new(ctx.zone(seqx[0])?)
            .with(FieldKind::Temperature, temp_from_bytes(&seqx[1..3])))
    };

    if ctx.array {
        return chunked(ctx.payload, 3, parse);
    }
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(ctx.zone(ctx.byte(0)?)?);
    }
    ctx.expect_len(&[3])?;
    Ok(vec![parse(ctx.payload)?])
}

pub(crate) fn datetime(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(Index::None);
    }
    ctx.expect_len(&[9])?;
    let dtm = dtm_from_bytes(&ctx.payload[2..9]);
    Ok(vec![Record::new(Index::None).with(FieldKind::DateTime, dtm)])
}

pub(crate) fn heat_demand(ctx: &ParseContext<'_>) -> ParseResult {
    let parse = |seqx: &[u8]| -> Result<Record, String> {
        Ok(Record::new(ctx.zone_or_domain(seqx[0])?)
            .with(FieldKind::HeatDemand, percent_from_byte(seqx[1])))
    };

    if ctx.array {
        return chunked(ctx.payload, 2, parse);
    }
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(ctx.zone_or_domain(ctx.byte(0)?)?);
    }
    ctx.expect_len(&[2])?;
    Ok(vec![parse(ctx.payload)?])
}

pub(crate) fn actuator_sync(ctx: &ParseContext<'_>) -> ParseResult {
    ctx.expect_len(&[2])?;
    let index = match ctx.payload[0] {
        DOMAIN_HEATER => Index::Domain(DOMAIN_HEATER),
        0x00 => Index::None,
        other => return Err(format!("invalid sync domain {other:02X}")),
    };
    Ok(vec![
        Record::new(index).with(FieldKind::ActuatorSync, bool_from_byte(ctx.payload[1]))
    ])
}

pub(crate) fn actuator_state(ctx: &ParseContext<'_>) -> ParseResult {
    if ctx.is_request() && ctx.len() == 1 {
        return ctx.context(Index::None);
    }
    ctx.expect_len(&[3, 6, 9])?;
    Ok(vec![Record::new(Index::None).with(
        FieldKind::ModulationLevel,
        percent_from_byte(ctx.payload[1]),
    )])
}
