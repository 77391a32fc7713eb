//! Well-known command codes.

use ramses_frame::Code;

pub const ZONE_NAME: Code = Code::new(0x0004);
pub const SCHEDULE_SYNC: Code = Code::new(0x0006);
pub const RELAY_DEMAND: Code = Code::new(0x0008);
pub const RELAY_FAILSAFE: Code = Code::new(0x0009);
pub const ZONE_CONFIG: Code = Code::new(0x000A);
pub const ZONE_DEVICES: Code = Code::new(0x000C);
pub const DEVICE_BATTERY: Code = Code::new(0x1060);
pub const DHW_PARAMS: Code = Code::new(0x10A0);
pub const DHW_TEMP: Code = Code::new(0x1260);
pub const OUTDOOR_TEMP: Code = Code::new(0x1290);
pub const INDOOR_HUMIDITY: Code = Code::new(0x12A0);
pub const WINDOW_STATE: Code = Code::new(0x12B0);
pub const SYSTEM_SYNC: Code = Code::new(0x1F09);
pub const DHW_MODE: Code = Code::new(0x1F41);
pub const RF_BIND: Code = Code::new(0x1FC9);
pub const BOILER_SETPOINT: Code = Code::new(0x22D9);
pub const SETPOINT: Code = Code::new(0x2309);
pub const ZONE_MODE: Code = Code::new(0x2349);
pub const SYSTEM_MODE: Code = Code::new(0x2E04);
pub const TEMPERATURE: Code = Code::new(0x30C9);
pub const DATETIME: Code = Code::new(0x313F);
pub const HEAT_DEMAND: Code = Code::new(0x3150);
pub const ACTUATOR_SYNC: Code = Code::new(0x3B00);
pub const ACTUATOR_STATE: Code = Code::new(0x3EF0);

/// Domain index of the DHW circuit.
pub const DOMAIN_DHW: u8 = 0xFA;
/// Domain index of the heat source (boiler relay or OpenTherm bridge).
pub const DOMAIN_HEATER: u8 = 0xFC;
