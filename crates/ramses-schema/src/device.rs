use std::fmt;

use ramses_frame::Address;
use serde::Serialize;

/// Device type, derived from the class prefix of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceType {
    /// `01:` evohome controller.
    Ctl,
    /// `02:` underfloor heating controller.
    Ufc,
    /// `03:` wired room thermostat.
    Hcw,
    /// `04:` radiator valve.
    Trv,
    /// `00:` radiator valve, older protocol.
    Tr0,
    /// `07:` hot water cylinder sensor.
    Dhw,
    /// `08:` Jasper interface module.
    Jim,
    /// `10:` OpenTherm bridge.
    Otb,
    /// `12:` digital room thermostat.
    Dts,
    /// `13:` relay box.
    Bdr,
    /// `17:` outdoor sensor.
    Out,
    /// `18:` serial gateway.
    Hgi,
    /// `22:` digital room thermostat, newer model.
    Dt2,
    /// `23:` programmer.
    Prg,
    /// `30:` internet gateway.
    Rfg,
    /// `31:` Jasper thermostat.
    Jst,
    /// `34:` round thermostat.
    Rnd,
    /// Any other class.
    Generic,
}

impl DeviceType {
    pub fn from_class(class: u8) -> Self {
        match class {
            0 => DeviceType::Tr0,
            1 => DeviceType::Ctl,
            2 => DeviceType::Ufc,
            3 => DeviceType::Hcw,
            4 => DeviceType::Trv,
            7 => DeviceType::Dhw,
            8 => DeviceType::Jim,
            10 => DeviceType::Otb,
            12 => DeviceType::Dts,
            13 => DeviceType::Bdr,
            17 => DeviceType::Out,
            18 => DeviceType::Hgi,
            22 => DeviceType::Dt2,
            23 => DeviceType::Prg,
            30 => DeviceType::Rfg,
            31 => DeviceType::Jst,
            34 => DeviceType::Rnd,
            _ => DeviceType::Generic,
        }
    }

    pub fn of(address: &Address) -> Self {
        Self::from_class(address.class())
    }

    /// Three-letter slug, as used in logs.
    pub fn slug(&self) -> &'static str {
        match self {
            DeviceType::Ctl => "CTL",
            DeviceType::Ufc => "UFC",
            DeviceType::Hcw => "HCW",
            DeviceType::Trv => "TRV",
            DeviceType::Tr0 => "TR0",
            DeviceType::Dhw => "DHW",
            DeviceType::Jim => "JIM",
            DeviceType::Otb => "OTB",
            DeviceType::Dts => "DTS",
            DeviceType::Bdr => "BDR",
            DeviceType::Out => "OUT",
            DeviceType::Hgi => "HGI",
            DeviceType::Dt2 => "DT2",
            DeviceType::Prg => "PRG",
            DeviceType::Rfg => "RFG",
            DeviceType::Jst => "JST",
            DeviceType::Rnd => "RND",
            DeviceType::Generic => "DEV",
        }
    }

    /// Devices that own a heating system (zones, DHW, appliance).
    pub fn is_controller(&self) -> bool {
        matches!(self, DeviceType::Ctl | DeviceType::Prg)
    }

    /// Devices whose self-addressed announcements carry one record per zone.
    pub fn announces_arrays(&self) -> bool {
        matches!(self, DeviceType::Ctl | DeviceType::Ufc | DeviceType::Prg)
    }

    /// Devices that report a room temperature for the zone they sit in.
    pub fn is_zone_sensor(&self) -> bool {
        matches!(
            self,
            DeviceType::Trv
                | DeviceType::Tr0
                | DeviceType::Hcw
                | DeviceType::Dts
                | DeviceType::Dt2
                | DeviceType::Rnd
                | DeviceType::Jst
        )
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_prefixes() {
        assert_eq!(DeviceType::from_class(1), DeviceType::Ctl);
        assert_eq!(DeviceType::from_class(4), DeviceType::Trv);
        assert_eq!(DeviceType::from_class(13), DeviceType::Bdr);
        assert_eq!(DeviceType::from_class(18), DeviceType::Hgi);
        assert_eq!(DeviceType::from_class(34), DeviceType::Rnd);
    }

    #[test]
    fn unknown_prefix_is_generic() {
        assert_eq!(DeviceType::from_class(5), DeviceType::Generic);
        assert_eq!(DeviceType::from_class(63), DeviceType::Generic);
        assert_eq!(DeviceType::Generic.slug(), "DEV");
    }

    #[test]
    fn controller_roles() {
        let ctl: Address = "01:145038".parse().unwrap();
        assert!(DeviceType::of(&ctl).is_controller());
        assert!(DeviceType::Ufc.announces_arrays());
        assert!(!DeviceType::Ufc.is_controller());
        assert!(!DeviceType::Trv.announces_arrays());
    }
}
