//! Active gateway detection.
//!
//! The firmware swaps the `18:000730` placeholder for its own id on air, so
//! the echo of our first transmission names the gateway we are attached to.
//! A frame from the gateway the configuration expects names it too. Once the
//! active gateway is known, any other class-18 device heard is a foreign
//! gateway sharing the band, or a fan unit using the same class.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use ramses_frame::{Address, Frame};

use crate::config::GatewayConfig;
use crate::filter::DeviceFilter;

/// Foreign gateways are reported again after this many seconds.
const FOREIGN_REPEAT_SECS: i64 = 24 * 60 * 60;

/// Something worth telling the operator about the gateways on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayNotice {
    /// Our own transmissions are echoed by this gateway.
    Detected(Address),
    /// The active gateway is on the block list, so its echoes are dropped.
    Blocked(Address),
    /// The active gateway is missing from the known list.
    NotKnown { gateway: Address, enforced: bool },
    /// The configuration expected a different gateway.
    Mismatch { expected: Address, active: Address },
    /// Another gateway is on the air.
    Foreign { gateway: Address, active: Address },
}

impl GatewayNotice {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayNotice::Detected(_) => "gateway_detected",
            GatewayNotice::Blocked(_) => "gateway_blocked",
            GatewayNotice::NotKnown { .. } => "gateway_not_known",
            GatewayNotice::Mismatch { .. } => "gateway_mismatch",
            GatewayNotice::Foreign { .. } => "foreign_gateway",
        }
    }

    /// Errors leave the gateway unable to work as configured.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            GatewayNotice::Blocked(_) | GatewayNotice::NotKnown { enforced: true, .. }
        )
    }
}

impl fmt::Display for GatewayNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayNotice::Detected(gateway) => write!(f, "active gateway is {gateway}"),
            GatewayNotice::Blocked(gateway) => {
                write!(f, "active gateway {gateway} must not be on the block list")
            }
            GatewayNotice::NotKnown { gateway, enforced } => {
                let list = if *enforced { "enforced known list" } else { "known list" };
                write!(f, "active gateway {gateway} should be on the {list}")
            }
            GatewayNotice::Mismatch { expected, active } => {
                write!(f, "expected gateway {expected}, but the active gateway is {active}")
            }
            GatewayNotice::Foreign { gateway, active } => write!(
                f,
                "{gateway} may be a foreign gateway (or a fan unit), the active gateway is {active}"
            ),
        }
    }
}

/// Tracks the expected, active and foreign gateways.
#[derive(Debug, Clone, Default)]
pub struct GatewayDetector {
    expected: Option<Address>,
    active: Option<Address>,
    foreign: HashMap<Address, NaiveDateTime>,
}

impl GatewayDetector {
    /// The expected gateway is the configured id, or else the first gateway on
    /// the known list.
    pub fn new(config: &GatewayConfig) -> Self {
        let expected = Some(config.gateway_id)
            .filter(|id| *id != Address::HGI_DEFAULT)
            .or_else(|| config.known_list.iter().copied().find(Address::is_gateway));
        Self {
            expected,
            ..Self::default()
        }
    }

    pub fn expected(&self) -> Option<Address> {
        self.expected
    }

    pub fn active(&self) -> Option<Address> {
        self.active
    }

    /// Learn from one decoded frame, before device filtering.
    ///
    /// `echo` is true when the frame is the awaited echo of an own
    /// transmission.
    pub fn observe(&mut self, frame: &Frame, echo: bool, filter: &DeviceFilter) -> Vec<GatewayNotice> {
        let src = frame.src();
        let Some(active) = self.active else {
            let names_us = echo || self.expected == Some(src);
            if names_us && src.is_gateway() && src != Address::HGI_DEFAULT {
                return self.activate(src, filter);
            }
            return Vec::new();
        };

        let mut notices = Vec::new();
        for gateway in [src, frame.dst()] {
            if !gateway.is_gateway()
                || gateway == active
                || gateway == Address::HGI_DEFAULT
                || filter.is_known(&gateway)
                || filter.is_blocked(&gateway)
                || notices.contains(&GatewayNotice::Foreign { gateway, active })
            {
                continue;
            }
            let at = frame.dtm();
            let due = self
                .foreign
                .get(&gateway)
                .is_none_or(|last| (at - *last).num_seconds() >= FOREIGN_REPEAT_SECS);
            if due {
                self.foreign.insert(gateway, at);
                notices.push(GatewayNotice::Foreign { gateway, active });
            }
        }
        notices
    }

    fn activate(&mut self, gateway: Address, filter: &DeviceFilter) -> Vec<GatewayNotice> {
        self.active = Some(gateway);
        let mut notices = vec![GatewayNotice::Detected(gateway)];
        if filter.is_blocked(&gateway) {
            notices.push(GatewayNotice::Blocked(gateway));
        } else if !filter.is_known(&gateway) && (filter.has_known_list() || filter.enforces_known()) {
            notices.push(GatewayNotice::NotKnown {
                gateway,
                enforced: filter.enforces_known(),
            });
        }
        if let Some(expected) = self.expected.filter(|expected| *expected != gateway) {
            notices.push(GatewayNotice::Mismatch {
                expected,
                active: gateway,
            });
        }
        notices
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use ramses_frame::decode_frame;

    use super::*;

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    fn frame(line: &str, hours: i64) -> Frame {
        let base: NaiveDateTime = "2024-01-01T00:00:00".parse().unwrap();
        decode_frame(line, base + TimeDelta::hours(hours)).unwrap()
    }

    const OUR_ECHO: &str = "RQ --- 18:013393 01:145038 --:------ 30C9 001 01";
    const FOREIGN_RQ: &str = "RQ --- 18:200202 01:145038 --:------ 1F09 001 00";

    #[test]
    fn echo_names_the_active_gateway() {
        let mut detector = GatewayDetector::new(&GatewayConfig::default());
        let filter = DeviceFilter::default();
        assert_eq!(detector.expected(), None);

        assert!(detector.observe(&frame(OUR_ECHO, 0), false, &filter).is_empty());
        assert_eq!(detector.active(), None);

        assert_eq!(
            detector.observe(&frame(OUR_ECHO, 0), true, &filter),
            vec![GatewayNotice::Detected(addr("18:013393"))]
        );
        assert_eq!(detector.active(), Some(addr("18:013393")));
    }

    #[test]
    fn placeholder_echo_teaches_nothing() {
        let mut detector = GatewayDetector::new(&GatewayConfig::default());
        let echo = frame("RQ --- 18:000730 01:145038 --:------ 30C9 001 01", 0);
        assert!(detector
            .observe(&echo, true, &DeviceFilter::default())
            .is_empty());
        assert_eq!(detector.active(), None);
    }

    #[test]
    fn expected_gateway_comes_from_known_list() {
        let config = GatewayConfig {
            known_list: vec![addr("01:145038"), addr("18:013393")],
            ..GatewayConfig::default()
        };
        let mut detector = GatewayDetector::new(&config);
        assert_eq!(detector.expected(), Some(addr("18:013393")));

        let filter = DeviceFilter::new(config.known_list.iter().copied(), [], false);
        let sync = frame(" I --- 18:013393 --:------ 18:013393 1F09 003 000BB8", 0);
        assert_eq!(
            detector.observe(&sync, false, &filter),
            vec![GatewayNotice::Detected(addr("18:013393"))]
        );
    }

    #[test]
    fn misconfigured_lists_are_reported() {
        let config = GatewayConfig {
            gateway_id: addr("18:111111"),
            ..GatewayConfig::default()
        };
        let mut detector = GatewayDetector::new(&config);
        let blocked = DeviceFilter::new([], [addr("18:013393")], false);
        let notices = detector.observe(&frame(OUR_ECHO, 0), true, &blocked);
        assert!(notices.contains(&GatewayNotice::Blocked(addr("18:013393"))));
        assert!(notices.contains(&GatewayNotice::Mismatch {
            expected: addr("18:111111"),
            active: addr("18:013393"),
        }));
        assert!(notices.iter().any(GatewayNotice::is_error));

        let mut detector = GatewayDetector::new(&GatewayConfig::default());
        let enforced = DeviceFilter::new([addr("01:145038")], [], true);
        let notices = detector.observe(&frame(OUR_ECHO, 0), true, &enforced);
        assert_eq!(
            notices[1],
            GatewayNotice::NotKnown {
                gateway: addr("18:013393"),
                enforced: true,
            }
        );
    }

    #[test]
    fn foreign_gateway_is_reported_once_a_day() {
        let mut detector = GatewayDetector::new(&GatewayConfig::default());
        let filter = DeviceFilter::default();
        detector.observe(&frame(OUR_ECHO, 0), true, &filter);

        let foreign = GatewayNotice::Foreign {
            gateway: addr("18:200202"),
            active: addr("18:013393"),
        };
        assert_eq!(detector.observe(&frame(FOREIGN_RQ, 1), false, &filter), vec![foreign]);
        assert!(detector.observe(&frame(FOREIGN_RQ, 2), false, &filter).is_empty());
        assert!(detector.observe(&frame(FOREIGN_RQ, 24), false, &filter).is_empty());
        assert_eq!(detector.observe(&frame(FOREIGN_RQ, 25), false, &filter), vec![foreign]);

        // our own traffic and known gateways are never foreign
        assert!(detector.observe(&frame(OUR_ECHO, 26), false, &filter).is_empty());
        let known = DeviceFilter::new([addr("18:200202")], [], false);
        assert!(detector.observe(&frame(FOREIGN_RQ, 60), false, &known).is_empty());
    }
}
