use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{NaiveDateTime, TimeDelta};
use ramses_frame::Address;
use ramses_schema::{DeviceType, FieldKind, Value};
use serde::Serialize;

use crate::config::StalenessConfig;

/// Key of an entity in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityId {
    System { controller: Address },
    Zone { controller: Address, index: u8 },
    Dhw { controller: Address },
    Device { address: Address },
}

impl EntityId {
    pub fn system(controller: Address) -> Self {
        EntityId::System { controller }
    }

    pub fn zone(controller: Address, index: u8) -> Self {
        EntityId::Zone { controller, index }
    }

    pub fn dhw(controller: Address) -> Self {
        EntityId::Dhw { controller }
    }

    pub fn device(address: Address) -> Self {
        EntityId::Device { address }
    }

    /// Controller owning this entity; `None` for devices.
    pub fn controller(&self) -> Option<Address> {
        match *self {
            EntityId::System { controller }
            | EntityId::Zone { controller, .. }
            | EntityId::Dhw { controller } => Some(controller),
            EntityId::Device { .. } => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::System { controller } => write!(f, "system {controller}"),
            EntityId::Zone { controller, index } => write!(f, "zone {controller}/{index:02X}"),
            EntityId::Dhw { controller } => write!(f, "dhw {controller}"),
            EntityId::Device { address } => write!(f, "device {address}"),
        }
    }
}

/// A field value with the timestamp and sequence number of the message that
/// wrote it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldState {
    pub value: Value,
    pub dtm: NaiveDateTime,
    pub seq: u64,
}

/// Whether an entity's state can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Nothing has been heard yet.
    Unknown,
    /// At least one field is within its staleness threshold.
    Tracked,
    /// Every field is older than its threshold.
    Stale,
}

/// Relations to other entities, held as keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relations {
    System {
        zones: BTreeSet<u8>,
        dhw: bool,
        devices: BTreeSet<Address>,
    },
    Zone {
        devices: BTreeSet<Address>,
    },
    Dhw {
        devices: BTreeSet<Address>,
    },
    Device {
        device_type: DeviceType,
        system: Option<Address>,
        parent: Option<EntityId>,
    },
}

impl Relations {
    fn for_id(id: &EntityId) -> Self {
        match id {
            EntityId::System { .. } => Relations::System {
                zones: BTreeSet::new(),
                dhw: false,
                devices: BTreeSet::new(),
            },
            EntityId::Zone { .. } => Relations::Zone {
                devices: BTreeSet::new(),
            },
            EntityId::Dhw { .. } => Relations::Dhw {
                devices: BTreeSet::new(),
            },
            EntityId::Device { address } => Relations::Device {
                device_type: DeviceType::of(address),
                system: None,
                parent: None,
            },
        }
    }

    /// Devices bound to a system, zone or DHW circuit. Empty for devices.
    pub fn devices(&self) -> Option<&BTreeSet<Address>> {
        match self {
            Relations::System { devices, .. }
            | Relations::Zone { devices }
            | Relations::Dhw { devices } => Some(devices),
            Relations::Device { .. } => None,
        }
    }

    pub(crate) fn devices_mut(&mut self) -> Option<&mut BTreeSet<Address>> {
        match self {
            Relations::System { devices, .. }
            | Relations::Zone { devices }
            | Relations::Dhw { devices } => Some(devices),
            Relations::Device { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Entity {
    pub(crate) id: EntityId,
    pub(crate) fields: BTreeMap<FieldKind, FieldState>,
    pub(crate) relations: Relations,
}

impl Entity {
    pub(crate) fn new(id: EntityId) -> Self {
        Self {
            relations: Relations::for_id(&id),
            id,
            fields: BTreeMap::new(),
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id,
            fields: self.fields.clone(),
            relations: self.relations.clone(),
        }
    }
}

/// Point-in-time copy of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: EntityId,
    pub fields: BTreeMap<FieldKind, FieldState>,
    pub relations: Relations,
}

impl Snapshot {
    pub fn get(&self, kind: FieldKind) -> Option<&Value> {
        self.fields.get(&kind).map(|state| &state.value)
    }

    /// Timestamp of the newest field.
    pub fn last_update(&self) -> Option<NaiveDateTime> {
        self.fields.values().map(|state| state.dtm).max()
    }

    /// Fields seeded from a layout (sequence 0) are not evidence of life.
    pub fn liveness(&self, now: NaiveDateTime, staleness: &StalenessConfig) -> Liveness {
        let mut heard = self.fields.iter().filter(|(_, state)| state.seq > 0).peekable();
        if heard.peek().is_none() {
            return Liveness::Unknown;
        }
        let fresh = heard.any(|(kind, state)| {
            let threshold = TimeDelta::from_std(staleness.threshold(kind.class()))
                .unwrap_or(TimeDelta::MAX);
            now - state.dtm <= threshold
        });
        if fresh {
            Liveness::Tracked
        } else {
            Liveness::Stale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctl() -> Address {
        "01:145038".parse().unwrap()
    }

    #[test]
    fn display_names_entities() {
        assert_eq!(EntityId::system(ctl()).to_string(), "system 01:145038");
        assert_eq!(EntityId::zone(ctl(), 10).to_string(), "zone 01:145038/0A");
        assert_eq!(
            EntityId::device("04:189076".parse().unwrap()).to_string(),
            "device 04:189076"
        );
    }

    #[test]
    fn liveness_follows_field_class_thresholds() {
        let mut entity = Entity::new(EntityId::zone(ctl(), 0));
        let written: NaiveDateTime = "2024-01-01T12:00:00".parse().unwrap();
        let staleness = StalenessConfig::default();
        assert_eq!(
            entity.snapshot().liveness(written, &staleness),
            Liveness::Unknown
        );

        entity.fields.insert(
            FieldKind::Temperature,
            FieldState {
                value: Value::Float(20.5),
                dtm: written,
                seq: 1,
            },
        );
        let snapshot = entity.snapshot();
        assert_eq!(
            snapshot.liveness(written + TimeDelta::minutes(5), &staleness),
            Liveness::Tracked
        );
        assert_eq!(
            snapshot.liveness(written + TimeDelta::minutes(13), &staleness),
            Liveness::Stale
        );

        entity.fields.insert(
            FieldKind::ZoneName,
            FieldState {
                value: Value::Text("Lounge".into()),
                dtm: written,
                seq: 2,
            },
        );
        assert_eq!(
            entity
                .snapshot()
                .liveness(written + TimeDelta::hours(3), &staleness),
            Liveness::Tracked
        );
    }

    #[test]
    fn device_relations_carry_type() {
        let entity = Entity::new(EntityId::device("07:045960".parse().unwrap()));
        assert!(matches!(
            entity.relations,
            Relations::Device {
                device_type: DeviceType::Dhw,
                system: None,
                parent: None
            }
        ));
        assert!(entity.relations.devices().is_none());
    }
}
