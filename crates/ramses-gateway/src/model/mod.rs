//! Entity state model.
//!
//! Admitted messages are folded into systems, zones, DHW circuits and
//! devices. Entities live in a single registry and refer to each other by
//! [`EntityId`]; nothing holds a pointer to another entity.
//!
//! Every stored field carries the timestamp and sequence number of the
//! message that wrote it. A write only lands when the message is at least as
//! new as the stored value, so replays and late arrivals cannot roll state
//! back.

mod delta;
mod entity;

use std::collections::HashMap;

use chrono::NaiveDateTime;
use ramses_frame::{Address, Verb};
use ramses_schema::codes::{self, DOMAIN_HEATER};
use ramses_schema::{DeviceType, FieldKind, Index, Message, Payload, Record, SystemLayout, Value};
use tracing::{debug, warn};

use crate::config::StalenessConfig;
use crate::error::{ApplyError, ApplyFailure};

pub use delta::{AppliedDelta, StateChange};
pub use entity::{EntityId, FieldState, Liveness, Relations, Snapshot};

use entity::Entity;

/// Codes whose zone-indexed announcements to a controller reveal the
/// sender's zone.
const ZONE_EVIDENCE: [ramses_frame::Code; 4] = [
    codes::TEMPERATURE,
    codes::SETPOINT,
    codes::WINDOW_STATE,
    codes::HEAT_DEMAND,
];

type Key = usize;

#[derive(Debug, Default)]
pub struct Model {
    entities: Vec<Entity>,
    index: HashMap<EntityId, Key>,
    staleness: StalenessConfig,
}

impl Model {
    pub fn new(staleness: StalenessConfig) -> Self {
        Self {
            entities: Vec::new(),
            index: HashMap::new(),
            staleness,
        }
    }

    /// Fold one admitted message into the model.
    ///
    /// The source device is always created. On error the returned failure
    /// still carries every change that did apply.
    pub fn apply(&mut self, message: &Message, seq: u64) -> Result<AppliedDelta, ApplyFailure> {
        let mut delta = AppliedDelta::new(seq);
        let mut errors = Vec::new();
        let src = message.src();
        let dst = message.dst();
        let src_type = DeviceType::of(&src);

        self.ensure(EntityId::device(src), &mut delta);

        if let Payload::Malformed { reason } = message.payload() {
            errors.push(ApplyError::SchemaMismatch {
                code: message.code(),
                reason: reason.clone(),
            });
            return finish(delta, errors);
        }

        if src_type.is_controller() {
            self.ensure(EntityId::system(src), &mut delta);
        }
        let dst_is_controller = dst != src && DeviceType::of(&dst).is_controller();
        if dst_is_controller && !src_type.is_controller() && !src.is_gateway() {
            collect(self.bind_system(src, dst, &mut delta), &mut errors);
        }

        match message.code() {
            codes::RF_BIND => self.apply_bind(message, &mut delta, &mut errors),
            codes::ZONE_DEVICES => self.apply_listing(message, &mut delta, &mut errors),
            _ if !carries_state(message.verb()) => {}
            _ if src_type.is_controller() => self.apply_controller(message, &mut delta),
            _ => self.apply_device(message, &mut delta, &mut errors),
        }

        finish(delta, errors)
    }

    /// Controller state: each record lands on the zone, DHW circuit or
    /// system its index names.
    fn apply_controller(&mut self, message: &Message, delta: &mut AppliedDelta) {
        let ctl = message.src();
        for record in message.records() {
            let target = match record.index {
                Index::Zone(zone) => EntityId::zone(ctl, zone),
                index if index.is_dhw() => EntityId::dhw(ctl),
                _ => EntityId::system(ctl),
            };
            self.write_record(target, record, message, delta);
        }
    }

    /// Non-controller state lands on the sending device. Zone-indexed
    /// announcements addressed to a controller bind the sender to that zone.
    fn apply_device(
        &mut self,
        message: &Message,
        delta: &mut AppliedDelta,
        errors: &mut Vec<ApplyError>,
    ) {
        let src = message.src();
        let dst = message.dst();
        let dst_is_controller = dst != src && DeviceType::of(&dst).is_controller();

        for record in message.records() {
            self.write_record(EntityId::device(src), record, message, delta);

            if !dst_is_controller || src.is_gateway() {
                continue;
            }
            if let (Some(zone), true) = (record.index.zone(), ZONE_EVIDENCE.contains(&message.code())) {
                collect(self.bind_parent(src, EntityId::zone(dst, zone), delta), errors);
            }
        }

        if message.code() == codes::DHW_TEMP && DeviceType::of(&src) == DeviceType::Dhw {
            let ctl = if dst_is_controller {
                Some(dst)
            } else {
                self.binding(src).0
            };
            if let Some(ctl) = ctl {
                collect(self.bind_parent(src, EntityId::dhw(ctl), delta), errors);
            }
        }
    }

    /// `1FC9` handshake between a controller and a device binds the device.
    /// Bind offers and codes are not stored as state.
    fn apply_bind(
        &mut self,
        message: &Message,
        delta: &mut AppliedDelta,
        errors: &mut Vec<ApplyError>,
    ) {
        if !matches!(message.verb(), Verb::Info | Verb::Write) {
            return;
        }
        let (src, dst) = (message.src(), message.dst());
        if src == dst || dst.is_broadcast() || dst.is_gateway() {
            return;
        }
        if DeviceType::of(&src).is_controller() && !DeviceType::of(&dst).is_controller() {
            collect(self.bind_system(dst, src, delta), errors);
        }
    }

    /// `000C` listings from a controller name the devices of each zone and
    /// of the DHW circuit.
    fn apply_listing(
        &mut self,
        message: &Message,
        delta: &mut AppliedDelta,
        errors: &mut Vec<ApplyError>,
    ) {
        let ctl = message.src();
        if !DeviceType::of(&ctl).is_controller() || !carries_state(message.verb()) {
            return;
        }
        for record in message.records() {
            let Some(devices) = record.get(FieldKind::ZoneDevices) else {
                continue;
            };
            let target = match record.index {
                Index::Zone(zone) => EntityId::zone(ctl, zone),
                index if index.is_dhw() => EntityId::dhw(ctl),
                Index::Domain(DOMAIN_HEATER) => EntityId::system(ctl),
                _ => continue,
            };
            for device in devices.as_addresses() {
                let result = match target {
                    EntityId::System { controller } => self.bind_system(*device, controller, delta),
                    _ => self.bind_parent(*device, target, delta),
                };
                collect(result, errors);
            }
        }
    }

    fn write_record(
        &mut self,
        target: EntityId,
        record: &Record,
        message: &Message,
        delta: &mut AppliedDelta,
    ) {
        for field in &record.fields {
            self.write_field(
                target,
                field.kind,
                field.value.clone(),
                message.dtm(),
                delta,
            );
        }
    }

    fn write_field(
        &mut self,
        target: EntityId,
        kind: FieldKind,
        value: Value,
        dtm: NaiveDateTime,
        delta: &mut AppliedDelta,
    ) {
        let key = self.ensure(target, delta);
        let seq = delta.seq;
        let fields = &mut self.entities[key].fields;
        if let Some(existing) = fields.get(&kind) {
            if dtm < existing.dtm {
                delta.skipped += 1;
                return;
            }
        }
        fields.insert(
            kind,
            FieldState {
                value: value.clone(),
                dtm,
                seq,
            },
        );
        delta.push(StateChange::FieldUpdated {
            entity: target,
            field: kind,
            value,
            dtm,
            seq,
        });
    }

    /// Key of `id`, creating the entity (and the entities it implies) first.
    fn ensure(&mut self, id: EntityId, delta: &mut AppliedDelta) -> Key {
        if let Some(&key) = self.index.get(&id) {
            return key;
        }
        let key = self.entities.len();
        self.entities.push(Entity::new(id));
        self.index.insert(id, key);
        delta.push(StateChange::EntityCreated { entity: id });

        match id {
            EntityId::System { controller } => {
                self.ensure(EntityId::device(controller), delta);
            }
            EntityId::Zone { controller, index } => {
                let system = self.ensure(EntityId::system(controller), delta);
                if let Relations::System { zones, .. } = &mut self.entities[system].relations {
                    zones.insert(index);
                }
            }
            EntityId::Dhw { controller } => {
                let system = self.ensure(EntityId::system(controller), delta);
                if let Relations::System { dhw, .. } = &mut self.entities[system].relations {
                    *dhw = true;
                }
            }
            EntityId::Device { .. } => {}
        }
        key
    }

    fn binding(&self, device: Address) -> (Option<Address>, Option<EntityId>) {
        match self
            .index
            .get(&EntityId::device(device))
            .map(|&key| &self.entities[key].relations)
        {
            Some(Relations::Device { system, parent, .. }) => (*system, *parent),
            _ => (None, None),
        }
    }

    fn bind_system(
        &mut self,
        device: Address,
        ctl: Address,
        delta: &mut AppliedDelta,
    ) -> Result<(), ApplyError> {
        if device == ctl {
            return Ok(());
        }
        let dev = self.ensure(EntityId::device(device), delta);
        let system = self.ensure(EntityId::system(ctl), delta);
        match self.binding(device).0 {
            Some(existing) if existing == ctl => Ok(()),
            Some(existing) => Err(ApplyError::BindingConflict {
                device,
                existing: EntityId::system(existing),
                claimed: EntityId::system(ctl),
            }),
            None => {
                if let Relations::Device { system, .. } = &mut self.entities[dev].relations {
                    *system = Some(ctl);
                }
                if let Some(devices) = self.entities[system].relations.devices_mut() {
                    devices.insert(device);
                }
                debug!(%device, controller = %ctl, "device bound to system");
                delta.push(StateChange::DeviceBound {
                    device,
                    target: EntityId::system(ctl),
                });
                Ok(())
            }
        }
    }

    /// Bind `device` to a zone or DHW circuit, and to that circuit's system.
    fn bind_parent(
        &mut self,
        device: Address,
        parent: EntityId,
        delta: &mut AppliedDelta,
    ) -> Result<(), ApplyError> {
        let Some(ctl) = parent.controller() else {
            return Ok(());
        };
        self.bind_system(device, ctl, delta)?;
        match self.binding(device).1 {
            Some(existing) if existing == parent => Ok(()),
            Some(existing) => Err(ApplyError::BindingConflict {
                device,
                existing,
                claimed: parent,
            }),
            None => {
                let dev = self.ensure(EntityId::device(device), delta);
                let target = self.ensure(parent, delta);
                if let Relations::Device { parent: slot, .. } = &mut self.entities[dev].relations {
                    *slot = Some(parent);
                }
                if let Some(devices) = self.entities[target].relations.devices_mut() {
                    devices.insert(device);
                }
                debug!(%device, target = %parent, "device bound");
                delta.push(StateChange::DeviceBound {
                    device,
                    target: parent,
                });
                Ok(())
            }
        }
    }

    /// Drop every binding of `device`. Returns false if it had none.
    pub fn reset_binding(&mut self, device: Address) -> bool {
        let Some(&key) = self.index.get(&EntityId::device(device)) else {
            return false;
        };
        let (system, parent) = match &mut self.entities[key].relations {
            Relations::Device { system, parent, .. } => (system.take(), parent.take()),
            _ => return false,
        };
        let owners = system.map(EntityId::system).into_iter().chain(parent);
        for owner in owners {
            if let Some(&owner_key) = self.index.get(&owner) {
                if let Some(devices) = self.entities[owner_key].relations.devices_mut() {
                    devices.remove(&device);
                }
            }
        }
        system.is_some() || parent.is_some()
    }

    /// Forget one stored field.
    pub fn reset_field(&mut self, id: &EntityId, kind: FieldKind) -> Option<FieldState> {
        let key = *self.index.get(id)?;
        self.entities[key].fields.remove(&kind)
    }

    /// Install a known layout. Seeded bindings replace learned ones; zone
    /// names are stored with sequence 0 so any heard value supersedes them.
    pub fn seed(&mut self, layout: &SystemLayout) -> AppliedDelta {
        let mut delta = AppliedDelta::new(0);
        for system in &layout.systems {
            let ctl = system.controller;
            self.ensure(EntityId::system(ctl), &mut delta);
            if let Some(appliance) = system.appliance_control {
                self.force_bind(appliance, EntityId::system(ctl), &mut delta);
            }
            for zone in &system.zones {
                let id = EntityId::zone(ctl, zone.index);
                let key = self.ensure(id, &mut delta);
                if let Some(name) = &zone.name {
                    if !self.entities[key].fields.contains_key(&FieldKind::ZoneName) {
                        self.write_field(
                            id,
                            FieldKind::ZoneName,
                            Value::Text(name.clone()),
                            NaiveDateTime::MIN,
                            &mut delta,
                        );
                    }
                }
                for device in zone.sensor.iter().chain(&zone.actuators) {
                    self.force_bind(*device, id, &mut delta);
                }
            }
            if let Some(dhw) = &system.dhw {
                let id = EntityId::dhw(ctl);
                self.ensure(id, &mut delta);
                for device in dhw.devices() {
                    self.force_bind(device, id, &mut delta);
                }
            }
        }
        for orphan in &layout.orphans {
            self.ensure(EntityId::device(*orphan), &mut delta);
        }
        debug!(changes = delta.changes.len(), "layout seeded");
        delta
    }

    fn force_bind(&mut self, device: Address, target: EntityId, delta: &mut AppliedDelta) {
        let (system, parent) = self.binding(device);
        let wanted_parent = match target {
            EntityId::Zone { .. } | EntityId::Dhw { .. } => Some(target),
            _ => None,
        };
        let system_differs = system.is_some() && system != target.controller();
        let parent_differs = wanted_parent.is_some() && parent.is_some() && parent != wanted_parent;
        if system_differs || parent_differs {
            self.reset_binding(device);
            delta.push(StateChange::DeviceUnbound { device });
        }

        let result = match target {
            EntityId::System { controller } => self.bind_system(device, controller, delta),
            _ => self.bind_parent(device, target, delta),
        };
        if let Err(err) = result {
            warn!(%err, "seeded binding rejected");
        }
    }

    pub fn query(&self, id: &EntityId) -> Option<Snapshot> {
        self.index
            .get(id)
            .map(|&key| self.entities[key].snapshot())
    }

    pub fn query_address(&self, address: Address) -> Option<Snapshot> {
        self.query(&EntityId::device(address))
    }

    /// Liveness of `id` at `now`; unknown entities are [`Liveness::Unknown`].
    pub fn liveness(&self, id: &EntityId, now: NaiveDateTime) -> Liveness {
        self.query(id)
            .map(|snapshot| snapshot.liveness(now, &self.staleness))
            .unwrap_or(Liveness::Unknown)
    }

    /// Controllers with a known system, sorted.
    pub fn systems(&self) -> Vec<Address> {
        let mut systems: Vec<Address> = self
            .index
            .keys()
            .filter_map(|id| match id {
                EntityId::System { controller } => Some(*controller),
                _ => None,
            })
            .collect();
        systems.sort_unstable();
        systems
    }

    /// Every entity id, sorted.
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.ids()
            .iter()
            .filter_map(|id| self.query(id))
            .collect()
    }

    pub fn staleness(&self) -> &StalenessConfig {
        &self.staleness
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Only announcements and replies describe current state.
fn carries_state(verb: Verb) -> bool {
    matches!(verb, Verb::Info | Verb::Reply)
}

fn collect(result: Result<(), ApplyError>, errors: &mut Vec<ApplyError>) {
    if let Err(err) = result {
        errors.push(err);
    }
}

fn finish(applied: AppliedDelta, errors: Vec<ApplyError>) -> Result<AppliedDelta, ApplyFailure> {
    if errors.is_empty() {
        Ok(applied)
    } else {
        Err(ApplyFailure { applied, errors })
    }
}
