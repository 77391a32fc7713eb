use chrono::NaiveDateTime;
use ramses_frame::Address;
use ramses_schema::{FieldKind, Value};
use serde::Serialize;

use super::entity::EntityId;

/// One observable change to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StateChange {
    EntityCreated {
        entity: EntityId,
    },
    FieldUpdated {
        entity: EntityId,
        field: FieldKind,
        value: Value,
        dtm: NaiveDateTime,
        seq: u64,
    },
    DeviceBound {
        device: Address,
        target: EntityId,
    },
    DeviceUnbound {
        device: Address,
    },
}

impl StateChange {
    /// Entity the change is about. Binding changes report the device.
    pub fn entity(&self) -> EntityId {
        match self {
            StateChange::EntityCreated { entity } | StateChange::FieldUpdated { entity, .. } => {
                *entity
            }
            StateChange::DeviceBound { device, .. } | StateChange::DeviceUnbound { device } => {
                EntityId::device(*device)
            }
        }
    }
}

/// Changes made by applying one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppliedDelta {
    /// Sequence number of the message; 0 for out-of-band changes.
    pub seq: u64,
    pub changes: Vec<StateChange>,
    /// Field writes skipped because the stored value is newer.
    pub skipped: usize,
}

impl AppliedDelta {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn updated_fields(&self) -> impl Iterator<Item = (&EntityId, FieldKind, &Value)> {
        self.changes.iter().filter_map(|change| match change {
            StateChange::FieldUpdated {
                entity,
                field,
                value,
                ..
            } => Some((entity, *field, value)),
            _ => None,
        })
    }

    pub(crate) fn push(&mut self, change: StateChange) {
        self.changes.push(change);
    }
}
