use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use ramses_frame::Address;
use ramses_schema::FieldKind;

use crate::model::{EntityId, StateChange};

/// Selects which state changes a subscriber receives. The default passes
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    entity: Option<EntityId>,
    controller: Option<Address>,
    fields: Option<Vec<FieldKind>>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Only changes to `entity`, including bindings to it.
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Only changes within the system of `controller`.
    pub fn with_controller(mut self, controller: Address) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Only field updates of these kinds.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldKind>) -> Self {
        self.fields = Some(fields.into_iter().collect());
        self
    }

    pub fn matches(&self, change: &StateChange) -> bool {
        let subject = change.entity();
        let target = match change {
            StateChange::DeviceBound { target, .. } => Some(*target),
            _ => None,
        };

        if let Some(entity) = self.entity {
            if subject != entity && target != Some(entity) {
                return false;
            }
        }
        if let Some(controller) = self.controller {
            let in_system = subject.controller() == Some(controller)
                || subject == EntityId::device(controller)
                || target.and_then(|t| t.controller()) == Some(controller);
            if !in_system {
                return false;
            }
        }
        if let Some(fields) = &self.fields {
            return matches!(change, StateChange::FieldUpdated { field, .. } if fields.contains(field));
        }
        true
    }
}

/// Stream of state changes. Iteration ends when the gateway shuts down.
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<StateChange>,
}

impl Subscription {
    pub fn try_next(&self) -> Option<StateChange> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout`. `Ok(None)` means the wait timed out; `Err` means
    /// the stream has ended.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<StateChange>, Closed> {
        match self.rx.recv_timeout(timeout) {
            Ok(change) => Ok(Some(change)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Closed),
        }
    }
}

impl Iterator for Subscription {
    type Item = StateChange;

    fn next(&mut self) -> Option<StateChange> {
        self.rx.recv().ok()
    }
}

/// The subscription stream has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("subscription closed")]
pub struct Closed;

/// Fan-out of state changes to subscribers. Dropped subscriptions are pruned
/// on the next publish.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    entries: Mutex<Vec<(Filter, Sender<StateChange>)>>,
}

impl Subscribers {
    pub(crate) fn add(&self, filter: Filter) -> Subscription {
        let (tx, rx) = mpsc::channel();
        crate::gateway::lock(&self.entries).push((filter, tx));
        Subscription { rx }
    }

    pub(crate) fn publish(&self, changes: &[StateChange]) {
        if changes.is_empty() {
            return;
        }
        let mut entries = crate::gateway::lock(&self.entries);
        entries.retain(|(filter, tx)| {
            changes
                .iter()
                .filter(|change| filter.matches(change))
                .all(|change| tx.send(change.clone()).is_ok())
        });
    }

    /// Drop every sender, ending all subscriptions.
    pub(crate) fn close(&self) {
        crate::gateway::lock(&self.entries).clear();
    }

    pub(crate) fn len(&self) -> usize {
        crate::gateway::lock(&self.entries).len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use ramses_schema::Value;

    use super::*;

    fn ctl() -> Address {
        "01:145038".parse().unwrap()
    }

    fn temperature(entity: EntityId) -> StateChange {
        StateChange::FieldUpdated {
            entity,
            field: FieldKind::Temperature,
            value: Value::Float(20.0),
            dtm: NaiveDateTime::MIN,
            seq: 1,
        }
    }

    #[test]
    fn filters_by_entity_controller_and_field() {
        let zone = EntityId::zone(ctl(), 1);
        let other = EntityId::zone("01:000001".parse().unwrap(), 1);

        assert!(Filter::all().matches(&temperature(other)));
        assert!(Filter::all().with_entity(zone).matches(&temperature(zone)));
        assert!(!Filter::all().with_entity(zone).matches(&temperature(other)));
        assert!(Filter::all().with_controller(ctl()).matches(&temperature(zone)));
        assert!(!Filter::all().with_controller(ctl()).matches(&temperature(other)));

        let setpoints = Filter::all().with_fields([FieldKind::Setpoint]);
        assert!(!setpoints.matches(&temperature(zone)));
        assert!(!setpoints.matches(&StateChange::EntityCreated { entity: zone }));
    }

    #[test]
    fn binding_matches_its_target() {
        let bound = StateChange::DeviceBound {
            device: "04:189076".parse().unwrap(),
            target: EntityId::zone(ctl(), 1),
        };
        assert!(Filter::all()
            .with_entity(EntityId::zone(ctl(), 1))
            .matches(&bound));
        assert!(Filter::all().with_controller(ctl()).matches(&bound));
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let subscribers = Subscribers::default();
        let kept = subscribers.add(Filter::all());
        drop(subscribers.add(Filter::all()));

        subscribers.publish(&[StateChange::EntityCreated {
            entity: EntityId::system(ctl()),
        }]);
        assert_eq!(subscribers.len(), 1);
        assert!(kept.try_next().is_some());

        subscribers.close();
        assert_eq!(
            kept.next_timeout(Duration::from_millis(10)),
            Err(Closed)
        );
    }
}
