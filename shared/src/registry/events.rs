use std::collections::VecDeque;

use crate::{reference::ReferenceId, value::PropertyKey};

/// Registry lifecycle notifications, drained by the owner each tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryEvent {
    ReferenceAdded(ReferenceId),
    ReferenceRemoved(ReferenceId),
    PropertyAdded {
        reference: ReferenceId,
        key: PropertyKey,
    },
    PropertyChanged {
        reference: ReferenceId,
        key: PropertyKey,
    },
    PropertyDeleted {
        reference: ReferenceId,
        key: PropertyKey,
    },
    ValueChanged(ReferenceId),
}

#[derive(Default)]
pub(crate) struct RegistryEvents {
    queue: VecDeque<RegistryEvent>,
}

impl RegistryEvents {
    pub fn push(&mut self, event: RegistryEvent) {
        self.queue.push_back(event);
    }

    pub fn take(&mut self) -> Vec<RegistryEvent> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
