use std::collections::HashSet;

use crate::reference::{Endpoint, ReferenceId};

/// The ids one logical load (and the loads it triggers) is waiting on.
///
/// Loading an id that is already in flight within the same scope is a
/// cycle and fails fast instead of waiting forever.
#[derive(Default, Debug)]
pub struct LoadScope {
    in_flight: HashSet<ReferenceId>,
}

impl LoadScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ReferenceId) -> bool {
        self.in_flight.contains(id)
    }

    pub(crate) fn enter(&mut self, id: &ReferenceId) {
        self.in_flight.insert(*id);
    }

    pub fn finish(&mut self, id: &ReferenceId) {
        self.in_flight.remove(id);
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// Result of `Registry::load`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Already live in the registry.
    Resident,
    /// Found in a storage source and registered as live.
    Rehydrated,
    /// A placeholder was created; ask `origin` for the value.
    Subscribe { origin: Endpoint },
    /// A placeholder already exists and a subscribe is in flight.
    AwaitingOrigin,
}
