use std::collections::{BTreeSet, HashMap};

use crate::reference::ReferenceId;

/// Directed mirror edges between references: a property change on the
/// source is replayed on every target.
#[derive(Default)]
pub(crate) struct ExtendEdges {
    targets: HashMap<ReferenceId, BTreeSet<ReferenceId>>,
}

impl ExtendEdges {
    pub fn add(&mut self, source: &ReferenceId, target: &ReferenceId) {
        self.targets.entry(*source).or_default().insert(*target);
    }

    pub fn remove(&mut self, source: &ReferenceId, target: &ReferenceId) -> bool {
        let Some(set) = self.targets.get_mut(source) else {
            return false;
        };
        let removed = set.remove(target);
        if set.is_empty() {
            self.targets.remove(source);
        }
        removed
    }

    pub fn targets_of(&self, source: &ReferenceId) -> Vec<ReferenceId> {
        self.targets
            .get(source)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn remove_reference(&mut self, reference: &ReferenceId) {
        self.targets.remove(reference);
        for set in self.targets.values_mut() {
            set.remove(reference);
        }
        self.targets.retain(|_, set| !set.is_empty());
    }
}

/// References whose changes are currently being replayed. A change is never
/// replayed onto a reference that is already on the stack, which breaks
/// mirror and transform cycles.
#[derive(Default)]
pub(crate) struct PropagationStack {
    stack: Vec<ReferenceId>,
}

impl PropagationStack {
    pub fn contains(&self, reference: &ReferenceId) -> bool {
        self.stack.contains(reference)
    }

    pub fn push(&mut self, reference: &ReferenceId) {
        self.stack.push(*reference);
    }

    pub fn pop(&mut self) {
        self.stack.pop();
    }
}
