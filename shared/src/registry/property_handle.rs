use std::collections::HashMap;

use crate::{reference::ReferenceId, value::PropertyKey};

/// Addresses one property of one reference. Reads collapse to the child
/// value, writes go through the parent's mutation path.
///
/// There is exactly one handle per `(reference, key)` pair, so handles can
/// be compared and hashed by identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropertyHandle {
    index: u64,
    reference: ReferenceId,
}

impl PropertyHandle {
    pub fn reference(&self) -> &ReferenceId {
        &self.reference
    }
}

#[derive(Default)]
pub(crate) struct PropertyHandles {
    next_index: u64,
    by_pair: HashMap<(ReferenceId, PropertyKey), PropertyHandle>,
    keys: HashMap<PropertyHandle, PropertyKey>,
}

impl PropertyHandles {
    pub fn intern(&mut self, reference: &ReferenceId, key: &PropertyKey) -> PropertyHandle {
        if let Some(handle) = self.by_pair.get(&(*reference, key.clone())) {
            return *handle;
        }
        self.next_index += 1;
        let handle = PropertyHandle {
            index: self.next_index,
            reference: *reference,
        };
        self.by_pair.insert((*reference, key.clone()), handle);
        self.keys.insert(handle, key.clone());
        handle
    }

    pub fn key(&self, handle: &PropertyHandle) -> Option<&PropertyKey> {
        self.keys.get(handle)
    }

    pub fn remove_reference(&mut self, reference: &ReferenceId) {
        self.by_pair.retain(|(id, _), _| id != reference);
        self.keys.retain(|handle, _| handle.reference != *reference);
    }

    pub fn len(&self) -> usize {
        self.by_pair.len()
    }
}
