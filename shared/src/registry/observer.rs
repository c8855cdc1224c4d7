use crate::{
    reference::{Endpoint, ReferenceId},
    value::{PropertyKey, Value},
};

/// What happened to a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The reference received its first value.
    Init,
    Set,
    Delete,
    Clear,
    Add,
    Remove,
    /// The reference is about to be removed from the registry.
    BeforeDelete,
}

/// Where a change came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateSource {
    Local,
    Remote(Endpoint),
}

impl UpdateSource {
    pub fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            UpdateSource::Local => None,
            UpdateSource::Remote(endpoint) => Some(endpoint),
        }
    }
}

/// Passed to observers once per logical change, after it was applied.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceChange {
    pub reference: ReferenceId,
    pub kind: ChangeKind,
    /// `None` when the change concerns the whole value.
    pub key: Option<PropertyKey>,
    pub value: Option<Value>,
    pub previous: Option<Value>,
    pub source: UpdateSource,
}

/// Returned by an observer to stay subscribed or to remove itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserverControl {
    Continue,
    Stop,
}

pub type ObserverId = u64;

pub type ObserverFn = Box<dyn FnMut(&ReferenceChange) -> ObserverControl + Send>;

struct Observer {
    id: ObserverId,
    key: Option<PropertyKey>,
    callback: ObserverFn,
}

/// Observers of one reference.
#[derive(Default)]
pub(crate) struct Observers {
    entries: Vec<Observer>,
}

impl Observers {
    pub fn add(&mut self, id: ObserverId, key: Option<PropertyKey>, callback: ObserverFn) {
        self.entries.push(Observer { id, key, callback });
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|observer| observer.id != id);
        before != self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Calls every observer interested in `change`. Key observers see
    /// changes to their key and changes to the whole value.
    pub fn notify(&mut self, change: &ReferenceChange) {
        self.entries.retain_mut(|observer| {
            let interested = match (&observer.key, &change.key) {
                (None, _) => true,
                (Some(_), None) => true,
                (Some(wanted), Some(changed)) => wanted == changed,
            };
            if !interested {
                return true;
            }
            (observer.callback)(change) == ObserverControl::Continue
        });
    }
}
