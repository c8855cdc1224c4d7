use std::collections::BTreeSet;

use crate::{
    reference::{Endpoint, ReferenceId},
    value::{Value, ValueKey, ValueType},
};

/// Creation options of a reference.
#[derive(Clone, Debug, Default)]
pub struct ReferenceOptions {
    pub declared_type: ValueType,
    pub sealed: bool,
    pub persistent: bool,
    pub stream_intermediate: bool,
    pub labels: Vec<String>,
}

impl ReferenceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typed(mut self, declared_type: ValueType) -> Self {
        self.declared_type = declared_type;
        self
    }

    pub fn sealed(mut self) -> Self {
        self.sealed = true;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Every intermediate state is sent, updates never coalesce.
    pub fn streaming(mut self) -> Self {
        self.stream_intermediate = true;
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.labels.push(label.to_string());
        self
    }
}

/// A registry entry.
pub struct Reference {
    pub(crate) id: ReferenceId,
    pub(crate) value: Option<Value>,
    pub(crate) value_key: Option<ValueKey>,
    pub(crate) declared_type: ValueType,
    pub(crate) origin: Endpoint,
    pub(crate) is_origin: bool,
    pub(crate) sealed: bool,
    pub(crate) anonymous: bool,
    pub(crate) persistent: bool,
    pub(crate) stream_intermediate: bool,
    pub(crate) read_only: bool,
    pub(crate) subscribers: BTreeSet<Endpoint>,
    pub(crate) labels: BTreeSet<String>,
    pub(crate) holds: u32,
}

impl Reference {
    pub(crate) fn placeholder(id: &ReferenceId) -> Self {
        Self {
            id: *id,
            value: None,
            value_key: None,
            declared_type: ValueType::Any,
            origin: id.origin(),
            is_origin: false,
            sealed: false,
            anonymous: false,
            persistent: false,
            stream_intermediate: false,
            read_only: false,
            subscribers: BTreeSet::new(),
            labels: BTreeSet::new(),
            holds: 0,
        }
    }

    pub fn id(&self) -> &ReferenceId {
        &self.id
    }

    /// `None` until the reference is initialized.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn value_key(&self) -> Option<ValueKey> {
        self.value_key
    }

    pub fn declared_type(&self) -> &ValueType {
        &self.declared_type
    }

    pub fn origin(&self) -> &Endpoint {
        &self.origin
    }

    pub fn is_origin(&self) -> bool {
        self.is_origin
    }

    pub fn is_initialized(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn streams_intermediate(&self) -> bool {
        self.stream_intermediate
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn subscribers(&self) -> impl Iterator<Item = &Endpoint> {
        self.subscribers.iter()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn labels(&self) -> impl Iterator<Item = &String> {
        self.labels.iter()
    }

    pub fn holds(&self) -> u32 {
        self.holds
    }

    /// No subscribers, no persistence, no local holds and a value to lose.
    pub fn is_collectable(&self) -> bool {
        self.subscribers.is_empty() && !self.persistent && self.holds == 0 && self.is_initialized()
    }
}
