use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    backends::Instant,
    error::SyncError,
    gc::GarbageCollector,
    protocol::{ReferenceSnapshot, UpdateAction, UpdateBatch, UpdateFragment},
    reference::{Endpoint, ReferenceId, ReferenceIdGenerator},
    registry::{
        events::{RegistryEvent, RegistryEvents},
        extend::{ExtendEdges, PropagationStack},
        load_scope::{LoadOutcome, LoadScope},
        mutation::{apply_action, AppliedChange, MutationRules},
        observer::{
            ChangeKind, ObserverControl, ObserverFn, ObserverId, Observers, ReferenceChange,
            UpdateSource,
        },
        property_handle::{PropertyHandle, PropertyHandles},
        reference::{Reference, ReferenceOptions},
        ProtocolError, ReferenceError, ValueError,
    },
    scheduler::UpdateScheduler,
    storage::{PersistenceMode, ReferenceSource, StorageSources, StoredReference},
    value::{PropertyKey, TypeSchema, Value, ValueKey, ValueType},
};

/// Derives a value from the current values of its inputs. An input that is
/// gone or not yet initialized is passed as `None`.
pub type TransformFn = Box<dyn Fn(&[Option<&Value>]) -> Value + Send>;

struct Transform {
    inputs: Vec<ReferenceId>,
    compute: TransformFn,
}

/// Settings of a `Registry`.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// How long a collectable reference survives before it is reclaimed.
    pub gc_grace_period: Duration,
    pub persistence: PersistenceMode,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            gc_grace_period: Duration::from_secs(30),
            persistence: PersistenceMode::SaveContinuously,
        }
    }
}

fn not_found(id: &ReferenceId) -> SyncError {
    ReferenceError::NotFound {
        reference: id.to_string(),
    }
    .into()
}

fn uninitialized(id: &ReferenceId) -> SyncError {
    ReferenceError::Uninitialized {
        reference: id.to_string(),
    }
    .into()
}

/// Owns every reference known to the local endpoint: identity, values,
/// observers, labels, mirrors, transforms, subscribers and outgoing updates.
///
/// All mutations go through the registry. Each one is validated first,
/// then applied, then queued for the endpoints that need it, and finally
/// reported to local observers.
pub struct Registry {
    local: Endpoint,
    id_generator: ReferenceIdGenerator,
    next_value_key: u64,
    next_observer: ObserverId,
    references: HashMap<ReferenceId, Reference>,
    value_index: HashMap<ValueKey, ReferenceId>,
    label_index: HashMap<String, ReferenceId>,
    schemas: HashMap<String, TypeSchema>,
    observers: HashMap<ReferenceId, Observers>,
    handles: PropertyHandles,
    edges: ExtendEdges,
    transforms: HashMap<ReferenceId, Transform>,
    dependents: HashMap<ReferenceId, Vec<ReferenceId>>,
    propagation: PropagationStack,
    scheduler: UpdateScheduler,
    gc: GarbageCollector,
    gc_candidates: HashSet<ReferenceId>,
    storage: StorageSources,
    persistence: PersistenceMode,
    synced: HashSet<ReferenceId>,
    events: RegistryEvents,
}

impl Registry {
    pub fn new(local: Endpoint, config: RegistryConfig) -> Self {
        Self::with_id_generator(ReferenceIdGenerator::new(local), config)
    }

    pub fn with_id_generator(id_generator: ReferenceIdGenerator, config: RegistryConfig) -> Self {
        Self {
            local: *id_generator.endpoint(),
            id_generator,
            next_value_key: 0,
            next_observer: 0,
            references: HashMap::new(),
            value_index: HashMap::new(),
            label_index: HashMap::new(),
            schemas: HashMap::new(),
            observers: HashMap::new(),
            handles: PropertyHandles::default(),
            edges: ExtendEdges::default(),
            transforms: HashMap::new(),
            dependents: HashMap::new(),
            propagation: PropagationStack::default(),
            scheduler: UpdateScheduler::new(),
            gc: GarbageCollector::new(config.gc_grace_period),
            gc_candidates: HashSet::new(),
            storage: StorageSources::new(),
            persistence: config.persistence,
            synced: HashSet::new(),
            events: RegistryEvents::default(),
        }
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    pub fn is_local_origin(&self, id: &ReferenceId) -> bool {
        id.origin().matches(&self.local)
    }

    // Schemas

    pub fn register_schema(&mut self, schema: TypeSchema) {
        self.schemas.insert(schema.name().to_string(), schema);
    }

    pub fn schema(&self, name: &str) -> Option<&TypeSchema> {
        self.schemas.get(name)
    }

    fn schema_of(&self, reference: &Reference) -> Option<&TypeSchema> {
        reference
            .declared_type
            .schema_name()
            .and_then(|name| self.schemas.get(name))
    }

    // Creation

    /// Creates a reference with a fresh id, owned by the local endpoint.
    pub fn create(&mut self, value: Value, options: ReferenceOptions) -> Result<ReferenceId, SyncError> {
        let id = self.id_generator.generate();
        self.insert_new(id, value, options, false, false)
    }

    /// Creates a reference with a caller-chosen id. The id must name the
    /// local endpoint as its origin.
    pub fn create_with_id(
        &mut self,
        id: ReferenceId,
        value: Value,
        options: ReferenceOptions,
    ) -> Result<ReferenceId, SyncError> {
        if !self.is_local_origin(&id) {
            return Err(ValueError::InvalidReferenceId {
                reason: format!("{} is owned by {}, not {}", id, id.origin(), self.local),
            }
            .into());
        }
        self.insert_new(id, value, options, false, false)
    }

    pub fn create_static(
        &mut self,
        unique: u32,
        value: Value,
        options: ReferenceOptions,
    ) -> Result<ReferenceId, SyncError> {
        let id = ReferenceId::new_static(&self.local, unique);
        self.insert_new(id, value, options, false, false)
    }

    /// A reference that is never advertised to other endpoints and never
    /// persisted.
    pub fn create_anonymous(&mut self, value: Value) -> Result<ReferenceId, SyncError> {
        let id = self.id_generator.generate();
        self.insert_new(id, value, ReferenceOptions::default(), true, false)
    }

    /// A read-only reference recomputed whenever one of `inputs` changes.
    pub fn create_transform(
        &mut self,
        inputs: &[ReferenceId],
        compute: TransformFn,
        options: ReferenceOptions,
    ) -> Result<ReferenceId, SyncError> {
        for input in inputs {
            if !self.references.contains_key(input) {
                return Err(not_found(input));
            }
        }
        let initial = {
            let values: Vec<Option<&Value>> = inputs
                .iter()
                .map(|input| self.references.get(input).and_then(|r| r.value.as_ref()))
                .collect();
            compute(&values)
        };

        let id = self.id_generator.generate();
        self.insert_new(id, initial, options, false, true)?;

        for input in inputs {
            self.dependents.entry(*input).or_default().push(id);
            self.refresh_collectable(input);
        }
        self.transforms.insert(
            id,
            Transform {
                inputs: inputs.to_vec(),
                compute,
            },
        );
        Ok(id)
    }

    fn insert_new(
        &mut self,
        id: ReferenceId,
        value: Value,
        options: ReferenceOptions,
        anonymous: bool,
        read_only: bool,
    ) -> Result<ReferenceId, SyncError> {
        // validate everything before any table is touched
        if self.references.contains_key(&id) {
            return Err(ValueError::DuplicateReference {
                value: id.to_string(),
                existing: id.to_string(),
            }
            .into());
        }
        for label in &options.labels {
            if let Some(existing) = self.label_index.get(label) {
                return Err(ValueError::LabelTaken {
                    label: label.clone(),
                    existing: existing.to_string(),
                }
                .into());
            }
        }

        let mut adopted: Option<(ValueKey, ReferenceId)> = None;
        let value = match value {
            Value::Handle(key) => {
                let Some(owner) = self.value_index.get(&key).copied() else {
                    return Err(ValueError::UnknownHandle { handle: key.raw() }.into());
                };
                let owner_reference = self.references.get(&owner).ok_or_else(|| not_found(&owner))?;
                if !owner_reference.anonymous || anonymous {
                    return Err(ValueError::DuplicateReference {
                        value: format!("handle {}", key.raw()),
                        existing: owner.to_string(),
                    }
                    .into());
                }
                adopted = Some((key, owner));
                owner_reference
                    .value
                    .clone()
                    .ok_or_else(|| uninitialized(&owner))?
            }
            other => self.resolve_handles(other)?,
        };

        let declared_type = options.declared_type.clone();
        if !declared_type.accepts(&value) {
            return Err(ValueError::TypeMismatch {
                target: id.to_string(),
                expected: declared_type.to_string(),
                actual: value.kind_name().to_string(),
            }
            .into());
        }
        let mut value = declared_type.coerce(value);
        if let Some(name) = declared_type.schema_name() {
            let Some(schema) = self.schemas.get(name) else {
                return Err(ValueError::UnknownType {
                    type_name: name.to_string(),
                }
                .into());
            };
            schema.check_value(&id.to_string(), &value)?;
            value = schema.coerce(value);
        }

        // commit
        if let Some((_, owner)) = adopted {
            info!("Reference {} takes over the value of anonymous {}", id, owner);
            self.delete(&owner);
        }

        let value_key = if value.is_composite() {
            let key = match adopted {
                Some((key, _)) => key,
                None => self.next_value_key(),
            };
            self.value_index.insert(key, id);
            Some(key)
        } else {
            None
        };

        let mut reference = Reference::placeholder(&id);
        reference.value = Some(value);
        reference.value_key = value_key;
        reference.declared_type = declared_type;
        reference.is_origin = true;
        reference.sealed = options.sealed;
        reference.anonymous = anonymous;
        reference.persistent = options.persistent;
        reference.stream_intermediate = options.stream_intermediate;
        reference.read_only = read_only;
        for label in options.labels {
            self.label_index.insert(label.clone(), id);
            reference.labels.insert(label);
        }
        self.references.insert(id, reference);

        debug!("Created reference {}", id);
        self.events.push(RegistryEvent::ReferenceAdded(id));
        self.refresh_collectable(&id);
        Ok(id)
    }

    fn next_value_key(&mut self) -> ValueKey {
        self.next_value_key += 1;
        ValueKey::new(self.next_value_key)
    }

    /// Replaces every nested `Handle` with a link to the reference that
    /// owns it.
    fn resolve_handles(&self, value: Value) -> Result<Value, ValueError> {
        match value {
            Value::Handle(key) => self
                .value_index
                .get(&key)
                .map(|owner| Value::Reference(*owner))
                .ok_or(ValueError::UnknownHandle { handle: key.raw() }),
            Value::Map(map) => Ok(Value::Map(
                map.into_iter()
                    .map(|(k, v)| self.resolve_handles(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            )),
            Value::List(list) => Ok(Value::List(
                list.into_iter()
                    .map(|v| self.resolve_handles(v))
                    .collect::<Result<_, _>>()?,
            )),
            other => Ok(other),
        }
    }

    fn resolve_action_handles(&self, action: UpdateAction) -> Result<UpdateAction, ValueError> {
        Ok(match action {
            UpdateAction::SetValue(value) => UpdateAction::SetValue(self.resolve_handles(value)?),
            UpdateAction::SetProperty { key, value } => UpdateAction::SetProperty {
                key,
                value: self.resolve_handles(value)?,
            },
            UpdateAction::AddElements { values } => UpdateAction::AddElements {
                values: values
                    .into_iter()
                    .map(|v| self.resolve_handles(v))
                    .collect::<Result<_, _>>()?,
            },
            UpdateAction::Splice {
                start,
                delete_count,
                insert,
            } => UpdateAction::Splice {
                start,
                delete_count,
                insert: insert
                    .into_iter()
                    .map(|v| self.resolve_handles(v))
                    .collect::<Result<_, _>>()?,
            },
            other => other,
        })
    }

    // Lookup

    pub fn contains(&self, id: &ReferenceId) -> bool {
        self.references.contains_key(id)
    }

    pub fn get(&self, id: &ReferenceId) -> Option<&Reference> {
        self.references.get(id)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn reference_ids(&self) -> Vec<ReferenceId> {
        let mut ids: Vec<ReferenceId> = self.references.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn value(&self, id: &ReferenceId) -> Result<&Value, SyncError> {
        let reference = self.references.get(id).ok_or_else(|| not_found(id))?;
        reference.value.as_ref().ok_or_else(|| uninitialized(id))
    }

    /// The value under `key`, or `Null` when the key is absent.
    pub fn property(&self, id: &ReferenceId, key: impl Into<PropertyKey>) -> Result<Value, SyncError> {
        let key = key.into();
        Ok(self.value(id)?.get(&key).cloned().unwrap_or(Value::Null))
    }

    pub fn get_by_label(&self, label: &str) -> Option<ReferenceId> {
        self.label_index.get(label).copied()
    }

    /// The reference a value belongs to: the owner of a `Handle`, or the
    /// target of a resident `Reference` link.
    pub fn get_by_value(&self, value: &Value) -> Option<ReferenceId> {
        match value {
            Value::Handle(key) => self.value_index.get(key).copied(),
            Value::Reference(id) if self.references.contains_key(id) => Some(*id),
            _ => None,
        }
    }

    /// Identity of the managed object behind a composite reference.
    pub fn value_handle(&self, id: &ReferenceId) -> Option<Value> {
        self.references
            .get(id)
            .and_then(|r| r.value_key)
            .map(Value::Handle)
    }

    // Permissions

    pub fn can_read_property(&self, id: &ReferenceId, key: &PropertyKey) -> bool {
        let Some(reference) = self.references.get(id) else {
            return false;
        };
        match (self.schema_of(reference), key) {
            (Some(schema), PropertyKey::Name(name)) => schema.can_read(name),
            _ => true,
        }
    }

    pub fn can_update_property(&self, id: &ReferenceId, key: &PropertyKey) -> bool {
        let Some(reference) = self.references.get(id) else {
            return false;
        };
        let Some(value) = reference.value.as_ref() else {
            return false;
        };
        if reference.read_only {
            return false;
        }
        if reference.sealed && value.get(key).is_none() {
            return false;
        }
        match (self.schema_of(reference), key) {
            (Some(schema), PropertyKey::Name(name)) => schema.can_update(name),
            _ => true,
        }
    }

    // Mutation

    pub fn set_value(&mut self, id: &ReferenceId, value: Value) -> Result<(), SyncError> {
        self.mutate(id, UpdateAction::SetValue(value), UpdateSource::Local, false)
    }

    pub fn set_property(
        &mut self,
        id: &ReferenceId,
        key: impl Into<PropertyKey>,
        value: Value,
    ) -> Result<(), SyncError> {
        let action = UpdateAction::SetProperty {
            key: key.into(),
            value,
        };
        self.mutate(id, action, UpdateSource::Local, false)
    }

    pub fn delete_property(&mut self, id: &ReferenceId, key: impl Into<PropertyKey>) -> Result<(), SyncError> {
        let action = UpdateAction::DeleteProperty { key: key.into() };
        self.mutate(id, action, UpdateSource::Local, false)
    }

    pub fn add_element(&mut self, id: &ReferenceId, value: Value) -> Result<(), SyncError> {
        self.add_elements(id, vec![value])
    }

    pub fn add_elements(&mut self, id: &ReferenceId, values: Vec<Value>) -> Result<(), SyncError> {
        self.mutate(id, UpdateAction::AddElements { values }, UpdateSource::Local, false)
    }

    pub fn remove_element(&mut self, id: &ReferenceId, index: usize) -> Result<(), SyncError> {
        self.mutate(id, UpdateAction::RemoveElement { index }, UpdateSource::Local, false)
    }

    pub fn clear(&mut self, id: &ReferenceId) -> Result<(), SyncError> {
        self.mutate(id, UpdateAction::Clear, UpdateSource::Local, false)
    }

    pub fn splice_range(
        &mut self,
        id: &ReferenceId,
        start: usize,
        delete_count: usize,
        insert: Vec<Value>,
    ) -> Result<(), SyncError> {
        let action = UpdateAction::Splice {
            start,
            delete_count,
            insert,
        };
        self.mutate(id, action, UpdateSource::Local, false)
    }

    /// Applies a mutation received from another endpoint. The origin only
    /// accepts updates from its subscribers, a replica only from its origin.
    pub fn apply_remote(&mut self, from: &Endpoint, fragment: UpdateFragment) -> Result<(), SyncError> {
        let id = fragment.reference;
        let reference = self.references.get(&id).ok_or_else(|| not_found(&id))?;
        let allowed = if reference.is_origin {
            reference.subscribers.contains(from)
        } else {
            reference.origin.matches(from)
        };
        if !allowed {
            return Err(ProtocolError::UnexpectedSender {
                reference: id.to_string(),
                sender: from.to_string(),
            }
            .into());
        }
        if reference.is_origin && reference.read_only {
            return Err(ValueError::ReadOnly {
                reference: id.to_string(),
            }
            .into());
        }
        if fragment.action.contains_handle() {
            return Err(ProtocolError::ForeignHandle {
                reference: id.to_string(),
                sender: from.to_string(),
            }
            .into());
        }

        // a subscriber never sees hidden fields, so its whole value must not
        // erase them
        let action = match (fragment.action, self.schema_of(reference), &reference.value) {
            (UpdateAction::SetValue(value), Some(schema), Some(current)) if reference.is_origin => {
                UpdateAction::SetValue(schema.keep_hidden(current, value))
            }
            (action, _, _) => action,
        };
        self.mutate(&id, action, UpdateSource::Remote(*from), true)
    }

    fn mutate(
        &mut self,
        id: &ReferenceId,
        action: UpdateAction,
        source: UpdateSource,
        bypass_read_only: bool,
    ) -> Result<(), SyncError> {
        let action = self.resolve_action_handles(action)?;

        let (next, change) = {
            let reference = self.references.get(id).ok_or_else(|| not_found(id))?;
            let current = reference.value.as_ref().ok_or_else(|| uninitialized(id))?;
            if reference.read_only && !bypass_read_only {
                return Err(ValueError::ReadOnly {
                    reference: id.to_string(),
                }
                .into());
            }
            let rules = MutationRules {
                target: id.to_string(),
                declared_type: &reference.declared_type,
                schema: self.schema_of(reference),
                sealed: reference.sealed,
            };
            match apply_action(current, &action, &rules)? {
                Some(applied) => applied,
                None => return Ok(()),
            }
        };

        self.commit_value(id, next);
        self.propagate(id, &action, &change, &source);
        self.report(id, &change, source);

        if self.persistence == PersistenceMode::SaveContinuously && self.synced.contains(id) {
            if let Err(err) = self.persist(id) {
                warn!("Failed to write through {}: {}", id, err);
            }
        }

        self.replay_extends(id, &action);
        self.recompute_dependents(id);
        Ok(())
    }

    fn commit_value(&mut self, id: &ReferenceId, next: Value) {
        let composite = next.is_composite();
        let existing_key = self.references.get(id).and_then(|r| r.value_key);
        let value_key = match (composite, existing_key) {
            (true, Some(key)) => Some(key),
            (true, None) => {
                let key = self.next_value_key();
                self.value_index.insert(key, *id);
                Some(key)
            }
            (false, Some(key)) => {
                self.value_index.remove(&key);
                None
            }
            (false, None) => None,
        };
        if let Some(reference) = self.references.get_mut(id) {
            reference.value = Some(next);
            reference.value_key = value_key;
        }
    }

    /// Queues the change for every endpoint that must see it.
    fn propagate(
        &mut self,
        id: &ReferenceId,
        action: &UpdateAction,
        change: &AppliedChange,
        source: &UpdateSource,
    ) {
        let Some(reference) = self.references.get(id) else {
            return;
        };
        if reference.anonymous {
            return;
        }

        let destinations: Vec<Endpoint> = if reference.is_origin {
            // hidden fields never leave the origin
            if let (Some(schema), Some(PropertyKey::Name(name))) = (self.schema_of(reference), &change.key) {
                if !schema.can_read(name) {
                    return;
                }
            }
            reference
                .subscribers
                .iter()
                .filter(|subscriber| Some(*subscriber) != source.endpoint())
                .copied()
                .collect()
        } else if *source == UpdateSource::Local {
            vec![reference.origin]
        } else {
            Vec::new()
        };

        let action = match (action, self.schema_of(reference)) {
            (UpdateAction::SetValue(value), Some(schema)) if reference.is_origin => {
                UpdateAction::SetValue(schema.visible(value.clone()))
            }
            (action, _) => action.clone(),
        };
        let identifier = match &action {
            UpdateAction::SetValue(_) => "value".to_string(),
            UpdateAction::SetProperty { key, .. } => format!("set:{}", key),
            _ => String::new(),
        };
        let collapse_first = matches!(action, UpdateAction::SetValue(_));
        let stream_intermediate = reference.stream_intermediate;

        for destination in destinations {
            self.scheduler.add_update(
                id,
                &identifier,
                action.clone(),
                &destination,
                collapse_first,
                stream_intermediate,
            );
        }
    }

    fn report(&mut self, id: &ReferenceId, change: &AppliedChange, source: UpdateSource) {
        let reference_change = ReferenceChange {
            reference: *id,
            kind: change.kind,
            key: change.key.clone(),
            value: change.value.clone(),
            previous: change.previous.clone(),
            source,
        };
        self.notify(id, &reference_change);

        let event = match (change.kind, &change.key) {
            (ChangeKind::Set, Some(key)) if change.added_key => RegistryEvent::PropertyAdded {
                reference: *id,
                key: key.clone(),
            },
            (ChangeKind::Set, Some(key)) => RegistryEvent::PropertyChanged {
                reference: *id,
                key: key.clone(),
            },
            (ChangeKind::Delete, Some(key)) => RegistryEvent::PropertyDeleted {
                reference: *id,
                key: key.clone(),
            },
            _ => RegistryEvent::ValueChanged(*id),
        };
        self.events.push(event);
    }

    fn notify(&mut self, id: &ReferenceId, change: &ReferenceChange) {
        if let Some(observers) = self.observers.get_mut(id) {
            observers.notify(change);
            if observers.is_empty() {
                self.observers.remove(id);
            }
        }
    }

    // Observers

    pub fn observe<F>(&mut self, id: &ReferenceId, callback: F) -> Result<ObserverId, SyncError>
    where
        F: FnMut(&ReferenceChange) -> ObserverControl + Send + 'static,
    {
        self.add_observer(id, None, Box::new(callback))
    }

    pub fn observe_property<F>(
        &mut self,
        id: &ReferenceId,
        key: impl Into<PropertyKey>,
        callback: F,
    ) -> Result<ObserverId, SyncError>
    where
        F: FnMut(&ReferenceChange) -> ObserverControl + Send + 'static,
    {
        self.add_observer(id, Some(key.into()), Box::new(callback))
    }

    fn add_observer(
        &mut self,
        id: &ReferenceId,
        key: Option<PropertyKey>,
        callback: ObserverFn,
    ) -> Result<ObserverId, SyncError> {
        if !self.references.contains_key(id) {
            return Err(not_found(id));
        }
        self.next_observer += 1;
        let observer_id = self.next_observer;
        self.observers
            .entry(*id)
            .or_default()
            .add(observer_id, key, callback);
        Ok(observer_id)
    }

    pub fn unobserve(&mut self, id: &ReferenceId, observer: ObserverId) -> bool {
        let Some(observers) = self.observers.get_mut(id) else {
            return false;
        };
        let removed = observers.remove(observer);
        if observers.is_empty() {
            self.observers.remove(id);
        }
        removed
    }

    pub fn observer_count(&self, id: &ReferenceId) -> usize {
        self.observers.get(id).map(|o| o.len()).unwrap_or(0)
    }

    // Property handles

    pub fn property_handle(
        &mut self,
        id: &ReferenceId,
        key: impl Into<PropertyKey>,
    ) -> Result<PropertyHandle, SyncError> {
        if !self.references.contains_key(id) {
            return Err(not_found(id));
        }
        Ok(self.handles.intern(id, &key.into()))
    }

    pub fn read_handle(&self, handle: &PropertyHandle) -> Result<Value, SyncError> {
        let key = self
            .handles
            .key(handle)
            .ok_or_else(|| not_found(handle.reference()))?;
        self.property(handle.reference(), key.clone())
    }

    pub fn write_handle(&mut self, handle: &PropertyHandle, value: Value) -> Result<(), SyncError> {
        let key = self
            .handles
            .key(handle)
            .cloned()
            .ok_or_else(|| not_found(handle.reference()))?;
        let id = *handle.reference();
        self.set_property(&id, key, value)
    }

    // Labels

    pub fn add_label(&mut self, id: &ReferenceId, label: &str) -> Result<(), SyncError> {
        if let Some(existing) = self.label_index.get(label) {
            if existing == id {
                return Ok(());
            }
            return Err(ValueError::LabelTaken {
                label: label.to_string(),
                existing: existing.to_string(),
            }
            .into());
        }
        let reference = self.references.get_mut(id).ok_or_else(|| not_found(id))?;
        reference.labels.insert(label.to_string());
        self.label_index.insert(label.to_string(), *id);
        Ok(())
    }

    pub fn remove_label(&mut self, label: &str) -> Option<ReferenceId> {
        let id = self.label_index.remove(label)?;
        if let Some(reference) = self.references.get_mut(&id) {
            reference.labels.remove(label);
        }
        Some(id)
    }

    // Extend

    /// Copies `source`'s properties into `target` and keeps replaying
    /// `source`'s property changes onto `target`. With `bidirectional`, the
    /// reverse edge is added too.
    pub fn extend(
        &mut self,
        target: &ReferenceId,
        source: &ReferenceId,
        bidirectional: bool,
    ) -> Result<(), SyncError> {
        let Value::Map(properties) = self.value(source)?.clone() else {
            return Err(ValueError::WrongValueKind {
                reference: source.to_string(),
                operation: "extend",
                actual: self.value(source)?.kind_name().to_string(),
            }
            .into());
        };
        let target_value = self.value(target)?;
        if !matches!(target_value, Value::Map(_)) {
            return Err(ValueError::WrongValueKind {
                reference: target.to_string(),
                operation: "extend",
                actual: target_value.kind_name().to_string(),
            }
            .into());
        }

        for (key, value) in properties {
            self.set_property(target, key.as_str(), value)?;
        }
        self.edges.add(source, target);
        if bidirectional {
            self.edges.add(target, source);
        }
        Ok(())
    }

    pub fn unextend(&mut self, target: &ReferenceId, source: &ReferenceId) -> bool {
        let forward = self.edges.remove(source, target);
        let backward = self.edges.remove(target, source);
        forward || backward
    }

    fn replay_extends(&mut self, id: &ReferenceId, action: &UpdateAction) {
        let targets = self.edges.targets_of(id);
        if targets.is_empty() {
            return;
        }
        self.propagation.push(id);
        for target in targets {
            if self.propagation.contains(&target) {
                continue;
            }
            if let Err(err) = self.mutate(&target, action.clone(), UpdateSource::Local, false) {
                warn!("Could not mirror {} change from {} to {}: {}", action.name(), id, target, err);
            }
        }
        self.propagation.pop();
    }

    fn recompute_dependents(&mut self, id: &ReferenceId) {
        let Some(dependents) = self.dependents.get(id).cloned() else {
            return;
        };
        self.propagation.push(id);
        for dependent in dependents {
            if self.propagation.contains(&dependent) {
                continue;
            }
            let Some(transform) = self.transforms.get(&dependent) else {
                continue;
            };
            let value = {
                let inputs: Vec<Option<&Value>> = transform
                    .inputs
                    .iter()
                    .map(|input| self.references.get(input).and_then(|r| r.value.as_ref()))
                    .collect();
                (transform.compute)(&inputs)
            };
            if let Err(err) = self.mutate(&dependent, UpdateAction::SetValue(value), UpdateSource::Local, true) {
                warn!("Could not recompute transform {}: {}", dependent, err);
            }
        }
        self.propagation.pop();
    }

    // Subscribers, holds and collectability

    pub fn add_subscriber(&mut self, id: &ReferenceId, endpoint: &Endpoint) -> Result<(), SyncError> {
        let reference = self.references.get_mut(id).ok_or_else(|| not_found(id))?;
        if reference.anonymous {
            return Err(ProtocolError::AnonymousSubscribe {
                reference: id.to_string(),
            }
            .into());
        }
        if reference.subscribers.insert(*endpoint) {
            debug!("{} subscribed to {}", endpoint, id);
        }
        self.refresh_collectable(id);
        Ok(())
    }

    pub fn remove_subscriber(&mut self, id: &ReferenceId, endpoint: &Endpoint) -> bool {
        let Some(reference) = self.references.get_mut(id) else {
            return false;
        };
        let removed = reference.subscribers.remove(endpoint);
        if removed {
            debug!("{} unsubscribed from {}", endpoint, id);
            self.refresh_collectable(id);
        }
        removed
    }

    /// A local strong claim that keeps the reference from being reclaimed.
    pub fn hold(&mut self, id: &ReferenceId) -> Result<(), SyncError> {
        let reference = self.references.get_mut(id).ok_or_else(|| not_found(id))?;
        reference.holds += 1;
        self.refresh_collectable(id);
        Ok(())
    }

    pub fn release(&mut self, id: &ReferenceId) -> Result<(), SyncError> {
        let reference = self.references.get_mut(id).ok_or_else(|| not_found(id))?;
        reference.holds = reference.holds.saturating_sub(1);
        self.refresh_collectable(id);
        Ok(())
    }

    pub fn set_persistent(&mut self, id: &ReferenceId, persistent: bool) -> Result<(), SyncError> {
        let reference = self.references.get_mut(id).ok_or_else(|| not_found(id))?;
        reference.persistent = persistent;
        self.refresh_collectable(id);
        Ok(())
    }

    /// Collectable, and not an input of a live transform.
    pub fn is_collectable(&self, id: &ReferenceId) -> bool {
        let Some(reference) = self.references.get(id) else {
            return false;
        };
        let feeds_transform = self
            .dependents
            .get(id)
            .map(|dependents| !dependents.is_empty())
            .unwrap_or(false);
        reference.is_collectable() && !feeds_transform
    }

    pub fn is_scheduled_for_collection(&self, id: &ReferenceId) -> bool {
        self.gc_candidates.contains(id) || self.gc.is_scheduled(id)
    }

    fn refresh_collectable(&mut self, id: &ReferenceId) {
        if self.is_collectable(id) {
            if !self.gc.is_scheduled(id) {
                self.gc_candidates.insert(*id);
            }
        } else {
            self.gc_candidates.remove(id);
            self.gc.cancel(id);
        }
    }

    /// Starts grace periods for newly collectable references and reclaims
    /// the ones whose grace period is over. Returns the reclaimed ids.
    pub fn collect_garbage(&mut self, now: &Instant) -> Vec<ReferenceId> {
        let candidates: Vec<ReferenceId> = self.gc_candidates.drain().collect();
        for id in candidates {
            if self.is_collectable(&id) {
                self.gc.schedule(&id, now);
            }
        }

        let mut reclaimed = Vec::new();
        for id in self.gc.sweep(now) {
            if self.is_collectable(&id) && self.delete(&id) {
                reclaimed.push(id);
            }
        }
        if !reclaimed.is_empty() {
            info!("Reclaimed {} unreferenced reference(s)", reclaimed.len());
        }
        reclaimed
    }

    /// Removes a reference from every index. Returns `false` when the
    /// reference was already gone.
    pub fn delete(&mut self, id: &ReferenceId) -> bool {
        let Some(previous) = self.references.get(id).map(|r| r.value.clone()) else {
            return false;
        };
        let change = ReferenceChange {
            reference: *id,
            kind: ChangeKind::BeforeDelete,
            key: None,
            value: None,
            previous,
            source: UpdateSource::Local,
        };
        self.notify(id, &change);

        let Some(reference) = self.references.remove(id) else {
            return false;
        };
        if let Some(key) = reference.value_key {
            self.value_index.remove(&key);
        }
        for label in &reference.labels {
            self.label_index.remove(label);
        }
        self.observers.remove(id);
        self.handles.remove_reference(id);
        self.edges.remove_reference(id);
        if let Some(transform) = self.transforms.remove(id) {
            for input in transform.inputs {
                if let Some(dependents) = self.dependents.get_mut(&input) {
                    dependents.retain(|dependent| dependent != id);
                    if dependents.is_empty() {
                        self.dependents.remove(&input);
                    }
                }
                self.refresh_collectable(&input);
            }
        }
        self.dependents.remove(id);
        self.scheduler.discard_reference(id);
        self.gc.cancel(id);
        self.gc_candidates.remove(id);
        self.synced.remove(id);

        debug!("Deleted reference {}", id);
        self.events.push(RegistryEvent::ReferenceRemoved(*id));
        true
    }

    // Loading

    /// Resolves `id` from memory or storage. When neither has it and the
    /// origin is remote, a placeholder is registered and the caller must
    /// subscribe to the origin.
    pub fn load(&mut self, scope: &mut LoadScope, id: &ReferenceId) -> Result<LoadOutcome, SyncError> {
        if scope.contains(id) {
            return Err(ProtocolError::Recursion {
                reference: id.to_string(),
            }
            .into());
        }

        if let Some(reference) = self.references.get(id) {
            if reference.is_initialized() {
                return Ok(LoadOutcome::Resident);
            }
            scope.enter(id);
            return Ok(LoadOutcome::AwaitingOrigin);
        }

        if let Some(stored) = self.storage.get_reference(id) {
            self.rehydrate(stored)?;
            return Ok(LoadOutcome::Rehydrated);
        }

        if self.is_local_origin(id) {
            return Err(ReferenceError::NoAssignedValue {
                reference: id.to_string(),
            }
            .into());
        }

        self.references.insert(*id, Reference::placeholder(id));
        scope.enter(id);
        debug!("Registered placeholder for {}", id);
        Ok(LoadOutcome::Subscribe { origin: id.origin() })
    }

    pub fn is_placeholder(&self, id: &ReferenceId) -> bool {
        self.references
            .get(id)
            .map(|r| !r.is_initialized())
            .unwrap_or(false)
    }

    /// The state handed to a new subscriber. Hidden schema fields are left
    /// out.
    pub fn snapshot(&self, id: &ReferenceId) -> Result<ReferenceSnapshot, SyncError> {
        let reference = self.references.get(id).ok_or_else(|| not_found(id))?;
        if reference.anonymous {
            return Err(ProtocolError::AnonymousSubscribe {
                reference: id.to_string(),
            }
            .into());
        }
        let mut value = reference
            .value
            .clone()
            .ok_or_else(|| uninitialized(id))?;
        if let Some(schema) = self.schema_of(reference) {
            value = schema.visible(value);
        }
        Ok(ReferenceSnapshot {
            reference: *id,
            value,
            declared_type: reference.declared_type.clone(),
            sealed: reference.sealed,
            read_only: reference.read_only,
            stream_intermediate: reference.stream_intermediate,
            labels: reference.labels.iter().cloned().collect(),
        })
    }

    /// Fills a placeholder (or refreshes a replica) from its origin's
    /// snapshot.
    pub fn initialize_from_snapshot(&mut self, snapshot: ReferenceSnapshot) -> Result<(), SyncError> {
        let id = snapshot.reference;
        let reference = self.references.get(&id).ok_or_else(|| not_found(&id))?;
        if snapshot.value.contains_handle() {
            return Err(ProtocolError::ForeignHandle {
                reference: id.to_string(),
                sender: reference.origin.to_string(),
            }
            .into());
        }
        if reference.is_initialized() {
            let origin = reference.origin;
            return self.mutate(
                &id,
                UpdateAction::SetValue(snapshot.value),
                UpdateSource::Remote(origin),
                true,
            );
        }

        let origin = reference.origin;
        self.commit_value(&id, snapshot.value.clone());
        let mut accepted_labels = Vec::new();
        for label in snapshot.labels {
            match self.label_index.get(&label) {
                Some(existing) if *existing != id => {
                    warn!("Ignoring label '{}' of {}: already used by {}", label, id, existing)
                }
                _ => accepted_labels.push(label),
            }
        }
        if let Some(reference) = self.references.get_mut(&id) {
            reference.declared_type = snapshot.declared_type;
            reference.sealed = snapshot.sealed;
            reference.read_only = snapshot.read_only;
            reference.stream_intermediate = snapshot.stream_intermediate;
            for label in accepted_labels {
                self.label_index.insert(label.clone(), id);
                reference.labels.insert(label);
            }
        }

        let change = ReferenceChange {
            reference: id,
            kind: ChangeKind::Init,
            key: None,
            value: Some(snapshot.value),
            previous: None,
            source: UpdateSource::Remote(origin),
        };
        self.notify(&id, &change);
        self.events.push(RegistryEvent::ReferenceAdded(id));
        self.refresh_collectable(&id);
        Ok(())
    }

    // Storage

    pub fn add_storage_source(&mut self, source: Box<dyn ReferenceSource>, priority: i32) {
        self.storage.add(source, priority);
    }

    pub fn storage(&self) -> &StorageSources {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageSources {
        &mut self.storage
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        self.persistence
    }

    pub fn set_persistence_mode(&mut self, mode: PersistenceMode) {
        self.persistence = mode;
    }

    /// Keeps `id` saved in storage: written through on every mutation, or
    /// once at shutdown, depending on the persistence mode.
    pub fn sync_reference(&mut self, id: &ReferenceId) -> Result<(), SyncError> {
        let reference = self.references.get(id).ok_or_else(|| not_found(id))?;
        if reference.anonymous {
            return Err(ValueError::AnonymousNotPersistable {
                reference: id.to_string(),
            }
            .into());
        }
        self.synced.insert(*id);
        if self.persistence == PersistenceMode::SaveContinuously {
            self.persist(id)?;
        }
        Ok(())
    }

    pub fn unsync_reference(&mut self, id: &ReferenceId) -> bool {
        self.synced.remove(id)
    }

    pub fn is_synced(&self, id: &ReferenceId) -> bool {
        self.synced.contains(id)
    }

    /// Writes `id` to the primary storage source, after every resident
    /// reference it links to.
    pub fn persist(&mut self, id: &ReferenceId) -> Result<(), SyncError> {
        let mut visited = HashSet::new();
        self.persist_with(id, &mut visited)
    }

    fn persist_with(&mut self, id: &ReferenceId, visited: &mut HashSet<ReferenceId>) -> Result<(), SyncError> {
        if !visited.insert(*id) {
            return Ok(());
        }
        let stored = self.stored_form(id)?;

        for nested in stored.value.nested_references() {
            let Some(reference) = self.references.get(&nested) else {
                continue;
            };
            if reference.anonymous {
                warn!("{} links to anonymous {}, which is not persisted", id, nested);
                continue;
            }
            if reference.is_initialized() {
                self.persist_with(&nested, visited)?;
            }
        }

        self.storage.primary_mut()?.set_reference(&stored)?;
        Ok(())
    }

    fn stored_form(&self, id: &ReferenceId) -> Result<StoredReference, SyncError> {
        let reference = self.references.get(id).ok_or_else(|| not_found(id))?;
        if reference.anonymous {
            return Err(ValueError::AnonymousNotPersistable {
                reference: id.to_string(),
            }
            .into());
        }
        Ok(StoredReference {
            reference: *id,
            value: reference.value.clone().ok_or_else(|| uninitialized(id))?,
            declared_type: reference.declared_type.clone(),
            sealed: reference.sealed,
            persistent: reference.persistent,
            stream_intermediate: reference.stream_intermediate,
            labels: reference.labels.iter().cloned().collect(),
        })
    }

    /// Writes every synced reference. Failures are logged; returns how many
    /// were written.
    pub fn save_all(&mut self) -> usize {
        let mut ids: Vec<ReferenceId> = self.synced.iter().copied().collect();
        ids.sort();
        let mut visited = HashSet::new();
        let mut saved = 0;
        for id in ids {
            match self.persist_with(&id, &mut visited) {
                Ok(()) => saved += 1,
                Err(err) => warn!("Failed to save {}: {}", id, err),
            }
        }
        saved
    }

    /// A resident value, or the value held by storage. With `rehydrate`,
    /// a stored reference is registered as live; otherwise a detached copy
    /// is returned.
    pub fn get_stored_reference(
        &mut self,
        id: &ReferenceId,
        rehydrate: bool,
    ) -> Result<Option<Value>, SyncError> {
        if let Some(value) = self.references.get(id).and_then(|r| r.value.clone()) {
            return Ok(Some(value));
        }
        let Some(stored) = self.storage.get_reference(id) else {
            return Ok(None);
        };
        let value = stored.value.clone();
        if rehydrate {
            self.rehydrate(stored)?;
        }
        Ok(Some(value))
    }

    fn rehydrate(&mut self, stored: StoredReference) -> Result<(), SyncError> {
        let id = stored.reference;
        if self.references.get(&id).map(|r| r.is_initialized()).unwrap_or(false) {
            return Ok(());
        }
        self.references.remove(&id);

        let mut reference = Reference::placeholder(&id);
        reference.is_origin = self.is_local_origin(&id);
        reference.declared_type = stored.declared_type;
        reference.sealed = stored.sealed;
        reference.persistent = stored.persistent;
        reference.stream_intermediate = stored.stream_intermediate;
        for label in stored.labels {
            if self.label_index.contains_key(&label) {
                warn!("Ignoring stored label '{}' of {}: already in use", label, id);
                continue;
            }
            self.label_index.insert(label.clone(), id);
            reference.labels.insert(label);
        }
        self.references.insert(id, reference);
        self.commit_value(&id, stored.value);

        debug!("Rehydrated {} from storage", id);
        self.events.push(RegistryEvent::ReferenceAdded(id));
        self.refresh_collectable(&id);
        Ok(())
    }

    // Outgoing updates and events

    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut UpdateScheduler {
        &mut self.scheduler
    }

    /// Drains the scheduler into one batch per destination.
    pub fn flush_updates(&mut self) -> Vec<(Endpoint, UpdateBatch)> {
        self.scheduler.flush()
    }

    pub fn take_events(&mut self) -> Vec<RegistryEvent> {
        self.events.take()
    }
}
