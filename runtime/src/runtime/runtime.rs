use std::collections::VecDeque;

use log::{debug, info, warn};

use refsync_shared::{
    Codec, Crypto, Endpoint, Envelope, Instant, KeyValueStore, LoadOutcome, LoadScope, Message,
    NetworkError, PersistenceMode, PlainCrypto, ProtocolError, ReferenceError, ReferenceId,
    RefusalReason, Registry, RegistryConfig, RegistryEvent, SignedFrame, StorageBackend,
    SubscribeOutcome, SyncError, TimeoutError, Timer, UpdateBatch, Value, WireCodec,
};

use crate::{
    config::RuntimeConfig,
    events::RuntimeEvent,
    runtime::pending_loads::{LoadKey, PendingLoads},
    transport::{
        relayed::RelayedTransport, IndirectRoute, InitArgs, InterfaceKey, TransportEvent,
        TransportFactory, TransportManager, RELAYED,
    },
};

/// Result of `Runtime::load`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    /// The reference is live in the registry.
    Ready(ReferenceId),
    /// A subscribe is in flight; poll with `Runtime::poll_load`.
    Pending(LoadKey),
}

/// One endpoint of a refsync network.
///
/// Owns the registry, the transports, the codec and crypto collaborators,
/// and every request in flight. Must be driven by the application each
/// tick: `receive_all_packets`, then `update`, then `send_all_updates`.
pub struct Runtime {
    config: RuntimeConfig,
    local: Endpoint,
    registry: Registry,
    transports: TransportManager,
    codec: Box<dyn Codec>,
    crypto: Box<dyn Crypto>,
    pending_loads: PendingLoads,
    flush_timer: Timer,
    flush_requested: bool,
    events: VecDeque<RuntimeEvent>,
}

impl Runtime {
    /// Create a new Runtime. An endpoint with instance `0` is given a random
    /// instance, since `0` addresses any instance.
    pub fn new(config: RuntimeConfig, local: Endpoint) -> Self {
        let local = if local.instance() == 0 {
            local.with_instance(fastrand::u64(1..))
        } else {
            local
        };

        let mut registry = Registry::new(
            local,
            RegistryConfig {
                gc_grace_period: config.gc_grace_period,
                persistence: config.persistence,
            },
        );
        registry.scheduler_mut().start();

        let mut transports = TransportManager::new(local, config.reconnect_backoff);
        transports.register_transport(RELAYED, RelayedTransport::factory());
        cfg_if! {
            if #[cfg(feature = "transport_udp")] {
                transports.register_transport(
                    crate::transport::UDP,
                    crate::transport::udp::UdpTransport::factory(),
                );
            }
        }

        info!("Runtime started for {}", local);

        Self {
            pending_loads: PendingLoads::new(config.subscribe_timeout),
            flush_timer: Timer::new(config.flush_interval, &Instant::now()),
            flush_requested: false,
            config,
            local,
            registry,
            transports,
            codec: Box::new(WireCodec),
            crypto: Box::new(PlainCrypto),
            events: VecDeque::new(),
        }
    }

    pub fn with_codec(mut self, codec: Box<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_crypto(mut self, crypto: Box<dyn Crypto>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn transports(&self) -> &TransportManager {
        &self.transports
    }

    pub fn transports_mut(&mut self) -> &mut TransportManager {
        &mut self.transports
    }

    pub fn register_transport(&mut self, channel_type: &str, factory: TransportFactory) {
        self.transports.register_transport(channel_type, factory);
    }

    /// Adds a storage source backed by `store`, using this runtime's codec
    /// and storage namespace.
    pub fn add_storage<S: KeyValueStore + 'static>(&mut self, store: S, priority: i32) {
        let backend = StorageBackend::new(store, &self.config.storage_namespace)
            .with_codec(self.codec.clone());
        self.registry.add_storage_source(Box::new(backend), priority);
    }

    // Items and state are looked up across storage sources by priority.
    // Writes go to the highest-priority source.

    pub fn get_item(&self, key: &str) -> Option<Value> {
        self.registry.storage().get_item(key)
    }

    pub fn has_item(&self, key: &str) -> bool {
        self.registry.storage().has_item(key)
    }

    pub fn set_item(&mut self, key: &str, value: &Value) -> Result<(), SyncError> {
        Ok(self.registry.storage_mut().set_item(key, value)?)
    }

    pub fn remove_item(&mut self, key: &str) -> Result<bool, SyncError> {
        Ok(self.registry.storage_mut().remove_item(key)?)
    }

    pub fn get_state(&self, name: &str) -> Option<Value> {
        self.registry.storage().get_state(name)
    }

    pub fn set_state(&mut self, name: &str, value: &Value) -> Result<(), SyncError> {
        Ok(self.registry.storage_mut().set_state(name, value)?)
    }

    /// Empties every storage source. Live references stay in the registry.
    pub fn clear_storage(&mut self) -> Result<usize, SyncError> {
        let removed = self.registry.storage_mut().clear()?;
        info!("Cleared {} stored entries", removed);
        Ok(removed)
    }

    /// Opens an interface. Presence is announced on it right away.
    pub fn connect(
        &mut self,
        channel_type: &str,
        endpoint: Option<&Endpoint>,
        init_args: &InitArgs,
        make_default: bool,
        now: &Instant,
    ) -> Result<InterfaceKey, NetworkError> {
        let key = self
            .transports
            .connect(channel_type, endpoint, init_args, make_default)?;
        self.process_transport_events(now);
        Ok(key)
    }

    // Loading

    /// Makes `id` live locally. Resident and stored references are ready at
    /// once; anything else is subscribed to at its origin.
    pub fn load(
        &mut self,
        scope: &mut LoadScope,
        id: &ReferenceId,
        now: &Instant,
    ) -> Result<LoadStatus, SyncError> {
        match self.registry.load(scope, id)? {
            LoadOutcome::Resident | LoadOutcome::Rehydrated => Ok(LoadStatus::Ready(*id)),
            LoadOutcome::AwaitingOrigin => match self.pending_loads.key_for(id) {
                Some(key) => Ok(LoadStatus::Pending(key)),
                None => Ok(LoadStatus::Pending(self.subscribe(id, &id.origin(), now))),
            },
            LoadOutcome::Subscribe { origin } => {
                if origin.matches(&self.local) {
                    self.registry.delete(id);
                    return Err(ProtocolError::SubscribeToSelf {
                        reference: id.to_string(),
                    }
                    .into());
                }
                Ok(LoadStatus::Pending(self.subscribe(id, &origin, now)))
            }
        }
    }

    fn subscribe(&mut self, id: &ReferenceId, origin: &Endpoint, now: &Instant) -> LoadKey {
        let key = self.pending_loads.start(id, origin, now);
        debug!("Subscribing to {} at {} (request {})", id, origin, key.to_u32());
        self.send_subscribe(&key, id, origin, now);
        key
    }

    fn send_subscribe(&mut self, key: &LoadKey, id: &ReferenceId, origin: &Endpoint, now: &Instant) {
        let message = Message::Subscribe {
            reference: *id,
            request: key.to_u32(),
        };
        if let Err(err) = self.send_envelope(Envelope::to(self.local, *origin, message), now) {
            warn!("Could not send subscribe for {} to {}: {}", id, origin, err);
            self.fail_load(key, err.into());
        }
    }

    /// The result of a pending load, once. `None` while it is still in
    /// flight or when the result was already taken.
    pub fn poll_load(
        &mut self,
        key: &LoadKey,
        now: &Instant,
    ) -> Option<Result<ReferenceId, SyncError>> {
        self.pending_loads.take_result(key, now)
    }

    pub fn is_loading(&self, key: &LoadKey) -> bool {
        self.pending_loads.is_pending(key)
    }

    fn complete_load(&mut self, key: &LoadKey, reference: ReferenceId) {
        if self.pending_loads.finish(key, Ok(reference)).is_some() {
            info!("Loaded {}", reference);
            self.events.push_back(RuntimeEvent::LoadCompleted {
                key: *key,
                reference,
            });
        }
    }

    /// Fails a pending load and drops its placeholder.
    fn fail_load(&mut self, key: &LoadKey, error: SyncError) {
        let Some(load) = self.pending_loads.finish(key, Err(error.clone())) else {
            return;
        };
        warn!("Load of {} failed: {}", load.reference, error);
        if self.registry.is_placeholder(&load.reference) {
            self.registry.delete(&load.reference);
        }
        self.events
            .push_back(RuntimeEvent::LoadFailed { key: *key, error });
    }

    /// Stops following a replica: the origin is told, and the local copy is
    /// dropped.
    pub fn unsubscribe(&mut self, id: &ReferenceId, now: &Instant) -> Result<(), SyncError> {
        if self.registry.is_local_origin(id) {
            return Err(ProtocolError::SubscribeToSelf {
                reference: id.to_string(),
            }
            .into());
        }
        let origin = self
            .registry
            .get(id)
            .map(|reference| *reference.origin())
            .ok_or_else(|| ReferenceError::NotFound {
                reference: id.to_string(),
            })?;
        self.registry.delete(id);
        let message = Message::Unsubscribe { reference: *id };
        if let Err(err) = self.send_envelope(Envelope::to(self.local, origin, message), now) {
            warn!("Could not send unsubscribe for {} to {}: {}", id, origin, err);
        }
        Ok(())
    }

    // Incoming

    /// Must be called regularly. Reads every frame waiting on every
    /// interface, forwards the ones addressed elsewhere and handles the
    /// rest.
    pub fn receive_all_packets(&mut self, now: &Instant) {
        for (interface, bytes) in self.transports.receive(now) {
            let frame = match self.codec.decode_frame(&bytes) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("Dropping undecodable frame: {}", err);
                    continue;
                }
            };
            if interface.is_some() && frame.sender.matches(&self.local) {
                continue;
            }
            if let Some(receiver) = frame.receiver {
                if !receiver.matches(&self.local) {
                    self.forward(frame, &receiver, now);
                    continue;
                }
            }
            if let Some(envelope) = self.open(frame) {
                self.dispatch(interface, envelope, now);
            }
        }
        self.process_transport_events(now);
        self.process_registry_events();
    }

    fn forward(&mut self, mut frame: SignedFrame, receiver: &Endpoint, now: &Instant) {
        if frame.hops.saturating_add(1) >= self.config.max_hops {
            let err = NetworkError::HopLimit {
                endpoint: receiver.to_string(),
                hops: frame.hops,
            };
            warn!("{}", err);
            return;
        }
        frame.hops += 1;
        let bytes = self.codec.encode_frame(&frame);
        match self.transports.send(receiver, &bytes, now) {
            Ok(()) => debug!("Forwarded frame from {} to {}", frame.sender, receiver),
            Err(err) => warn!("Could not forward frame to {}: {}", receiver, err),
        }
    }

    /// Verifies, decrypts and decodes a frame addressed to this endpoint.
    fn open(&mut self, frame: SignedFrame) -> Option<Envelope> {
        if !self
            .crypto
            .verify(&frame.sender, &frame.body, &frame.signature)
        {
            warn!("Dropping frame from {} with a bad signature", frame.sender);
            return None;
        }
        let sender = frame.sender;
        let Some(body) = self.crypto.decrypt(frame.body) else {
            warn!("Dropping frame from {} that could not be decrypted", sender);
            return None;
        };
        let envelope = match self.codec.decode_envelope(&body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Dropping malformed envelope from {}: {}", sender, err);
                return None;
            }
        };
        if envelope.sender != sender {
            warn!(
                "Dropping envelope claiming to be from {} inside a frame from {}",
                envelope.sender, sender
            );
            return None;
        }
        Some(envelope)
    }

    fn dispatch(&mut self, interface: Option<InterfaceKey>, envelope: Envelope, now: &Instant) {
        let sender = envelope.sender;
        let flooded = envelope.receiver.is_none();
        debug!("Received {} from {}", envelope.message.name(), sender);
        match envelope.message {
            Message::Hello { identity } => {
                self.crypto.register_peer(&sender, &identity);
                if let Some(key) = interface {
                    self.transports
                        .record_indirect(&sender, IndirectRoute::Interface(key));
                }
                self.events.push_back(RuntimeEvent::PeerDiscovered(sender));
                // answer a flooded hello directly, so both sides learn a route
                if flooded {
                    let hello = Message::Hello {
                        identity: self.crypto.public_identity(),
                    };
                    if let Err(err) = self.send_envelope(Envelope::to(self.local, sender, hello), now) {
                        debug!("Could not answer hello from {}: {}", sender, err);
                    }
                }
            }
            Message::Subscribe { reference, request } => {
                let outcome = self.answer_subscribe(&sender, &reference);
                let message = Message::SubscribeResponse { request, outcome };
                if let Err(err) = self.send_envelope(Envelope::to(self.local, sender, message), now) {
                    warn!("Could not answer subscribe from {}: {}", sender, err);
                }
            }
            Message::SubscribeResponse { request, outcome } => {
                self.handle_subscribe_response(&sender, LoadKey::from(request), outcome, now);
            }
            Message::Unsubscribe { reference } => {
                self.registry.remove_subscriber(&reference, &sender);
            }
            Message::Update(batch) => self.apply_batch(&sender, batch),
        }
    }

    fn answer_subscribe(&mut self, sender: &Endpoint, id: &ReferenceId) -> SubscribeOutcome {
        if !self.registry.is_local_origin(id) {
            return SubscribeOutcome::Redirect(id.origin());
        }
        if let Some(reference) = self.registry.get(id) {
            if reference.is_anonymous() {
                return SubscribeOutcome::Refused(RefusalReason::Anonymous);
            }
        } else {
            match self.registry.get_stored_reference(id, true) {
                Ok(Some(_)) => {}
                Ok(None) if id.is_static() => {
                    return SubscribeOutcome::Refused(RefusalReason::NoAssignedValue)
                }
                Ok(None) => return SubscribeOutcome::Refused(RefusalReason::NotFound),
                Err(err) => {
                    warn!("Could not rehydrate {} for {}: {}", id, sender, err);
                    return SubscribeOutcome::Refused(RefusalReason::NotFound);
                }
            }
        }
        match self.registry.snapshot(id) {
            Ok(snapshot) => {
                if let Err(err) = self.registry.add_subscriber(id, sender) {
                    warn!("Could not add {} as subscriber of {}: {}", sender, id, err);
                    return SubscribeOutcome::Refused(RefusalReason::NotFound);
                }
                SubscribeOutcome::Snapshot(snapshot)
            }
            Err(err) => {
                debug!("Refusing {} to {}: {}", id, sender, err);
                SubscribeOutcome::Refused(RefusalReason::NotFound)
            }
        }
    }

    fn handle_subscribe_response(
        &mut self,
        sender: &Endpoint,
        key: LoadKey,
        outcome: SubscribeOutcome,
        now: &Instant,
    ) {
        let Some((reference, origin)) = self
            .pending_loads
            .get(&key)
            .map(|load| (load.reference, load.origin))
        else {
            self.report(ProtocolError::UnexpectedResponse {
                request: key.to_u32(),
            });
            return;
        };
        if !origin.matches(sender) {
            self.report(ProtocolError::UnexpectedResponse {
                request: key.to_u32(),
            });
            return;
        }

        match outcome {
            SubscribeOutcome::Snapshot(snapshot) => {
                if snapshot.reference != reference {
                    self.report(ProtocolError::UnexpectedResponse {
                        request: key.to_u32(),
                    });
                    return;
                }
                match self.registry.initialize_from_snapshot(snapshot) {
                    Ok(()) => self.complete_load(&key, reference),
                    Err(err) => self.fail_load(&key, err),
                }
            }
            SubscribeOutcome::Redirect(next) => {
                if next.matches(sender) || !self.pending_loads.redirect(&key, &next, now) {
                    self.fail_load(
                        &key,
                        ProtocolError::TooManyRedirects {
                            reference: reference.to_string(),
                        }
                        .into(),
                    );
                    return;
                }
                debug!("{} redirected {} to {}", sender, reference, next);
                self.send_subscribe(&key, &reference, &next, now);
            }
            SubscribeOutcome::Refused(reason) => {
                self.fail_load(
                    &key,
                    ProtocolError::Refused {
                        reference: reference.to_string(),
                        origin: sender.to_string(),
                        reason: reason.describe().to_string(),
                    }
                    .into(),
                );
            }
        }
    }

    fn apply_batch(&mut self, sender: &Endpoint, batch: UpdateBatch) {
        for fragment in batch.fragments {
            let reference = fragment.reference;
            if let Err(err) = self.registry.apply_remote(sender, fragment) {
                warn!("Rejected update of {} from {}: {}", reference, sender, err);
                self.events.push_back(RuntimeEvent::Error(err));
            }
        }
    }

    fn report<E: Into<SyncError>>(&mut self, error: E) {
        let error = error.into();
        warn!("{}", error);
        self.events.push_back(RuntimeEvent::Error(error));
    }

    // Outgoing

    fn send_envelope(&mut self, envelope: Envelope, now: &Instant) -> Result<(), NetworkError> {
        let receiver = envelope.receiver;
        let body = self.codec.encode_envelope(&envelope);
        let body = self.crypto.encrypt(receiver.as_ref(), body);
        let frame = SignedFrame {
            sender: self.local,
            receiver,
            hops: 0,
            signature: self.crypto.sign(&body),
            body,
        };
        let bytes = self.codec.encode_frame(&frame);
        match receiver {
            Some(receiver) => self.transports.send(&receiver, &bytes, now),
            None => {
                let reached = self.transports.flood(&bytes, &[], now);
                debug!("Flooded {} to {} endpoint(s)", envelope.message.name(), reached.len());
                Ok(())
            }
        }
    }

    /// Flushes on the next `send_all_updates`, without waiting for the
    /// flush interval.
    pub fn flush_now(&mut self) {
        self.flush_requested = true;
    }

    /// Must be called regularly. Sends the queued reference updates as one
    /// batch per destination once the flush interval has passed.
    pub fn send_all_updates(&mut self, now: &Instant) {
        if !self.flush_requested && !self.flush_timer.ringing(now) {
            return;
        }
        self.flush_requested = false;
        self.flush_timer.reset(now);

        for (destination, batch) in self.registry.flush_updates() {
            let fragments = batch.len();
            let envelope = Envelope::to(self.local, destination, Message::Update(batch));
            match self.send_envelope(envelope, now) {
                Ok(()) => debug!("Sent {} update(s) to {}", fragments, destination),
                Err(err) => warn!(
                    "Dropped {} update(s) for {}: {}",
                    fragments, destination, err
                ),
            }
        }
    }

    // Housekeeping

    /// Must be called regularly. Reconnects interfaces, reclaims garbage,
    /// times out subscribes and drops load results nobody polled.
    pub fn update(&mut self, now: &Instant) {
        self.transports.update(now);
        self.process_transport_events(now);

        for id in self.registry.collect_garbage(now) {
            if self.registry.is_local_origin(&id) {
                continue;
            }
            let message = Message::Unsubscribe { reference: id };
            if let Err(err) = self.send_envelope(Envelope::to(self.local, id.origin(), message), now) {
                debug!("Could not unsubscribe reclaimed {}: {}", id, err);
            }
        }

        for key in self.pending_loads.expired(now) {
            let Some((reference, origin)) = self
                .pending_loads
                .get(&key)
                .map(|load| (load.reference, load.origin))
            else {
                continue;
            };
            let error = TimeoutError::Subscribe {
                reference: reference.to_string(),
                origin: origin.to_string(),
                millis: self.pending_loads.timeout().as_millis(),
            };
            self.fail_load(&key, error.into());
        }

        self.process_registry_events();
        self.pending_loads.expire_results(now);
    }

    fn announce(&mut self, now: &Instant) {
        let hello = Message::Hello {
            identity: self.crypto.public_identity(),
        };
        if let Err(err) = self.send_envelope(Envelope::flood(self.local, hello), now) {
            warn!("Could not announce {}: {}", self.local, err);
        }
    }

    fn process_transport_events(&mut self, now: &Instant) {
        let mut connected = false;
        for event in self.transports.take_events() {
            self.events.push_back(match event {
                TransportEvent::NewInterface(key) => RuntimeEvent::NewInterface(key),
                TransportEvent::InterfaceConnected(key) => {
                    connected = true;
                    RuntimeEvent::InterfaceConnected(key)
                }
                TransportEvent::InterfaceDisconnected(key) => RuntimeEvent::InterfaceDisconnected(key),
            });
        }
        if connected {
            self.announce(now);
        }
    }

    fn process_registry_events(&mut self) {
        for event in self.registry.take_events() {
            if let RegistryEvent::ReferenceRemoved(id) = &event {
                if let Some(key) = self.pending_loads.key_for(id) {
                    self.fail_load(
                        &key,
                        ReferenceError::Deleted {
                            reference: id.to_string(),
                        }
                        .into(),
                    );
                }
            }
            self.events.push_back(event.into());
        }
    }

    pub fn take_events(&mut self) -> Vec<RuntimeEvent> {
        self.process_registry_events();
        self.events.drain(..).collect()
    }

    /// Writes synced references when saving at shutdown, then disconnects
    /// every interface.
    pub fn shutdown(&mut self) {
        if self.registry.persistence_mode() == PersistenceMode::SaveOnShutdown {
            let saved = self.registry.save_all();
            info!("Saved {} reference(s) at shutdown", saved);
        }
        self.transports.disconnect_all();
        for event in self.transports.take_events() {
            if let TransportEvent::InterfaceDisconnected(key) = event {
                self.events
                    .push_back(RuntimeEvent::InterfaceDisconnected(key));
            }
        }
        info!("Runtime for {} shut down", self.local);
    }
}
