use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    time::Duration,
};

use log::{debug, info, warn};

use refsync_shared::{Endpoint, Instant, NetworkError};

use crate::transport::{
    InitArgs, InterfaceKey, InterfaceState, TransportFactory, TransportInterface,
    TransportRegistry,
};

/// Interface lifecycle, drained by the runtime each tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    NewInterface(InterfaceKey),
    InterfaceConnected(InterfaceKey),
    InterfaceDisconnected(InterfaceKey),
}

/// How to reach an endpoint that has no interface of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndirectRoute {
    /// Send on this interface; the endpoint was heard on it.
    Interface(InterfaceKey),
    /// Send to this endpoint, which forwards.
    Via(Endpoint),
}

/// Owns every interface of the local endpoint and picks one for each
/// outgoing frame.
///
/// Routing precedence is: the local endpoint itself, a direct interface,
/// an indirect route, then the default interface.
pub struct TransportManager {
    local: Endpoint,
    registry: TransportRegistry,
    interfaces: BTreeMap<InterfaceKey, TransportInterface>,
    next_key: u32,
    direct: HashMap<Endpoint, InterfaceKey>,
    indirect: HashMap<Endpoint, IndirectRoute>,
    default: Option<InterfaceKey>,
    loopback: VecDeque<Vec<u8>>,
    events: VecDeque<TransportEvent>,
    reconnect_backoff: Duration,
}

fn lookup<'a, V>(table: &'a HashMap<Endpoint, V>, endpoint: &Endpoint) -> Option<&'a V> {
    table.get(endpoint).or_else(|| {
        table
            .iter()
            .find(|(known, _)| known.matches(endpoint))
            .map(|(_, value)| value)
    })
}

impl TransportManager {
    pub fn new(local: Endpoint, reconnect_backoff: Duration) -> Self {
        Self {
            local,
            registry: TransportRegistry::new(),
            interfaces: BTreeMap::new(),
            next_key: 0,
            direct: HashMap::new(),
            indirect: HashMap::new(),
            default: None,
            loopback: VecDeque::new(),
            events: VecDeque::new(),
            reconnect_backoff,
        }
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    pub fn register_transport(&mut self, channel_type: &str, factory: TransportFactory) {
        self.registry.register(channel_type, factory);
    }

    pub fn registry(&self) -> &TransportRegistry {
        &self.registry
    }

    /// Creates and connects a channel. `endpoint` names the peer of a
    /// point-to-point or virtual channel. A global channel becomes the
    /// default route when `make_default` is set.
    pub fn connect(
        &mut self,
        channel_type: &str,
        endpoint: Option<&Endpoint>,
        init_args: &InitArgs,
        make_default: bool,
    ) -> Result<InterfaceKey, NetworkError> {
        let transport = self
            .registry
            .create(channel_type, &self.local, endpoint, init_args)?;

        let key = InterfaceKey::from(self.next_key);
        let mut interface = TransportInterface::new(key, transport);
        interface.set_state(InterfaceState::Connecting);
        interface.transport_mut().connect()?;
        interface.set_state(InterfaceState::Connected);
        self.next_key += 1;

        let properties = interface.properties().clone();
        if let Some(peer) = properties.direct_endpoint.or(endpoint.copied()) {
            if properties.virtual_link {
                // the link only declares a route; frames travel on whatever
                // interface reaches the relay
                match properties.relay {
                    Some(relay) => self.record_indirect(&peer, IndirectRoute::Via(relay)),
                    None => warn!("Virtual interface {} to {} has no relay", key, peer),
                }
            } else if !properties.global {
                self.direct.insert(peer, key);
            }
        }
        if make_default {
            if properties.global && !properties.virtual_link {
                self.default = Some(key);
            } else {
                warn!(
                    "Interface {} ({}) is not global and cannot be the default route",
                    key, channel_type
                );
            }
        }
        self.interfaces.insert(key, interface);

        info!("Connected {} interface {}", channel_type, key);
        self.events.push_back(TransportEvent::NewInterface(key));
        self.events.push_back(TransportEvent::InterfaceConnected(key));
        Ok(key)
    }

    /// Disconnects and forgets one interface along with the routes that use
    /// it.
    pub fn disconnect(&mut self, key: &InterfaceKey) -> Result<(), NetworkError> {
        let Some(mut interface) = self.interfaces.remove(key) else {
            return Err(NetworkError::InterfaceNotFound {
                interface: key.to_u32(),
            });
        };
        interface.transport_mut().disconnect();
        self.direct.retain(|_, route| *route != *key);
        self.indirect
            .retain(|_, route| *route != IndirectRoute::Interface(*key));
        let properties = interface.properties();
        if let (true, Some(peer), Some(relay)) = (
            properties.virtual_link,
            properties.direct_endpoint,
            properties.relay,
        ) {
            if self.indirect.get(&peer) == Some(&IndirectRoute::Via(relay)) {
                self.indirect.remove(&peer);
            }
        }
        if self.default == Some(*key) {
            self.default = None;
        }
        info!("Disconnected interface {}", key);
        self.events
            .push_back(TransportEvent::InterfaceDisconnected(*key));
        Ok(())
    }

    pub fn disconnect_all(&mut self) {
        let keys: Vec<InterfaceKey> = self.interfaces.keys().copied().collect();
        for key in keys {
            let _ = self.disconnect(&key);
        }
        self.direct.clear();
        self.indirect.clear();
        self.default = None;
    }

    pub fn interface(&self, key: &InterfaceKey) -> Option<&TransportInterface> {
        self.interfaces.get(key)
    }

    pub fn interface_keys(&self) -> Vec<InterfaceKey> {
        self.interfaces.keys().copied().collect()
    }

    pub fn default_interface(&self) -> Option<InterfaceKey> {
        self.default
    }

    /// Remembers that `endpoint` can be reached without a direct
    /// interface. Direct interfaces still win.
    pub fn record_indirect(&mut self, endpoint: &Endpoint, route: IndirectRoute) {
        if let IndirectRoute::Via(relay) = &route {
            if relay.matches(endpoint) || relay.matches(&self.local) {
                return;
            }
        }
        if self.indirect.insert(*endpoint, route) != Some(route) {
            debug!("Recorded route to {} as {:?}", endpoint, route);
        }
    }

    pub fn forget_indirect(&mut self, endpoint: &Endpoint) -> bool {
        self.indirect.remove(endpoint).is_some()
    }

    fn connected(&self, key: &InterfaceKey) -> Option<&TransportInterface> {
        self.interfaces
            .get(key)
            .filter(|interface| interface.is_connected())
    }

    /// Connected and able to carry frames itself. Virtual interfaces never
    /// are.
    fn routable(&self, key: &InterfaceKey) -> bool {
        self.connected(key).is_some_and(|interface| {
            let properties = interface.properties();
            properties.can_send && !properties.virtual_link
        })
    }

    fn direct_or_default(&self, destination: &Endpoint) -> Option<InterfaceKey> {
        if let Some(key) = lookup(&self.direct, destination) {
            if self.routable(key) {
                return Some(*key);
            }
        }
        self.default_route()
    }

    fn default_route(&self) -> Option<InterfaceKey> {
        self.default.filter(|key| self.routable(key))
    }

    /// The interface and next hop a frame for `destination` would take.
    pub fn route_for(&self, destination: &Endpoint) -> Option<(InterfaceKey, Endpoint)> {
        if let Some(key) = lookup(&self.direct, destination) {
            if self.routable(key) {
                return Some((*key, *destination));
            }
        }
        match lookup(&self.indirect, destination) {
            Some(IndirectRoute::Interface(key)) if self.routable(key) => {
                return Some((*key, *destination));
            }
            Some(IndirectRoute::Via(relay)) => {
                if let Some(key) = self.direct_or_default(relay) {
                    return Some((key, *relay));
                }
            }
            _ => {}
        }
        self.default_route().map(|key| (key, *destination))
    }

    pub fn has_route(&self, destination: &Endpoint) -> bool {
        destination.matches(&self.local) || self.route_for(destination).is_some()
    }

    /// Sends one frame towards `destination`. Frames for the local endpoint
    /// are looped back and come out of the next `receive`.
    pub fn send(
        &mut self,
        destination: &Endpoint,
        payload: &[u8],
        now: &Instant,
    ) -> Result<(), NetworkError> {
        if destination.matches(&self.local) {
            self.loopback.push_back(payload.to_vec());
            return Ok(());
        }
        let Some((key, next_hop)) = self.route_for(destination) else {
            return Err(NetworkError::NoRoute {
                endpoint: destination.to_string(),
            });
        };
        self.send_on_interface(&key, &next_hop, payload, now)
    }

    fn send_on_interface(
        &mut self,
        key: &InterfaceKey,
        to: &Endpoint,
        payload: &[u8],
        now: &Instant,
    ) -> Result<(), NetworkError> {
        let Some(interface) = self.interfaces.get_mut(key) else {
            return Err(NetworkError::InterfaceNotFound {
                interface: key.to_u32(),
            });
        };
        if !interface.is_connected() {
            return Err(NetworkError::NotConnected {
                interface: key.to_u32(),
            });
        }
        match interface.transport_mut().send(to, payload) {
            Ok(()) => Ok(()),
            Err(err @ NetworkError::NoRoute { .. }) => Err(err),
            Err(err) => {
                warn!("Interface {} failed to send: {}", key, err);
                self.mark_reconnecting(key, now);
                Err(err)
            }
        }
    }

    /// Sends `payload` once to every endpoint one hop away on a connected,
    /// non-virtual interface, skipping `exclude` and the local endpoint.
    /// Returns the endpoints that were reached.
    pub fn flood(&mut self, payload: &[u8], exclude: &[Endpoint], now: &Instant) -> Vec<Endpoint> {
        let mut visited: HashSet<Endpoint> = exclude.iter().copied().collect();
        visited.insert(self.local);
        let mut reached = Vec::new();

        let keys: Vec<InterfaceKey> = self
            .interfaces
            .values()
            .filter(|interface| interface.is_connected() && !interface.properties().virtual_link)
            .map(|interface| interface.key())
            .collect();

        for key in keys {
            let peers = match self.interfaces.get(&key) {
                Some(interface) => interface.transport().peers(),
                None => continue,
            };
            for peer in peers {
                if visited.iter().any(|seen| seen.matches(&peer)) {
                    continue;
                }
                match self.send_on_interface(&key, &peer, payload, now) {
                    Ok(()) => {
                        visited.insert(peer);
                        reached.push(peer);
                    }
                    Err(NetworkError::NoRoute { .. }) => {}
                    Err(_) => break,
                }
            }
        }
        reached
    }

    /// Every frame waiting on the loopback queue and on connected
    /// interfaces, tagged with the interface it arrived on (`None` for
    /// loopback).
    pub fn receive(&mut self, now: &Instant) -> Vec<(Option<InterfaceKey>, Vec<u8>)> {
        let mut frames: Vec<(Option<InterfaceKey>, Vec<u8>)> =
            self.loopback.drain(..).map(|frame| (None, frame)).collect();

        let mut failed = Vec::new();
        for interface in self.interfaces.values_mut() {
            if !interface.is_connected() || !interface.properties().can_receive {
                continue;
            }
            loop {
                match interface.transport_mut().receive() {
                    Ok(Some(frame)) => frames.push((Some(interface.key()), frame)),
                    Ok(None) => break,
                    Err(err) => {
                        warn!("Interface {} failed to receive: {}", interface.key(), err);
                        failed.push(interface.key());
                        break;
                    }
                }
            }
        }
        for key in failed {
            self.mark_reconnecting(&key, now);
        }
        frames
    }

    /// Retries interfaces whose backoff is over.
    pub fn update(&mut self, now: &Instant) {
        for interface in self.interfaces.values_mut() {
            let InterfaceState::Reconnecting { retry_at } = interface.state() else {
                continue;
            };
            if retry_at.is_after(now) {
                continue;
            }
            match interface.transport_mut().connect() {
                Ok(()) => {
                    info!("Reconnected interface {}", interface.key());
                    interface.set_state(InterfaceState::Connected);
                    self.events
                        .push_back(TransportEvent::InterfaceConnected(interface.key()));
                }
                Err(err) => {
                    debug!("Reconnect of interface {} failed: {}", interface.key(), err);
                    interface.set_state(InterfaceState::Reconnecting {
                        retry_at: now.plus(self.reconnect_backoff),
                    });
                }
            }
        }
    }

    /// Marks a failed interface for reconnection. Calling it again while a
    /// retry is pending does nothing.
    fn mark_reconnecting(&mut self, key: &InterfaceKey, now: &Instant) {
        let Some(interface) = self.interfaces.get_mut(key) else {
            return;
        };
        if interface.is_reconnecting() {
            return;
        }
        interface.transport_mut().disconnect();
        interface.set_state(InterfaceState::Reconnecting {
            retry_at: now.plus(self.reconnect_backoff),
        });
        warn!("Interface {} lost its connection, will retry", key);
        self.events
            .push_back(TransportEvent::InterfaceDisconnected(*key));
    }

    pub fn take_events(&mut self) -> Vec<TransportEvent> {
        self.events.drain(..).collect()
    }
}
