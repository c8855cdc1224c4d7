//! In-process transport: every endpoint attached to a `LocalHub` gets a
//! mailbox, and frames are moved between mailboxes without any I/O.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
};

use refsync_shared::{Endpoint, NetworkError};

use crate::transport::{
    InitArgs, Transport, TransportFactory, TransportProperties, LOCAL,
};

#[derive(Default)]
struct HubState {
    mailboxes: BTreeMap<Endpoint, VecDeque<Vec<u8>>>,
    offline: Vec<Endpoint>,
}

impl HubState {
    fn is_online(&self, endpoint: &Endpoint) -> bool {
        self.mailboxes.contains_key(endpoint) && !self.offline.contains(endpoint)
    }

    /// The attached endpoint `to` addresses. Instance `0` picks the first
    /// attached instance.
    fn resolve(&self, to: &Endpoint) -> Option<Endpoint> {
        if self.mailboxes.contains_key(to) {
            return Some(*to);
        }
        self.mailboxes.keys().find(|member| member.matches(to)).copied()
    }
}

/// A shared in-memory switch. Clones refer to the same hub.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory for the `local` channel type bound to this hub. A channel
    /// created with a peer only talks to that peer; without one it is
    /// global.
    pub fn factory(&self) -> TransportFactory {
        let hub = self.clone();
        Box::new(move |local: &Endpoint, peer: Option<&Endpoint>, _args: &InitArgs| {
            let transport: Box<dyn Transport> = Box::new(hub.attach(local, peer.copied()));
            Ok(transport)
        })
    }

    pub fn attach(&self, local: &Endpoint, peer: Option<Endpoint>) -> LocalTransport {
        LocalTransport {
            hub: self.clone(),
            local: *local,
            peer,
            connected: false,
        }
    }

    /// Simulates a network outage (or recovery) for one endpoint. While
    /// offline, the endpoint can neither send nor receive and cannot
    /// reconnect.
    pub fn set_online(&self, endpoint: &Endpoint, online: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.offline.retain(|other| other != endpoint);
        if !online {
            state.offline.push(*endpoint);
        }
    }

    pub fn members(&self) -> Vec<Endpoint> {
        match self.state.lock() {
            Ok(state) => state.mailboxes.keys().copied().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Frames waiting in `endpoint`'s mailbox.
    pub fn queued(&self, endpoint: &Endpoint) -> usize {
        match self.state.lock() {
            Ok(state) => state.mailboxes.get(endpoint).map(|m| m.len()).unwrap_or(0),
            Err(_) => 0,
        }
    }
}

fn poisoned(reason: &str) -> NetworkError {
    NetworkError::SendFailed {
        channel_type: LOCAL.to_string(),
        bytes: 0,
        reason: reason.to_string(),
    }
}

/// One endpoint's channel into a `LocalHub`.
pub struct LocalTransport {
    hub: LocalHub,
    local: Endpoint,
    peer: Option<Endpoint>,
    connected: bool,
}

impl Transport for LocalTransport {
    fn channel_type(&self) -> &str {
        LOCAL
    }

    fn properties(&self) -> TransportProperties {
        TransportProperties {
            can_receive: true,
            can_send: true,
            global: self.peer.is_none(),
            virtual_link: false,
            direct_endpoint: self.peer,
            relay: None,
        }
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        let mut state = self.hub.state.lock().map_err(|_| poisoned("hub lock poisoned"))?;
        if state.offline.contains(&self.local) {
            return Err(NetworkError::ConnectFailed {
                channel_type: LOCAL.to_string(),
                reason: format!("{} is offline", self.local),
            });
        }
        state.mailboxes.entry(self.local).or_default();
        self.connected = true;
        Ok(())
    }

    fn send(&mut self, to: &Endpoint, payload: &[u8]) -> Result<(), NetworkError> {
        if !self.connected {
            return Err(NetworkError::SendFailed {
                channel_type: LOCAL.to_string(),
                bytes: payload.len(),
                reason: "not connected".to_string(),
            });
        }
        if let Some(peer) = &self.peer {
            if !peer.matches(to) {
                return Err(NetworkError::NoRoute {
                    endpoint: to.to_string(),
                });
            }
        }

        let mut state = self.hub.state.lock().map_err(|_| poisoned("hub lock poisoned"))?;
        if !state.is_online(&self.local) {
            self.connected = false;
            return Err(NetworkError::SendFailed {
                channel_type: LOCAL.to_string(),
                bytes: payload.len(),
                reason: format!("{} is offline", self.local),
            });
        }
        let Some(target) = state.resolve(to).filter(|target| state.is_online(target)) else {
            return Err(NetworkError::NoRoute {
                endpoint: to.to_string(),
            });
        };
        if let Some(mailbox) = state.mailboxes.get_mut(&target) {
            mailbox.push_back(payload.to_vec());
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>, NetworkError> {
        let mut state = self.hub.state.lock().map_err(|_| poisoned("hub lock poisoned"))?;
        if !state.is_online(&self.local) {
            self.connected = false;
            return Err(NetworkError::NotConnected { interface: 0 });
        }
        Ok(state
            .mailboxes
            .get_mut(&self.local)
            .and_then(|mailbox| mailbox.pop_front()))
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn peers(&self) -> Vec<Endpoint> {
        let Ok(state) = self.hub.state.lock() else {
            return Vec::new();
        };
        state
            .mailboxes
            .keys()
            .filter(|member| **member != self.local && state.is_online(member))
            .filter(|member| match &self.peer {
                Some(peer) => peer.matches(member),
                None => true,
            })
            .copied()
            .collect()
    }
}
