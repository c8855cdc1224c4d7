use std::fmt;

use refsync_shared::Instant;

use crate::transport::{Transport, TransportProperties};

/// Identifies one active interface of a `TransportManager`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceKey(u32);

impl InterfaceKey {
    pub fn to_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for InterfaceKey {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<InterfaceKey> for u32 {
    fn from(key: InterfaceKey) -> u32 {
        key.0
    }
}

impl fmt::Display for InterfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting until `retry_at` before calling `connect()` again.
    Reconnecting { retry_at: Instant },
}

/// A transport plus the bookkeeping the manager keeps for it.
pub struct TransportInterface {
    key: InterfaceKey,
    channel_type: String,
    transport: Box<dyn Transport>,
    properties: TransportProperties,
    state: InterfaceState,
}

impl TransportInterface {
    pub(crate) fn new(key: InterfaceKey, transport: Box<dyn Transport>) -> Self {
        let properties = transport.properties();
        let channel_type = transport.channel_type().to_string();
        Self {
            key,
            channel_type,
            transport,
            properties,
            state: InterfaceState::Disconnected,
        }
    }

    pub fn key(&self) -> InterfaceKey {
        self.key
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn properties(&self) -> &TransportProperties {
        &self.properties
    }

    pub fn state(&self) -> InterfaceState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == InterfaceState::Connected
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self.state, InterfaceState::Reconnecting { .. })
    }

    pub(crate) fn set_state(&mut self, state: InterfaceState) {
        self.state = state;
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }
}
