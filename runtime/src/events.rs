use refsync_shared::{Endpoint, ReferenceId, RegistryEvent, SyncError};

use crate::{runtime::LoadKey, transport::InterfaceKey};

/// Something the application may want to react to, drained with
/// `Runtime::take_events` after each tick.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeEvent {
    NewInterface(InterfaceKey),
    InterfaceConnected(InterfaceKey),
    InterfaceDisconnected(InterfaceKey),
    ReferenceAdded(ReferenceId),
    ReferenceRemoved(ReferenceId),
    /// Property and value changes reported by the registry.
    Changed(RegistryEvent),
    /// A `Hello` arrived from an endpoint.
    PeerDiscovered(Endpoint),
    LoadCompleted { key: LoadKey, reference: ReferenceId },
    LoadFailed { key: LoadKey, error: SyncError },
    /// An error that had no caller to return to, such as a rejected
    /// remote update.
    Error(SyncError),
}

impl From<RegistryEvent> for RuntimeEvent {
    fn from(event: RegistryEvent) -> Self {
        match event {
            RegistryEvent::ReferenceAdded(id) => RuntimeEvent::ReferenceAdded(id),
            RegistryEvent::ReferenceRemoved(id) => RuntimeEvent::ReferenceRemoved(id),
            other => RuntimeEvent::Changed(other),
        }
    }
}
