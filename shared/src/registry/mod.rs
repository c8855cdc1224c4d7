mod error;
mod events;
mod extend;
mod load_scope;
mod mutation;
mod observer;
mod property_handle;
mod reference;
#[allow(clippy::module_inception)]
mod registry;

pub use error::{ProtocolError, ReferenceError, ValueError};
pub use events::RegistryEvent;
pub use load_scope::{LoadOutcome, LoadScope};
pub use observer::{
    ChangeKind, ObserverControl, ObserverFn, ObserverId, ReferenceChange, UpdateSource,
};
pub use property_handle::PropertyHandle;
pub use reference::{Reference, ReferenceOptions};
pub use registry::{Registry, RegistryConfig, TransformFn};
