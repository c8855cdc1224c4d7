//! # Refsync Runtime
//! Runs one endpoint of a refsync network: owns the reference registry,
//! routes frames over pluggable transports, answers subscribe requests and
//! flushes batched reference updates on a timer.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

#[macro_use]
extern crate cfg_if;

pub mod transport;
pub mod shared {
    pub use refsync_shared::{
        ChangeKind, Codec, Crypto, Endpoint, Instant, LoadScope, MemoryStore, ObserverControl,
        PersistenceMode, PlainCrypto, PropertyKey, ReferenceChange, ReferenceId,
        ReferenceOptions, Registry, RegistryEvent, SyncError, TypeSchema, UpdateSource, Value,
        ValueType, WireCodec,
    };
}

mod config;
mod events;
mod file_store;
mod runtime;

pub use config::RuntimeConfig;
pub use events::RuntimeEvent;
pub use file_store::FileStore;
pub use runtime::{LoadKey, LoadStatus, Runtime};
