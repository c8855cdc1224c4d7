//! # Refsync Shared
//! The reference synchronization engine shared by every endpoint: reference
//! identity, values and schemas, the reference registry, the update
//! scheduler, the garbage collector, storage and the wire protocol.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

cfg_if! {
    if #[cfg(target_arch = "wasm32")]
    {
        compile_error!("wasm target for 'refsync_shared' crate is not supported: there is no browser time or storage backend");
    }
}

pub use refsync_serde::{
    BitReader, BitWrite, BitWriter, ConstBitLength, Serde, SerdeErr, SignedInteger,
    SignedVariableInteger, UnsignedInteger, UnsignedVariableInteger,
};

mod backends;
mod error;
mod gc;
mod key_generator;
mod protocol;
mod reference;
mod registry;
mod scheduler;
mod storage;
mod transport;
mod value;

pub use backends::{Instant, TimeError, Timer, Timestamp};
pub use error::{SyncError, TimeoutError};
pub use gc::GarbageCollector;
pub use key_generator::KeyGenerator;
pub use protocol::{
    Codec, Crypto, Envelope, Message, PlainCrypto, ReferenceSnapshot, RefusalReason, SignedFrame,
    SubscribeOutcome, UpdateAction, UpdateBatch, UpdateFragment, WireCodec,
};
pub use reference::{
    AddressType, Endpoint, ReferenceId, ReferenceIdGenerator, DEFAULT_ID_LENGTH,
    ENDPOINT_ID_LENGTH, ID_EPOCH_SECONDS, PREFIX_ID_LENGTH, STATIC_ID_LENGTH,
};
pub use registry::{
    ChangeKind, LoadOutcome, LoadScope, ObserverControl, ObserverFn, ObserverId, PropertyHandle,
    ProtocolError, Reference, ReferenceChange, ReferenceError, ReferenceOptions, Registry,
    RegistryConfig, RegistryEvent, TransformFn, UpdateSource, ValueError,
};
pub use scheduler::{PendingUpdate, UpdateScheduler, UpdateSlot};
pub use storage::{
    KeyValueStore, MemoryStore, PersistenceMode, ReferenceSource, StorageBackend, StorageError,
    StorageSources, StoredReference, ITEM_PREFIX, REFERENCE_PREFIX, STATE_PREFIX,
};
pub use transport::NetworkError;
pub use value::{
    FieldSchema, PropertyKey, TypeSchema, Value, ValueKey, ValueType, MAX_VALUE_DEPTH,
};
