use std::{default::Default, time::Duration};

use refsync_shared::PersistenceMode;

/// Contains Config properties which will be used by a Runtime
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// How often queued reference updates are flushed to the network
    pub flush_interval: Duration,
    /// How long an unreferenced reference lives before it is reclaimed
    pub gc_grace_period: Duration,
    /// How long a load waits for the origin to answer a subscribe
    pub subscribe_timeout: Duration,
    /// Delay between reconnect attempts of a failed interface
    pub reconnect_backoff: Duration,
    /// Frames that have been forwarded this many times are dropped
    pub max_hops: u8,
    /// When synced references are written to storage
    pub persistence: PersistenceMode,
    /// Prefix of every key the runtime's storage backend writes
    pub storage_namespace: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(50),
            gc_grace_period: Duration::from_secs(30),
            subscribe_timeout: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(2),
            max_hops: 8,
            persistence: PersistenceMode::SaveContinuously,
            storage_namespace: "refsync".to_string(),
        }
    }
}
