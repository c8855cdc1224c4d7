use std::{collections::HashMap, time::Duration};

use log::debug;

use refsync_shared::{Endpoint, Instant, KeyGenerator, ReferenceId, SyncError};

/// Identifies a load that is waiting on a subscribe round-trip. Doubles as
/// the request id of the `Subscribe` message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadKey(u32);

impl LoadKey {
    pub fn to_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for LoadKey {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<LoadKey> for u32 {
    fn from(key: LoadKey) -> u32 {
        key.0
    }
}

pub(crate) struct PendingLoad {
    pub reference: ReferenceId,
    /// The endpoint the current `Subscribe` went to.
    pub origin: Endpoint,
    pub redirected: bool,
    pub deadline: Instant,
}

struct FinishedLoad {
    result: Result<ReferenceId, SyncError>,
    /// Stamped by the first `expire_results` after the load finished.
    expires: Option<Instant>,
}

/// Subscribe requests in flight, and results nobody has polled yet.
///
/// An unpolled result is kept for one load timeout, counted from the first
/// sweep that sees it, and then dropped with its key recycled.
pub(crate) struct PendingLoads {
    keys: KeyGenerator<LoadKey>,
    pending: HashMap<LoadKey, PendingLoad>,
    finished: HashMap<LoadKey, FinishedLoad>,
    timeout: Duration,
}

impl PendingLoads {
    pub fn new(timeout: Duration) -> Self {
        Self {
            keys: KeyGenerator::new(timeout.saturating_mul(2)),
            pending: HashMap::new(),
            finished: HashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn start(&mut self, reference: &ReferenceId, origin: &Endpoint, now: &Instant) -> LoadKey {
        let key = self.keys.generate(now);
        self.pending.insert(
            key,
            PendingLoad {
                reference: *reference,
                origin: *origin,
                redirected: false,
                deadline: now.plus(self.timeout),
            },
        );
        key
    }

    pub fn get(&self, key: &LoadKey) -> Option<&PendingLoad> {
        self.pending.get(key)
    }

    pub fn key_for(&self, reference: &ReferenceId) -> Option<LoadKey> {
        self.pending
            .iter()
            .find(|(_, load)| load.reference == *reference)
            .map(|(key, _)| *key)
    }

    /// Points the load at a new origin. Only one redirect is allowed per
    /// load; returns `false` when it was already used.
    pub fn redirect(&mut self, key: &LoadKey, origin: &Endpoint, now: &Instant) -> bool {
        let Some(load) = self.pending.get_mut(key) else {
            return false;
        };
        if load.redirected {
            return false;
        }
        load.redirected = true;
        load.origin = *origin;
        load.deadline = now.plus(self.timeout);
        true
    }

    pub fn finish(
        &mut self,
        key: &LoadKey,
        result: Result<ReferenceId, SyncError>,
    ) -> Option<PendingLoad> {
        let load = self.pending.remove(key)?;
        self.finished.insert(
            *key,
            FinishedLoad {
                result,
                expires: None,
            },
        );
        Some(load)
    }

    pub fn take_result(&mut self, key: &LoadKey, now: &Instant) -> Option<Result<ReferenceId, SyncError>> {
        let finished = self.finished.remove(key)?;
        self.keys.recycle_key(key, now);
        Some(finished.result)
    }

    /// Drops results that were not polled in time. Returns how many.
    pub fn expire_results(&mut self, now: &Instant) -> usize {
        let mut dropped = Vec::new();
        for (key, finished) in self.finished.iter_mut() {
            match &finished.expires {
                None => finished.expires = Some(now.plus(self.timeout)),
                Some(expires) if !expires.is_after(now) => dropped.push(*key),
                Some(_) => {}
            }
        }
        for key in &dropped {
            self.finished.remove(key);
            self.keys.recycle_key(key, now);
            debug!("Dropped unpolled result of load {}", key.to_u32());
        }
        dropped.len()
    }

    pub fn unpolled(&self) -> usize {
        self.finished.len()
    }

    pub fn is_pending(&self, key: &LoadKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn expired(&self, now: &Instant) -> Vec<LoadKey> {
        let mut keys: Vec<LoadKey> = self
            .pending
            .iter()
            .filter(|(_, load)| !load.deadline.is_after(now))
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
