use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::{
    protocol::{UpdateAction, UpdateBatch, UpdateFragment},
    reference::{Endpoint, ReferenceId},
    value::Value,
};

/// Coalescing key of a pending update within one reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UpdateSlot {
    /// Overwritten by a later update with the same identifier.
    Named(String),
    /// Never overwritten.
    Unique(u64),
}

/// A queued, not yet flushed, mutation for one destination.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingUpdate {
    pub reference: ReferenceId,
    pub slot: UpdateSlot,
    pub action: UpdateAction,
    pub collapse_first: bool,
}

/// Batches outgoing mutations per destination endpoint.
///
/// Entries are kept in mutation order. Overwriting a named slot moves the
/// entry to the back of its destination queue, so the flushed batch still
/// applies changes in the order they happened. A structural change (any
/// update without a named slot) closes the named slots of its reference:
/// an index written before a removal must not be overwritten by one
/// written after it. An update that carries the whole value replaces
/// everything queued before it for its reference.
pub struct UpdateScheduler {
    running: bool,
    next_unique: u64,
    queues: BTreeMap<Endpoint, Vec<PendingUpdate>>,
    slot_index: HashSet<(Endpoint, ReferenceId, String)>,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self {
            running: true,
            next_unique: 0,
            queues: BTreeMap::new(),
            slot_index: HashSet::new(),
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Pending updates are kept but not flushed until `start`.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Queues `action` for `destination`. An empty `identifier`, or a
    /// reference that streams every intermediate state, always gets a slot
    /// of its own. With `collapse_first` the action carries the full value
    /// and earlier updates of the reference are dropped, unless every
    /// intermediate state is streamed.
    pub fn add_update(
        &mut self,
        reference: &ReferenceId,
        identifier: &str,
        action: UpdateAction,
        destination: &Endpoint,
        collapse_first: bool,
        stream_intermediate: bool,
    ) {
        let slot = if identifier.is_empty() || stream_intermediate {
            self.next_unique += 1;
            UpdateSlot::Unique(self.next_unique)
        } else {
            UpdateSlot::Named(identifier.to_string())
        };

        let queue = self.queues.entry(*destination).or_default();

        if collapse_first && !stream_intermediate {
            queue.retain(|entry| entry.reference != *reference);
            self.slot_index
                .retain(|(endpoint, id, _)| !(endpoint == destination && id == reference));
        }

        match &slot {
            UpdateSlot::Named(name) => {
                let index_key = (*destination, *reference, name.clone());
                if !self.slot_index.insert(index_key) {
                    queue.retain(|entry| !(entry.reference == *reference && entry.slot == slot));
                }
            }
            UpdateSlot::Unique(_) => {
                self.slot_index
                    .retain(|(endpoint, id, _)| !(endpoint == destination && id == reference));
            }
        }

        queue.push(PendingUpdate {
            reference: *reference,
            slot,
            action,
            collapse_first,
        });
    }

    pub fn has_pending(&self) -> bool {
        self.queues.values().any(|queue| !queue.is_empty())
    }

    pub fn pending_count(&self, destination: &Endpoint) -> usize {
        self.queues.get(destination).map(|q| q.len()).unwrap_or(0)
    }

    pub fn pending_for(&self, destination: &Endpoint) -> &[PendingUpdate] {
        self.queues
            .get(destination)
            .map(|q| q.as_slice())
            .unwrap_or(&[])
    }

    /// Drops everything queued for a reference that no longer exists.
    pub fn discard_reference(&mut self, reference: &ReferenceId) {
        for queue in self.queues.values_mut() {
            queue.retain(|entry| entry.reference != *reference);
        }
        self.slot_index.retain(|(_, id, _)| id != reference);
    }

    /// Drops everything queued for one destination.
    pub fn discard_destination(&mut self, destination: &Endpoint) {
        self.queues.remove(destination);
        self.slot_index.retain(|(endpoint, _, _)| endpoint != destination);
    }

    /// Drains every queue into one batch per destination. Destinations with
    /// nothing pending are skipped. Each fragment carries its action as it
    /// was queued.
    pub fn flush(&mut self) -> Vec<(Endpoint, UpdateBatch)> {
        if !self.running {
            return Vec::new();
        }

        let mut output = Vec::new();
        for (destination, queue) in std::mem::take(&mut self.queues) {
            if queue.is_empty() {
                continue;
            }
            let fragments: Vec<UpdateFragment> = queue
                .into_iter()
                .map(|entry| UpdateFragment {
                    reference: entry.reference,
                    action: entry.action,
                    collapsed: entry.collapse_first,
                })
                .collect();
            debug!(
                "Flushing {} update fragment(s) to {}",
                fragments.len(),
                destination
            );
            output.push((destination, UpdateBatch { fragments }));
        }
        self.slot_index.clear();
        output
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}
