use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use crate::{backends::Instant, reference::ReferenceId};

/// Tracks references that became collectable and hands them back once
/// their grace period has passed.
///
/// Cancelling bumps a per-reference generation, so stale deadlines left in
/// the queue are ignored instead of searched for.
pub struct GarbageCollector {
    grace_period: Duration,
    generation: u64,
    scheduled: HashMap<ReferenceId, u64>,
    deadlines: VecDeque<(Instant, ReferenceId, u64)>,
}

impl GarbageCollector {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            generation: 0,
            scheduled: HashMap::new(),
            deadlines: VecDeque::new(),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Starts the grace period for `reference`. Rescheduling restarts it.
    pub fn schedule(&mut self, reference: &ReferenceId, now: &Instant) {
        self.generation += 1;
        self.scheduled.insert(*reference, self.generation);
        self.deadlines
            .push_back((now.plus(self.grace_period), *reference, self.generation));
    }

    /// The reference gained a subscriber, a hold or persistence.
    pub fn cancel(&mut self, reference: &ReferenceId) -> bool {
        self.scheduled.remove(reference).is_some()
    }

    pub fn is_scheduled(&self, reference: &ReferenceId) -> bool {
        self.scheduled.contains_key(reference)
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    /// Every reference whose grace period ended at or before `now`. Callers
    /// must re-check collectability before reclaiming.
    pub fn sweep(&mut self, now: &Instant) -> Vec<ReferenceId> {
        let mut due = Vec::new();
        while let Some((deadline, _, _)) = self.deadlines.front() {
            if deadline.is_after(now) {
                break;
            }
            let Some((_, reference, generation)) = self.deadlines.pop_front() else {
                break;
            };
            if self.scheduled.get(&reference) == Some(&generation) {
                self.scheduled.remove(&reference);
                due.push(reference);
            }
        }
        due
    }
}
