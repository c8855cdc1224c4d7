use std::{collections::VecDeque, marker::PhantomData, time::Duration};

use crate::backends::Instant;

/// Hands out `u32`-backed keys, reusing released keys once they have been
/// idle for `recycle_timeout`.
pub struct KeyGenerator<K: From<u32> + Into<u32> + Copy> {
    recycled: VecDeque<(Instant, u32)>,
    recycle_timeout: Duration,
    next: u32,
    phantom: PhantomData<K>,
}

impl<K: From<u32> + Into<u32> + Copy> KeyGenerator<K> {
    pub fn new(recycle_timeout: Duration) -> Self {
        Self {
            recycled: VecDeque::new(),
            recycle_timeout,
            next: 0,
            phantom: PhantomData,
        }
    }

    pub fn generate(&mut self, now: &Instant) -> K {
        if let Some((released_at, _)) = self.recycled.front() {
            if released_at.elapsed(now) >= self.recycle_timeout {
                if let Some((_, raw)) = self.recycled.pop_front() {
                    return K::from(raw);
                }
            }
        }

        let raw = self.next;
        self.next = self.next.wrapping_add(1);
        K::from(raw)
    }

    pub fn recycle_key(&mut self, key: &K, now: &Instant) {
        let raw: u32 = (*key).into();
        self.recycled.push_back((*now, raw));
    }
}
