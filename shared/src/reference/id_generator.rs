use log::warn;

use crate::{
    backends::Timestamp,
    reference::{endpoint::Endpoint, reference_id::ReferenceId},
};

/// 2022-01-01T00:00:00Z in seconds since UNIX epoch.
pub const ID_EPOCH_SECONDS: u64 = 1_640_995_200;

type Clock = Box<dyn FnMut() -> u32 + Send>;

/// Generates unique default-layout reference ids for one endpoint.
///
/// Ids made in the same second share a timestamp and get increasing
/// counters. When more than 256 ids are made in one second the generator
/// borrows the next second (a time shift), which is released once the
/// real clock catches up.
pub struct ReferenceIdGenerator {
    endpoint: Endpoint,
    clock: Clock,
    stamp: u32,
    next_counter: u16,
    time_shift: u32,
}

impl ReferenceIdGenerator {
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_clock(
            endpoint,
            Box::new(|| match Timestamp::try_seconds_since(ID_EPOCH_SECONDS) {
                Ok(seconds) => seconds,
                Err(err) => {
                    warn!("Falling back to zero id timestamp: {}", err);
                    0
                }
            }),
        )
    }

    /// Uses `clock` (seconds since the id epoch) instead of the system time.
    pub fn with_clock(endpoint: Endpoint, clock: Clock) -> Self {
        Self {
            endpoint,
            clock,
            stamp: 0,
            next_counter: 0,
            time_shift: 0,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn time_shift(&self) -> u32 {
        self.time_shift
    }

    pub fn generate(&mut self) -> ReferenceId {
        let real = (self.clock)();

        if real > self.stamp {
            self.stamp = real;
            self.next_counter = 0;
            self.time_shift = 0;
        } else if self.next_counter > u8::MAX as u16 {
            self.stamp += 1;
            self.next_counter = 0;
            self.time_shift += 1;
        }

        let counter = self.next_counter as u8;
        self.next_counter += 1;

        ReferenceId::new_default(&self.endpoint, self.stamp, counter)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
    };

    use super::*;

    fn fixed_clock(seconds: Arc<AtomicU32>) -> Clock {
        Box::new(move || seconds.load(Ordering::SeqCst))
    }

    #[test]
    fn ids_in_the_same_second_are_unique() {
        let seconds = Arc::new(AtomicU32::new(100));
        let mut generator =
            ReferenceIdGenerator::with_clock(Endpoint::named("alice"), fixed_clock(seconds));

        let ids: HashSet<ReferenceId> = (0..200).map(|_| generator.generate()).collect();
        assert_eq!(ids.len(), 200);
        assert!(ids.iter().all(|id| id.timestamp() == Some(100)));
    }

    #[test]
    fn counter_overflow_shifts_time_forward() {
        let seconds = Arc::new(AtomicU32::new(100));
        let mut generator = ReferenceIdGenerator::with_clock(
            Endpoint::named("alice"),
            fixed_clock(seconds.clone()),
        );

        let ids: Vec<ReferenceId> = (0..300).map(|_| generator.generate()).collect();
        let unique: HashSet<&ReferenceId> = ids.iter().collect();

        assert_eq!(unique.len(), 300);
        assert_eq!(ids[255].timestamp(), Some(100));
        assert_eq!(ids[255].counter(), Some(255));
        assert_eq!(ids[256].timestamp(), Some(101));
        assert_eq!(ids[256].counter(), Some(0));
        assert_eq!(generator.time_shift(), 1);

        // real time catches up past the borrowed second
        seconds.store(102, Ordering::SeqCst);
        let next = generator.generate();
        assert_eq!(next.timestamp(), Some(102));
        assert_eq!(generator.time_shift(), 0);
    }

    #[test]
    fn borrowed_second_is_not_reused_when_clock_reaches_it() {
        let seconds = Arc::new(AtomicU32::new(100));
        let mut generator = ReferenceIdGenerator::with_clock(
            Endpoint::named("alice"),
            fixed_clock(seconds.clone()),
        );
        let mut ids: HashSet<ReferenceId> = (0..257).map(|_| generator.generate()).collect();

        seconds.store(101, Ordering::SeqCst);
        for _ in 0..10 {
            assert!(ids.insert(generator.generate()));
        }
    }

    #[test]
    fn ids_carry_the_origin() {
        let endpoint = Endpoint::named("alice").with_instance(3);
        let mut generator = ReferenceIdGenerator::new(endpoint);
        assert_eq!(generator.generate().origin(), endpoint);
    }
}
