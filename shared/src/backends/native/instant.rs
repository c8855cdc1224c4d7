use std::time::Duration;

/// A monotonic point in time. Every time-dependent operation in the engine
/// takes one of these explicitly, so tests can drive time by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    inner: std::time::Instant,
}

impl Instant {
    pub fn now() -> Self {
        Self {
            inner: std::time::Instant::now(),
        }
    }

    /// Time elapsed between this instant and `now`, zero if `now` is earlier.
    pub fn elapsed(&self, now: &Self) -> Duration {
        now.inner.saturating_duration_since(self.inner)
    }

    pub fn until(&self, now: &Self) -> Duration {
        self.inner.saturating_duration_since(now.inner)
    }

    pub fn add_millis(&mut self, millis: u64) {
        self.inner += Duration::from_millis(millis);
    }

    pub fn add_duration(&mut self, duration: Duration) {
        self.inner += duration;
    }

    pub fn plus(&self, duration: Duration) -> Self {
        Self {
            inner: self.inner + duration,
        }
    }

    pub fn is_after(&self, other: &Self) -> bool {
        self.inner > other.inner
    }

    pub fn inner(&self) -> std::time::Instant {
        self.inner
    }
}
