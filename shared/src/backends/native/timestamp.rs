use std::time::SystemTime;

use thiserror::Error;

/// Error type for timestamp operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeError {
    /// System time is before UNIX epoch
    #[error("System time is before UNIX epoch")]
    SystemTimeBeforeEpoch,
}

pub struct Timestamp;

impl Timestamp {
    /// Returns the current timestamp in seconds since UNIX epoch.
    ///
    /// # Errors
    /// Returns `TimeError::SystemTimeBeforeEpoch` if system time is before UNIX epoch.
    pub fn try_now() -> Result<u64, TimeError> {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|_| TimeError::SystemTimeBeforeEpoch)
    }

    /// Seconds elapsed since `epoch` (itself in seconds since UNIX epoch),
    /// saturating at the bounds of `u32`.
    pub fn try_seconds_since(epoch: u64) -> Result<u32, TimeError> {
        let now = Self::try_now()?;
        let elapsed = now.saturating_sub(epoch);
        Ok(u32::try_from(elapsed).unwrap_or(u32::MAX))
    }
}
