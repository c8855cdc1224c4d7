mod instant;
mod timer;
mod timestamp;

pub use instant::Instant;
pub use timer::Timer;
pub use timestamp::{TimeError, Timestamp};
