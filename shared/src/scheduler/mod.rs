mod update_scheduler;

pub use update_scheduler::{PendingUpdate, UpdateScheduler, UpdateSlot};
