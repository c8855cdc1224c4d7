mod garbage_collector;

pub use garbage_collector::GarbageCollector;
