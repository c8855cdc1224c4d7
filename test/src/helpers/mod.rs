pub mod assertions;
pub mod shared_store;

pub use shared_store::SharedStore;

/// Routes `log` output of the runtimes through the test harness. Safe to
/// call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
