mod pending_loads;
#[allow(clippy::module_inception)]
mod runtime;

pub use pending_loads::LoadKey;
pub use runtime::{LoadStatus, Runtime};
