pub mod helpers;
pub mod test_network;

pub use helpers::*;
pub use test_network::TestNetwork;
