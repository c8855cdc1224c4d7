mod error;

pub use error::NetworkError;
