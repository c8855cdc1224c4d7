use thiserror::Error;

/// Errors raised while routing or moving bytes between endpoints.
///
/// These are logged and handled by reconnection; they are never returned to
/// the caller of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// No direct, indirect or default interface reaches the endpoint
    #[error("No route to endpoint {endpoint}")]
    NoRoute { endpoint: String },

    /// No transport is registered under this channel token
    #[error("Unknown channel type '{channel_type}'")]
    UnknownChannelType { channel_type: String },

    /// The transport failed to establish its channel
    #[error("Failed to connect {channel_type} interface: {reason}")]
    ConnectFailed {
        channel_type: String,
        reason: String,
    },

    /// The transport failed to send a payload
    #[error("Failed to send {bytes} bytes over {channel_type}: {reason}")]
    SendFailed {
        channel_type: String,
        bytes: usize,
        reason: String,
    },

    /// The transport was asked to send while not connected
    #[error("Interface {interface} is not connected")]
    NotConnected { interface: u32 },

    /// An interface id that the manager does not know
    #[error("Interface {interface} not found")]
    InterfaceNotFound { interface: u32 },

    /// Missing or malformed constructor argument
    #[error("Invalid init argument '{key}' for {channel_type}: {reason}")]
    InvalidInitArgument {
        channel_type: String,
        key: String,
        reason: String,
    },

    /// The envelope already travelled the maximum number of hops
    #[error("Envelope for {endpoint} dropped after {hops} hops")]
    HopLimit { endpoint: String, hops: u8 },
}
