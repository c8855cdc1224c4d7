cfg_if! {
    if #[cfg(feature = "transport_udp")] {
        pub mod udp;
    } else {}
}

pub mod local;
pub mod relayed;

mod interface;
mod manager;
mod transport_registry;

pub use interface::{InterfaceKey, InterfaceState, TransportInterface};
pub use manager::{IndirectRoute, TransportEvent, TransportManager};
pub use transport_registry::{InitArgs, TransportFactory, TransportRegistry};

pub use inner::{Transport, TransportProperties};

pub const LOCAL: &str = "local";
pub const RELAYED: &str = "relayed";
pub const UDP: &str = "udp";
pub const WEBSOCKET: &str = "websocket";
pub const WEBSOCKET_STREAM: &str = "websocketstream";
pub const WEBRTC: &str = "webrtc";
pub const BLUETOOTH: &str = "bluetooth";
pub const SERIAL: &str = "serial";

mod inner {
    use refsync_shared::{Endpoint, NetworkError};

    /// Static facts about a channel, fixed when it is created.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct TransportProperties {
        pub can_receive: bool,
        pub can_send: bool,
        /// Reaches any endpoint, not only `direct_endpoint`. Only global
        /// channels can become the default route.
        pub global: bool,
        /// Declares a route through another endpoint instead of moving
        /// bytes itself. Never chosen to carry a frame.
        pub virtual_link: bool,
        /// The single peer of a point-to-point channel.
        pub direct_endpoint: Option<Endpoint>,
        /// For a virtual link, the endpoint that forwards frames to
        /// `direct_endpoint`.
        pub relay: Option<Endpoint>,
    }

    /// One physical or virtual channel.
    ///
    /// Every method must return immediately; a channel with nothing to
    /// deliver returns `Ok(None)` from `receive`.
    pub trait Transport: Send {
        fn channel_type(&self) -> &str;
        fn properties(&self) -> TransportProperties;
        fn connect(&mut self) -> Result<(), NetworkError>;
        /// Sends one frame towards `to`. `NoRoute` means this channel cannot
        /// reach `to`; any other error means the channel itself failed.
        fn send(&mut self, to: &Endpoint, payload: &[u8]) -> Result<(), NetworkError>;
        fn receive(&mut self) -> Result<Option<Vec<u8>>, NetworkError>;
        fn disconnect(&mut self);
        fn is_connected(&self) -> bool;
        /// Endpoints currently reachable in one hop, used for flooding.
        fn peers(&self) -> Vec<Endpoint>;
    }
}
