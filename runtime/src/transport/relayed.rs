//! A virtual link: `target` is reached through `relay`, which forwards.
//! The transport moves no bytes. Connecting it records a route via the
//! relay, and frames then leave on whatever interface reaches the relay.

use refsync_shared::{Endpoint, NetworkError};

use crate::transport::{
    transport_registry::required_arg, InitArgs, Transport, TransportFactory,
    TransportProperties, RELAYED,
};

pub struct RelayedTransport {
    relay: Endpoint,
    target: Endpoint,
    connected: bool,
}

impl RelayedTransport {
    pub fn new(relay: Endpoint, target: Endpoint) -> Self {
        Self {
            relay,
            target,
            connected: false,
        }
    }

    /// Reads the relay from the `relay` init argument, in endpoint text
    /// form. The target is the peer passed to `connect`.
    pub fn factory() -> TransportFactory {
        Box::new(|_local: &Endpoint, peer: Option<&Endpoint>, args: &InitArgs| {
            let Some(target) = peer else {
                return Err(NetworkError::InvalidInitArgument {
                    channel_type: RELAYED.to_string(),
                    key: "endpoint".to_string(),
                    reason: "a relayed channel needs a target endpoint".to_string(),
                });
            };
            let relay: Endpoint = required_arg(RELAYED, args, "relay")?
                .parse::<Endpoint>()
                .map_err(|err| NetworkError::InvalidInitArgument {
                    channel_type: RELAYED.to_string(),
                    key: "relay".to_string(),
                    reason: err.to_string(),
                })?;
            if relay.matches(target) {
                return Err(NetworkError::InvalidInitArgument {
                    channel_type: RELAYED.to_string(),
                    key: "relay".to_string(),
                    reason: "the relay cannot be the target itself".to_string(),
                });
            }
            let transport: Box<dyn Transport> = Box::new(RelayedTransport::new(relay, *target));
            Ok(transport)
        })
    }
}

impl Transport for RelayedTransport {
    fn channel_type(&self) -> &str {
        RELAYED
    }

    fn properties(&self) -> TransportProperties {
        TransportProperties {
            can_receive: false,
            can_send: false,
            global: false,
            virtual_link: true,
            direct_endpoint: Some(self.target),
            relay: Some(self.relay),
        }
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        self.connected = true;
        Ok(())
    }

    fn send(&mut self, to: &Endpoint, _payload: &[u8]) -> Result<(), NetworkError> {
        Err(NetworkError::NoRoute {
            endpoint: to.to_string(),
        })
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>, NetworkError> {
        Ok(None)
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn peers(&self) -> Vec<Endpoint> {
        Vec::new()
    }
}
