//! Point-to-point channel over a non-blocking UDP socket. One frame per
//! datagram.

use std::{
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
};

use log::trace;

use refsync_shared::{Endpoint, NetworkError};

use crate::transport::{
    transport_registry::required_arg, InitArgs, Transport, TransportFactory,
    TransportProperties, UDP,
};

const MAX_DATAGRAM: usize = 65_507;

pub struct UdpTransport {
    bind: SocketAddr,
    peer_address: SocketAddr,
    peer: Option<Endpoint>,
    socket: Option<UdpSocket>,
    buffer: Box<[u8]>,
}

fn parse_address(args: &InitArgs, key: &str) -> Result<SocketAddr, NetworkError> {
    required_arg(UDP, args, key)?
        .parse()
        .map_err(|err: std::net::AddrParseError| NetworkError::InvalidInitArgument {
            channel_type: UDP.to_string(),
            key: key.to_string(),
            reason: err.to_string(),
        })
}

impl UdpTransport {
    pub fn new(bind: SocketAddr, peer_address: SocketAddr, peer: Option<Endpoint>) -> Self {
        Self {
            bind,
            peer_address,
            peer,
            socket: None,
            buffer: vec![0; MAX_DATAGRAM].into_boxed_slice(),
        }
    }

    /// Reads `bind` and `peer` socket addresses from the init arguments.
    pub fn factory() -> TransportFactory {
        Box::new(|_local: &Endpoint, peer: Option<&Endpoint>, args: &InitArgs| {
            let bind = parse_address(args, "bind")?;
            let peer_address = parse_address(args, "peer")?;
            let transport: Box<dyn Transport> =
                Box::new(UdpTransport::new(bind, peer_address, peer.copied()));
            Ok(transport)
        })
    }

    /// The bound address, once connected. Useful when binding port `0`.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|socket| socket.local_addr().ok())
    }

    fn io_error(&self, bytes: usize, err: std::io::Error) -> NetworkError {
        NetworkError::SendFailed {
            channel_type: UDP.to_string(),
            bytes,
            reason: err.to_string(),
        }
    }
}

impl Transport for UdpTransport {
    fn channel_type(&self) -> &str {
        UDP
    }

    fn properties(&self) -> TransportProperties {
        TransportProperties {
            can_receive: true,
            can_send: true,
            global: false,
            virtual_link: false,
            direct_endpoint: self.peer,
            relay: None,
        }
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        let connect_failed = |err: std::io::Error| NetworkError::ConnectFailed {
            channel_type: UDP.to_string(),
            reason: err.to_string(),
        };
        let socket = UdpSocket::bind(self.bind).map_err(connect_failed)?;
        socket.set_nonblocking(true).map_err(connect_failed)?;
        socket.connect(self.peer_address).map_err(connect_failed)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, to: &Endpoint, payload: &[u8]) -> Result<(), NetworkError> {
        if let Some(peer) = &self.peer {
            if !peer.matches(to) {
                return Err(NetworkError::NoRoute {
                    endpoint: to.to_string(),
                });
            }
        }
        let Some(socket) = &self.socket else {
            return Err(NetworkError::SendFailed {
                channel_type: UDP.to_string(),
                bytes: payload.len(),
                reason: "socket not bound".to_string(),
            });
        };
        match socket.send(payload) {
            Ok(_) => Ok(()),
            // the kernel buffer is full; the frame is lost like any datagram
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                trace!("Dropped {} byte datagram: {}", payload.len(), err);
                Ok(())
            }
            Err(err) => Err(self.io_error(payload.len(), err)),
        }
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>, NetworkError> {
        let Some(socket) = &self.socket else {
            return Ok(None);
        };
        match socket.recv(&mut self.buffer) {
            Ok(length) => Ok(Some(self.buffer[..length].to_vec())),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            // a previous datagram was refused by the peer
            Err(err) if err.kind() == ErrorKind::ConnectionRefused => Ok(None),
            Err(err) => Err(self.io_error(0, err)),
        }
    }

    fn disconnect(&mut self) {
        self.socket = None;
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn peers(&self) -> Vec<Endpoint> {
        if self.socket.is_some() {
            self.peer.into_iter().collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    fn loopback_pair() -> (UdpTransport, UdpTransport) {
        let probe_a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let probe_b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let a_address = probe_a.local_addr().unwrap();
        let b_address = probe_b.local_addr().unwrap();
        drop(probe_a);
        drop(probe_b);

        let alice = Endpoint::named("alice").with_instance(1);
        let bob = Endpoint::named("bob").with_instance(2);
        (
            UdpTransport::new(a_address, b_address, Some(bob)),
            UdpTransport::new(b_address, a_address, Some(alice)),
        )
    }

    #[test]
    fn missing_bind_argument() {
        let factory = UdpTransport::factory();
        let mut args = InitArgs::new();
        args.insert("peer".to_string(), "127.0.0.1:9".to_string());
        assert!(matches!(
            factory(&Endpoint::named("alice"), None, &args),
            Err(NetworkError::InvalidInitArgument { key, .. }) if key == "bind"
        ));

        args.insert("bind".to_string(), "nowhere".to_string());
        assert!(factory(&Endpoint::named("alice"), None, &args).is_err());
    }

    #[test]
    fn datagrams_round_trip() {
        let (mut a, mut b) = loopback_pair();
        a.connect().unwrap();
        b.connect().unwrap();

        a.send(&Endpoint::named("bob"), b"ping").unwrap();
        let mut received = None;
        for _ in 0..100 {
            if let Some(frame) = b.receive().unwrap() {
                received = Some(frame);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(received, Some(b"ping".to_vec()));
        assert!(matches!(
            a.send(&Endpoint::named("carol"), b"x"),
            Err(NetworkError::NoRoute { .. })
        ));
    }
}
