use refsync_serde::{BitReader, BitWrite, Serde, SerdeErr};

use crate::reference::Endpoint;

/// Signing and encryption keyed by endpoint identity.
///
/// The engine signs every outgoing frame and verifies every incoming one;
/// the primitives themselves live behind this trait.
pub trait Crypto: Send {
    fn sign(&self, payload: &[u8]) -> Vec<u8>;
    fn verify(&self, sender: &Endpoint, payload: &[u8], signature: &[u8]) -> bool;
    fn encrypt(&self, receiver: Option<&Endpoint>, payload: Vec<u8>) -> Vec<u8>;
    fn decrypt(&self, payload: Vec<u8>) -> Option<Vec<u8>>;
    /// Public key material announced in `Hello`.
    fn public_identity(&self) -> Vec<u8>;
    /// Records a peer's announced identity.
    fn register_peer(&mut self, endpoint: &Endpoint, identity: &[u8]);
}

/// Signs nothing and verifies everything.
#[derive(Clone, Copy, Default)]
pub struct PlainCrypto;

impl Crypto for PlainCrypto {
    fn sign(&self, _payload: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    fn verify(&self, _sender: &Endpoint, _payload: &[u8], _signature: &[u8]) -> bool {
        true
    }

    fn encrypt(&self, _receiver: Option<&Endpoint>, payload: Vec<u8>) -> Vec<u8> {
        payload
    }

    fn decrypt(&self, payload: Vec<u8>) -> Option<Vec<u8>> {
        Some(payload)
    }

    fn public_identity(&self) -> Vec<u8> {
        Vec::new()
    }

    fn register_peer(&mut self, _endpoint: &Endpoint, _identity: &[u8]) {}
}

/// What actually travels over a transport.
///
/// The routing header (`sender`, `receiver`, `hops`) stays in the clear so
/// intermediate endpoints can forward a frame without opening it. Only the
/// body is signed, and it may be encrypted for the receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedFrame {
    pub sender: Endpoint,
    /// `None` for flooded frames.
    pub receiver: Option<Endpoint>,
    pub hops: u8,
    pub signature: Vec<u8>,
    pub body: Vec<u8>,
}

impl Serde for SignedFrame {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.sender.ser(writer);
        self.receiver.ser(writer);
        self.hops.ser(writer);
        self.signature.ser(writer);
        self.body.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            sender: Endpoint::de(reader)?,
            receiver: Option::de(reader)?,
            hops: u8::de(reader)?,
            signature: Vec::de(reader)?,
            body: Vec::de(reader)?,
        })
    }
}

