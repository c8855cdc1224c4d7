use refsync_serde::{BitReader, BitWriter, Serde, SerdeErr};

use crate::{
    protocol::{crypto::SignedFrame, message::Envelope},
    storage::StoredReference,
    value::Value,
};

/// Converts engine structures to bytes and back.
///
/// The engine never looks at wire bytes outside of a `Codec`, so a different
/// encoding can be plugged in without touching routing or the registry.
pub trait Codec: Send {
    fn encode_frame(&self, frame: &SignedFrame) -> Vec<u8>;
    fn decode_frame(&self, bytes: &[u8]) -> Result<SignedFrame, SerdeErr>;
    fn encode_envelope(&self, envelope: &Envelope) -> Vec<u8>;
    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope, SerdeErr>;
    fn encode_value(&self, value: &Value) -> Vec<u8>;
    fn decode_value(&self, bytes: &[u8]) -> Result<Value, SerdeErr>;
    fn encode_stored(&self, stored: &StoredReference) -> Vec<u8>;
    fn decode_stored(&self, bytes: &[u8]) -> Result<StoredReference, SerdeErr>;
    fn clone_box(&self) -> Box<dyn Codec>;
}

impl Clone for Box<dyn Codec> {
    fn clone(&self) -> Box<dyn Codec> {
        self.clone_box()
    }
}

/// The default codec, built on the bit-level `Serde` implementations.
#[derive(Clone, Copy, Default)]
pub struct WireCodec;

impl WireCodec {
    fn encode<T: Serde>(item: &T) -> Vec<u8> {
        let mut writer = BitWriter::new();
        item.ser(&mut writer);
        writer.to_bytes()
    }

    fn decode<T: Serde>(bytes: &[u8]) -> Result<T, SerdeErr> {
        let mut reader = BitReader::new(bytes);
        T::de(&mut reader)
    }
}

impl Codec for WireCodec {
    fn encode_frame(&self, frame: &SignedFrame) -> Vec<u8> {
        Self::encode(frame)
    }

    fn decode_frame(&self, bytes: &[u8]) -> Result<SignedFrame, SerdeErr> {
        Self::decode(bytes)
    }

    fn encode_envelope(&self, envelope: &Envelope) -> Vec<u8> {
        Self::encode(envelope)
    }

    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope, SerdeErr> {
        Self::decode(bytes)
    }

    fn encode_value(&self, value: &Value) -> Vec<u8> {
        Self::encode(value)
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<Value, SerdeErr> {
        Self::decode(bytes)
    }

    fn encode_stored(&self, stored: &StoredReference) -> Vec<u8> {
        Self::encode(stored)
    }

    fn decode_stored(&self, bytes: &[u8]) -> Result<StoredReference, SerdeErr> {
        Self::decode(bytes)
    }

    fn clone_box(&self) -> Box<dyn Codec> {
        Box::new(*self)
    }
}
