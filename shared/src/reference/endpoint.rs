use std::{fmt, str::FromStr};

use refsync_serde::{BitReader, BitWrite, ConstBitLength, Serde, SerdeErr};

use crate::registry::ValueError;

pub const ENDPOINT_ID_LENGTH: usize = 12;

/// A participant in the network: a 12-byte endpoint id plus the instance of
/// that endpoint. Instance `0` addresses "any instance".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    id: [u8; ENDPOINT_ID_LENGTH],
    instance: u64,
}

impl Endpoint {
    pub const fn new(id: [u8; ENDPOINT_ID_LENGTH], instance: u64) -> Self {
        Self { id, instance }
    }

    /// Endpoint id from a human-readable name, truncated or zero-padded to
    /// twelve bytes.
    pub fn named(name: &str) -> Self {
        let mut id = [0u8; ENDPOINT_ID_LENGTH];
        for (slot, byte) in id.iter_mut().zip(name.as_bytes()) {
            *slot = *byte;
        }
        Self { id, instance: 0 }
    }

    pub fn random() -> Self {
        let mut id = [0u8; ENDPOINT_ID_LENGTH];
        for byte in id.iter_mut() {
            *byte = fastrand::u8(..);
        }
        Self {
            id,
            instance: fastrand::u64(1..),
        }
    }

    pub fn with_instance(mut self, instance: u64) -> Self {
        self.instance = instance;
        self
    }

    pub fn id(&self) -> &[u8; ENDPOINT_ID_LENGTH] {
        &self.id
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Same endpoint id, and either side addresses any instance or both
    /// instances agree.
    pub fn matches(&self, other: &Endpoint) -> bool {
        self.id == other.id
            && (self.instance == 0 || other.instance == 0 || self.instance == other.instance)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@{}/{:x}",
            data_encoding::HEXLOWER.encode(&self.id),
            self.instance
        )
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Endpoint {
    type Err = ValueError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ValueError::InvalidEndpoint { reason };
        let body = text
            .strip_prefix("@@")
            .ok_or_else(|| invalid(format!("'{}' does not start with '@@'", text)))?;
        let (id_hex, instance_hex) = body.split_once('/').unwrap_or((body, "0"));
        let raw = data_encoding::HEXLOWER_PERMISSIVE
            .decode(id_hex.as_bytes())
            .map_err(|err| invalid(err.to_string()))?;
        let id: [u8; ENDPOINT_ID_LENGTH] = raw
            .try_into()
            .map_err(|raw: Vec<u8>| invalid(format!("id has {} bytes", raw.len())))?;
        let instance =
            u64::from_str_radix(instance_hex, 16).map_err(|err| invalid(err.to_string()))?;
        Ok(Self { id, instance })
    }
}

impl Serde for Endpoint {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.id.ser(writer);
        self.instance.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let id = <[u8; ENDPOINT_ID_LENGTH]>::de(reader)?;
        let instance = u64::de(reader)?;
        Ok(Self { id, instance })
    }
}

impl ConstBitLength for Endpoint {
    fn const_bit_length() -> u32 {
        (ENDPOINT_ID_LENGTH as u32 + 8) * 8
    }
}
