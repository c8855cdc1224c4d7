use std::{fmt, str::FromStr};

use refsync_serde::{BitReader, BitWrite, Serde, SerdeErr};

use crate::{
    reference::endpoint::{Endpoint, ENDPOINT_ID_LENGTH},
    registry::ValueError,
};

pub const DEFAULT_ID_LENGTH: usize = 26;
pub const PREFIX_ID_LENGTH: usize = 21;
pub const STATIC_ID_LENGTH: usize = 18;

/// First byte of every reference id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    Default,
    Ipv6Id,
    Static,
    Public,
    Blockchain,
}

impl AddressType {
    pub fn tag(&self) -> u8 {
        match self {
            AddressType::Default => 1,
            AddressType::Ipv6Id => 2,
            AddressType::Static => 3,
            AddressType::Public => 5,
            AddressType::Blockchain => 0xBC,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(AddressType::Default),
            2 => Some(AddressType::Ipv6Id),
            3 => Some(AddressType::Static),
            5 => Some(AddressType::Public),
            0xBC => Some(AddressType::Blockchain),
            _ => None,
        }
    }
}

/// Globally unique, immutable identity of a reference.
///
/// Layout of a default id:
/// `type(1) | endpoint id(12) | instance(8, LE) | timestamp(4, LE) | counter(1)`.
/// Static ids replace instance, timestamp and counter with a 4-byte
/// application-chosen number and one reserved byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceId {
    bytes: [u8; DEFAULT_ID_LENGTH],
    length: u8,
}

impl ReferenceId {
    pub(crate) fn new_default(endpoint: &Endpoint, timestamp: u32, counter: u8) -> Self {
        let mut bytes = [0u8; DEFAULT_ID_LENGTH];
        bytes[0] = AddressType::Default.tag();
        bytes[1..13].copy_from_slice(endpoint.id());
        bytes[13..21].copy_from_slice(&endpoint.instance().to_le_bytes());
        bytes[21..25].copy_from_slice(&timestamp.to_le_bytes());
        bytes[25] = counter;
        Self {
            bytes,
            length: DEFAULT_ID_LENGTH as u8,
        }
    }

    /// A well-known id chosen by the owning endpoint.
    pub fn new_static(endpoint: &Endpoint, unique: u32) -> Self {
        let mut bytes = [0u8; DEFAULT_ID_LENGTH];
        bytes[0] = AddressType::Static.tag();
        bytes[1..13].copy_from_slice(endpoint.id());
        bytes[13..17].copy_from_slice(&unique.to_be_bytes());
        Self {
            bytes,
            length: STATIC_ID_LENGTH as u8,
        }
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, ValueError> {
        if !matches!(
            raw.len(),
            STATIC_ID_LENGTH | PREFIX_ID_LENGTH | DEFAULT_ID_LENGTH
        ) {
            return Err(ValueError::InvalidReferenceId {
                reason: format!("length {} is not 18, 21 or 26 bytes", raw.len()),
            });
        }
        if AddressType::from_tag(raw[0]).is_none() {
            return Err(ValueError::InvalidReferenceId {
                reason: format!("unknown address type {:#04x}", raw[0]),
            });
        }
        let mut bytes = [0u8; DEFAULT_ID_LENGTH];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            bytes,
            length: raw.len() as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.length as usize]
    }

    pub fn address_type(&self) -> AddressType {
        // validated on construction
        AddressType::from_tag(self.bytes[0]).unwrap_or(AddressType::Default)
    }

    pub fn is_static(&self) -> bool {
        self.address_type() == AddressType::Static
    }

    /// The endpoint that created this id and is authoritative for its value.
    pub fn origin(&self) -> Endpoint {
        let mut id = [0u8; ENDPOINT_ID_LENGTH];
        id.copy_from_slice(&self.bytes[1..13]);
        if self.is_static() {
            return Endpoint::new(id, 0);
        }
        let mut instance = [0u8; 8];
        instance.copy_from_slice(&self.bytes[13..21]);
        Endpoint::new(id, u64::from_le_bytes(instance))
    }

    /// Seconds since the id epoch, for default-layout ids.
    pub fn timestamp(&self) -> Option<u32> {
        if self.length as usize != DEFAULT_ID_LENGTH || self.is_static() {
            return None;
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[21..25]);
        Some(u32::from_le_bytes(raw))
    }

    pub fn counter(&self) -> Option<u8> {
        if self.length as usize != DEFAULT_ID_LENGTH || self.is_static() {
            return None;
        }
        Some(self.bytes[25])
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", data_encoding::HEXLOWER.encode(self.as_bytes()))
    }
}

impl fmt::Debug for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for ReferenceId {
    type Err = ValueError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let Some(hex) = text.strip_prefix('$') else {
            return Err(ValueError::InvalidReferenceId {
                reason: format!("'{}' does not start with '$'", text),
            });
        };
        let raw = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|err| ValueError::InvalidReferenceId {
                reason: err.to_string(),
            })?;
        Self::from_bytes(&raw)
    }
}

impl Serde for ReferenceId {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.length.ser(writer);
        writer.write_bytes(self.as_bytes());
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let length = u8::de(reader)?;
        let raw = reader.read_bytes(length as usize)?;
        Self::from_bytes(&raw).map_err(|_| SerdeErr::InvalidTag {
            type_name: "ReferenceId",
            tag: raw.first().copied().unwrap_or(0) as u64,
        })
    }
}
