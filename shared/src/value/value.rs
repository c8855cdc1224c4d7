use std::{collections::BTreeMap, fmt};

use refsync_serde::{
    read_length, BitReader, BitWrite, Serde, SerdeErr, UnsignedInteger, UnsignedVariableInteger,
};

use crate::reference::ReferenceId;

/// Identity of a registry-managed composite value.
///
/// Two references never share a `ValueKey`; it is what the registry's
/// value-to-reference index is keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueKey(u64);

impl ValueKey {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A property address inside a composite value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKey {
    Name(String),
    Index(usize),
}

impl PropertyKey {
    pub fn name(name: &str) -> Self {
        PropertyKey::Name(name.to_string())
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::Name(name.to_string())
    }
}

impl From<usize> for PropertyKey {
    fn from(index: usize) -> Self {
        PropertyKey::Index(index)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Name(name) => write!(f, "{}", name),
            PropertyKey::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// A value held by a reference.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// A lazy link to another reference.
    Reference(ReferenceId),
    /// The managed object of some reference, by identity.
    Handle(ValueKey),
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
}

impl Value {
    pub fn text(text: &str) -> Self {
        Value::Text(text.to_string())
    }

    pub fn map<K: Into<String>, I: IntoIterator<Item = (K, Value)>>(entries: I) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Reference(_) => "reference",
            Value::Handle(_) => "handle",
            Value::Map(_) => "map",
            Value::List(_) => "list",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Map(_) | Value::List(_))
    }

    /// Whether a `Handle` appears anywhere in this value.
    pub fn contains_handle(&self) -> bool {
        match self {
            Value::Handle(_) => true,
            Value::Map(map) => map.values().any(Value::contains_handle),
            Value::List(list) => list.iter().any(Value::contains_handle),
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn get(&self, key: &PropertyKey) -> Option<&Value> {
        match (self, key) {
            (Value::Map(map), PropertyKey::Name(name)) => map.get(name),
            (Value::List(list), PropertyKey::Index(index)) => list.get(*index),
            _ => None,
        }
    }

    /// Every reference id this value links to, depth first.
    pub fn nested_references(&self) -> Vec<ReferenceId> {
        let mut output = Vec::new();
        self.collect_references(&mut output);
        output
    }

    fn collect_references(&self, output: &mut Vec<ReferenceId>) {
        match self {
            Value::Reference(id) => output.push(*id),
            Value::Map(map) => map.values().for_each(|v| v.collect_references(output)),
            Value::List(list) => list.iter().for_each(|v| v.collect_references(output)),
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<ReferenceId> for Value {
    fn from(value: ReferenceId) -> Self {
        Value::Reference(value)
    }
}

type ValueTag = UnsignedInteger<4>;

/// Maps and lists nested deeper than this are rejected on decode.
pub const MAX_VALUE_DEPTH: usize = 64;
type Index = UnsignedVariableInteger<7>;

impl Serde for PropertyKey {
    fn ser(&self, writer: &mut dyn BitWrite) {
        match self {
            PropertyKey::Name(name) => {
                writer.write_bit(false);
                name.ser(writer);
            }
            PropertyKey::Index(index) => {
                writer.write_bit(true);
                Index::new(*index as u64).ser(writer);
            }
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        if reader.read_bit()? {
            Ok(PropertyKey::Index(Index::de(reader)?.to()?))
        } else {
            Ok(PropertyKey::Name(String::de(reader)?))
        }
    }
}

impl Serde for Value {
    fn ser(&self, writer: &mut dyn BitWrite) {
        match self {
            Value::Null => ValueTag::new(0).ser(writer),
            Value::Bool(value) => {
                ValueTag::new(1).ser(writer);
                value.ser(writer);
            }
            Value::Int(value) => {
                ValueTag::new(2).ser(writer);
                value.ser(writer);
            }
            Value::Float(value) => {
                ValueTag::new(3).ser(writer);
                value.ser(writer);
            }
            Value::Text(value) => {
                ValueTag::new(4).ser(writer);
                value.ser(writer);
            }
            Value::Bytes(value) => {
                ValueTag::new(5).ser(writer);
                value.ser(writer);
            }
            Value::Reference(id) => {
                ValueTag::new(6).ser(writer);
                id.ser(writer);
            }
            Value::Handle(key) => {
                ValueTag::new(7).ser(writer);
                key.0.ser(writer);
            }
            Value::Map(map) => {
                ValueTag::new(8).ser(writer);
                map.ser(writer);
            }
            Value::List(list) => {
                ValueTag::new(9).ser(writer);
                list.ser(writer);
            }
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Value::de_nested(reader, 0)
    }
}

impl Value {
    fn de_nested(reader: &mut BitReader, depth: usize) -> Result<Self, SerdeErr> {
        let tag: u8 = ValueTag::de(reader)?.to()?;
        match tag {
            0 => Ok(Value::Null),
            1 => Ok(Value::Bool(bool::de(reader)?)),
            2 => Ok(Value::Int(i64::de(reader)?)),
            3 => Ok(Value::Float(f64::de(reader)?)),
            4 => Ok(Value::Text(String::de(reader)?)),
            5 => Ok(Value::Bytes(Vec::<u8>::de(reader)?)),
            6 => Ok(Value::Reference(ReferenceId::de(reader)?)),
            7 => Ok(Value::Handle(ValueKey(u64::de(reader)?))),
            8 | 9 if depth >= MAX_VALUE_DEPTH => Err(SerdeErr::DepthExceeded {
                limit: MAX_VALUE_DEPTH,
            }),
            8 => {
                let length = read_length(reader)?;
                let mut map = BTreeMap::new();
                for _ in 0..length {
                    let key = String::de(reader)?;
                    map.insert(key, Value::de_nested(reader, depth + 1)?);
                }
                Ok(Value::Map(map))
            }
            9 => {
                let length = read_length(reader)?;
                let mut list = Vec::with_capacity(length);
                for _ in 0..length {
                    list.push(Value::de_nested(reader, depth + 1)?);
                }
                Ok(Value::List(list))
            }
            _ => Err(SerdeErr::InvalidTag {
                type_name: "Value",
                tag: tag as u64,
            }),
        }
    }
}
