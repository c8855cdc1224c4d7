use std::fmt;

use refsync_serde::{BitReader, BitWrite, Serde, SerdeErr, UnsignedInteger};

use crate::value::Value;

/// The declared type of a reference or a schema field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ValueType {
    #[default]
    Any,
    Null,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Reference,
    Map,
    List,
    /// A map shaped by a registered `TypeSchema`.
    Named(String),
}

impl ValueType {
    pub fn named(name: &str) -> Self {
        ValueType::Named(name.to_string())
    }

    /// Whether `value` may be stored under this type. `Null` fits every
    /// type, and integers widen into floats.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Any, _) | (_, Value::Null) => true,
            (ValueType::Bool, Value::Bool(_)) => true,
            (ValueType::Int, Value::Int(_)) => true,
            (ValueType::Float, Value::Float(_) | Value::Int(_)) => true,
            (ValueType::Text, Value::Text(_)) => true,
            (ValueType::Bytes, Value::Bytes(_)) => true,
            (ValueType::Reference, Value::Reference(_) | Value::Handle(_)) => true,
            (ValueType::Map, Value::Map(_)) => true,
            (ValueType::List, Value::List(_)) => true,
            (ValueType::Named(_), Value::Map(_)) => true,
            // a link to another reference satisfies a structured field
            (ValueType::Map | ValueType::List | ValueType::Named(_), Value::Reference(_)) => true,
            (ValueType::Map | ValueType::List | ValueType::Named(_), Value::Handle(_)) => true,
            _ => false,
        }
    }

    /// Applies widening so the stored value matches the declared type.
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (ValueType::Float, Value::Int(int)) => Value::Float(int as f64),
            (_, value) => value,
        }
    }

    pub fn schema_name(&self) -> Option<&str> {
        match self {
            ValueType::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => write!(f, "any"),
            ValueType::Null => write!(f, "null"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Text => write!(f, "text"),
            ValueType::Bytes => write!(f, "bytes"),
            ValueType::Reference => write!(f, "reference"),
            ValueType::Map => write!(f, "map"),
            ValueType::List => write!(f, "list"),
            ValueType::Named(name) => write!(f, "<{}>", name),
        }
    }
}

type TypeTag = UnsignedInteger<4>;

impl Serde for ValueType {
    fn ser(&self, writer: &mut dyn BitWrite) {
        let tag: u8 = match self {
            ValueType::Any => 0,
            ValueType::Null => 1,
            ValueType::Bool => 2,
            ValueType::Int => 3,
            ValueType::Float => 4,
            ValueType::Text => 5,
            ValueType::Bytes => 6,
            ValueType::Reference => 7,
            ValueType::Map => 8,
            ValueType::List => 9,
            ValueType::Named(_) => 10,
        };
        TypeTag::new(tag).ser(writer);
        if let ValueType::Named(name) = self {
            name.ser(writer);
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let tag: u8 = TypeTag::de(reader)?.to()?;
        Ok(match tag {
            0 => ValueType::Any,
            1 => ValueType::Null,
            2 => ValueType::Bool,
            3 => ValueType::Int,
            4 => ValueType::Float,
            5 => ValueType::Text,
            6 => ValueType::Bytes,
            7 => ValueType::Reference,
            8 => ValueType::Map,
            9 => ValueType::List,
            10 => ValueType::Named(String::de(reader)?),
            _ => {
                return Err(SerdeErr::InvalidTag {
                    type_name: "ValueType",
                    tag: tag as u64,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ints_widen_into_floats_only() {
        assert!(ValueType::Float.accepts(&Value::Int(3)));
        assert!(!ValueType::Int.accepts(&Value::Float(3.0)));
        assert_eq!(ValueType::Float.coerce(Value::Int(3)), Value::Float(3.0));
        assert_eq!(ValueType::Int.coerce(Value::Int(3)), Value::Int(3));
    }

    #[test]
    fn null_fits_every_type() {
        for value_type in [ValueType::Int, ValueType::Text, ValueType::named("Point")] {
            assert!(value_type.accepts(&Value::Null));
        }
    }

    #[test]
    fn mismatches_are_rejected() {
        assert!(!ValueType::Text.accepts(&Value::Int(1)));
        assert!(!ValueType::List.accepts(&Value::map([("a", Value::Int(1))])));
        assert!(!ValueType::Bool.accepts(&Value::text("true")));
    }
}
