use thiserror::Error;

/// Failure to decode a value from a bit stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeErr {
    /// The buffer ended before the value was complete
    #[error("Unexpected end of buffer at bit {bit_index}")]
    UnexpectedEnd { bit_index: usize },

    /// An enum discriminant that no variant matches
    #[error("Invalid tag {tag} while reading {type_name}")]
    InvalidTag { type_name: &'static str, tag: u64 },

    /// A string payload that is not valid UTF-8
    #[error("Invalid UTF-8 in string payload")]
    InvalidUtf8,

    /// A decoded integer does not fit in the requested type
    #[error("Integer {value} is out of range for {type_name}")]
    OutOfRange { type_name: &'static str, value: i128 },

    /// An integer that cannot be represented with the declared bit width
    #[error("Integer {value} cannot be encoded with {bits} bits (signed: {signed})")]
    IntegerWidth { value: i128, bits: u8, signed: bool },

    /// A length prefix larger than the remaining buffer
    #[error("Length {length} exceeds remaining buffer")]
    LengthOverflow { length: u64 },

    /// A recursive value nested deeper than the decoder allows
    #[error("Value nesting exceeds the limit of {limit}")]
    DepthExceeded { limit: usize },
}
