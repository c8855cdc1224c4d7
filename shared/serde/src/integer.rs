use crate::{bit_reader::BitReader, bit_writer::BitWrite, error::SerdeErr, serde::Serde};

pub type UnsignedInteger<const BITS: u8> = SerdeInteger<false, false, BITS>;
pub type SignedInteger<const BITS: u8> = SerdeInteger<true, false, BITS>;
pub type UnsignedVariableInteger<const BITS: u8> = SerdeInteger<false, true, BITS>;
pub type SignedVariableInteger<const BITS: u8> = SerdeInteger<true, true, BITS>;

/// An integer written with a configurable bit width.
///
/// Fixed-width integers always occupy `BITS` bits (plus a sign bit when
/// `SIGNED`). Variable-width integers are written in `BITS`-sized chunks,
/// each preceded by a continuation bit, so small lengths and counters stay
/// small on the wire.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SerdeInteger<const SIGNED: bool, const VARIABLE: bool, const BITS: u8> {
    inner: IntegerLayout,
}

// Non-generic core, shared by every instantiation to limit monomorphization.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
struct IntegerLayout {
    value: i128,
    signed: bool,
    variable: bool,
    bits: u8,
}

impl IntegerLayout {
    fn checked(signed: bool, variable: bool, bits: u8, value: i128) -> Result<Self, SerdeErr> {
        let width_err = SerdeErr::IntegerWidth {
            value,
            bits,
            signed,
        };
        if bits == 0 || bits > 127 {
            return Err(width_err);
        }
        if !signed && value < 0 {
            return Err(width_err);
        }
        if !variable {
            let limit: i128 = 2_i128.pow(bits as u32);
            if value >= limit || value <= -limit {
                return Err(width_err);
            }
        }
        Ok(Self {
            value,
            signed,
            variable,
            bits,
        })
    }

    fn magnitude(&self) -> u128 {
        self.value.unsigned_abs()
    }

    fn ser(&self, writer: &mut dyn BitWrite) {
        if self.signed {
            writer.write_bit(self.value < 0);
        }

        let mut remaining = self.magnitude();
        if !self.variable {
            for _ in 0..self.bits {
                writer.write_bit(remaining & 1 != 0);
                remaining >>= 1;
            }
            return;
        }

        loop {
            let more = remaining >= 2_u128.pow(self.bits as u32);
            writer.write_bit(more);
            for _ in 0..self.bits {
                writer.write_bit(remaining & 1 != 0);
                remaining >>= 1;
            }
            if !more {
                return;
            }
        }
    }

    fn de(reader: &mut BitReader, signed: bool, variable: bool, bits: u8) -> Result<Self, SerdeErr> {
        let negative = if signed { reader.read_bit()? } else { false };

        let mut magnitude: u128 = 0;
        let mut shift: u32 = 0;
        loop {
            let more = if variable { reader.read_bit()? } else { false };
            for _ in 0..bits {
                if reader.read_bit()? {
                    if shift >= 127 {
                        return Err(SerdeErr::IntegerWidth {
                            value: i128::MAX,
                            bits,
                            signed,
                        });
                    }
                    magnitude |= 1 << shift;
                }
                shift += 1;
            }
            if !more {
                break;
            }
        }

        let value = magnitude as i128;
        Ok(Self {
            value: if negative { -value } else { value },
            signed,
            variable,
            bits,
        })
    }

    fn bit_length(&self) -> u32 {
        let sign = u32::from(self.signed);
        if !self.variable {
            return sign + self.bits as u32;
        }
        let mut chunks: u32 = 1;
        let mut remaining = self.magnitude() >> self.bits;
        while remaining > 0 {
            chunks += 1;
            remaining >>= self.bits;
        }
        sign + chunks * (self.bits as u32 + 1)
    }
}

impl<const SIGNED: bool, const VARIABLE: bool, const BITS: u8> SerdeInteger<SIGNED, VARIABLE, BITS> {
    /// Panics if `value` doesn't fit. Use `try_new` for the fallible version.
    pub fn new<T: Into<i128>>(value: T) -> Self {
        match Self::try_new(value) {
            Ok(integer) => integer,
            Err(err) => panic!("{}", err),
        }
    }

    pub fn try_new<T: Into<i128>>(value: T) -> Result<Self, SerdeErr> {
        Ok(Self {
            inner: IntegerLayout::checked(SIGNED, VARIABLE, BITS, value.into())?,
        })
    }

    pub fn get(&self) -> i128 {
        self.inner.value
    }

    /// Converts to a concrete integer type, failing when out of range.
    pub fn to<T: TryFrom<i128>>(&self) -> Result<T, SerdeErr> {
        T::try_from(self.inner.value).map_err(|_| SerdeErr::OutOfRange {
            type_name: std::any::type_name::<T>(),
            value: self.inner.value,
        })
    }
}

impl<const SIGNED: bool, const VARIABLE: bool, const BITS: u8> Serde for SerdeInteger<SIGNED, VARIABLE, BITS> {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.inner.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            inner: IntegerLayout::de(reader, SIGNED, VARIABLE, BITS)?,
        })
    }

    fn bit_length(&self) -> u32 {
        self.inner.bit_length()
    }
}
