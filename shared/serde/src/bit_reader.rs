use crate::error::SerdeErr;

/// Reads bits in the order a `BitWriter` wrote them.
pub struct BitReader<'b> {
    buffer: &'b [u8],
    bit_index: usize,
}

impl<'b> BitReader<'b> {
    pub fn new(buffer: &'b [u8]) -> Self {
        Self {
            buffer,
            bit_index: 0,
        }
    }

    pub fn read_bit(&mut self) -> Result<bool, SerdeErr> {
        let byte_index = self.bit_index / 8;
        let Some(byte) = self.buffer.get(byte_index) else {
            return Err(SerdeErr::UnexpectedEnd {
                bit_index: self.bit_index,
            });
        };
        let bit = (byte >> (self.bit_index % 8)) & 1 != 0;
        self.bit_index += 1;
        Ok(bit)
    }

    pub fn read_byte(&mut self) -> Result<u8, SerdeErr> {
        // fast path when aligned
        if self.bit_index % 8 == 0 {
            let byte_index = self.bit_index / 8;
            let Some(byte) = self.buffer.get(byte_index) else {
                return Err(SerdeErr::UnexpectedEnd {
                    bit_index: self.bit_index,
                });
            };
            self.bit_index += 8;
            return Ok(*byte);
        }

        let mut output: u8 = 0;
        for i in 0..8 {
            if self.read_bit()? {
                output |= 1 << i;
            }
        }
        Ok(output)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, SerdeErr> {
        if self.bits_remaining() < count.saturating_mul(8) {
            return Err(SerdeErr::UnexpectedEnd {
                bit_index: self.bit_index,
            });
        }
        let mut output = Vec::with_capacity(count);
        for _ in 0..count {
            output.push(self.read_byte()?);
        }
        Ok(output)
    }

    pub fn bits_remaining(&self) -> usize {
        (self.buffer.len() * 8).saturating_sub(self.bit_index)
    }

    /// True when only padding bits of the final byte remain.
    pub fn is_exhausted(&self) -> bool {
        self.bits_remaining() < 8
    }
}
