//! Sequential big endian reader used by the wire format decoders.

use crate::error::IftError;

/// Reads scalar fields front to back, reporting truncation with a fixed
/// context string.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], context: &'static str) -> Self {
        Reader {
            data,
            pos: 0,
            context,
        }
    }

    pub fn at(data: &'a [u8], pos: usize, context: &'static str) -> Result<Self, IftError> {
        if pos > data.len() {
            return Err(IftError::NotEnoughInput(context));
        }
        Ok(Reader { data, pos, context })
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], IftError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(IftError::NotEnoughInput(self.context))?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(IftError::NotEnoughInput(self.context))?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], IftError> {
        Ok(self.read_bytes(N)?.try_into().unwrap())
    }

    pub fn read_u8(&mut self) -> Result<u8, IftError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, IftError> {
        Ok(u16::from_be_bytes(self.read_array::<2>()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, IftError> {
        Ok(i16::from_be_bytes(self.read_array::<2>()?))
    }

    pub fn read_u24(&mut self) -> Result<u32, IftError> {
        let bytes = self.read_array::<3>()?;
        Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, IftError> {
        Ok(u32::from_be_bytes(self.read_array::<4>()?))
    }
}
