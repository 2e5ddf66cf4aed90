//! Bounds-checked typed reads over an immutable byte buffer.
//!
//! Multi-byte values are always decoded in the card's byte order (GCN is
//! big-endian, VMU little-endian), never the host's.

use crate::error::{RecoveryError, Result};
use crate::types::Endian;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

#[derive(Debug, Clone, Copy)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    /// Absolute position of `data[0]`, used in error reports
    base: u64,
    /// Size reported in `OutOfBounds` errors
    image_size: u64,
    endian: Endian,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self {
            data,
            base: 0,
            image_size: data.len() as u64,
            endian,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Sub-reader over `len` bytes at `offset`; offsets stay relative to the sub-reader.
    pub fn slice(&self, offset: u64, len: usize) -> Result<BinaryReader<'a>> {
        let data = self.read_bytes(offset, len)?;
        Ok(Self {
            data,
            base: self.base + offset,
            image_size: self.image_size,
            endian: self.endian,
        })
    }

    pub fn read_bytes(&self, offset: u64, len: usize) -> Result<&'a [u8]> {
        let out_of_bounds = || RecoveryError::OutOfBounds {
            offset: self.base.saturating_add(offset),
            len: len as u64,
            image_size: self.image_size,
        };

        let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        self.data.get(start..end).ok_or_else(out_of_bounds)
    }

    pub fn read_array<const N: usize>(&self, offset: u64) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(offset, N)?);
        Ok(out)
    }

    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        Ok(self.read_bytes(offset, 1)?[0])
    }

    pub fn read_u16(&self, offset: u64) -> Result<u16> {
        let bytes = self.read_bytes(offset, 2)?;
        Ok(match self.endian {
            Endian::Big => BigEndian::read_u16(bytes),
            Endian::Little => LittleEndian::read_u16(bytes),
        })
    }

    pub fn read_u32(&self, offset: u64) -> Result<u32> {
        let bytes = self.read_bytes(offset, 4)?;
        Ok(match self.endian {
            Endian::Big => BigEndian::read_u32(bytes),
            Endian::Little => LittleEndian::read_u32(bytes),
        })
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        let bytes = self.read_bytes(offset, 8)?;
        Ok(match self.endian {
            Endian::Big => BigEndian::read_u64(bytes),
            Endian::Little => LittleEndian::read_u64(bytes),
        })
    }

    /// Read an unsigned field of 1, 2 or 4 bytes
    pub fn read_uint(&self, offset: u64, width: usize) -> Result<u32> {
        match width {
            1 => self.read_u8(offset).map(u32::from),
            2 => self.read_u16(offset).map(u32::from),
            4 => self.read_u32(offset),
            other => Err(RecoveryError::InvalidArgument(format!(
                "unsupported field width {other}"
            ))),
        }
    }

    /// Fixed-length string, cut at the first NUL, decoded as Latin-1
    pub fn read_string(&self, offset: u64, len: usize) -> Result<String> {
        Ok(decode_latin1(self.read_bytes(offset, len)?))
    }
}

pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Write an unsigned field of 1, 2 or 4 bytes into `buf`
pub fn write_uint(buf: &mut [u8], width: usize, endian: Endian, value: u32) {
    match (width, endian) {
        (1, _) => buf[0] = value as u8,
        (2, Endian::Big) => BigEndian::write_u16(buf, value as u16),
        (2, Endian::Little) => LittleEndian::write_u16(buf, value as u16),
        (_, Endian::Big) => BigEndian::write_u32(buf, value),
        (_, Endian::Little) => LittleEndian::write_u32(buf, value),
    }
}
