use crate::checksum::{gcn_checksums, ChecksumAlgorithm, ChecksumCheck};
use crate::error::Result;
use crate::image::CardImage;
use crate::tables::Region;
use crate::types::CardFormat;
use serde::Serialize;

use super::{HEADER_BLOCK, MBIT_BYTES};

pub const SERIAL_LEN: usize = 12;
pub const FORMAT_TIME: u64 = 0x0C;
pub const SRAM_BIAS: u64 = 0x14;
pub const SRAM_LANGUAGE: u64 = 0x18;
pub const DEVICE_ID: u64 = 0x20;
pub const SIZE_MBITS: u64 = 0x22;
pub const ENCODING: u64 = 0x24;
pub const CHECKSUM: usize = 0x1FC;

/// Serial through encoding; the rest of the block is padding
pub const FIELD_REGION: Region = Region { offset: 0, len: 0x26 };

#[derive(Debug, Clone, Serialize)]
pub struct GcnHeader {
    pub serial: String,
    pub format_time: u64,
    pub sram_bias: u32,
    pub sram_language: u32,
    /// Non-zero unless formatted in slot A
    pub device_id: u16,
    pub size_mbits: u16,
    /// 0 = ANSI, 1 = Shift-JIS
    pub encoding: u16,
    pub checksum: ChecksumCheck,
}

impl GcnHeader {
    pub fn parse(image: &CardImage) -> Result<Self> {
        let offset = HEADER_BLOCK as u64 * super::BLOCK_SIZE as u64;
        let reader = image.reader(CardFormat::Gcn).slice(offset, CHECKSUM + 4)?;

        let covered = reader.read_bytes(0, CHECKSUM)?;
        let (sum, inverse) = gcn_checksums(covered);
        let stored_sum = reader.read_u16(CHECKSUM as u64)?;
        let stored_inverse = reader.read_u16(CHECKSUM as u64 + 2)?;

        let header = Self {
            serial: hex::encode(reader.read_bytes(0, SERIAL_LEN)?),
            format_time: reader.read_u64(FORMAT_TIME)?,
            sram_bias: reader.read_u32(SRAM_BIAS)?,
            sram_language: reader.read_u32(SRAM_LANGUAGE)?,
            device_id: reader.read_u16(DEVICE_ID)?,
            size_mbits: reader.read_u16(SIZE_MBITS)?,
            encoding: reader.read_u16(ENCODING)?,
            checksum: ChecksumCheck::new(
                ChecksumAlgorithm::GcnDual,
                (stored_sum as u32) << 16 | stored_inverse as u32,
                (sum as u32) << 16 | inverse as u32,
            ),
        };

        log::debug!(
            "gcn header: {} Mbit, encoding {}, checksum {}",
            header.size_mbits,
            header.encoding,
            if header.checksum.is_valid() { "ok" } else { "bad" }
        );
        Ok(header)
    }

    /// Card size in bytes according to the header
    pub fn declared_size(&self) -> u64 {
        self.size_mbits as u64 * MBIT_BYTES
    }

    pub fn is_shift_jis(&self) -> bool {
        self.encoding == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::GcnImageBuilder;

    #[test]
    fn test_parse_valid_header() {
        let image = GcnImageBuilder::new(4).build_image();
        let header = GcnHeader::parse(&image).unwrap();
        assert_eq!(header.size_mbits, 4);
        assert_eq!(header.declared_size(), 0x80000);
        assert!(header.checksum.is_valid());
        assert!(!header.is_shift_jis());
        assert_eq!(header.serial.len(), SERIAL_LEN * 2);
    }

    #[test]
    fn test_corrupt_header_checksum() {
        let mut bytes = GcnImageBuilder::new(4).build();
        bytes[0x05] ^= 0xFF;
        let image = CardImage::from_bytes("corrupt", bytes);
        let header = GcnHeader::parse(&image).unwrap();
        assert!(!header.checksum.is_valid());
    }

    #[test]
    fn test_truncated_header() {
        let image = CardImage::from_bytes("tiny", vec![0u8; 0x100]);
        assert!(GcnHeader::parse(&image).is_err());
    }
}
