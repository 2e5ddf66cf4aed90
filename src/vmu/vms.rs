//! VMS save file header and CRC.

use crate::checksum::{crc16_xmodem, ChecksumAlgorithm, ChecksumCheck};
use crate::error::Result;
use crate::reader::BinaryReader;
use crate::types::Endian;
use serde::Serialize;

pub const HEADER_LEN: usize = 0x80;
pub const ICON_LEN: usize = 0x200;
pub const CRC: usize = 0x46;

const VM_DESCRIPTION: u64 = 0x00;
const DC_DESCRIPTION: u64 = 0x10;
const APP_ID: u64 = 0x30;
const ICON_COUNT: u64 = 0x40;
const ANIMATION_SPEED: u64 = 0x42;
const EYECATCH_TYPE: u64 = 0x44;
const DATA_LEN: u64 = 0x48;

#[derive(Debug, Clone, Serialize)]
pub struct VmsHeader {
    pub vm_description: String,
    pub dc_description: String,
    pub app_id: String,
    pub icon_count: u16,
    pub animation_speed: u16,
    pub eyecatch_type: u16,
    pub crc: u16,
    pub data_len: u32,
}

pub fn eyecatch_size(kind: u16) -> usize {
    match kind {
        1 => 8064,
        2 => 4544,
        3 => 2048,
        _ => 0,
    }
}

impl VmsHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let reader = BinaryReader::new(bytes, Endian::Little);
        Ok(Self {
            vm_description: reader.read_string(VM_DESCRIPTION, 16)?,
            dc_description: reader.read_string(DC_DESCRIPTION, 32)?,
            app_id: reader.read_string(APP_ID, 16)?,
            icon_count: reader.read_u16(ICON_COUNT)?,
            animation_speed: reader.read_u16(ANIMATION_SPEED)?,
            eyecatch_type: reader.read_u16(EYECATCH_TYPE)?,
            crc: reader.read_u16(CRC as u64)?,
            data_len: reader.read_u32(DATA_LEN)?,
        })
    }

    /// Header, icons and eyecatch
    pub fn header_len(&self) -> usize {
        HEADER_LEN + self.icon_count as usize * ICON_LEN + eyecatch_size(self.eyecatch_type)
    }

    /// Bytes covered by the CRC
    pub fn file_len(&self) -> usize {
        self.header_len() + self.data_len as usize
    }
}

/// CRC of a VMS file with its CRC field read as zero
pub fn compute_crc(file: &[u8]) -> u16 {
    if file.len() < CRC + 2 {
        return crc16_xmodem(file);
    }
    let mut copy = file.to_vec();
    copy[CRC..CRC + 2].fill(0);
    crc16_xmodem(&copy)
}

/// Verify the CRC of the data file starting at `bytes[0]`; `None` if the
/// header is unreadable or claims more bytes than are present
pub fn verify(bytes: &[u8]) -> Option<ChecksumCheck> {
    let header = VmsHeader::parse(bytes).ok()?;
    let len = header.file_len();
    let file = bytes.get(..len)?;
    Some(ChecksumCheck::new(
        ChecksumAlgorithm::Crc16Xmodem,
        header.crc as u32,
        compute_crc(file) as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::vms_file;

    #[test]
    fn test_header_lengths() {
        let file = vms_file("SONIC ADV", 2, 3, 100);
        let header = VmsHeader::parse(&file).unwrap();
        assert_eq!(header.vm_description, "SONIC ADV");
        assert_eq!(header.icon_count, 2);
        assert_eq!(header.header_len(), 0x80 + 0x400 + 2048);
        assert_eq!(header.file_len(), header.header_len() + 100);
    }

    #[test]
    fn test_crc_roundtrip() {
        let mut file = vms_file("SAVE", 1, 0, 300);
        let check = verify(&file).unwrap();
        assert!(check.is_valid());

        let last = file.len() - 1;
        file[last] ^= 0x01;
        assert!(!verify(&file).unwrap().is_valid());
    }

    #[test]
    fn test_truncated_file() {
        let file = vms_file("SAVE", 1, 0, 300);
        assert!(verify(&file[..0x100]).is_none());
    }
}
