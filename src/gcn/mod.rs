//! GameCube memory card layout.
//!
//! Blocks 0..4 form the system area: the header, directory A/B and block
//! allocation table A/B. All fields are big-endian.

pub mod bat;
pub mod directory;
pub mod header;

pub use header::GcnHeader;

use crate::checksum::gcn_checksums;
use crate::image::CardImage;
use crate::tables::{BlockTable, CardHeader, DirectoryTable, Redundant, StructureError};
use crate::types::TableId;
use byteorder::{BigEndian, ByteOrder};
use chrono::{NaiveDate, NaiveDateTime};

pub const BLOCK_SIZE: usize = 0x2000;
/// 4 Mbit (59 user blocks)
pub const MIN_IMAGE_SIZE: u64 = 0x80000;
/// 128 Mbit (2043 user blocks)
pub const MAX_IMAGE_SIZE: u64 = 0x1000000;
/// Bytes per megabit of declared card size
pub const MBIT_BYTES: u64 = 0x20000;
pub const SYSTEM_BLOCKS: u16 = 5;

pub const HEADER_BLOCK: u16 = 0;

pub fn directory_block(id: TableId) -> u16 {
    match id {
        TableId::A => 1,
        TableId::B => 2,
    }
}

pub fn bat_block(id: TableId) -> u16 {
    match id {
        TableId::A => 3,
        TableId::B => 4,
    }
}

/// Parse every system structure independently
pub fn parse(
    image: &CardImage,
) -> (
    Result<CardHeader, StructureError>,
    Redundant<DirectoryTable>,
    Redundant<BlockTable>,
) {
    let header = GcnHeader::parse(image)
        .map(CardHeader::Gcn)
        .map_err(StructureError::from);

    let directories = Redundant::pair(
        directory::parse(image, TableId::A).map_err(StructureError::from),
        directory::parse(image, TableId::B).map_err(StructureError::from),
    );

    let block_count = image.block_count(crate::types::CardFormat::Gcn);
    let block_tables = Redundant::pair(
        bat::parse(image, TableId::A, block_count).map_err(StructureError::from),
        bat::parse(image, TableId::B, block_count).map_err(StructureError::from),
    );

    (header, directories, block_tables)
}

/// Recompute the checksum pair over `covered` and store it big-endian at `at`
pub fn write_checksums(block: &mut [u8], covered: std::ops::Range<usize>, at: usize) {
    let (sum, inverse) = gcn_checksums(&block[covered]);
    BigEndian::write_u16(&mut block[at..at + 2], sum);
    BigEndian::write_u16(&mut block[at + 2..at + 4], inverse);
}

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Card timestamps count seconds since 2000-01-01 00:00:00
pub fn timestamp_to_datetime(seconds: u32) -> Option<NaiveDateTime> {
    if seconds == 0 || seconds == u32::MAX {
        return None;
    }
    epoch().checked_add_signed(chrono::Duration::seconds(seconds as i64))
}

pub fn datetime_to_timestamp(time: NaiveDateTime) -> u32 {
    let seconds = (time - epoch()).num_seconds();
    seconds.clamp(0, u32::MAX as i64) as u32
}
