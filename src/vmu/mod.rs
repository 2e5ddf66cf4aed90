//! Dreamcast VMU layout.
//!
//! 256 blocks of 512 bytes, little-endian. The root block (255) describes
//! where the FAT and directory live; there is a single copy of each.

pub mod directory;
pub mod fat;
pub mod root;
pub mod vms;

pub use root::VmuRoot;

use crate::image::CardImage;
use crate::tables::{BlockTable, CardHeader, DirectoryTable, Redundant, StructureError};
use chrono::{NaiveDate, NaiveDateTime};

pub const BLOCK_SIZE: usize = 0x200;
pub const BLOCK_COUNT: usize = 256;
pub const IMAGE_SIZE: u64 = 0x20000;
pub const ROOT_BLOCK: u16 = 255;

/// Parse the root block, FAT and directory
pub fn parse(
    image: &CardImage,
) -> (
    Result<CardHeader, StructureError>,
    Redundant<DirectoryTable>,
    Redundant<BlockTable>,
) {
    let root = match VmuRoot::parse(image) {
        Ok(root) => root,
        Err(err) => {
            let err = StructureError::from(err);
            return (
                Err(err.clone()),
                Redundant::single(Err(err.clone())),
                Redundant::single(Err(err)),
            );
        }
    };

    let directory = directory::parse(image, &root).map_err(StructureError::from);
    let fat = fat::parse(image, &root).map_err(StructureError::from);

    (
        Ok(CardHeader::Vmu(root)),
        Redundant::single(directory),
        Redundant::single(fat),
    )
}

fn bcd(byte: u8) -> Option<u32> {
    let (hi, lo) = (byte >> 4, byte & 0x0F);
    if hi > 9 || lo > 9 {
        None
    } else {
        Some(hi as u32 * 10 + lo as u32)
    }
}

/// Decode an 8-byte BCD timestamp (century, year, month, day, hour, minute, second, weekday)
pub fn decode_bcd_timestamp(raw: &[u8]) -> Option<NaiveDateTime> {
    if raw.len() < 7 {
        return None;
    }
    let year = bcd(raw[0])? * 100 + bcd(raw[1])?;
    NaiveDate::from_ymd_opt(year as i32, bcd(raw[2])?, bcd(raw[3])?)?
        .and_hms_opt(bcd(raw[4])?, bcd(raw[5])?, bcd(raw[6])?)
}

pub fn encode_bcd_timestamp(time: NaiveDateTime) -> [u8; 8] {
    use chrono::{Datelike, Timelike};
    let to_bcd = |v: u32| (((v / 10) % 10) << 4 | (v % 10)) as u8;
    let year = time.year().max(0) as u32;
    [
        to_bcd(year / 100),
        to_bcd(year % 100),
        to_bcd(time.month()),
        to_bcd(time.day()),
        to_bcd(time.hour()),
        to_bcd(time.minute()),
        to_bcd(time.second()),
        time.weekday().num_days_from_monday() as u8,
    ]
}
