use crate::error::Result;
use crate::image::CardImage;
use crate::tables::Region;
use crate::types::CardFormat;
use chrono::NaiveDateTime;
use serde::Serialize;

use super::{decode_bcd_timestamp, BLOCK_SIZE, ROOT_BLOCK};

pub const MAGIC: [u8; 16] = [0x55; 16];
const CUSTOM_COLOR: u64 = 0x10;
const COLOR: u64 = 0x11;
const TIMESTAMP: u64 = 0x30;
const FAT_BLOCK: u64 = 0x46;
const FAT_SIZE: u64 = 0x48;
const DIRECTORY_BLOCK: u64 = 0x4A;
const DIRECTORY_SIZE: u64 = 0x4C;
const ICON_SHAPE: u64 = 0x4E;
const USER_BLOCKS: u64 = 0x50;
const FIELDS_END: usize = 0x56;

pub const DEFAULT_FAT_BLOCK: u16 = 254;
pub const DEFAULT_DIRECTORY_BLOCK: u16 = 253;
pub const DEFAULT_DIRECTORY_SIZE: u16 = 13;
pub const DEFAULT_USER_BLOCKS: u16 = 200;

pub fn field_region() -> Region {
    Region::new(ROOT_BLOCK as u64 * BLOCK_SIZE as u64, FIELDS_END)
}

#[derive(Debug, Clone, Serialize)]
pub struct VmuRoot {
    pub magic_ok: bool,
    pub custom_color: bool,
    /// Blue, green, red, alpha
    pub color: [u8; 4],
    pub timestamp: Option<NaiveDateTime>,
    pub fat_block: u16,
    pub fat_size: u16,
    pub directory_block: u16,
    pub directory_size: u16,
    pub icon_shape: u16,
    pub user_blocks: u16,
    /// The stored layout was implausible and the standard one is used instead
    pub layout_defaulted: bool,
}

impl VmuRoot {
    pub fn parse(image: &CardImage) -> Result<Self> {
        let offset = ROOT_BLOCK as u64 * BLOCK_SIZE as u64;
        let reader = image.reader(CardFormat::Vmu).slice(offset, BLOCK_SIZE)?;

        let mut root = Self {
            magic_ok: reader.read_bytes(0, MAGIC.len())? == MAGIC,
            custom_color: reader.read_u8(CUSTOM_COLOR)? == 1,
            color: reader.read_array::<4>(COLOR)?,
            timestamp: decode_bcd_timestamp(reader.read_bytes(TIMESTAMP, 8)?),
            fat_block: reader.read_u16(FAT_BLOCK)?,
            fat_size: reader.read_u16(FAT_SIZE)?,
            directory_block: reader.read_u16(DIRECTORY_BLOCK)?,
            directory_size: reader.read_u16(DIRECTORY_SIZE)?,
            icon_shape: reader.read_u16(ICON_SHAPE)?,
            user_blocks: reader.read_u16(USER_BLOCKS)?,
            layout_defaulted: false,
        };

        if !root.layout_is_plausible() {
            log::warn!("vmu root layout implausible, assuming the standard layout");
            root.fat_block = DEFAULT_FAT_BLOCK;
            root.fat_size = 1;
            root.directory_block = DEFAULT_DIRECTORY_BLOCK;
            root.directory_size = DEFAULT_DIRECTORY_SIZE;
            root.user_blocks = DEFAULT_USER_BLOCKS;
            root.layout_defaulted = true;
        }
        Ok(root)
    }

    fn layout_is_plausible(&self) -> bool {
        self.fat_size == 1
            && self.fat_block < ROOT_BLOCK
            && self.directory_block < self.fat_block
            && self.directory_size > 0
            && self.directory_size <= self.directory_block + 1
            && self.user_blocks > 0
            && self.user_blocks <= self.directory_block + 1 - self.directory_size
    }

    /// Directory blocks from first to last (the directory grows downward)
    pub fn directory_blocks(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.directory_size).map(move |i| self.directory_block - i)
    }
}
