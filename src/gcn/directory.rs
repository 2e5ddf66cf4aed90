use crate::checksum::{gcn_checksums, ChecksumAlgorithm, ChecksumCheck};
use crate::error::Result;
use crate::image::CardImage;
use crate::reader::BinaryReader;
use crate::tables::{DirectoryEntry, DirectoryTable, FileKind, Region};
use crate::types::{CardFormat, Endian, TableId};
use byteorder::{BigEndian, ByteOrder};
use lazy_static::lazy_static;
use regex::Regex;

use super::{directory_block, timestamp_to_datetime, BLOCK_SIZE};

pub const ENTRY_SIZE: usize = 0x40;
pub const ENTRY_COUNT: usize = 127;
pub const UPDATE_COUNTER: usize = 0x1FFA;
pub const CHECKSUM: usize = 0x1FFC;

// Entry field offsets
const GAME_CODE: u64 = 0x00;
const MAKER_CODE: u64 = 0x04;
const BANNER_FLAGS: u64 = 0x07;
const FILENAME: u64 = 0x08;
pub const FILENAME_LEN: usize = 0x20;
const MOD_TIME: u64 = 0x28;
const IMAGE_OFFSET: u64 = 0x2C;
const ICON_FORMAT: u64 = 0x30;
const PERMISSIONS: u64 = 0x34;
const COPY_COUNTER: u64 = 0x35;
const FIRST_BLOCK: u64 = 0x36;
const BLOCK_COUNT: u64 = 0x38;
const COMMENT_OFFSET: u64 = 0x3C;

/// Public, no-copy, no-move permission bits
pub const PERMISSION_PUBLIC: u8 = 0x04;

lazy_static! {
    static ref GAME_CODE_RE: Regex = Regex::new(r"^[0-9A-Za-z]{4}$").unwrap();
    static ref MAKER_CODE_RE: Regex = Regex::new(r"^[0-9A-Za-z]{2}$").unwrap();
}

/// Whether a 6-character GCN game id (game code + maker code) is well formed
pub fn is_valid_game_id(game_id: &str) -> bool {
    game_id.len() == 6
        && game_id.is_char_boundary(4)
        && GAME_CODE_RE.is_match(&game_id[..4])
        && MAKER_CODE_RE.is_match(&game_id[4..])
}

pub fn parse(image: &CardImage, id: TableId) -> Result<DirectoryTable> {
    let offset = directory_block(id) as u64 * BLOCK_SIZE as u64;
    let reader = image.reader(CardFormat::Gcn).slice(offset, BLOCK_SIZE)?;

    let (sum, inverse) = gcn_checksums(reader.read_bytes(0, CHECKSUM)?);
    let stored_sum = reader.read_u16(CHECKSUM as u64)?;
    let stored_inverse = reader.read_u16(CHECKSUM as u64 + 2)?;
    let checksum = ChecksumCheck::new(
        ChecksumAlgorithm::GcnDual,
        (stored_sum as u32) << 16 | stored_inverse as u32,
        (sum as u32) << 16 | inverse as u32,
    );

    let mut entries = Vec::new();
    let mut malformed_slots = Vec::new();
    for slot in 0..ENTRY_COUNT {
        let entry_reader = reader.slice((slot * ENTRY_SIZE) as u64, ENTRY_SIZE)?;
        match parse_entry(&entry_reader, slot)? {
            EntrySlot::Empty => {}
            EntrySlot::Malformed => malformed_slots.push(slot),
            EntrySlot::Occupied(entry) => entries.push(entry),
        }
    }

    let table = DirectoryTable {
        id,
        region: Region::new(offset, BLOCK_SIZE),
        update_counter: reader.read_u16(UPDATE_COUNTER as u64)?,
        checksum: Some(checksum),
        malformed_slots,
        entries,
    };
    log::debug!(
        "gcn directory {}: {} entries, counter {}, checksum {}",
        id,
        table.entries.len(),
        table.update_counter,
        if checksum.is_valid() { "ok" } else { "bad" }
    );
    Ok(table)
}

enum EntrySlot {
    Empty,
    Malformed,
    Occupied(DirectoryEntry),
}

fn parse_entry(reader: &BinaryReader<'_>, slot: usize) -> Result<EntrySlot> {
    let game_code_raw = reader.read_bytes(GAME_CODE, 4)?;
    if game_code_raw.iter().all(|&b| b == 0xFF) {
        return Ok(EntrySlot::Empty);
    }

    let game_code = reader.read_string(GAME_CODE, 4)?;
    let maker_code = reader.read_string(MAKER_CODE, 2)?;
    if !GAME_CODE_RE.is_match(&game_code) || !MAKER_CODE_RE.is_match(&maker_code) {
        return Ok(EntrySlot::Malformed);
    }

    let optional = |value: u32| if value == u32::MAX { None } else { Some(value) };

    Ok(EntrySlot::Occupied(DirectoryEntry {
        slot,
        format: CardFormat::Gcn,
        kind: FileKind::Standard,
        game_code,
        maker_code,
        filename: reader.read_string(FILENAME, FILENAME_LEN)?,
        first_block: reader.read_u16(FIRST_BLOCK)?,
        block_count: reader.read_u16(BLOCK_COUNT)?,
        permissions: reader.read_u8(PERMISSIONS)?,
        copy_counter: reader.read_u8(COPY_COUNTER)?,
        banner_flags: reader.read_u8(BANNER_FLAGS)?,
        icon_format: reader.read_u16(ICON_FORMAT)?,
        modified: timestamp_to_datetime(reader.read_u32(MOD_TIME)?),
        image_offset: optional(reader.read_u32(IMAGE_OFFSET)?),
        comment_offset: optional(reader.read_u32(COMMENT_OFFSET)?),
        header_offset_blocks: 0,
        raw: reader.read_bytes(0, ENTRY_SIZE)?.to_vec(),
    }))
}

/// Fields for a freshly encoded directory entry
#[derive(Debug, Clone)]
pub struct EntryFields<'a> {
    pub game_id: &'a str,
    pub filename: &'a str,
    pub first_block: u16,
    pub block_count: u16,
    pub modified: u32,
    pub image_offset: Option<u32>,
    pub comment_offset: Option<u32>,
    pub permissions: u8,
}

/// Encode a 0x40-byte directory entry
pub fn encode_entry(fields: &EntryFields<'_>) -> [u8; ENTRY_SIZE] {
    let mut raw = [0xFFu8; ENTRY_SIZE];

    let id = fields.game_id.as_bytes();
    let id_len = id.len().min(6);
    raw[..id_len].copy_from_slice(&id[..id_len]);
    raw[BANNER_FLAGS as usize] = 0x00;

    let name = &mut raw[FILENAME as usize..FILENAME as usize + FILENAME_LEN];
    name.fill(0);
    let bytes = fields.filename.as_bytes();
    let len = bytes.len().min(FILENAME_LEN);
    name[..len].copy_from_slice(&bytes[..len]);

    let put_u32 = |raw: &mut [u8; ENTRY_SIZE], at: u64, value: u32| {
        BigEndian::write_u32(&mut raw[at as usize..at as usize + 4], value)
    };
    put_u32(&mut raw, MOD_TIME, fields.modified);
    put_u32(&mut raw, IMAGE_OFFSET, fields.image_offset.unwrap_or(u32::MAX));
    put_u32(&mut raw, COMMENT_OFFSET, fields.comment_offset.unwrap_or(u32::MAX));
    BigEndian::write_u16(&mut raw[ICON_FORMAT as usize..ICON_FORMAT as usize + 2], 0);
    BigEndian::write_u16(&mut raw[0x32..0x34], 0);
    raw[PERMISSIONS as usize] = fields.permissions;
    raw[COPY_COUNTER as usize] = 0;
    BigEndian::write_u16(
        &mut raw[FIRST_BLOCK as usize..FIRST_BLOCK as usize + 2],
        fields.first_block,
    );
    BigEndian::write_u16(
        &mut raw[BLOCK_COUNT as usize..BLOCK_COUNT as usize + 2],
        fields.block_count,
    );
    raw
}

/// Decode an encoded entry back through the regular parser
pub fn decode_entry(raw: &[u8], slot: usize) -> Option<DirectoryEntry> {
    let reader = BinaryReader::new(raw, Endian::Big);
    match parse_entry(&reader, slot) {
        Ok(EntrySlot::Occupied(entry)) => Some(entry),
        _ => None,
    }
}
