use crate::error::Result;
use crate::image::CardImage;
use crate::tables::{DirectoryEntry, DirectoryTable, FileKind, Region};
use crate::types::{CardFormat, TableId};

use super::{decode_bcd_timestamp, VmuRoot, BLOCK_SIZE};

pub const ENTRY_SIZE: usize = 0x20;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / ENTRY_SIZE;

pub const TYPE_NONE: u8 = 0x00;
pub const TYPE_DATA: u8 = 0x33;
pub const TYPE_GAME: u8 = 0xCC;

const FILE_TYPE: u64 = 0x00;
const COPY_PROTECT: u64 = 0x01;
const FIRST_BLOCK: u64 = 0x02;
const FILENAME: u64 = 0x04;
pub const FILENAME_LEN: usize = 12;
const TIMESTAMP: u64 = 0x10;
const SIZE_BLOCKS: u64 = 0x18;
const HEADER_OFFSET: u64 = 0x1A;

pub fn parse(image: &CardImage, root: &VmuRoot) -> Result<DirectoryTable> {
    let reader = image.reader(CardFormat::Vmu);

    let mut entries = Vec::new();
    let mut malformed_slots = Vec::new();
    for (index, block) in root.directory_blocks().enumerate() {
        let block_reader = reader.slice(block as u64 * BLOCK_SIZE as u64, BLOCK_SIZE)?;
        for i in 0..ENTRIES_PER_BLOCK {
            let slot = index * ENTRIES_PER_BLOCK + i;
            let entry = block_reader.slice((i * ENTRY_SIZE) as u64, ENTRY_SIZE)?;

            let kind = match entry.read_u8(FILE_TYPE)? {
                TYPE_NONE => continue,
                TYPE_DATA => FileKind::Data,
                TYPE_GAME => FileKind::Game,
                _ => {
                    malformed_slots.push(slot);
                    continue;
                }
            };

            entries.push(DirectoryEntry {
                slot,
                format: CardFormat::Vmu,
                kind,
                game_code: String::new(),
                maker_code: String::new(),
                filename: entry.read_string(FILENAME, FILENAME_LEN)?,
                first_block: entry.read_u16(FIRST_BLOCK)?,
                block_count: entry.read_u16(SIZE_BLOCKS)?,
                permissions: entry.read_u8(COPY_PROTECT)?,
                copy_counter: 0,
                banner_flags: 0,
                icon_format: 0,
                modified: decode_bcd_timestamp(entry.read_bytes(TIMESTAMP, 8)?),
                image_offset: None,
                comment_offset: None,
                header_offset_blocks: entry.read_u16(HEADER_OFFSET)?,
                raw: entry.read_bytes(0, ENTRY_SIZE)?.to_vec(),
            });
        }
    }

    let lowest = root.directory_block + 1 - root.directory_size;
    log::debug!(
        "vmu directory: {} entries, {} malformed slots",
        entries.len(),
        malformed_slots.len()
    );

    Ok(DirectoryTable {
        id: TableId::A,
        region: Region::new(
            lowest as u64 * BLOCK_SIZE as u64,
            root.directory_size as usize * BLOCK_SIZE,
        ),
        update_counter: 0,
        checksum: None,
        malformed_slots,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{VmuFile, VmuImageBuilder};

    #[test]
    fn test_parse_entries() {
        let image = VmuImageBuilder::new()
            .file(VmuFile::data("SONICADV_SYS", 199, 3))
            .file(VmuFile::game("CHAO_ADV", 0, 20))
            .build_image();
        let root = VmuRoot::parse(&image).unwrap();
        let dir = parse(&image, &root).unwrap();

        assert!(dir.is_valid());
        assert_eq!(dir.entries.len(), 2);
        let data = &dir.entries[0];
        assert_eq!(data.kind, FileKind::Data);
        assert_eq!(data.game_id(), "SONICADV_SYS");
        assert_eq!((data.first_block, data.block_count), (199, 3));
        assert_eq!(dir.entries[1].kind, FileKind::Game);
        assert_eq!(dir.entries[1].header_offset_blocks, 1);
    }

    #[test]
    fn test_unknown_type_marks_table_invalid() {
        let mut bytes = VmuImageBuilder::new().build();
        bytes[253 * BLOCK_SIZE + 2 * ENTRY_SIZE] = 0x77;
        let image = CardImage::from_bytes("garbled", bytes);
        let root = VmuRoot::parse(&image).unwrap();
        let dir = parse(&image, &root).unwrap();
        assert_eq!(dir.malformed_slots, vec![2]);
        assert!(!dir.is_valid());
    }
}
