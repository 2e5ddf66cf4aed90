use crate::checksum::{gcn_checksums, ChecksumAlgorithm, ChecksumCheck};
use crate::error::Result;
use crate::image::CardImage;
use crate::tables::{BlockState, BlockTable, Region};
use crate::types::{CardFormat, TableId};

use super::{bat_block, BLOCK_SIZE, SYSTEM_BLOCKS};

pub const CHECKSUM: u64 = 0x00;
pub const UPDATE_COUNTER: u64 = 0x04;
pub const FREE_BLOCKS: u64 = 0x06;
pub const LAST_ALLOCATED: u64 = 0x08;
pub const MAP: u64 = 0x0A;
/// Checksum covers the counter through the end of the block
pub const COVERED_START: usize = 0x04;
pub const MAP_ENTRIES: usize = 0xFFB;

pub const FREE: u16 = 0x0000;
pub const LAST: u16 = 0xFFFF;

/// Parse one block allocation table for a card of `block_count` blocks
pub fn parse(image: &CardImage, id: TableId, block_count: usize) -> Result<BlockTable> {
    let offset = bat_block(id) as u64 * BLOCK_SIZE as u64;
    let reader = image.reader(CardFormat::Gcn).slice(offset, BLOCK_SIZE)?;

    let (sum, inverse) = gcn_checksums(reader.read_bytes(COVERED_START as u64, BLOCK_SIZE - COVERED_START)?);
    let stored_sum = reader.read_u16(CHECKSUM)?;
    let stored_inverse = reader.read_u16(CHECKSUM + 2)?;
    let checksum = ChecksumCheck::new(
        ChecksumAlgorithm::GcnDual,
        (stored_sum as u32) << 16 | stored_inverse as u32,
        (sum as u32) << 16 | inverse as u32,
    );

    let data_end = block_count
        .min(SYSTEM_BLOCKS as usize + MAP_ENTRIES)
        .max(SYSTEM_BLOCKS as usize) as u16;

    let mut states = vec![BlockState::Reserved; SYSTEM_BLOCKS as usize];
    for block in SYSTEM_BLOCKS..data_end {
        let index = (block - SYSTEM_BLOCKS) as u64;
        let value = reader.read_u16(MAP + index * 2)?;
        states.push(decode(value, data_end));
    }

    let table = BlockTable {
        id,
        region: Region::new(offset, BLOCK_SIZE),
        update_counter: reader.read_u16(UPDATE_COUNTER)?,
        checksum: Some(checksum),
        free_recorded: Some(reader.read_u16(FREE_BLOCKS)?),
        last_allocated: Some(reader.read_u16(LAST_ALLOCATED)?),
        structurally_valid: true,
        data_start: SYSTEM_BLOCKS,
        data_end,
        states,
    };
    log::debug!(
        "gcn block table {}: counter {}, {} free recorded, {} free counted, checksum {}",
        id,
        table.update_counter,
        table.free_recorded.unwrap_or_default(),
        table.free_count(),
        if checksum.is_valid() { "ok" } else { "bad" }
    );
    Ok(table)
}

fn decode(value: u16, data_end: u16) -> BlockState {
    match value {
        FREE => BlockState::Free,
        LAST => BlockState::Last,
        next if (SYSTEM_BLOCKS..data_end).contains(&next) => BlockState::Next(next),
        other => BlockState::Invalid(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{GcnFile, GcnImageBuilder};

    #[test]
    fn test_parse_allocation_chain() {
        let image = GcnImageBuilder::new(4)
            .file(GcnFile::new("GALE01", "melee", 5, 3))
            .build_image();
        let bat = parse(&image, TableId::A, image.block_count(CardFormat::Gcn)).unwrap();

        assert!(bat.is_valid());
        assert_eq!(bat.data_blocks(), 5..64);
        assert_eq!(bat.state(5), Some(BlockState::Next(6)));
        assert_eq!(bat.state(7), Some(BlockState::Last));
        assert_eq!(bat.state(8), Some(BlockState::Free));
        assert_eq!(bat.state(2), Some(BlockState::Reserved));
        assert_eq!(bat.free_recorded, Some(56));
        assert_eq!(bat.free_count(), 56);
        assert_eq!(bat.chain(5, Some(3)).unwrap(), vec![5, 6, 7]);
    }

    #[test]
    fn test_out_of_range_link_is_invalid() {
        assert_eq!(decode(0x0800, 64), BlockState::Invalid(0x0800));
        assert_eq!(decode(3, 64), BlockState::Invalid(3));
        assert_eq!(decode(63, 64), BlockState::Next(63));
    }
}
