use crate::error::Result;
use crate::image::CardImage;
use crate::tables::{BlockState, BlockTable, Region};
use crate::types::{CardFormat, TableId};

use super::{VmuRoot, BLOCK_COUNT, BLOCK_SIZE, ROOT_BLOCK};

pub const FREE: u16 = 0xFFFC;
pub const LAST: u16 = 0xFFFA;

pub fn parse(image: &CardImage, root: &VmuRoot) -> Result<BlockTable> {
    let offset = root.fat_block as u64 * BLOCK_SIZE as u64;
    let reader = image.reader(CardFormat::Vmu).slice(offset, BLOCK_SIZE)?;

    let mut raw = Vec::with_capacity(BLOCK_COUNT);
    for block in 0..BLOCK_COUNT as u64 {
        raw.push(reader.read_u16(block * 2)?);
    }

    let structurally_valid = system_chains_intact(&raw, root);
    let data_end = root.user_blocks;
    let states = raw
        .iter()
        .enumerate()
        .map(|(block, &value)| {
            if block >= data_end as usize {
                BlockState::Reserved
            } else {
                decode(value)
            }
        })
        .collect();

    log::debug!(
        "vmu fat at block {}: system chains {}",
        root.fat_block,
        if structurally_valid { "intact" } else { "damaged" }
    );

    Ok(BlockTable {
        id: TableId::A,
        region: Region::new(offset, BLOCK_SIZE),
        update_counter: 0,
        checksum: None,
        free_recorded: None,
        last_allocated: None,
        structurally_valid,
        data_start: 0,
        data_end,
        states,
    })
}

fn decode(value: u16) -> BlockState {
    match value {
        FREE => BlockState::Free,
        LAST => BlockState::Last,
        next if (next as usize) < BLOCK_COUNT => BlockState::Next(next),
        other => BlockState::Invalid(other),
    }
}

/// Root, FAT and directory must each be chained the way the firmware lays them out
fn system_chains_intact(raw: &[u16], root: &VmuRoot) -> bool {
    if raw[ROOT_BLOCK as usize] != LAST || raw[root.fat_block as usize] != LAST {
        return false;
    }
    let blocks: Vec<u16> = root.directory_blocks().collect();
    blocks.iter().enumerate().all(|(i, &block)| {
        let expected = blocks.get(i + 1).copied().unwrap_or(LAST);
        raw[block as usize] == expected
    })
}
