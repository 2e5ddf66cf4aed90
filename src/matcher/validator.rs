use crate::types::CardFormat;
use ahash::AHashSet;
use std::ops::Range;

/// Whole blocks needed to hold `len` bytes
#[inline]
pub fn blocks_for(len: usize, block_size: usize) -> usize {
    (len + block_size - 1) / block_size
}

/// Blocks a lost file starting at `start` would occupy.
///
/// GCN saves are rebuilt as an ascending run, VMU data files as a descending
/// one (the firmware allocates them from the top of the user area down).
/// Returns `None` if the run leaves `area` or touches an occupied block.
pub fn block_run(
    format: CardFormat,
    start: u16,
    count: usize,
    area: &Range<u16>,
    occupied: &AHashSet<u16>,
) -> Option<Vec<u16>> {
    if count == 0 || count > area.len() || !area.contains(&start) {
        return None;
    }

    let count = count as u16;
    let blocks: Vec<u16> = match format {
        CardFormat::Gcn => {
            let end = start.checked_add(count)?;
            if end > area.end {
                return None;
            }
            (start..end).collect()
        }
        CardFormat::Vmu => {
            let last = (start + 1).checked_sub(count)?;
            if last < area.start {
                return None;
            }
            (last..=start).rev().collect()
        }
    };

    if blocks.iter().any(|b| occupied.contains(b)) {
        return None;
    }
    Some(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_for() {
        assert_eq!(blocks_for(1, 0x2000), 1);
        assert_eq!(blocks_for(0x2000, 0x2000), 1);
        assert_eq!(blocks_for(0x2001, 0x2000), 2);
        assert_eq!(blocks_for(0, 0x200), 0);
    }

    #[test]
    fn test_gcn_run_ascending() {
        let free = AHashSet::new();
        assert_eq!(block_run(CardFormat::Gcn, 10, 3, &(5..64), &free), Some(vec![10, 11, 12]));
        assert_eq!(block_run(CardFormat::Gcn, 62, 2, &(5..64), &free), Some(vec![62, 63]));
        assert_eq!(block_run(CardFormat::Gcn, 63, 2, &(5..64), &free), None);
        assert_eq!(block_run(CardFormat::Gcn, 4, 1, &(5..64), &free), None);
        assert_eq!(block_run(CardFormat::Gcn, 10, 0, &(5..64), &free), None);
    }

    #[test]
    fn test_vmu_run_descending() {
        let free = AHashSet::new();
        assert_eq!(block_run(CardFormat::Vmu, 199, 3, &(0..200), &free), Some(vec![199, 198, 197]));
        assert_eq!(block_run(CardFormat::Vmu, 1, 2, &(0..200), &free), Some(vec![1, 0]));
        assert_eq!(block_run(CardFormat::Vmu, 1, 3, &(0..200), &free), None);
    }

    #[test]
    fn test_run_avoids_occupied_blocks() {
        let occupied: AHashSet<u16> = [11].into_iter().collect();
        assert_eq!(block_run(CardFormat::Gcn, 10, 3, &(5..64), &occupied), None);
        assert_eq!(block_run(CardFormat::Gcn, 12, 3, &(5..64), &occupied), Some(vec![12, 13, 14]));
    }
}
