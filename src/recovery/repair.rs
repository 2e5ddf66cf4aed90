//! Rebuilds a consistent GCN image from its trusted system tables.

use crate::diagnosis::Diagnosis;
use crate::error::{RecoveryError, Result};
use crate::gcn::{self, header, BLOCK_SIZE, SYSTEM_BLOCKS};
use crate::parser::ParseResult;
use crate::tables::Selection;
use crate::types::{CardFormat, TableId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    CopiedDirectory { from: TableId, to: TableId },
    CopiedBlockTable { from: TableId, to: TableId },
    RewroteHeaderChecksum,
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub image: Vec<u8>,
    pub actions: Vec<RepairAction>,
}

/// Copy the active directory and block table over their twins.
///
/// A header with a bad checksum gets a fresh one unless it looks blank; a
/// blank header is left for the user to deal with.
pub fn repair(parsed: &ParseResult, diagnosis: &Diagnosis) -> Result<RepairOutcome> {
    if parsed.format != CardFormat::Gcn {
        return Err(RecoveryError::Unsupported(format!(
            "repair of {} cards",
            parsed.format
        )));
    }

    let mut image = parsed.image.bytes().to_vec();
    let system_len = SYSTEM_BLOCKS as usize * BLOCK_SIZE;
    if image.len() < system_len {
        return Err(RecoveryError::OutOfBounds {
            offset: 0,
            len: system_len as u64,
            image_size: image.len() as u64,
        });
    }

    let mut actions = Vec::new();

    let directory = active_of(parsed.directory_selection(), "directory")?;
    if copy_over(&mut image, gcn::directory_block(directory), gcn::directory_block(directory.twin())) {
        actions.push(RepairAction::CopiedDirectory {
            from: directory,
            to: directory.twin(),
        });
    }

    let table = active_of(parsed.block_table_selection(), "block table")?;
    if copy_over(&mut image, gcn::bat_block(table), gcn::bat_block(table.twin())) {
        actions.push(RepairAction::CopiedBlockTable {
            from: table,
            to: table.twin(),
        });
    }

    let header_bad = parsed.header.as_ref().map_or(false, |h| !h.is_valid());
    if header_bad && !diagnosis.has("header_looks_blank") {
        gcn::write_checksums(&mut image[..BLOCK_SIZE], 0..header::CHECKSUM, header::CHECKSUM);
        actions.push(RepairAction::RewroteHeaderChecksum);
    }

    for action in &actions {
        log::info!("repair: {:?}", action);
    }
    Ok(RepairOutcome { image, actions })
}

fn active_of(selection: Selection, what: &str) -> Result<TableId> {
    selection
        .table()
        .ok_or_else(|| RecoveryError::Repair(format!("no valid {what} copy")))
}

/// Returns whether anything changed
fn copy_over(image: &mut [u8], from: u16, to: u16) -> bool {
    let from = from as usize * BLOCK_SIZE;
    let to = to as usize * BLOCK_SIZE;
    if image[from..from + BLOCK_SIZE] == image[to..to + BLOCK_SIZE] {
        return false;
    }
    image.copy_within(from..from + BLOCK_SIZE, to);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::{classify, ClassifierConfig};
    use crate::fixtures::{GcnFile, GcnImageBuilder, VmuImageBuilder};
    use crate::image::CardImage;
    use crate::parser::parse;

    fn repair_bytes(bytes: Vec<u8>) -> Result<RepairOutcome> {
        let parsed = parse(&CardImage::from_bytes("card", bytes), None);
        let diagnosis = classify(&parsed, &ClassifierConfig::default());
        repair(&parsed, &diagnosis)
    }

    #[test]
    fn test_repair_copies_newer_directory_over_corrupt_one() {
        let mut bytes = GcnImageBuilder::new(4)
            .file(GcnFile::new("GALE01", "SuperSmashBros", 5, 3))
            .directory_counters(4, 5)
            .bat_counters(2, 2)
            .build();
        bytes[0x2000 + 0x100] ^= 0xFF;

        let outcome = repair_bytes(bytes).unwrap();
        assert_eq!(
            outcome.actions,
            vec![RepairAction::CopiedDirectory {
                from: TableId::B,
                to: TableId::A
            }]
        );

        let repaired = parse(&CardImage::from_bytes("repaired", outcome.image), None);
        let a = repaired.directories.get(TableId::A).unwrap();
        let b = repaired.directories.get(TableId::B).unwrap();
        assert!(a.is_valid() && b.is_valid());
        assert_eq!(
            repaired.image.bytes()[0x2000..0x4000],
            repaired.image.bytes()[0x4000..0x6000]
        );
        assert_eq!(a.entries[0].filename, "SuperSmashBros");
    }

    #[test]
    fn test_consistent_card_needs_nothing() {
        let mut bytes = GcnImageBuilder::new(4).build();
        // Make directory B an exact copy of A
        bytes.copy_within(0x2000..0x4000, 0x4000);
        let outcome = repair_bytes(bytes).unwrap();
        assert!(!outcome
            .actions
            .iter()
            .any(|a| matches!(a, RepairAction::CopiedDirectory { .. })));
    }

    #[test]
    fn test_header_checksum_rewritten() {
        let mut bytes = GcnImageBuilder::new(4).build();
        bytes[0x10] ^= 0x01;
        let outcome = repair_bytes(bytes).unwrap();
        assert!(outcome.actions.contains(&RepairAction::RewroteHeaderChecksum));

        let repaired = parse(&CardImage::from_bytes("repaired", outcome.image), None);
        assert!(repaired.header.unwrap().is_valid());
    }

    #[test]
    fn test_refuses_without_valid_copy() {
        let mut bytes = GcnImageBuilder::new(4).build();
        bytes[0x2000 + 0x10] ^= 0x01;
        bytes[0x4000 + 0x10] ^= 0x01;
        match repair_bytes(bytes) {
            Err(RecoveryError::Repair(reason)) => assert!(reason.contains("directory")),
            other => panic!("unexpected: {:?}", other.map(|o| o.actions)),
        }
    }

    #[test]
    fn test_vmu_is_unsupported() {
        let result = repair_bytes(VmuImageBuilder::new().build());
        assert!(matches!(result, Err(RecoveryError::Unsupported(_))));
    }
}
