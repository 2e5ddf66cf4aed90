//! Builds [`FileEntry`] values from directory slots and from scan candidates.

use crate::checksum::ChecksumCheck;
use crate::database::SignatureDatabase;
use crate::image::CardImage;
use crate::matcher::{sha256_hash, Candidate};
use crate::model::{EntryMetadata, EntrySource, EntryValidity, FileEntry};
use crate::parser::ParseResult;
use crate::reader::decode_latin1;
use crate::signature::Signature;
use crate::tables::{DirectoryEntry, FileKind};
use crate::types::{CardFormat, TableId};
use crate::vmu::vms::{self, VmsHeader};

const COMMENT_LEN: usize = 32;
/// Banner sizes by format flag: CI8 with palette, RGB5A3
const BANNER_CI8_LEN: u32 = 96 * 32 + 0x200;
const BANNER_RGB_LEN: u32 = 96 * 32 * 2;

/// Files listed by the active directory, in slot order
pub fn directory_files(parsed: &ParseResult, database: &SignatureDatabase) -> Vec<FileEntry> {
    let directory = match parsed.active_directory() {
        Some(directory) => directory,
        None => return Vec::new(),
    };
    let table = parsed.active_block_table();

    directory
        .entries
        .iter()
        .map(|entry| {
            let (blocks, chain_ok) = match table.map(|t| t.chain(entry.first_block, Some(entry.block_count))) {
                Some(Ok(blocks)) => (blocks, true),
                Some(Err(reason)) => {
                    log::debug!("slot {}: chain broken ({}), guessing layout", entry.slot, reason.code());
                    (guessed_run(entry, parsed.block_count), false)
                }
                None => (guessed_run(entry, parsed.block_count), true),
            };
            directory_file(&parsed.image, directory.id, entry, blocks, chain_ok, database)
        })
        .collect()
}

/// Contiguous layout assumed when no usable chain exists
fn guessed_run(entry: &DirectoryEntry, block_count: usize) -> Vec<u16> {
    let descending = entry.format == CardFormat::Vmu && entry.kind == FileKind::Data;
    (0..entry.block_count)
        .map_while(|i| {
            if descending {
                entry.first_block.checked_sub(i)
            } else {
                entry.first_block.checked_add(i)
            }
        })
        .take_while(|&b| (b as usize) < block_count)
        .collect()
}

fn directory_file(
    image: &CardImage,
    table: TableId,
    entry: &DirectoryEntry,
    blocks: Vec<u16>,
    chain_ok: bool,
    database: &SignatureDatabase,
) -> FileEntry {
    let format = entry.format;
    let content = image.gather(format, &blocks).unwrap_or_else(|err| {
        log::debug!("slot {}: blocks unreadable ({}), no content", entry.slot, err);
        Vec::new()
    });
    let length = entry.block_count as usize * format.block_size();

    let checksum = match (format, entry.kind) {
        (CardFormat::Vmu, FileKind::Data) => {
            let at = entry.header_offset_blocks as usize * format.block_size();
            content.get(at..).and_then(vms::verify)
        }
        _ => database
            .for_game(&entry.game_id())
            .iter()
            .filter(|s| s.format == format)
            .find_map(|s| verify_with(s, &content)),
    };

    let validity = if !chain_ok || content.len() < length {
        EntryValidity::BrokenChain
    } else {
        validity_of(checksum, EntryValidity::Trusted)
    };

    let mut metadata = match format {
        CardFormat::Gcn => gcn_metadata(entry, &content),
        CardFormat::Vmu => vms_metadata(&content, entry.header_offset_blocks as usize * format.block_size()),
    };
    metadata.modified = entry.modified;
    metadata.mode = entry.permissions;
    metadata.kind = Some(entry.kind);

    FileEntry {
        format,
        source: EntrySource::Directory {
            slot: entry.slot,
            table,
        },
        game_id: entry.game_id(),
        filename: entry.filename.clone(),
        sha256: sha256_hash(&content[..length.min(content.len())]),
        blocks,
        length,
        checksum,
        validity,
        metadata,
        dentry: Some(entry.raw.clone()),
    }
}

/// Checksum of a directory file under a signature whose patterns match its first block
fn verify_with(signature: &Signature, content: &[u8]) -> Option<ChecksumCheck> {
    let head = content.get(..signature.format.block_size())?;
    if !signature.matches_head(head) {
        return None;
    }
    let length = signature.byte_length(head)?;
    signature.verify(content.get(..length)?)
}

fn validity_of(checksum: Option<ChecksumCheck>, unchecked: EntryValidity) -> EntryValidity {
    match checksum {
        Some(check) if check.is_valid() => EntryValidity::Verified,
        Some(_) => EntryValidity::ChecksumMismatch,
        None => unchecked,
    }
}

/// Entry for a save found by the block scan
pub fn recovered_file(format: CardFormat, candidate: Candidate) -> FileEntry {
    let signature = &candidate.signature;
    let content = &candidate.content[..candidate.length];

    let mut metadata = match format {
        CardFormat::Vmu => vms_metadata(content, 0),
        CardFormat::Gcn => EntryMetadata {
            title: None,
            description: None,
            comment_offset: signature.comment_offset,
            icon_offset: signature.icon_offset,
            banner_offset: signature.banner_offset,
            ..EntryMetadata::default()
        },
    };
    if let Some(offset) = signature.comment_offset {
        let (title, description) = comment_strings(content, offset as usize);
        metadata.title = title.or(metadata.title.take());
        metadata.description = description.or(metadata.description.take());
    }
    if format == CardFormat::Vmu {
        metadata.kind = Some(FileKind::Data);
    }
    if metadata.title.is_none() && !signature.title.is_empty() {
        metadata.title = Some(signature.title.clone());
    }

    FileEntry {
        format,
        source: EntrySource::Recovered {
            game_id: signature.game_id.clone(),
            title: signature.title.clone(),
        },
        game_id: signature.game_id.clone(),
        filename: signature.recovered_filename().to_string(),
        sha256: sha256_hash(content),
        length: candidate.length,
        checksum: Some(candidate.checksum),
        validity: validity_of(Some(candidate.checksum), EntryValidity::Verified),
        metadata,
        dentry: None,
        blocks: candidate.blocks,
    }
}

fn comment_strings(content: &[u8], offset: usize) -> (Option<String>, Option<String>) {
    let read = |at: Option<usize>| {
        let at = at?;
        content
            .get(at..at.checked_add(COMMENT_LEN)?)
            .map(decode_latin1)
            .filter(|s| !s.is_empty())
    };
    (read(Some(offset)), read(offset.checked_add(COMMENT_LEN)))
}

fn gcn_metadata(entry: &DirectoryEntry, content: &[u8]) -> EntryMetadata {
    let (title, description) = entry
        .comment_offset
        .map_or((None, None), |offset| comment_strings(content, offset as usize));

    let banner_len = match entry.banner_flags & 0x03 {
        1 => Some(BANNER_CI8_LEN),
        2 => Some(BANNER_RGB_LEN),
        _ => None,
    };
    let banner_offset = banner_len.and(entry.image_offset);
    // Icons follow the banner; an offset past u32 range means a damaged entry
    let icon_offset = entry
        .image_offset
        .and_then(|offset| offset.checked_add(banner_len.unwrap_or(0)));

    EntryMetadata {
        title,
        description,
        comment_offset: entry.comment_offset,
        icon_offset,
        banner_offset,
        ..EntryMetadata::default()
    }
}

fn vms_metadata(content: &[u8], header_at: usize) -> EntryMetadata {
    let header = match content.get(header_at..).map(VmsHeader::parse) {
        Some(Ok(header)) => header,
        _ => return EntryMetadata::default(),
    };
    EntryMetadata {
        title: Some(header.vm_description.clone()).filter(|s| !s.is_empty()),
        description: Some(header.dc_description.clone()).filter(|s| !s.is_empty()),
        icon_offset: (header.icon_count > 0).then(|| (header_at + vms::HEADER_LEN) as u32),
        ..EntryMetadata::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{
        signed_gcn_save, test_database, vms_file, GcnFile, GcnImageBuilder, VmuFile, VmuImageBuilder,
        TEST_GAME,
    };
    use crate::parser::parse;

    #[test]
    fn test_gcn_directory_file_verified_by_signature() {
        let image = GcnImageBuilder::new(4)
            .file(GcnFile::new(TEST_GAME, "testsave", 5, 2).with_data(signed_gcn_save(2, 9)))
            .file(GcnFile::new("GALE01", "SuperSmashBros", 7, 1))
            .build_image();
        let files = directory_files(&parse(&image, None), &test_database());

        assert_eq!(files.len(), 2);
        let save = &files[0];
        assert_eq!(save.source, EntrySource::Directory { slot: 0, table: TableId::A });
        assert_eq!(save.blocks, vec![5, 6]);
        assert_eq!(save.length, 0x4000);
        assert_eq!(save.validity, EntryValidity::Verified);
        assert_eq!(save.dentry.as_ref().map(Vec::len), Some(0x40));

        assert_eq!(files[1].validity, EntryValidity::Trusted);
        assert!(files[1].checksum.is_none());
    }

    #[test]
    fn test_gcn_directory_file_with_bad_checksum() {
        let mut save = signed_gcn_save(2, 9);
        save[0x1000] ^= 0xFF;
        let image = GcnImageBuilder::new(4)
            .file(GcnFile::new(TEST_GAME, "testsave", 5, 2).with_data(save))
            .build_image();
        let files = directory_files(&parse(&image, None), &test_database());
        assert_eq!(files[0].validity, EntryValidity::ChecksumMismatch);
    }

    #[test]
    fn test_broken_chain_falls_back_to_contiguous_guess() {
        let image = GcnImageBuilder::new(4)
            .file(GcnFile::new("GALE01", "SuperSmashBros", 5, 3))
            .file(GcnFile::new("GZLE01", "Zelda", 6, 1))
            .build_image();
        let files = directory_files(&parse(&image, None), &SignatureDatabase::new());
        assert_eq!(files[0].validity, EntryValidity::BrokenChain);
        assert_eq!(files[0].blocks, vec![5, 6, 7]);
    }

    #[test]
    fn test_vmu_data_file_crc_and_metadata() {
        let file = vms_file("SONIC ADV", 1, 0, 300);
        let image = VmuImageBuilder::new()
            .file(VmuFile::data("SONICADV_SYS", 199, 2).with_data(file))
            .build_image();
        let files = directory_files(&parse(&image, None), &SignatureDatabase::new());

        let entry = &files[0];
        assert_eq!(entry.blocks, vec![199, 198]);
        assert_eq!(entry.validity, EntryValidity::Verified);
        assert_eq!(entry.metadata.title.as_deref(), Some("SONIC ADV"));
        assert_eq!(entry.metadata.icon_offset, Some(0x80));
        assert_eq!(entry.metadata.kind, Some(FileKind::Data));
    }

    #[test]
    fn test_damaged_image_offset_drops_icon_offset() {
        let mut bytes = GcnImageBuilder::new(4)
            .file(GcnFile::new(TEST_GAME, "testsave", 5, 2).with_data(signed_gcn_save(2, 9)))
            .build();
        for block in [1usize, 2] {
            let dir = &mut bytes[block * 0x2000..(block + 1) * 0x2000];
            dir[0x07] = 0x02;
            dir[0x2C..0x30].copy_from_slice(&0xFFFF_FF00u32.to_be_bytes());
            crate::gcn::write_checksums(dir, 0..0x1FFC, 0x1FFC);
        }
        let image = CardImage::from_bytes("damaged", bytes);
        let files = directory_files(&parse(&image, None), &test_database());

        let metadata = &files[0].metadata;
        assert_eq!(metadata.banner_offset, Some(0xFFFF_FF00));
        assert_eq!(metadata.icon_offset, None);
        assert_eq!(files[0].validity, EntryValidity::Verified);
    }

    #[test]
    fn test_comment_offset_at_end_of_range() {
        let content = vec![b'A'; 0x40];
        assert_eq!(comment_strings(&content, usize::MAX), (None, None));
        let (title, description) = comment_strings(&content, 0x20);
        assert_eq!(title.as_deref(), Some("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"));
        assert_eq!(description, None);
    }

    #[test]
    fn test_no_active_directory_gives_no_files() {
        let mut bytes = GcnImageBuilder::new(4)
            .file(GcnFile::new("GALE01", "SuperSmashBros", 5, 3))
            .build();
        bytes[0x2000 + 0x10] ^= 0x01;
        bytes[0x4000 + 0x10] ^= 0x01;
        let image = CardImage::from_bytes("bad", bytes);
        assert!(directory_files(&parse(&image, None), &test_database()).is_empty());
    }
}
