//! Format detection and the combined parse of every card structure.

use crate::gcn;
use crate::image::CardImage;
use crate::tables::{BlockTable, CardHeader, DirectoryTable, Redundant, Selection, StructureError};
use crate::types::CardFormat;
use crate::vmu;
use std::ops::Range;

/// Everything the parser could decode from one image.
///
/// Each structure is decoded independently, so a truncated or damaged image
/// still yields whatever parts are readable.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub format: CardFormat,
    /// The caller chose the format instead of detection
    pub format_forced: bool,
    pub image: CardImage,
    pub block_count: usize,
    pub header: Result<CardHeader, StructureError>,
    pub directories: Redundant<DirectoryTable>,
    pub block_tables: Redundant<BlockTable>,
}

/// Guess the card family from size and the VMU root magic
pub fn detect_format(image: &CardImage) -> CardFormat {
    let size = image.len() as u64;
    if size == vmu::IMAGE_SIZE {
        return CardFormat::Vmu;
    }
    if size < gcn::MIN_IMAGE_SIZE {
        let magic_at = vmu::ROOT_BLOCK as usize * vmu::BLOCK_SIZE;
        let magic = image
            .bytes()
            .get(magic_at..magic_at + vmu::root::MAGIC.len());
        if magic == Some(&vmu::root::MAGIC[..]) {
            return CardFormat::Vmu;
        }
    }
    CardFormat::Gcn
}

pub fn parse(image: &CardImage, forced: Option<CardFormat>) -> ParseResult {
    let format = forced.unwrap_or_else(|| detect_format(image));
    let (header, directories, block_tables) = match format {
        CardFormat::Gcn => gcn::parse(image),
        CardFormat::Vmu => vmu::parse(image),
    };

    let result = ParseResult {
        format,
        format_forced: forced.is_some(),
        image: image.clone(),
        block_count: image.block_count(format),
        header,
        directories,
        block_tables,
    };
    log::debug!(
        "{}: parsed as {} ({} blocks), directory {:?}, block table {:?}",
        image.path(),
        format,
        result.block_count,
        result.directory_selection(),
        result.block_table_selection()
    );
    result
}

impl ParseResult {
    pub fn image_size(&self) -> u64 {
        self.image.len() as u64
    }

    pub fn directory_selection(&self) -> Selection {
        self.directories.selection()
    }

    pub fn block_table_selection(&self) -> Selection {
        self.block_tables.selection()
    }

    pub fn active_directory(&self) -> Option<&DirectoryTable> {
        self.directories.active()
    }

    pub fn active_block_table(&self) -> Option<&BlockTable> {
        self.block_tables.active()
    }

    pub fn vmu_root(&self) -> Option<&vmu::VmuRoot> {
        match &self.header {
            Ok(CardHeader::Vmu(root)) => Some(root),
            _ => None,
        }
    }

    /// Blocks that may hold file data.
    ///
    /// GCN covers every whole block after the system area, whatever the
    /// header declares. VMU covers the user area named by the root block.
    pub fn data_blocks(&self) -> Range<u16> {
        let available = self.block_count.min(u16::MAX as usize) as u16;
        match self.format {
            CardFormat::Gcn => gcn::SYSTEM_BLOCKS.min(available)..available,
            CardFormat::Vmu => {
                let user = self
                    .vmu_root()
                    .map_or(vmu::root::DEFAULT_USER_BLOCKS, |root| root.user_blocks);
                0..user.min(available)
            }
        }
    }
}
