//! Format-neutral view of card structures: headers, directory tables and
//! block-allocation tables, plus the redundant-pair selection rule.

use crate::checksum::ChecksumCheck;
use crate::error::RecoveryError;
use crate::gcn::GcnHeader;
use crate::types::{CardFormat, TableId};
use crate::vmu::VmuRoot;
use ahash::AHashSet;
use chrono::NaiveDateTime;
use serde::Serialize;

/// Why a structure could not be decoded at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StructureError {
    OutOfBounds { offset: u64, len: u64, image_size: u64 },
    Malformed { reason: String },
}

impl From<RecoveryError> for StructureError {
    fn from(err: RecoveryError) -> Self {
        match err {
            RecoveryError::OutOfBounds {
                offset,
                len,
                image_size,
            } => StructureError::OutOfBounds {
                offset,
                len,
                image_size,
            },
            other => StructureError::Malformed {
                reason: other.to_string(),
            },
        }
    }
}

/// Byte range of a structure inside the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub offset: u64,
    pub len: usize,
}

impl Region {
    pub fn new(offset: u64, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset as usize..self.offset as usize + self.len
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum CardHeader {
    Gcn(GcnHeader),
    Vmu(VmuRoot),
}

impl CardHeader {
    pub fn checksum(&self) -> Option<ChecksumCheck> {
        match self {
            CardHeader::Gcn(header) => Some(header.checksum),
            CardHeader::Vmu(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            CardHeader::Gcn(header) => header.checksum.is_valid(),
            CardHeader::Vmu(root) => root.magic_ok,
        }
    }

    /// Region holding the header's meaningful fields (used for the blank check)
    pub fn field_region(&self) -> Region {
        match self {
            CardHeader::Gcn(_) => crate::gcn::header::FIELD_REGION,
            CardHeader::Vmu(_) => crate::vmu::root::field_region(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// GCN save file
    Standard,
    /// VMU data file
    Data,
    /// VMU mini-game
    Game,
}

/// One occupied directory slot
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryEntry {
    pub slot: usize,
    pub format: CardFormat,
    pub kind: FileKind,
    pub game_code: String,
    pub maker_code: String,
    pub filename: String,
    pub first_block: u16,
    pub block_count: u16,
    /// GCN permission bits or VMU copy-protect byte
    pub permissions: u8,
    pub copy_counter: u8,
    pub banner_flags: u8,
    pub icon_format: u16,
    pub modified: Option<NaiveDateTime>,
    pub image_offset: Option<u32>,
    pub comment_offset: Option<u32>,
    /// VMU: block offset of the VMS header within the file
    pub header_offset_blocks: u16,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl DirectoryEntry {
    /// Key used to look up signatures: game + maker code on GCN, filename on VMU
    pub fn game_id(&self) -> String {
        match self.format {
            CardFormat::Gcn => format!("{}{}", self.game_code, self.maker_code),
            CardFormat::Vmu => self.filename.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryTable {
    pub id: TableId,
    pub region: Region,
    pub update_counter: u16,
    pub checksum: Option<ChecksumCheck>,
    /// Slots whose contents do not decode as an entry
    pub malformed_slots: Vec<usize>,
    pub entries: Vec<DirectoryEntry>,
}

impl DirectoryTable {
    pub fn is_valid(&self) -> bool {
        match self.checksum {
            Some(check) => check.is_valid(),
            None => self.malformed_slots.is_empty(),
        }
    }

    pub fn status(&self) -> TableStatus {
        TableStatus {
            valid: self.is_valid(),
            update_counter: self.update_counter,
        }
    }

    /// Total blocks claimed by all entries
    pub fn claimed_blocks(&self) -> usize {
        self.entries.iter().map(|e| e.block_count as usize).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "value")]
pub enum BlockState {
    Free,
    Last,
    Next(u16),
    /// System area, not available to files
    Reserved,
    /// Link value that points outside the card
    Invalid(u16),
}

impl BlockState {
    pub fn is_used(&self) -> bool {
        matches!(
            self,
            BlockState::Last | BlockState::Next(_) | BlockState::Invalid(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ChainError {
    StartOutOfRange { block: u16 },
    FreeBlock { block: u16 },
    Loop { block: u16 },
    InvalidLink { block: u16, value: u16 },
    LengthMismatch { expected: u16, actual: u16 },
}

impl ChainError {
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::StartOutOfRange { .. } => "start_out_of_range",
            ChainError::FreeBlock { .. } => "free_block",
            ChainError::Loop { .. } => "loop",
            ChainError::InvalidLink { .. } => "invalid_link",
            ChainError::LengthMismatch { .. } => "length_mismatch",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockTable {
    pub id: TableId,
    pub region: Region,
    pub update_counter: u16,
    pub checksum: Option<ChecksumCheck>,
    pub free_recorded: Option<u16>,
    pub last_allocated: Option<u16>,
    /// Used when the table has no checksum (VMU FAT system chains)
    pub structurally_valid: bool,
    /// First block available to files
    pub data_start: u16,
    /// One past the last block available to files
    pub data_end: u16,
    /// Indexed by absolute block number
    pub states: Vec<BlockState>,
}

impl BlockTable {
    pub fn is_valid(&self) -> bool {
        match self.checksum {
            Some(check) => check.is_valid(),
            None => self.structurally_valid,
        }
    }

    pub fn status(&self) -> TableStatus {
        TableStatus {
            valid: self.is_valid(),
            update_counter: self.update_counter,
        }
    }

    pub fn state(&self, block: u16) -> Option<BlockState> {
        self.states.get(block as usize).copied()
    }

    pub fn is_used(&self, block: u16) -> bool {
        self.state(block).map_or(false, |s| s.is_used())
    }

    pub fn data_blocks(&self) -> std::ops::Range<u16> {
        self.data_start..self.data_end
    }

    pub fn free_count(&self) -> usize {
        self.data_blocks()
            .filter(|&b| matches!(self.state(b), Some(BlockState::Free)))
            .count()
    }

    pub fn used_count(&self) -> usize {
        self.data_blocks().filter(|&b| self.is_used(b)).count()
    }

    /// Follow the allocation chain starting at `start`.
    ///
    /// With `expected` set, the chain must be exactly that many blocks long.
    pub fn chain(&self, start: u16, expected: Option<u16>) -> Result<Vec<u16>, ChainError> {
        if !self.data_blocks().contains(&start) {
            return Err(ChainError::StartOutOfRange { block: start });
        }

        let mut chain = Vec::new();
        let mut visited = AHashSet::new();
        let mut block = start;
        loop {
            if !visited.insert(block) {
                return Err(ChainError::Loop { block });
            }
            chain.push(block);
            if let Some(limit) = expected {
                if chain.len() > limit as usize {
                    return Err(ChainError::LengthMismatch {
                        expected: limit,
                        actual: chain.len() as u16,
                    });
                }
            }

            match self.state(block) {
                Some(BlockState::Last) => break,
                Some(BlockState::Next(next)) if self.data_blocks().contains(&next) => {
                    block = next;
                }
                Some(BlockState::Next(next)) | Some(BlockState::Invalid(next)) => {
                    return Err(ChainError::InvalidLink { block, value: next });
                }
                Some(BlockState::Free) | Some(BlockState::Reserved) | None => {
                    return Err(ChainError::FreeBlock { block });
                }
            }
        }

        if let Some(expected) = expected {
            if chain.len() != expected as usize {
                return Err(ChainError::LengthMismatch {
                    expected,
                    actual: chain.len() as u16,
                });
            }
        }
        Ok(chain)
    }
}

/// What the selection rule needs to know about one table copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableStatus {
    pub valid: bool,
    pub update_counter: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    A,
    B,
    /// Both valid with equal update counters
    Ambiguous,
    BothInvalid,
}

impl Selection {
    /// Table whose contents are exposed; A stands in for an ambiguous pair
    pub fn table(&self) -> Option<TableId> {
        match self {
            Selection::A | Selection::Ambiguous => Some(TableId::A),
            Selection::B => Some(TableId::B),
            Selection::BothInvalid => None,
        }
    }
}

/// Pick the authoritative copy of a redundant table.
///
/// Only checksum-valid copies are candidates. Of two candidates the strictly
/// higher update counter wins; equal counters are reported as ambiguous.
/// A missing copy (unreadable, or absent on single-table formats) counts as invalid.
pub fn select_active(a: Option<TableStatus>, b: Option<TableStatus>) -> Selection {
    let a = a.filter(|s| s.valid);
    let b = b.filter(|s| s.valid);
    match (a, b) {
        (Some(a), Some(b)) => match a.update_counter.cmp(&b.update_counter) {
            std::cmp::Ordering::Greater => Selection::A,
            std::cmp::Ordering::Less => Selection::B,
            std::cmp::Ordering::Equal => Selection::Ambiguous,
        },
        (Some(_), None) => Selection::A,
        (None, Some(_)) => Selection::B,
        (None, None) => Selection::BothInvalid,
    }
}

/// A redundant A/B pair; `b` is `None` on formats with a single copy
#[derive(Debug, Clone, Serialize)]
pub struct Redundant<T> {
    pub a: Result<T, StructureError>,
    pub b: Option<Result<T, StructureError>>,
}

impl<T> Redundant<T> {
    pub fn single(a: Result<T, StructureError>) -> Self {
        Self { a, b: None }
    }

    pub fn pair(a: Result<T, StructureError>, b: Result<T, StructureError>) -> Self {
        Self { a, b: Some(b) }
    }

    pub fn get(&self, id: TableId) -> Option<&T> {
        match id {
            TableId::A => self.a.as_ref().ok(),
            TableId::B => self.b.as_ref().and_then(|b| b.as_ref().ok()),
        }
    }

    pub fn error(&self, id: TableId) -> Option<&StructureError> {
        match id {
            TableId::A => self.a.as_ref().err(),
            TableId::B => self.b.as_ref().and_then(|b| b.as_ref().err()),
        }
    }

    pub fn is_redundant(&self) -> bool {
        self.b.is_some()
    }
}

macro_rules! impl_selection {
    ($table:ty) => {
        impl Redundant<$table> {
            pub fn selection(&self) -> Selection {
                select_active(
                    self.get(TableId::A).map(|t| t.status()),
                    self.get(TableId::B).map(|t| t.status()),
                )
            }

            pub fn active(&self) -> Option<&$table> {
                self.selection().table().and_then(|id| self.get(id))
            }
        }
    };
}

impl_selection!(DirectoryTable);
impl_selection!(BlockTable);
