//! Corruption classification.
//!
//! Turns a [`ParseResult`] into a list of language-neutral [`Condition`]s.
//! Nothing here aborts: every problem found is recorded and classification
//! carries on with whatever structures remain usable.

use crate::parser::ParseResult;
use crate::tables::{BlockTable, CardHeader, ChainError, DirectoryTable, Redundant, Selection, StructureError};
use crate::types::{CardFormat, TableId};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Classifier tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Share of the header field region taken by its most common byte above
    /// which the header is reported as blank
    pub blank_header_threshold: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            blank_header_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Structure named by an [`Condition::UnreadableStructure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "table")]
pub enum Structure {
    Header,
    Directory(TableId),
    BlockTable(TableId),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "code")]
pub enum Condition {
    ImageTooSmall { size: u64, minimum: u64 },
    ImageTooLarge { size: u64, maximum: u64 },
    SizeNotPowerOfTwo { size: u64 },
    SizeNotBlockAligned { size: u64, block_size: usize },
    UnreadableStructure { structure: Structure, error: StructureError },
    HeaderMagicInvalid,
    HeaderChecksumInvalid { expected: u32, calculated: u32 },
    HeaderLooksBlank { byte: u8, percent: u8 },
    HeaderSizeMismatch { declared: u64, actual: u64 },
    HeaderLayoutDefaulted,
    DirectoryInvalid { table: TableId },
    NoValidDirectory,
    DirectoryAmbiguous { identical: bool },
    BlockTableInvalid { table: TableId },
    NoValidBlockTable,
    BlockTableAmbiguous { identical: bool },
    FreeBlockCountMismatch { recorded: u16, counted: usize },
    BlockAccountingMismatch { directory_blocks: usize, allocated_blocks: usize },
    BrokenChain { slot: usize, reason: ChainError },
    CrossLinkedBlock { block: u16, slots: Vec<usize> },
    NoDatabasesFound,
}

impl Condition {
    pub fn code(&self) -> &'static str {
        match self {
            Condition::ImageTooSmall { .. } => "image_too_small",
            Condition::ImageTooLarge { .. } => "image_too_large",
            Condition::SizeNotPowerOfTwo { .. } => "size_not_power_of_two",
            Condition::SizeNotBlockAligned { .. } => "size_not_block_aligned",
            Condition::UnreadableStructure { .. } => "unreadable_structure",
            Condition::HeaderMagicInvalid => "header_magic_invalid",
            Condition::HeaderChecksumInvalid { .. } => "header_checksum_invalid",
            Condition::HeaderLooksBlank { .. } => "header_looks_blank",
            Condition::HeaderSizeMismatch { .. } => "header_size_mismatch",
            Condition::HeaderLayoutDefaulted => "header_layout_defaulted",
            Condition::DirectoryInvalid { .. } => "directory_invalid",
            Condition::NoValidDirectory => "no_valid_directory",
            Condition::DirectoryAmbiguous { .. } => "directory_ambiguous",
            Condition::BlockTableInvalid { .. } => "block_table_invalid",
            Condition::NoValidBlockTable => "no_valid_block_table",
            Condition::BlockTableAmbiguous { .. } => "block_table_ambiguous",
            Condition::FreeBlockCountMismatch { .. } => "free_block_count_mismatch",
            Condition::BlockAccountingMismatch { .. } => "block_accounting_mismatch",
            Condition::BrokenChain { .. } => "broken_chain",
            Condition::CrossLinkedBlock { .. } => "cross_linked_block",
            Condition::NoDatabasesFound => "no_databases_found",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Condition::DirectoryAmbiguous { identical: true }
            | Condition::BlockTableAmbiguous { identical: true }
            | Condition::NoDatabasesFound => Severity::Info,
            Condition::ImageTooSmall { .. }
            | Condition::ImageTooLarge { .. }
            | Condition::UnreadableStructure { .. }
            | Condition::HeaderMagicInvalid
            | Condition::NoValidDirectory
            | Condition::NoValidBlockTable
            | Condition::CrossLinkedBlock { .. } => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

/// Result of classifying one card
#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub format: CardFormat,
    pub image_size: u64,
    pub directory: Selection,
    pub block_table: Selection,
    /// Files listed by the active directory can be trusted
    pub directory_usable: bool,
    pub conditions: Vec<Condition>,
}

impl Diagnosis {
    pub fn has(&self, code: &str) -> bool {
        self.conditions.iter().any(|c| c.code() == code)
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.conditions.iter().map(Condition::severity).max()
    }

    /// No warnings or errors
    pub fn is_clean(&self) -> bool {
        self.worst_severity().map_or(true, |s| s == Severity::Info)
    }
}

pub fn classify(parsed: &ParseResult, config: &ClassifierConfig) -> Diagnosis {
    let mut conditions = Vec::new();

    check_size(parsed, &mut conditions);
    check_header(parsed, config, &mut conditions);
    check_tables(
        parsed,
        &parsed.directories,
        Structure::Directory,
        |table| Condition::DirectoryInvalid { table },
        Condition::NoValidDirectory,
        |identical| Condition::DirectoryAmbiguous { identical },
        &mut conditions,
    );
    check_tables(
        parsed,
        &parsed.block_tables,
        Structure::BlockTable,
        |table| Condition::BlockTableInvalid { table },
        Condition::NoValidBlockTable,
        |identical| Condition::BlockTableAmbiguous { identical },
        &mut conditions,
    );
    check_accounting(parsed, &mut conditions);

    let directory = parsed.directory_selection();
    let diagnosis = Diagnosis {
        format: parsed.format,
        image_size: parsed.image_size(),
        directory,
        block_table: parsed.block_table_selection(),
        directory_usable: directory != Selection::BothInvalid,
        conditions,
    };

    for condition in &diagnosis.conditions {
        if condition.severity() >= Severity::Warning {
            log::warn!("{}: {}", parsed.image.path(), condition.code());
        }
    }
    diagnosis
}

fn check_size(parsed: &ParseResult, out: &mut Vec<Condition>) {
    let size = parsed.image_size();
    let format = parsed.format;

    if size < format.min_image_size() {
        out.push(Condition::ImageTooSmall {
            size,
            minimum: format.min_image_size(),
        });
    }
    if size > format.max_image_size() {
        out.push(Condition::ImageTooLarge {
            size,
            maximum: format.max_image_size(),
        });
    }
    if !size.is_power_of_two() {
        out.push(Condition::SizeNotPowerOfTwo { size });
    }
    if size % format.block_size() as u64 != 0 {
        out.push(Condition::SizeNotBlockAligned {
            size,
            block_size: format.block_size(),
        });
    }
}

fn check_header(parsed: &ParseResult, config: &ClassifierConfig, out: &mut Vec<Condition>) {
    let header = match &parsed.header {
        Ok(header) => header,
        Err(error) => {
            out.push(Condition::UnreadableStructure {
                structure: Structure::Header,
                error: error.clone(),
            });
            return;
        }
    };

    match header {
        CardHeader::Gcn(gcn) => {
            if !gcn.checksum.is_valid() {
                out.push(Condition::HeaderChecksumInvalid {
                    expected: gcn.checksum.expected,
                    calculated: gcn.checksum.calculated,
                });
            } else if gcn.declared_size() != parsed.image_size() {
                out.push(Condition::HeaderSizeMismatch {
                    declared: gcn.declared_size(),
                    actual: parsed.image_size(),
                });
            }
        }
        CardHeader::Vmu(root) => {
            if !root.magic_ok {
                out.push(Condition::HeaderMagicInvalid);
            }
            if root.layout_defaulted {
                out.push(Condition::HeaderLayoutDefaulted);
            }
        }
    }

    let region = header.field_region();
    if let Some(bytes) = parsed.image.bytes().get(region.range()) {
        if let Some((byte, share)) = dominant_byte(bytes) {
            if share > config.blank_header_threshold {
                out.push(Condition::HeaderLooksBlank {
                    byte,
                    percent: (share * 100.0).round() as u8,
                });
            }
        }
    }
}

/// Most common byte and its share of `bytes`
fn dominant_byte(bytes: &[u8]) -> Option<(u8, f32)> {
    if bytes.is_empty() {
        return None;
    }
    let mut histogram = [0usize; 256];
    for &b in bytes {
        histogram[b as usize] += 1;
    }
    let (byte, count) = histogram
        .iter()
        .enumerate()
        .max_by_key(|&(byte, &count)| (count, std::cmp::Reverse(byte)))?;
    Some((byte as u8, *count as f32 / bytes.len() as f32))
}

trait TableRegion {
    fn region_bytes<'a>(&self, image: &'a [u8]) -> Option<&'a [u8]>;
    fn valid(&self) -> bool;
}

impl TableRegion for DirectoryTable {
    fn region_bytes<'a>(&self, image: &'a [u8]) -> Option<&'a [u8]> {
        image.get(self.region.range())
    }

    fn valid(&self) -> bool {
        self.is_valid()
    }
}

impl TableRegion for BlockTable {
    fn region_bytes<'a>(&self, image: &'a [u8]) -> Option<&'a [u8]> {
        image.get(self.region.range())
    }

    fn valid(&self) -> bool {
        self.is_valid()
    }
}

fn check_tables<T: TableRegion>(
    parsed: &ParseResult,
    pair: &Redundant<T>,
    structure: fn(TableId) -> Structure,
    invalid: fn(TableId) -> Condition,
    none_valid: Condition,
    ambiguous: fn(bool) -> Condition,
    out: &mut Vec<Condition>,
) where
    Redundant<T>: SelectionOf,
{
    let ids: &[TableId] = if pair.is_redundant() {
        &[TableId::A, TableId::B]
    } else {
        &[TableId::A]
    };

    for &id in ids {
        if let Some(error) = pair.error(id) {
            out.push(Condition::UnreadableStructure {
                structure: structure(id),
                error: error.clone(),
            });
        } else if let Some(table) = pair.get(id) {
            if !table.valid() {
                out.push(invalid(id));
            }
        }
    }

    match pair.selection_of() {
        Selection::BothInvalid => out.push(none_valid),
        Selection::Ambiguous => {
            let image = parsed.image.bytes();
            let a = pair.get(TableId::A).and_then(|t| t.region_bytes(image));
            let b = pair.get(TableId::B).and_then(|t| t.region_bytes(image));
            out.push(ambiguous(a.is_some() && a == b));
        }
        Selection::A | Selection::B => {}
    }
}

/// Bridges the selection rule, implemented per table type, into the generic check
trait SelectionOf {
    fn selection_of(&self) -> Selection;
}

impl SelectionOf for Redundant<DirectoryTable> {
    fn selection_of(&self) -> Selection {
        self.selection()
    }
}

impl SelectionOf for Redundant<BlockTable> {
    fn selection_of(&self) -> Selection {
        self.selection()
    }
}

fn check_accounting(parsed: &ParseResult, out: &mut Vec<Condition>) {
    let table = match parsed.active_block_table() {
        Some(table) => table,
        None => return,
    };

    if let Some(recorded) = table.free_recorded {
        let counted = table.free_count();
        if recorded as usize != counted {
            out.push(Condition::FreeBlockCountMismatch { recorded, counted });
        }
    }

    let directory = match parsed.active_directory() {
        Some(directory) => directory,
        None => return,
    };

    let directory_blocks = directory.claimed_blocks();
    let allocated_blocks = table.used_count();
    if directory_blocks != allocated_blocks {
        out.push(Condition::BlockAccountingMismatch {
            directory_blocks,
            allocated_blocks,
        });
    }

    let mut owners: AHashMap<u16, Vec<usize>> = AHashMap::new();
    for entry in &directory.entries {
        match table.chain(entry.first_block, Some(entry.block_count)) {
            Ok(blocks) => {
                for block in blocks {
                    owners.entry(block).or_default().push(entry.slot);
                }
            }
            Err(reason) => out.push(Condition::BrokenChain {
                slot: entry.slot,
                reason,
            }),
        }
    }

    let mut shared: Vec<(u16, Vec<usize>)> = owners
        .into_iter()
        .filter(|(_, slots)| slots.len() > 1)
        .collect();
    shared.sort_by_key(|(block, _)| *block);
    out.extend(
        shared
            .into_iter()
            .map(|(block, slots)| Condition::CrossLinkedBlock { block, slots }),
    );
}
