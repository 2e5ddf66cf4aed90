//! The file list exposed to callers.

use crate::checksum::ChecksumCheck;
use crate::tables::FileKind;
use crate::types::{CardFormat, TableId};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Where an entry came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntrySource {
    /// Listed by the active directory table
    Directory { slot: usize, table: TableId },
    /// Found by a block scan
    Recovered { game_id: String, title: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryValidity {
    /// A checksum covering the content matched
    Verified,
    /// Listed by a valid directory, no content checksum known
    Trusted,
    ChecksumMismatch,
    /// The allocation chain did not match the directory; the blocks shown are a best guess
    BrokenChain,
}

/// Display metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntryMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Offset of the two 32-byte comment strings
    pub comment_offset: Option<u32>,
    pub icon_offset: Option<u32>,
    pub banner_offset: Option<u32>,
    pub modified: Option<NaiveDateTime>,
    /// GCN permission bits or VMU copy-protect byte
    pub mode: u8,
    pub kind: Option<FileKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub format: CardFormat,
    pub source: EntrySource,
    pub game_id: String,
    pub filename: String,
    /// Blocks in file order
    pub blocks: Vec<u16>,
    /// Declared length in bytes
    pub length: usize,
    pub checksum: Option<ChecksumCheck>,
    pub validity: EntryValidity,
    pub metadata: EntryMetadata,
    /// SHA-256 of the first `length` bytes
    pub sha256: String,
    /// Raw directory entry, when one exists
    #[serde(skip)]
    pub dentry: Option<Vec<u8>>,
}

impl FileEntry {
    pub fn start_block(&self) -> Option<u16> {
        self.blocks.first().copied()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_recovered(&self) -> bool {
        matches!(self.source, EntrySource::Recovered { .. })
    }
}

/// Trusted directory entries in slot order, then recovered entries by start block
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileList {
    entries: Vec<FileEntry>,
}

impl FileList {
    pub fn new(directory: Vec<FileEntry>, mut recovered: Vec<FileEntry>) -> Self {
        recovered.sort_by_key(|e| e.start_block());
        let mut entries = directory;
        entries.extend(recovered);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FileEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.entries.iter()
    }

    pub fn directory_entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| !e.is_recovered())
    }

    pub fn recovered_entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| e.is_recovered())
    }

    pub fn find(&self, game_id: &str) -> Option<&FileEntry> {
        self.entries.iter().find(|e| e.game_id == game_id)
    }

    pub fn into_vec(self) -> Vec<FileEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a FileList {
    type Item = &'a FileEntry;
    type IntoIter = std::slice::Iter<'a, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
