//! Save-file signatures.
//!
//! A signature is pure data: byte patterns that identify the first block of a
//! save, a rule giving its length, and a rule locating and verifying its
//! checksum. The scanner never contains per-title code.

use crate::checksum::{compute, ChecksumAlgorithm, ChecksumCheck};
use crate::gcn::directory::is_valid_game_id;
use crate::reader::BinaryReader;
use crate::types::{CardFormat, Endian};
use crate::vmu::vms::VmsHeader;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Bytes expected at a fixed offset from the start of a save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PatternRepr", into = "PatternRepr")]
pub struct Pattern {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

/// On-disk form of a [`Pattern`]: exactly one of `hex` or `ascii`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PatternRepr {
    offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ascii: Option<String>,
}

impl TryFrom<PatternRepr> for Pattern {
    type Error = String;

    fn try_from(repr: PatternRepr) -> Result<Self, Self::Error> {
        let bytes = match (repr.hex, repr.ascii) {
            (Some(hex), None) => {
                let compact: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
                hex::decode(&compact).map_err(|e| format!("bad hex pattern '{hex}': {e}"))?
            }
            (None, Some(ascii)) => ascii.into_bytes(),
            _ => return Err("a pattern needs exactly one of 'hex' or 'ascii'".to_string()),
        };
        if bytes.is_empty() {
            return Err("empty pattern".to_string());
        }
        Ok(Pattern {
            offset: repr.offset,
            bytes,
        })
    }
}

impl From<Pattern> for PatternRepr {
    fn from(pattern: Pattern) -> Self {
        let ascii = pattern.bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ');
        PatternRepr {
            offset: pattern.offset,
            hex: (!ascii).then(|| hex::encode(&pattern.bytes)),
            ascii: ascii.then(|| String::from_utf8_lossy(&pattern.bytes).into_owned()),
        }
    }
}

impl Pattern {
    pub fn matches(&self, head: &[u8]) -> bool {
        self.end()
            .and_then(|end| head.get(self.offset..end))
            .map_or(false, |found| found == &self.bytes[..])
    }

    /// `None` when the pattern's end does not fit in `usize`
    pub fn end(&self) -> Option<usize> {
        self.offset.checked_add(self.bytes.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    Bytes,
    Blocks,
}

fn default_scale() -> u32 {
    1
}

fn default_unit() -> LengthUnit {
    LengthUnit::Bytes
}

/// How long a save is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LengthRule {
    /// Always this many blocks
    Fixed { blocks: u16 },
    /// Always this many bytes
    Bytes { bytes: u32 },
    /// Read from a field in the first block: `value * scale + add`
    Field {
        offset: u64,
        width: usize,
        #[serde(default)]
        endian: Option<Endian>,
        #[serde(default = "default_scale")]
        scale: u32,
        #[serde(default)]
        add: u32,
        #[serde(default = "default_unit")]
        unit: LengthUnit,
    },
    /// Computed from a VMS header at the start of the save
    VmsHeader,
}

impl LengthRule {
    /// Byte length of the save whose first block is `head`
    pub fn resolve(&self, head: &[u8], format: CardFormat) -> Option<usize> {
        let block_size = format.block_size();
        let len = match self {
            LengthRule::Fixed { blocks } => *blocks as usize * block_size,
            LengthRule::Bytes { bytes } => *bytes as usize,
            LengthRule::Field {
                offset,
                width,
                endian,
                scale,
                add,
                unit,
            } => {
                let reader = BinaryReader::new(head, endian.unwrap_or_else(|| format.endian()));
                let value = reader.read_uint(*offset, *width).ok()? as u64;
                let value = value.checked_mul(*scale as u64)?.checked_add(*add as u64)?;
                match unit {
                    LengthUnit::Bytes => value as usize,
                    LengthUnit::Blocks => (value as usize).checked_mul(block_size)?,
                }
            }
            LengthRule::VmsHeader => VmsHeader::parse(head).ok()?.file_len(),
        };
        (len > 0).then_some(len)
    }
}

/// Where a save's checksum lives and what it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRule {
    pub algorithm: ChecksumAlgorithm,
    /// Offset of the stored value within the save
    pub stored_at: usize,
    /// Defaults to the card's byte order
    #[serde(default)]
    pub endian: Option<Endian>,
    /// Start of the covered range
    #[serde(default)]
    pub start: usize,
    /// End of the covered range (exclusive); defaults to the end of the save
    #[serde(default)]
    pub end: Option<usize>,
    /// Treat the stored field as zero while computing
    #[serde(default)]
    pub zero_stored: bool,
}

impl ChecksumRule {
    /// `None` if the save is too short for the rule's offsets
    pub fn evaluate(&self, save: &[u8], format: CardFormat) -> Option<ChecksumCheck> {
        let width = self.algorithm.width();
        let end = self.end.unwrap_or(save.len());
        let stored_end = self.stored_at.checked_add(width)?;
        if self.start > end || end > save.len() || stored_end > save.len() {
            return None;
        }

        let reader = BinaryReader::new(save, self.endian.unwrap_or_else(|| format.endian()));
        let expected = reader.read_uint(self.stored_at as u64, width).ok()?;

        let stored = self.stored_at..stored_end;
        let overlaps = stored.start < end && self.start < stored.end;
        let calculated = if self.zero_stored && overlaps {
            let mut copy = save[self.start..end].to_vec();
            let from = stored.start.saturating_sub(self.start);
            let to = (stored.end - self.start).min(copy.len());
            copy[from..to].fill(0);
            compute(self.algorithm, &copy)
        } else {
            compute(self.algorithm, &save[self.start..end])
        };
        Some(ChecksumCheck::new(self.algorithm, expected, calculated))
    }
}

/// Identification rules for one save type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// GCN: game code + maker code; VMU: directory filename
    pub game_id: String,
    #[serde(default)]
    pub title: String,
    pub format: CardFormat,
    /// Filename given to a recovered save
    #[serde(default)]
    pub filename: Option<String>,
    pub patterns: Vec<Pattern>,
    pub length: LengthRule,
    pub checksum: ChecksumRule,
    /// Reject lengths above this many blocks
    #[serde(default)]
    pub max_blocks: Option<u16>,
    #[serde(default)]
    pub comment_offset: Option<u32>,
    #[serde(default)]
    pub icon_offset: Option<u32>,
    #[serde(default)]
    pub banner_offset: Option<u32>,
}

impl Signature {
    /// Reject rules that could never match or would read outside the first block
    pub fn validate(&self) -> Result<(), String> {
        if self.game_id.trim().is_empty() {
            return Err("empty game_id".to_string());
        }
        if self.format == CardFormat::Gcn && !is_valid_game_id(&self.game_id) {
            return Err(format!("'{}' is not a GCN game id", self.game_id));
        }
        if self.patterns.is_empty() {
            return Err(format!("{}: no patterns", self.game_id));
        }
        let block_size = self.format.block_size();
        if let Some(pattern) = self
            .patterns
            .iter()
            .find(|p| p.end().map_or(true, |end| end > block_size))
        {
            return Err(format!(
                "{}: pattern at 0x{:X} extends past the first block",
                self.game_id, pattern.offset
            ));
        }
        match &self.length {
            LengthRule::Fixed { blocks: 0 } | LengthRule::Bytes { bytes: 0 } => {
                return Err(format!("{}: zero length", self.game_id));
            }
            LengthRule::Field { width, .. } if !matches!(width, 1 | 2 | 4) => {
                return Err(format!("{}: length field width {}", self.game_id, width));
            }
            _ => {}
        }
        if let Some(end) = self.checksum.end {
            if end < self.checksum.start {
                return Err(format!("{}: checksum range ends before it starts", self.game_id));
            }
        }
        if self.checksum.stored_at.checked_add(self.checksum.algorithm.width()).is_none() {
            return Err(format!(
                "{}: checksum field at 0x{:X} is out of range",
                self.game_id, self.checksum.stored_at
            ));
        }
        Ok(())
    }

    pub fn matches_head(&self, head: &[u8]) -> bool {
        self.patterns.iter().all(|p| p.matches(head))
    }

    /// Byte length of the save, bounded by `max_blocks`
    pub fn byte_length(&self, head: &[u8]) -> Option<usize> {
        let len = self.length.resolve(head, self.format)?;
        if let Some(max) = self.max_blocks {
            if len > max as usize * self.format.block_size() {
                return None;
            }
        }
        Some(len)
    }

    pub fn verify(&self, save: &[u8]) -> Option<ChecksumCheck> {
        self.checksum.evaluate(save, self.format)
    }

    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            &self.game_id
        } else {
            &self.title
        }
    }

    pub fn recovered_filename(&self) -> &str {
        self.filename.as_deref().unwrap_or(&self.game_id)
    }
}
