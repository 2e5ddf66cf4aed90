use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the recovery engine
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory mapping error: {0}")]
    Mmap(String),

    #[error("Out of bounds: {len} bytes at offset 0x{offset:X} exceed image size {image_size}")]
    OutOfBounds {
        offset: u64,
        len: u64,
        image_size: u64,
    },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Signature database {path}: {reason}")]
    Database { path: PathBuf, reason: String },

    #[error("Scan precondition failed: {0}")]
    Precondition(ScanPrecondition),

    #[error("A scan is already running on this card")]
    ScanInProgress,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Repair refused: {0}")]
    Repair(String),
}

/// Conditions that stop a recovery scan before any block is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPrecondition {
    NoThreadInfo,
    NoCard,
    NoDatabases,
    NoBlocks,
}

impl ScanPrecondition {
    pub fn code(&self) -> &'static str {
        match self {
            ScanPrecondition::NoThreadInfo => "no_thread_info",
            ScanPrecondition::NoCard => "no_card",
            ScanPrecondition::NoDatabases => "no_databases",
            ScanPrecondition::NoBlocks => "no_blocks",
        }
    }
}

impl std::fmt::Display for ScanPrecondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ScanPrecondition::NoThreadInfo => "thread information not set",
            ScanPrecondition::NoCard => "no card set",
            ScanPrecondition::NoDatabases => "no databases loaded",
            ScanPrecondition::NoBlocks => "no blocks to search",
        };
        f.write_str(text)
    }
}

/// Result type alias for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;
