//! Memory card image validation and lost save recovery.
//!
//! This library reads GameCube and Dreamcast VMU card images:
//! - Format detection and independent parsing of every system structure
//! - Redundant table selection by checksum and update counter
//! - Corruption classification into language-neutral condition codes
//! - Signature-driven block scan for saves the directory no longer lists
//! - Scan workers on dedicated threads with cancellation and progress streaming
//! - GCI/VMS export and GCN system table repair

pub mod card;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod database;
pub mod diagnosis;
pub mod error;
pub mod gcn;
pub mod image;
pub mod matcher;
pub mod model;
pub mod parser;
pub mod reader;
pub mod recovery;
pub mod report;
pub mod scanner;
pub mod session;
pub mod signature;
pub mod tables;
pub mod types;
pub mod vmu;

#[cfg(test)]
mod fixtures;

// Re-export commonly used types
pub use card::Card;
pub use config::EngineConfig;
pub use database::{LoadReport, SignatureDatabase};
pub use diagnosis::{classify, ClassifierConfig, Condition, Diagnosis, Severity};
pub use error::{RecoveryError, Result, ScanPrecondition};
pub use image::CardImage;
pub use model::{EntrySource, EntryValidity, FileEntry, FileList};
pub use parser::{detect_format, parse, ParseResult};
pub use scanner::{CancelToken, ScanEvent, ScanHandle, ScanOutcome, ScanWorker};
pub use session::CardSession;
pub use signature::Signature;
pub use tables::{select_active, Selection};
pub use types::{CardFormat, Endian, ScanOptions, ScanProgress, ScanState, TableId, ThreadInfo};
