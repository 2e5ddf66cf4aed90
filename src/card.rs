//! An opened card: image, parsed structures, diagnosis and directory files.

use crate::database::SignatureDatabase;
use crate::diagnosis::{classify, ClassifierConfig, Diagnosis};
use crate::image::CardImage;
use crate::model::{EntryValidity, FileEntry};
use crate::parser::{parse, ParseResult};
use crate::recovery::reconstructor::directory_files;
use crate::types::CardFormat;
use ahash::AHashSet;

/// Immutable once built; shared with scan workers through `Arc`
#[derive(Debug, Clone)]
pub struct Card {
    parsed: ParseResult,
    diagnosis: Diagnosis,
    directory_files: Vec<FileEntry>,
}

impl Card {
    pub fn load(
        image: CardImage,
        forced: Option<CardFormat>,
        classifier: &ClassifierConfig,
        database: &SignatureDatabase,
    ) -> Self {
        let parsed = parse(&image, forced);
        let diagnosis = classify(&parsed, classifier);
        let directory_files = directory_files(&parsed, database);
        log::info!(
            "{}: {} card, {} directory files, {} conditions",
            image.path(),
            parsed.format,
            directory_files.len(),
            diagnosis.conditions.len()
        );
        Self {
            parsed,
            diagnosis,
            directory_files,
        }
    }

    /// Same card with directory files re-verified against another database
    pub fn with_database(&self, database: &SignatureDatabase) -> Self {
        Self {
            parsed: self.parsed.clone(),
            diagnosis: self.diagnosis.clone(),
            directory_files: directory_files(&self.parsed, database),
        }
    }

    pub fn image(&self) -> &CardImage {
        &self.parsed.image
    }

    pub fn format(&self) -> CardFormat {
        self.parsed.format
    }

    pub fn parsed(&self) -> &ParseResult {
        &self.parsed
    }

    pub fn diagnosis(&self) -> &Diagnosis {
        &self.diagnosis
    }

    pub fn directory_files(&self) -> &[FileEntry] {
        &self.directory_files
    }

    /// Blocks owned by directory files whose chain could be followed
    pub fn directory_blocks(&self) -> AHashSet<u16> {
        self.directory_files
            .iter()
            .filter(|f| f.validity != EntryValidity::BrokenChain)
            .flat_map(|f| f.blocks.iter().copied())
            .collect()
    }
}
