//! JSON reports for inspected and scanned cards.

use crate::card::Card;
use crate::diagnosis::{Diagnosis, Severity};
use crate::error::{RecoveryError, Result};
use crate::model::FileList;
use crate::recovery::export::write_atomic;
use crate::scanner::ScanOutcome;
use crate::types::{CardFormat, ScanState};
use serde::Serialize;
use std::path::Path;

pub const TOOL_NAME: &str = "memcard-recovery";

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub tool_name: String,
    pub version: String,
    pub generated_at: String,
    pub image_path: String,
    pub image_size: u64,
    pub format: CardFormat,
    pub format_forced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub state: ScanState,
    pub blocks_scanned: usize,
    pub blocks_total: usize,
    pub files_recovered: usize,
    pub duration_secs: f64,
    pub error: Option<String>,
}

impl From<&ScanOutcome> for ScanSummary {
    fn from(outcome: &ScanOutcome) -> Self {
        Self {
            state: outcome.state,
            blocks_scanned: outcome.progress.blocks_scanned,
            blocks_total: outcome.progress.total_blocks(),
            files_recovered: outcome.entries.len(),
            duration_secs: outcome.duration_secs,
            error: outcome.error.clone(),
        }
    }
}

/// Everything known about one card
#[derive(Debug, Clone, Serialize)]
pub struct CardReport {
    pub metadata: ReportMetadata,
    pub worst_severity: Option<Severity>,
    pub diagnosis: Diagnosis,
    pub files: FileList,
    pub scan: Option<ScanSummary>,
}

impl CardReport {
    pub fn new(card: &Card, diagnosis: Diagnosis, files: FileList) -> Self {
        let parsed = card.parsed();
        Self {
            metadata: ReportMetadata {
                tool_name: TOOL_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                image_path: card.image().path().to_string(),
                image_size: parsed.image_size(),
                format: parsed.format,
                format_forced: parsed.format_forced,
            },
            worst_severity: diagnosis.worst_severity(),
            diagnosis,
            files,
            scan: None,
        }
    }

    pub fn with_scan(mut self, outcome: &ScanOutcome) -> Self {
        self.scan = Some(ScanSummary::from(outcome));
        self
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| RecoveryError::Parse(err.to_string()))
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_json()?.as_bytes())?;
        log::info!("report written to {}", path.display());
        Ok(())
    }
}
