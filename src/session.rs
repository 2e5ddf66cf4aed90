//! The API a front end drives: open a card, load signatures, scan, export.

use crate::card::Card;
use crate::config::EngineConfig;
use crate::database::{LoadReport, SignatureDatabase};
use crate::diagnosis::{Condition, Diagnosis};
use crate::error::{RecoveryError, Result};
use crate::image::CardImage;
use crate::model::{FileEntry, FileList};
use crate::recovery::export::{export_file, write_atomic};
use crate::recovery::repair::{repair, RepairOutcome};
use crate::scanner::{CancelToken, FinishHook, ScanHandle, ScanWorker};
use crate::types::{ScanOptions, ThreadInfo};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One open card and at most one scan over it
pub struct CardSession {
    config: EngineConfig,
    card: Option<Arc<Card>>,
    database: Arc<SignatureDatabase>,
    load_report: LoadReport,
    /// Replaced as a whole when a scan ends
    recovered: Arc<Mutex<Vec<FileEntry>>>,
    scanning: Arc<AtomicBool>,
    cancel: Option<CancelToken>,
    next_worker_id: u64,
}

impl CardSession {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            card: None,
            database: Arc::new(SignatureDatabase::new()),
            load_report: LoadReport::default(),
            recovered: Arc::new(Mutex::new(Vec::new())),
            scanning: Arc::new(AtomicBool::new(false)),
            cancel: None,
            next_worker_id: 1,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open an image file and diagnose it
    pub fn open(&mut self, path: &Path) -> Result<Diagnosis> {
        self.ensure_idle()?;
        let image = CardImage::open(path)?;
        self.open_image(image)
    }

    pub fn open_bytes(&mut self, name: &str, bytes: Vec<u8>) -> Result<Diagnosis> {
        self.open_image(CardImage::from_bytes(name, bytes))
    }

    pub fn open_image(&mut self, image: CardImage) -> Result<Diagnosis> {
        self.ensure_idle()?;
        let card = Card::load(image, self.config.format, &self.config.classifier, &self.database);
        self.card = Some(Arc::new(card));
        self.set_recovered(Vec::new());
        self.diagnosis()
            .ok_or_else(|| RecoveryError::InvalidState("card vanished after open".to_string()))
    }

    /// Load every database on the search path, `extra` paths first
    pub fn load_databases(&mut self, extra: &[PathBuf]) -> &LoadReport {
        let paths = self.config.search_paths(extra);
        let (database, report) = SignatureDatabase::load(&paths);
        if database.is_empty() {
            log::warn!("no signatures found in {} search paths", paths.len());
        }
        self.set_database(database);
        self.load_report = report;
        &self.load_report
    }

    /// Replace the database; directory files are re-verified against it
    pub fn set_database(&mut self, database: SignatureDatabase) {
        if let Some(card) = &self.card {
            self.card = Some(Arc::new(card.with_database(&database)));
        }
        self.database = Arc::new(database);
    }

    pub fn database(&self) -> &SignatureDatabase {
        &self.database
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn card(&self) -> Option<&Arc<Card>> {
        self.card.as_ref()
    }

    /// The card's diagnosis plus session-level conditions
    pub fn diagnosis(&self) -> Option<Diagnosis> {
        let mut diagnosis = self.card.as_ref()?.diagnosis().clone();
        if self.database.is_empty() {
            diagnosis.conditions.push(Condition::NoDatabasesFound);
        }
        Some(diagnosis)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_scanning() {
            return Err(RecoveryError::ScanInProgress);
        }
        Ok(())
    }

    /// Start a scan on a worker thread.
    ///
    /// The recovered list is replaced with the outcome's entries when the
    /// scan ends, including the partial list of a cancelled scan.
    pub fn start_scan(&mut self, options: ScanOptions) -> Result<ScanHandle> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RecoveryError::ScanInProgress);
        }

        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;

        let mut worker = ScanWorker::new(options);
        if let Some(card) = &self.card {
            worker.set_thread_info(ThreadInfo::new(worker_id, card.image().path()));
            worker.set_card(Arc::clone(card));
        }
        worker.set_database(Arc::clone(&self.database));

        let recovered = Arc::clone(&self.recovered);
        let scanning = Arc::clone(&self.scanning);
        let hook: FinishHook = Box::new(move |outcome| {
            match recovered.lock() {
                Ok(mut list) => *list = outcome.entries.clone(),
                Err(poisoned) => *poisoned.into_inner() = outcome.entries.clone(),
            }
            scanning.store(false, Ordering::SeqCst);
        });

        let cancel = CancelToken::new();
        match worker.spawn(cancel.clone(), Some(hook)) {
            Ok(handle) => {
                self.cancel = Some(cancel);
                Ok(handle)
            }
            Err(err) => {
                self.scanning.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Returns whether a running scan was asked to stop
    pub fn cancel_scan(&self) -> bool {
        match &self.cancel {
            Some(cancel) if self.is_scanning() => {
                cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn set_recovered(&self, entries: Vec<FileEntry>) {
        match self.recovered.lock() {
            Ok(mut list) => *list = entries,
            Err(poisoned) => *poisoned.into_inner() = entries,
        }
    }

    /// Directory files followed by the last scan's recoveries
    pub fn file_list(&self) -> FileList {
        let directory = self
            .card
            .as_ref()
            .map(|card| card.directory_files().to_vec())
            .unwrap_or_default();
        let recovered = match self.recovered.lock() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        FileList::new(directory, recovered)
    }

    fn require_card(&self) -> Result<&Arc<Card>> {
        self.card
            .as_ref()
            .ok_or_else(|| RecoveryError::InvalidState("no card open".to_string()))
    }

    pub fn export_file(&self, entry: &FileEntry, dest: &Path) -> Result<u64> {
        let card = self.require_card()?;
        export_file(card.image(), entry, dest)
    }

    /// Write a repaired copy of the card to `dest`; the open image is untouched
    pub fn repair_to(&self, dest: &Path) -> Result<RepairOutcome> {
        self.ensure_idle()?;
        let card = self.require_card()?;
        if same_file(Path::new(card.image().path()), dest) {
            return Err(RecoveryError::InvalidArgument(
                "repair must be written to a new file".to_string(),
            ));
        }

        let outcome = repair(card.parsed(), card.diagnosis())?;
        write_atomic(dest, &outcome.image)?;
        log::info!(
            "wrote repaired image to {} ({} actions)",
            dest.display(),
            outcome.actions.len()
        );
        Ok(outcome)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanPrecondition;
    use crate::fixtures::{signed_gcn_save, test_database, GcnFile, GcnImageBuilder, TEST_GAME};
    use crate::model::EntrySource;
    use crate::scanner::ScanEvent;
    use crate::tables::Selection;
    use crate::types::{ScanState, TableId};
    use std::fs;
    use tempfile::TempDir;

    fn session_with_db() -> CardSession {
        let mut session = CardSession::new(EngineConfig::default());
        session.set_database(test_database());
        session
    }

    #[test]
    fn test_corrupt_directory_a_uses_b() {
        let mut bytes = GcnImageBuilder::new(4)
            .file(GcnFile::new("GALE01", "SuperSmashBros", 5, 3))
            .directory_counters(4, 5)
            .build();
        bytes[0x2000 + 0x20] ^= 0x55;

        let mut session = session_with_db();
        let diagnosis = session.open_bytes("a-bad.raw", bytes).unwrap();
        assert_eq!(diagnosis.directory, Selection::B);
        assert_eq!(
            diagnosis.conditions,
            vec![Condition::DirectoryInvalid { table: TableId::A }]
        );

        let files = session.file_list();
        assert_eq!(files.len(), 1);
        assert_eq!(
            files.get(0).unwrap().source,
            EntrySource::Directory {
                slot: 0,
                table: TableId::B
            }
        );
    }

    #[test]
    fn test_repair_to_new_file() {
        let mut bytes = GcnImageBuilder::new(4)
            .file(GcnFile::new("GALE01", "SuperSmashBros", 5, 3))
            .directory_counters(4, 5)
            .build();
        bytes[0x2000 + 0x20] ^= 0x55;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("card.raw");
        fs::write(&source, &bytes).unwrap();

        let mut session = session_with_db();
        session.open(&source).unwrap();
        assert!(matches!(
            session.repair_to(&source),
            Err(RecoveryError::InvalidArgument(_))
        ));

        let dest = dir.path().join("repaired.raw");
        session.repair_to(&dest).unwrap();
        assert_eq!(fs::read(&source).unwrap(), bytes);

        let diagnosis = session.open(&dest).unwrap();
        assert_eq!(diagnosis.directory, Selection::Ambiguous);
        assert!(!diagnosis.has("directory_invalid"));
        assert_eq!(session.file_list().len(), 1);
    }

    #[test]
    fn test_scan_through_session() {
        let image = GcnImageBuilder::new(4)
            .file(GcnFile::new("GALE01", "SuperSmashBros", 5, 1))
            .place(30, signed_gcn_save(2, 1))
            .place(12, signed_gcn_save(1, 2))
            .build_image();
        let mut session = session_with_db();
        session.open_image(image).unwrap();

        let mut handle = session.start_scan(ScanOptions::default()).unwrap();
        let mut found = Vec::new();
        while let Some(event) = handle.events().blocking_recv() {
            if let ScanEvent::FileFound(entry) = event {
                found.push(entry.start_block());
            }
        }
        let outcome = handle.wait().unwrap();
        assert_eq!(outcome.state, ScanState::Completed);
        assert_eq!(found, vec![Some(12), Some(30)]);
        assert!(!session.is_scanning());

        let files = session.file_list();
        let order: Vec<_> = files.iter().map(|e| (e.is_recovered(), e.start_block())).collect();
        assert_eq!(order, vec![(false, Some(5)), (true, Some(12)), (true, Some(30))]);
        assert_eq!(files.recovered_entries().count(), 2);
        assert_eq!(files.find(TEST_GAME).map(|e| e.length), Some(0x2000));
    }

    #[test]
    fn test_second_scan_is_rejected() {
        let mut session = session_with_db();
        session.open_image(GcnImageBuilder::new(4).build_image()).unwrap();
        session.scanning.store(true, Ordering::SeqCst);

        assert!(matches!(
            session.start_scan(ScanOptions::default()),
            Err(RecoveryError::ScanInProgress)
        ));
        assert!(matches!(
            session.repair_to(Path::new("/tmp/never-written.raw")),
            Err(RecoveryError::ScanInProgress)
        ));
        assert!(matches!(
            session.open_bytes("other", vec![0; 0x80000]),
            Err(RecoveryError::ScanInProgress)
        ));
    }

    #[test]
    fn test_scan_without_databases() {
        let mut session = CardSession::new(EngineConfig::default());
        let diagnosis = session.open_image(GcnImageBuilder::new(4).build_image()).unwrap();
        assert!(diagnosis.has("no_databases_found"));

        match session.start_scan(ScanOptions::default()) {
            Err(RecoveryError::Precondition(p)) => assert_eq!(p, ScanPrecondition::NoDatabases),
            other => panic!("unexpected: {:?}", other.map(|h| h.worker_id())),
        }
        assert!(!session.is_scanning());
    }

    #[test]
    fn test_scan_without_card() {
        let mut session = session_with_db();
        match session.start_scan(ScanOptions::default()) {
            Err(RecoveryError::Precondition(p)) => assert_eq!(p, ScanPrecondition::NoThreadInfo),
            other => panic!("unexpected: {:?}", other.map(|h| h.worker_id())),
        }
        assert!(!session.cancel_scan());
    }

    #[test]
    fn test_non_power_of_two_card_scans_every_whole_block() {
        let mut bytes = GcnImageBuilder::new(4).place(63, signed_gcn_save(1, 3)).build();
        let mut tail = signed_gcn_save(2, 4);
        tail.extend(vec![0xAB; 0x100]);
        bytes.extend(vec![0u8; 0x2000]);
        bytes.extend(tail);

        let mut session = session_with_db();
        let diagnosis = session.open_bytes("odd.raw", bytes).unwrap();
        assert!(diagnosis.has("size_not_power_of_two"));

        let handle = session.start_scan(ScanOptions::default()).unwrap();
        let outcome = handle.wait().unwrap();
        assert_eq!(outcome.progress.total_blocks(), 62);
        let starts: Vec<_> = outcome.entries.iter().map(|e| e.blocks.clone()).collect();
        assert_eq!(starts, vec![vec![63], vec![65, 66]]);
    }

    #[test]
    fn test_export_through_session() {
        let mut session = session_with_db();
        session
            .open_image(
                GcnImageBuilder::new(4)
                    .file(GcnFile::new(TEST_GAME, "testsave", 5, 1).with_data(signed_gcn_save(1, 5)))
                    .build_image(),
            )
            .unwrap();
        let entry = session.file_list().get(0).cloned().unwrap();

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.gci");
        assert_eq!(session.export_file(&entry, &dest).unwrap(), 0x2040);
    }
}
