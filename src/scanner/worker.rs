//! Recovery worker: one scan of one card on a dedicated thread.

use crate::card::Card;
use crate::database::SignatureDatabase;
use crate::error::{RecoveryError, Result, ScanPrecondition};
use crate::matcher::SignatureMatcher;
use crate::model::FileEntry;
use crate::recovery::reconstructor::recovered_file;
use crate::types::{ScanOptions, ScanProgress, ScanState, ThreadInfo};
use ahash::AHashSet;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use super::candidate_blocks;

/// Streamed to the caller while a scan runs
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Progress(Arc<ScanProgress>),
    FileFound(FileEntry),
}

/// Cooperative cancellation, checked before every block
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final result of a scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub state: ScanState,
    /// In discovery order
    pub entries: Vec<FileEntry>,
    pub progress: ScanProgress,
    pub duration_secs: f64,
    pub error: Option<String>,
}

impl ScanOutcome {
    fn failed(worker_id: u64, error: &RecoveryError) -> Self {
        Self {
            state: ScanState::Failed,
            entries: Vec::new(),
            progress: ScanProgress {
                worker_id,
                ..ScanProgress::default()
            },
            duration_secs: 0.0,
            error: Some(error.to_string()),
        }
    }
}

/// Runs on the worker thread once the outcome is known
pub type FinishHook = Box<dyn FnOnce(&ScanOutcome) + Send + 'static>;

struct ScanPlan {
    card: Arc<Card>,
    matcher: SignatureMatcher,
    candidates: Vec<u16>,
    occupied: AHashSet<u16>,
    worker_id: u64,
}

pub struct ScanWorker {
    card: Option<Arc<Card>>,
    database: Option<Arc<SignatureDatabase>>,
    thread_info: Option<ThreadInfo>,
    options: ScanOptions,
    state: ScanState,
    snapshot: Arc<Mutex<Arc<ScanProgress>>>,
}

impl ScanWorker {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            card: None,
            database: None,
            thread_info: None,
            options,
            state: ScanState::Idle,
            snapshot: Arc::new(Mutex::new(Arc::new(ScanProgress::default()))),
        }
    }

    pub fn set_card(&mut self, card: Arc<Card>) {
        self.card = Some(card);
    }

    pub fn set_database(&mut self, database: Arc<SignatureDatabase>) {
        self.database = Some(database);
    }

    pub fn set_thread_info(&mut self, info: ThreadInfo) {
        self.thread_info = Some(info);
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Latest published progress
    pub fn snapshot(&self) -> Arc<ScanProgress> {
        read_snapshot(&self.snapshot)
    }

    fn prepare(&self) -> std::result::Result<ScanPlan, ScanPrecondition> {
        let info = self.thread_info.as_ref().ok_or(ScanPrecondition::NoThreadInfo)?;
        let card = self.card.clone().ok_or(ScanPrecondition::NoCard)?;
        let matcher = self
            .database
            .as_deref()
            .map(|db| SignatureMatcher::new(card.format(), db))
            .filter(|m| !m.is_empty())
            .ok_or(ScanPrecondition::NoDatabases)?;

        let occupied = if self.options.include_directory_blocks {
            AHashSet::new()
        } else {
            card.directory_blocks()
        };
        let candidates = candidate_blocks(&card, &self.options, &occupied);
        if candidates.is_empty() {
            return Err(ScanPrecondition::NoBlocks);
        }

        Ok(ScanPlan {
            card,
            matcher,
            candidates,
            occupied,
            worker_id: info.id,
        })
    }

    fn fail(&mut self, precondition: ScanPrecondition) -> RecoveryError {
        log::warn!("scan not started: {}", precondition);
        self.state = ScanState::Failed;
        RecoveryError::Precondition(precondition)
    }

    /// Scan on the calling thread, reporting through `observer`
    pub fn run(
        &mut self,
        cancel: &CancelToken,
        observer: &mut dyn FnMut(ScanEvent),
    ) -> Result<ScanOutcome> {
        let plan = match self.prepare() {
            Ok(plan) => plan,
            Err(precondition) => return Err(self.fail(precondition)),
        };
        self.state = ScanState::Running;

        let start_time = Instant::now();
        let card = &plan.card;
        let format = card.format();
        let area = card.parsed().data_blocks();
        let interval = self.options.progress_interval.max(1);
        let total = plan.candidates.len();
        let mut occupied = plan.occupied;
        let mut entries = Vec::new();
        let mut progress = ScanProgress {
            worker_id: plan.worker_id,
            blocks_remaining: total,
            ..ScanProgress::default()
        };
        let mut published = 0;

        log::info!(
            "worker {}: scanning {} blocks of {} with {} signatures",
            plan.worker_id,
            total,
            card.image().path(),
            plan.matcher.len()
        );

        let mut state = ScanState::Completed;
        for (i, &block) in plan.candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                state = ScanState::Cancelled;
                break;
            }

            if !occupied.contains(&block) {
                if let Some(candidate) = plan.matcher.try_block(card.image(), block, &area, &occupied) {
                    occupied.extend(candidate.blocks.iter().copied());
                    let entry = recovered_file(format, candidate);
                    log::info!(
                        "block {}: recovered {} ({} blocks)",
                        block,
                        entry.game_id,
                        entry.block_count()
                    );
                    observer(ScanEvent::FileFound(entry.clone()));
                    entries.push(entry);
                }
            }

            progress = ScanProgress {
                worker_id: plan.worker_id,
                current_block: block,
                blocks_scanned: i + 1,
                blocks_remaining: total - (i + 1),
                files_found: entries.len(),
            };
            if (i + 1) % interval == 0 {
                self.publish(&progress, observer);
                published = i + 1;
            }
        }
        if published != progress.blocks_scanned || progress.blocks_scanned == 0 {
            self.publish(&progress, observer);
        }

        self.state = state;
        log::info!(
            "worker {}: {:?} after {} blocks, {} files recovered",
            plan.worker_id,
            state,
            progress.blocks_scanned,
            entries.len()
        );
        Ok(ScanOutcome {
            state,
            entries,
            progress,
            duration_secs: start_time.elapsed().as_secs_f64(),
            error: None,
        })
    }

    fn publish(&self, progress: &ScanProgress, observer: &mut dyn FnMut(ScanEvent)) {
        let snapshot = Arc::new(progress.clone());
        if let Ok(mut current) = self.snapshot.lock() {
            *current = Arc::clone(&snapshot);
        }
        observer(ScanEvent::Progress(snapshot));
    }

    /// Start the scan on its own thread.
    ///
    /// Preconditions are checked before the thread starts, so a failure is
    /// returned here rather than through the handle.
    pub fn spawn(mut self, cancel: CancelToken, on_finish: Option<FinishHook>) -> Result<ScanHandle> {
        let worker_id = match self.prepare() {
            Ok(plan) => plan.worker_id,
            Err(precondition) => return Err(self.fail(precondition)),
        };
        let label = self
            .thread_info
            .as_ref()
            .map_or_else(String::new, |info| info.label.clone());

        let (sender, receiver) = unbounded_channel();
        let snapshot = Arc::clone(&self.snapshot);
        let thread_cancel = cancel.clone();

        let join = std::thread::Builder::new()
            .name(format!("scan-{label}"))
            .spawn(move || {
                let mut observer = |event: ScanEvent| {
                    // A dropped receiver only means nobody is listening
                    let _ = sender.send(event);
                };
                let outcome = self
                    .run(&thread_cancel, &mut observer)
                    .unwrap_or_else(|err| ScanOutcome::failed(worker_id, &err));
                if let Some(hook) = on_finish {
                    hook(&outcome);
                }
                outcome
            })?;

        Ok(ScanHandle {
            worker_id,
            events: receiver,
            cancel,
            snapshot,
            join,
        })
    }
}

fn read_snapshot(snapshot: &Mutex<Arc<ScanProgress>>) -> Arc<ScanProgress> {
    match snapshot.lock() {
        Ok(current) => Arc::clone(&current),
        Err(poisoned) => Arc::clone(&poisoned.into_inner()),
    }
}

/// Caller's side of a running scan
pub struct ScanHandle {
    worker_id: u64,
    events: UnboundedReceiver<ScanEvent>,
    cancel: CancelToken,
    snapshot: Arc<Mutex<Arc<ScanProgress>>>,
    join: JoinHandle<ScanOutcome>,
}

impl ScanHandle {
    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// Event stream; closes when the worker finishes
    pub fn events(&mut self) -> &mut UnboundedReceiver<ScanEvent> {
        &mut self.events
    }

    pub fn snapshot(&self) -> Arc<ScanProgress> {
        read_snapshot(&self.snapshot)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the worker finishes
    pub fn wait(self) -> Result<ScanOutcome> {
        self.join
            .join()
            .map_err(|_| RecoveryError::InvalidState("scan worker panicked".to_string()))
    }
}
