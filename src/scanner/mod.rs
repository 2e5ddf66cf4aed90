//! Block scan for lost save files.

pub mod worker;

pub use worker::{CancelToken, FinishHook, ScanEvent, ScanHandle, ScanOutcome, ScanWorker};

use crate::card::Card;
use crate::types::ScanOptions;
use ahash::AHashSet;

/// Start blocks to try, ascending.
///
/// `restrict_to_used` only applies when a valid block table exists; without
/// one every data block is tried.
pub fn candidate_blocks(card: &Card, options: &ScanOptions, occupied: &AHashSet<u16>) -> Vec<u16> {
    let parsed = card.parsed();
    let used_filter = if options.restrict_to_used {
        let table = parsed.active_block_table();
        if table.is_none() {
            log::warn!("no trusted block table, scanning every data block");
        }
        table
    } else {
        None
    };

    parsed
        .data_blocks()
        .filter(|b| used_filter.map_or(true, |t| t.is_used(*b)))
        .filter(|b| !occupied.contains(b))
        .collect()
}
