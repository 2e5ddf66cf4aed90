//! Writes single files out of a card image.

use crate::error::{RecoveryError, Result};
use crate::gcn::directory::{encode_entry, EntryFields, ENTRY_SIZE, PERMISSION_PUBLIC};
use crate::gcn::datetime_to_timestamp;
use crate::image::CardImage;
use crate::model::FileEntry;
use crate::types::CardFormat;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Write `entry` to `dest`: GCI for GCN saves, raw VMS data for VMU saves.
///
/// Returns the number of bytes written.
pub fn export_file(image: &CardImage, entry: &FileEntry, dest: &Path) -> Result<u64> {
    let content = image.gather(entry.format, &entry.blocks)?;
    if content.is_empty() {
        return Err(RecoveryError::InvalidArgument(format!(
            "{} has no blocks to export",
            entry.filename
        )));
    }

    let output = match entry.format {
        CardFormat::Gcn => {
            let mut gci = Vec::with_capacity(ENTRY_SIZE + content.len());
            gci.extend_from_slice(&gci_entry(entry));
            gci.extend_from_slice(&content);
            gci
        }
        CardFormat::Vmu => {
            let mut raw = content;
            raw.truncate(entry.length);
            raw
        }
    };

    write_atomic(dest, &output)?;
    log::info!(
        "exported {} ({} bytes) to {}",
        entry.filename,
        output.len(),
        dest.display()
    );
    Ok(output.len() as u64)
}

/// Original directory entry, or one built from what the scan learned
fn gci_entry(entry: &FileEntry) -> Vec<u8> {
    if let Some(raw) = entry.dentry.as_ref().filter(|raw| raw.len() == ENTRY_SIZE) {
        return raw.clone();
    }

    let fields = EntryFields {
        game_id: &entry.game_id,
        filename: &entry.filename,
        first_block: entry.start_block().unwrap_or(0),
        block_count: entry.block_count() as u16,
        modified: entry.metadata.modified.map_or(0, datetime_to_timestamp),
        image_offset: entry.metadata.banner_offset.or(entry.metadata.icon_offset),
        comment_offset: entry.metadata.comment_offset,
        permissions: PERMISSION_PUBLIC,
    };
    encode_entry(&fields).to_vec()
}

/// File name for an exported entry, safe on common filesystems
pub fn default_export_name(entry: &FileEntry) -> String {
    let stem = match entry.format {
        CardFormat::Gcn => format!("{}-{}", entry.game_id, entry.filename),
        CardFormat::Vmu => entry.filename.clone(),
    };
    let stem: String = stem
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let extension = match entry.format {
        CardFormat::Gcn => "gci",
        CardFormat::Vmu => "vms",
    };
    format!("{stem}.{extension}")
}

/// Write through a temporary sibling then rename into place
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
