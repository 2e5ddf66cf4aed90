//! Signature matching at a candidate start block.

pub mod validator;

use crate::checksum::ChecksumCheck;
use crate::database::SignatureDatabase;
use crate::image::CardImage;
use crate::signature::Signature;
use crate::types::CardFormat;
use ahash::AHashSet;
use sha2::{Digest, Sha256};
use std::ops::Range;
use std::sync::Arc;

/// SHA-256 of `data` as lowercase hex
#[inline]
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// A save whose patterns, length and checksum all verified
#[derive(Debug, Clone)]
pub struct Candidate {
    pub signature: Arc<Signature>,
    pub blocks: Vec<u16>,
    /// Byte length given by the signature's length rule
    pub length: usize,
    /// Gathered blocks, `blocks.len() * block_size` bytes
    pub content: Vec<u8>,
    pub checksum: ChecksumCheck,
}

/// Tries every signature of one card format, in database order
#[derive(Debug, Clone)]
pub struct SignatureMatcher {
    format: CardFormat,
    signatures: Vec<Arc<Signature>>,
}

impl SignatureMatcher {
    pub fn new(format: CardFormat, database: &SignatureDatabase) -> Self {
        Self {
            format,
            signatures: database.for_format(format),
        }
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// First signature that fully verifies for a save starting at `start`
    pub fn try_block(
        &self,
        image: &CardImage,
        start: u16,
        area: &Range<u16>,
        occupied: &AHashSet<u16>,
    ) -> Option<Candidate> {
        let block_size = self.format.block_size();
        let head = image.block(self.format, start).ok()?;

        for signature in &self.signatures {
            if !signature.matches_head(head) {
                continue;
            }

            let length = match signature.byte_length(head) {
                Some(length) => length,
                None => continue,
            };
            let count = validator::blocks_for(length, block_size);
            let blocks = match validator::block_run(self.format, start, count, area, occupied) {
                Some(blocks) => blocks,
                None => {
                    log::debug!(
                        "block {}: {} needs {} blocks, run unavailable",
                        start,
                        signature.game_id,
                        count
                    );
                    continue;
                }
            };

            let content = match image.gather(self.format, &blocks) {
                Ok(content) => content,
                Err(_) => continue,
            };
            let checksum = match signature.verify(&content[..length]) {
                Some(check) => check,
                None => continue,
            };
            if !checksum.is_valid() {
                log::debug!(
                    "block {}: {} checksum 0x{:X} != 0x{:X}",
                    start,
                    signature.game_id,
                    checksum.calculated,
                    checksum.expected
                );
                continue;
            }

            return Some(Candidate {
                signature: Arc::clone(signature),
                blocks,
                length,
                content,
                checksum,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{signed_gcn_save, test_database, vms_file, GcnImageBuilder, VmuImageBuilder};

    #[test]
    fn test_sha256_hash() {
        assert_eq!(
            sha256_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_match_gcn_save() {
        let image = GcnImageBuilder::new(4)
            .place(20, signed_gcn_save(3, 1))
            .build_image();
        let matcher = SignatureMatcher::new(CardFormat::Gcn, &test_database());
        assert_eq!(matcher.len(), 1);

        let area = 5..64;
        let free = AHashSet::new();
        let candidate = matcher.try_block(&image, 20, &area, &free).unwrap();
        assert_eq!(candidate.blocks, vec![20, 21, 22]);
        assert_eq!(candidate.length, 3 * 0x2000);
        assert!(candidate.checksum.is_valid());

        assert!(matcher.try_block(&image, 21, &area, &free).is_none());
        let occupied: AHashSet<u16> = [22].into_iter().collect();
        assert!(matcher.try_block(&image, 20, &area, &occupied).is_none());
    }

    #[test]
    fn test_damaged_save_is_rejected() {
        let mut save = signed_gcn_save(2, 3);
        save[0x2100] ^= 0x01;
        let image = GcnImageBuilder::new(4).place(30, save).build_image();
        let matcher = SignatureMatcher::new(CardFormat::Gcn, &test_database());
        assert!(matcher.try_block(&image, 30, &(5..64), &AHashSet::new()).is_none());
    }

    #[test]
    fn test_match_vmu_descending() {
        let file = vms_file("LOST", 1, 0, 600);
        let image = VmuImageBuilder::new()
            .place(vec![150, 149, 148], file.clone())
            .build_image();
        let matcher = SignatureMatcher::new(CardFormat::Vmu, &test_database());
        let candidate = matcher.try_block(&image, 150, &(0..200), &AHashSet::new()).unwrap();
        assert_eq!(candidate.blocks, vec![150, 149, 148]);
        assert_eq!(candidate.length, file.len());
        assert_eq!(&candidate.content[..file.len()], &file[..]);
    }
}
