//! Checksum algorithms used by card structures and save files.
//!
//! GCN headers and tables use an additive/inverse pair over big-endian words;
//! VMU save files carry a CRC-16/XMODEM. The remaining variants are the ones
//! commonly referenced from signature rules.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    /// Wrapping u8 sum of all bytes
    Sum8,
    /// u32 sum of all bytes
    ByteSum32,
    Sum16Be,
    Sum16Le,
    Sum32Be,
    Sum32Le,
    /// GCN additive and inverse checksums packed as `sum << 16 | inverse`
    GcnDual,
    Crc16Xmodem,
    Crc32,
}

impl ChecksumAlgorithm {
    /// Width in bytes of the stored value
    pub fn width(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sum8 => 1,
            ChecksumAlgorithm::Sum16Be | ChecksumAlgorithm::Sum16Le => 2,
            ChecksumAlgorithm::Crc16Xmodem => 2,
            _ => 4,
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChecksumAlgorithm::Sum8 => "sum8",
            ChecksumAlgorithm::ByteSum32 => "byte_sum32",
            ChecksumAlgorithm::Sum16Be => "sum16_be",
            ChecksumAlgorithm::Sum16Le => "sum16_le",
            ChecksumAlgorithm::Sum32Be => "sum32_be",
            ChecksumAlgorithm::Sum32Le => "sum32_le",
            ChecksumAlgorithm::GcnDual => "gcn_dual",
            ChecksumAlgorithm::Crc16Xmodem => "crc16_xmodem",
            ChecksumAlgorithm::Crc32 => "crc32",
        };
        f.write_str(name)
    }
}

/// Stored versus recomputed checksum of one region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChecksumCheck {
    pub algorithm: ChecksumAlgorithm,
    pub expected: u32,
    pub calculated: u32,
}

impl ChecksumCheck {
    pub fn new(algorithm: ChecksumAlgorithm, expected: u32, calculated: u32) -> Self {
        Self {
            algorithm,
            expected,
            calculated,
        }
    }

    /// Recompute over `bytes` and compare with `expected`
    pub fn verify(algorithm: ChecksumAlgorithm, bytes: &[u8], expected: u32) -> Self {
        Self::new(algorithm, expected, compute(algorithm, bytes))
    }

    pub fn is_valid(&self) -> bool {
        self.expected == self.calculated
    }
}

pub fn compute(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> u32 {
    match algorithm {
        ChecksumAlgorithm::Sum8 => bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) as u32,
        ChecksumAlgorithm::ByteSum32 => bytes
            .iter()
            .fold(0u32, |acc, &b| acc.wrapping_add(b as u32)),
        ChecksumAlgorithm::Sum16Be => word_sum::<2>(bytes, u16_be) & 0xFFFF,
        ChecksumAlgorithm::Sum16Le => word_sum::<2>(bytes, u16_le) & 0xFFFF,
        ChecksumAlgorithm::Sum32Be => word_sum::<4>(bytes, u32::from_be_bytes),
        ChecksumAlgorithm::Sum32Le => word_sum::<4>(bytes, u32::from_le_bytes),
        ChecksumAlgorithm::GcnDual => {
            let (sum, inverse) = gcn_checksums(bytes);
            (sum as u32) << 16 | inverse as u32
        }
        ChecksumAlgorithm::Crc16Xmodem => crc16_xmodem(bytes) as u32,
        ChecksumAlgorithm::Crc32 => crc32fast::hash(bytes),
    }
}

fn u16_be(word: [u8; 2]) -> u32 {
    u16::from_be_bytes(word) as u32
}

fn u16_le(word: [u8; 2]) -> u32 {
    u16::from_le_bytes(word) as u32
}

/// Wrapping sum of N-byte words; a trailing partial word is zero padded.
fn word_sum<const N: usize>(bytes: &[u8], decode: fn([u8; N]) -> u32) -> u32 {
    let chunks = bytes.chunks_exact(N);
    let remainder = chunks.remainder();

    let mut sum = chunks.fold(0u32, |acc, chunk| {
        let mut word = [0u8; N];
        word.copy_from_slice(chunk);
        acc.wrapping_add(decode(word))
    });

    if !remainder.is_empty() {
        let mut word = [0u8; N];
        word[..remainder.len()].copy_from_slice(remainder);
        sum = sum.wrapping_add(decode(word));
    }
    sum
}

/// GCN additive and inverse checksums over big-endian u16 words.
///
/// A result of `0xFFFF` is stored as `0` by the console, so both values are
/// normalised the same way here.
pub fn gcn_checksums(bytes: &[u8]) -> (u16, u16) {
    let mut sum: u16 = 0;
    let mut inverse: u16 = 0;
    for chunk in bytes.chunks(2) {
        let word = u16::from_be_bytes([chunk[0], *chunk.get(1).unwrap_or(&0)]);
        sum = sum.wrapping_add(word);
        inverse = inverse.wrapping_add(word ^ 0xFFFF);
    }
    if sum == 0xFFFF {
        sum = 0;
    }
    if inverse == 0xFFFF {
        inverse = 0;
    }
    (sum, inverse)
}

/// CRC-16/XMODEM (poly 0x1021, init 0), as used in VMS save headers
pub fn crc16_xmodem(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
