//! Synthetic card images and signatures for unit tests.

use crate::checksum::{compute, crc16_xmodem, ChecksumAlgorithm};
use crate::database::SignatureDatabase;
use crate::gcn::{self, bat, directory};
use crate::image::CardImage;
use crate::signature::Signature;
use crate::vmu;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub const TEST_GAME: &str = "GTSE01";
pub const TEST_APP: &str = "TESTAPP";

#[derive(Debug, Clone)]
pub struct GcnFile {
    pub game_id: String,
    pub filename: String,
    pub first_block: u16,
    pub block_count: u16,
    pub data: Option<Vec<u8>>,
}

impl GcnFile {
    pub fn new(game_id: &str, filename: &str, first_block: u16, block_count: u16) -> Self {
        Self {
            game_id: game_id.to_string(),
            filename: filename.to_string(),
            first_block,
            block_count,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone)]
pub struct GcnImageBuilder {
    size_mbits: u16,
    files: Vec<GcnFile>,
    directory_counters: (u16, u16),
    bat_counters: (u16, u16),
    raw: Vec<(u16, Vec<u8>)>,
}

impl GcnImageBuilder {
    pub fn new(size_mbits: u16) -> Self {
        Self {
            size_mbits,
            files: Vec::new(),
            directory_counters: (1, 0),
            bat_counters: (1, 0),
            raw: Vec::new(),
        }
    }

    pub fn file(mut self, file: GcnFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn directory_counters(mut self, a: u16, b: u16) -> Self {
        self.directory_counters = (a, b);
        self
    }

    pub fn bat_counters(mut self, a: u16, b: u16) -> Self {
        self.bat_counters = (a, b);
        self
    }

    /// Write bytes at a block without any directory or allocation record
    pub fn place(mut self, block: u16, bytes: Vec<u8>) -> Self {
        self.raw.push((block, bytes));
        self
    }

    pub fn build_image(&self) -> CardImage {
        CardImage::from_bytes("synthetic.raw", self.build())
    }

    pub fn build(&self) -> Vec<u8> {
        let size = self.size_mbits as usize * gcn::MBIT_BYTES as usize;
        let block_size = gcn::BLOCK_SIZE;
        let block_count = size / block_size;
        let mut image = vec![0u8; size];

        // header
        {
            let header = &mut image[..block_size];
            header.fill(0xFF);
            for (i, b) in header[..12].iter_mut().enumerate() {
                *b = 0x10 + i as u8;
            }
            BigEndian::write_u64(&mut header[0x0C..0x14], 0x0123_4567_89AB_CDEF);
            BigEndian::write_u32(&mut header[0x14..0x18], 0);
            BigEndian::write_u32(&mut header[0x18..0x1C], 0);
            BigEndian::write_u32(&mut header[0x1C..0x20], 0);
            BigEndian::write_u16(&mut header[0x20..0x22], 0);
            BigEndian::write_u16(&mut header[0x22..0x24], self.size_mbits);
            BigEndian::write_u16(&mut header[0x24..0x26], 0);
            gcn::write_checksums(header, 0..0x1FC, 0x1FC);
        }

        // directories
        let mut dir = vec![0xFFu8; block_size];
        for (slot, file) in self.files.iter().enumerate() {
            let raw = directory::encode_entry(&directory::EntryFields {
                game_id: &file.game_id,
                filename: &file.filename,
                first_block: file.first_block,
                block_count: file.block_count,
                modified: 1_000_000,
                image_offset: None,
                comment_offset: None,
                permissions: directory::PERMISSION_PUBLIC,
            });
            let at = slot * directory::ENTRY_SIZE;
            dir[at..at + directory::ENTRY_SIZE].copy_from_slice(&raw);
        }
        for (block, counter) in [(1usize, self.directory_counters.0), (2, self.directory_counters.1)] {
            let mut copy = dir.clone();
            BigEndian::write_u16(&mut copy[0x1FFA..0x1FFC], counter);
            gcn::write_checksums(&mut copy, 0..0x1FFC, 0x1FFC);
            image[block * block_size..(block + 1) * block_size].copy_from_slice(&copy);
        }

        // block allocation tables
        let mut map = vec![bat::FREE; block_count.saturating_sub(5)];
        let mut last_allocated = 4u16;
        for file in &self.files {
            for i in 0..file.block_count {
                let block = file.first_block + i;
                let value = if i + 1 == file.block_count { bat::LAST } else { block + 1 };
                map[(block - 5) as usize] = value;
                last_allocated = last_allocated.max(block);
            }
        }
        let free = map.iter().filter(|&&v| v == bat::FREE).count() as u16;
        for (block, counter) in [(3usize, self.bat_counters.0), (4, self.bat_counters.1)] {
            let mut table = vec![0u8; block_size];
            BigEndian::write_u16(&mut table[0x04..0x06], counter);
            BigEndian::write_u16(&mut table[0x06..0x08], free);
            BigEndian::write_u16(&mut table[0x08..0x0A], last_allocated);
            for (i, &value) in map.iter().enumerate() {
                let at = 0x0A + i * 2;
                BigEndian::write_u16(&mut table[at..at + 2], value);
            }
            gcn::write_checksums(&mut table, 0x04..block_size, 0x00);
            image[block * block_size..(block + 1) * block_size].copy_from_slice(&table);
        }

        // file contents
        for file in &self.files {
            if let Some(data) = &file.data {
                let at = file.first_block as usize * block_size;
                image[at..at + data.len()].copy_from_slice(data);
            }
        }
        for (block, bytes) in &self.raw {
            let at = *block as usize * block_size;
            image[at..at + bytes.len()].copy_from_slice(bytes);
        }
        image
    }
}

/// Save payload recognised by [`test_signature`]: magic, length in blocks,
/// a sum32 over everything after the checksum field, and two comment strings
pub fn signed_gcn_save(blocks: u16, seed: u8) -> Vec<u8> {
    let len = blocks as usize * gcn::BLOCK_SIZE;
    let mut data = vec![0u8; len];
    data[..8].copy_from_slice(b"TESTSAVE");
    BigEndian::write_u16(&mut data[8..10], blocks);
    data[0x40..0x49].copy_from_slice(b"Test Game");
    data[0x60..0x66].copy_from_slice(b"Slot 1");
    for (i, b) in data[0x80..].iter_mut().enumerate() {
        *b = seed.wrapping_add((i % 251) as u8);
    }
    let sum = compute(ChecksumAlgorithm::Sum32Be, &data[0x10..]);
    BigEndian::write_u32(&mut data[0x0C..0x10], sum);
    data
}

pub fn test_signature() -> Signature {
    serde_json::from_value(serde_json::json!({
        "game_id": TEST_GAME,
        "title": "Test Game",
        "format": "gcn",
        "filename": "testsave",
        "patterns": [{ "offset": 0, "ascii": "TESTSAVE" }],
        "length": { "kind": "field", "offset": 8, "width": 2, "unit": "blocks" },
        "checksum": { "algorithm": "sum32_be", "stored_at": 12, "start": 16 },
        "comment_offset": 64
    }))
    .unwrap()
}

pub fn vmu_test_signature() -> Signature {
    serde_json::from_value(serde_json::json!({
        "game_id": "TESTAPP_SYS",
        "title": "Test App",
        "format": "vmu",
        "patterns": [{ "offset": 48, "ascii": TEST_APP }],
        "length": { "kind": "vms_header" },
        "checksum": { "algorithm": "crc16_xmodem", "stored_at": 70, "zero_stored": true }
    }))
    .unwrap()
}

pub fn test_database() -> SignatureDatabase {
    let mut db = SignatureDatabase::new();
    db.add(test_signature()).unwrap();
    db.add(vmu_test_signature()).unwrap();
    db
}

/// A VMS data file with a correct CRC
pub fn vms_file(description: &str, icon_count: u16, eyecatch: u16, data_len: u32) -> Vec<u8> {
    let len = vmu::vms::HEADER_LEN
        + icon_count as usize * vmu::vms::ICON_LEN
        + vmu::vms::eyecatch_size(eyecatch)
        + data_len as usize;
    let mut file = vec![0u8; len];
    let desc = description.as_bytes();
    file[..desc.len().min(16)].copy_from_slice(&desc[..desc.len().min(16)]);
    file[0x10..0x10 + desc.len().min(32)].copy_from_slice(&desc[..desc.len().min(32)]);
    file[0x30..0x30 + TEST_APP.len()].copy_from_slice(TEST_APP.as_bytes());
    LittleEndian::write_u16(&mut file[0x40..0x42], icon_count);
    LittleEndian::write_u16(&mut file[0x42..0x44], 8);
    LittleEndian::write_u16(&mut file[0x44..0x46], eyecatch);
    LittleEndian::write_u32(&mut file[0x48..0x4C], data_len);
    for (i, b) in file[0x80..].iter_mut().enumerate() {
        *b = (i * 7 % 251) as u8;
    }
    let crc = crc16_xmodem(&file);
    LittleEndian::write_u16(&mut file[0x46..0x48], crc);
    file
}

#[derive(Debug, Clone)]
pub struct VmuFile {
    pub name: String,
    pub game: bool,
    pub first_block: u16,
    pub block_count: u16,
    pub data: Option<Vec<u8>>,
}

impl VmuFile {
    pub fn data(name: &str, first_block: u16, block_count: u16) -> Self {
        Self {
            name: name.to_string(),
            game: false,
            first_block,
            block_count,
            data: None,
        }
    }

    pub fn game(name: &str, first_block: u16, block_count: u16) -> Self {
        Self {
            game: true,
            ..Self::data(name, first_block, block_count)
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    /// Data files grow downward, mini-games upward from block 0
    pub fn blocks(&self) -> Vec<u16> {
        (0..self.block_count)
            .map(|i| {
                if self.game {
                    self.first_block + i
                } else {
                    self.first_block - i
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VmuImageBuilder {
    files: Vec<VmuFile>,
    raw: Vec<(Vec<u16>, Vec<u8>)>,
}

impl VmuImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, file: VmuFile) -> Self {
        self.files.push(file);
        self
    }

    /// Spread bytes over the given blocks without any directory or FAT record
    pub fn place(mut self, blocks: Vec<u16>, bytes: Vec<u8>) -> Self {
        self.raw.push((blocks, bytes));
        self
    }

    pub fn build_image(&self) -> CardImage {
        CardImage::from_bytes("synthetic.vmu", self.build())
    }

    pub fn build(&self) -> Vec<u8> {
        let bs = vmu::BLOCK_SIZE;
        let mut image = vec![0u8; vmu::IMAGE_SIZE as usize];

        let root = &mut image[255 * bs..256 * bs];
        root[..16].fill(0x55);
        root[0x30..0x38].copy_from_slice(&[0x20, 0x01, 0x09, 0x09, 0x12, 0x00, 0x00, 0x06]);
        LittleEndian::write_u16(&mut root[0x46..0x48], 254);
        LittleEndian::write_u16(&mut root[0x48..0x4A], 1);
        LittleEndian::write_u16(&mut root[0x4A..0x4C], 253);
        LittleEndian::write_u16(&mut root[0x4C..0x4E], 13);
        LittleEndian::write_u16(&mut root[0x50..0x52], 200);

        let mut fat = vec![vmu::fat::FREE; vmu::BLOCK_COUNT];
        fat[255] = vmu::fat::LAST;
        fat[254] = vmu::fat::LAST;
        for block in 241..=253u16 {
            fat[block as usize] = if block == 241 { vmu::fat::LAST } else { block - 1 };
        }
        for file in &self.files {
            let blocks = file.blocks();
            for (i, &block) in blocks.iter().enumerate() {
                fat[block as usize] = blocks.get(i + 1).copied().unwrap_or(vmu::fat::LAST);
            }
        }
        for (i, value) in fat.iter().enumerate() {
            let at = 254 * bs + i * 2;
            LittleEndian::write_u16(&mut image[at..at + 2], *value);
        }

        for (slot, file) in self.files.iter().enumerate() {
            let block = 253 - slot / 16;
            let at = block * bs + (slot % 16) * 32;
            let entry = &mut image[at..at + 32];
            entry[0] = if file.game { 0xCC } else { 0x33 };
            LittleEndian::write_u16(&mut entry[2..4], file.first_block);
            let name = file.name.as_bytes();
            entry[4..4 + name.len().min(12)].copy_from_slice(&name[..name.len().min(12)]);
            entry[0x10..0x18].copy_from_slice(&[0x20, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x01]);
            LittleEndian::write_u16(&mut entry[0x18..0x1A], file.block_count);
            LittleEndian::write_u16(&mut entry[0x1A..0x1C], if file.game { 1 } else { 0 });
        }

        let mut write_spread = |blocks: &[u16], data: &[u8]| {
            for (chunk, &block) in data.chunks(bs).zip(blocks) {
                let at = block as usize * bs;
                image[at..at + chunk.len()].copy_from_slice(chunk);
            }
        };
        for file in &self.files {
            if let Some(data) = &file.data {
                write_spread(&file.blocks(), data);
            }
        }
        for (blocks, data) in &self.raw {
            write_spread(blocks, data);
        }
        image
    }
}
