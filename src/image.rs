use crate::error::{RecoveryError, Result};
use crate::reader::BinaryReader;
use crate::types::CardFormat;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(mmap) => mmap,
            Backing::Owned(bytes) => bytes,
        }
    }
}

/// Immutable raw card image with shared ownership
#[derive(Clone)]
pub struct CardImage {
    backing: Arc<Backing>,
    path: String,
}

impl std::fmt::Debug for CardImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardImage")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

impl CardImage {
    /// Open a card image file with memory mapping
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy().to_string();

        let file = File::open(path_ref).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RecoveryError::FileNotFound(path_str.clone())
            } else {
                RecoveryError::Io(e)
            }
        })?;

        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(RecoveryError::InvalidArgument(format!(
                "{path_str} is not a regular file"
            )));
        }
        // Zero-length files cannot be mapped on every platform
        let backing = if metadata.len() == 0 {
            Backing::Owned(Vec::new())
        } else {
            // Safety: the map is read-only and the session treats the image as immutable
            let mmap = unsafe {
                Mmap::map(&file)
                    .map_err(|e| RecoveryError::Mmap(format!("Failed to mmap file: {}", e)))?
            };
            Backing::Mapped(mmap)
        };

        log::debug!("opened card image {} ({} bytes)", path_str, metadata.len());

        Ok(Self {
            backing: Arc::new(backing),
            path: path_str,
        })
    }

    /// Wrap an in-memory image
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            backing: Arc::new(Backing::Owned(bytes)),
            path: name.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.len() as u64
    }

    pub fn len(&self) -> usize {
        self.backing.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        self.backing.bytes()
    }

    /// Reader over the whole image in the format's byte order
    pub fn reader(&self, format: CardFormat) -> BinaryReader<'_> {
        BinaryReader::new(self.bytes(), format.endian())
    }

    /// `len` bytes at a byte offset, bounds checked
    pub fn get_slice(&self, offset: u64, len: usize) -> Result<&[u8]> {
        self.reader(CardFormat::Gcn).read_bytes(offset, len)
    }

    /// Number of whole blocks present in the image
    pub fn block_count(&self, format: CardFormat) -> usize {
        self.len() / format.block_size()
    }

    /// Bytes of one block
    pub fn block(&self, format: CardFormat, index: u16) -> Result<&[u8]> {
        let block_size = format.block_size();
        let offset = index as u64 * block_size as u64;
        self.get_slice(offset, block_size)
    }

    /// Concatenate the given blocks in order
    pub fn gather(&self, format: CardFormat, blocks: &[u16]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(blocks.len() * format.block_size());
        for &block in blocks {
            out.extend_from_slice(self.block(format, block)?);
        }
        Ok(out)
    }
}
