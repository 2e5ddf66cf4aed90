use serde::{Deserialize, Serialize};

/// Byte order of on-card multi-byte fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endian {
    Big,
    Little,
}

/// Memory card family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardFormat {
    /// GameCube memory card
    Gcn,
    /// Dreamcast Visual Memory Unit
    Vmu,
}

impl CardFormat {
    pub fn block_size(&self) -> usize {
        match self {
            CardFormat::Gcn => crate::gcn::BLOCK_SIZE,
            CardFormat::Vmu => crate::vmu::BLOCK_SIZE,
        }
    }

    pub fn endian(&self) -> Endian {
        match self {
            CardFormat::Gcn => Endian::Big,
            CardFormat::Vmu => Endian::Little,
        }
    }

    pub fn min_image_size(&self) -> u64 {
        match self {
            CardFormat::Gcn => crate::gcn::MIN_IMAGE_SIZE,
            CardFormat::Vmu => crate::vmu::IMAGE_SIZE,
        }
    }

    pub fn max_image_size(&self) -> u64 {
        match self {
            CardFormat::Gcn => crate::gcn::MAX_IMAGE_SIZE,
            CardFormat::Vmu => crate::vmu::IMAGE_SIZE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CardFormat::Gcn => "gcn",
            CardFormat::Vmu => "vmu",
        }
    }
}

impl std::fmt::Display for CardFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for CardFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gcn" | "gc" | "gamecube" => Ok(CardFormat::Gcn),
            "vmu" | "dc" | "dreamcast" => Ok(CardFormat::Vmu),
            other => Err(format!("unknown card format '{other}'")),
        }
    }
}

/// Which copy of a redundant table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TableId {
    A,
    B,
}

impl TableId {
    /// The other copy of the pair
    pub fn twin(&self) -> TableId {
        match self {
            TableId::A => TableId::B,
            TableId::B => TableId::A,
        }
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableId::A => f.write_str("A"),
            TableId::B => f.write_str("B"),
        }
    }
}

/// Recovery scan options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Only try start blocks the active block table marks as used
    pub restrict_to_used: bool,

    /// Also try start blocks owned by trusted directory files
    pub include_directory_blocks: bool,

    /// Publish a progress snapshot every N blocks (0 is treated as 1)
    pub progress_interval: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            restrict_to_used: false,
            include_directory_blocks: false,
            progress_interval: 1,
        }
    }
}

/// Identifies a worker instance in progress updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadInfo {
    pub id: u64,
    pub label: String,
}

impl ThreadInfo {
    pub fn new(id: u64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

/// Snapshot of a running scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub worker_id: u64,
    pub current_block: u16,
    pub blocks_scanned: usize,
    pub blocks_remaining: usize,
    pub files_found: usize,
}

impl ScanProgress {
    pub fn total_blocks(&self) -> usize {
        self.blocks_scanned + self.blocks_remaining
    }

    pub fn completion_percentage(&self) -> f32 {
        let total = self.total_blocks();
        if total == 0 {
            0.0
        } else {
            (self.blocks_scanned as f32 / total as f32) * 100.0
        }
    }
}

/// Lifecycle of a recovery worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::Completed | ScanState::Cancelled | ScanState::Failed
        )
    }
}
