use crate::config::EngineConfig;
use crate::diagnosis::{Condition, Structure};
use crate::error::ScanPrecondition;
use crate::tables::StructureError;
use crate::types::CardFormat;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Memory card image validation and lost save recovery
#[derive(Parser, Debug, Clone)]
#[command(name = "memcard-recovery")]
#[command(version)]
#[command(about = "Validate GameCube and Dreamcast VMU card images and recover lost saves", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Signature database file or directory (repeatable, searched first)
    #[arg(long = "db", global = true, value_name = "PATH")]
    pub databases: Vec<PathBuf>,

    /// Ignore the MEMCARD_RECOVERY_DB search path
    #[arg(long = "no-env-db", global = true)]
    pub no_env_db: bool,

    /// Engine configuration file (JSON)
    #[arg(long = "config", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Card format instead of detection (gcn, vmu)
    #[arg(long = "format", global = true)]
    pub format: Option<CardFormat>,

    /// Debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Diagnose one or more card images
    Inspect {
        #[arg(value_name = "IMAGE", required = true)]
        images: Vec<PathBuf>,

        /// Print JSON reports instead of text
        #[arg(long = "json")]
        json: bool,
    },

    /// Search a card for saves the directory no longer lists
    Scan {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Only try blocks the block table marks used
        #[arg(long = "restrict-to-used")]
        restrict_to_used: bool,

        /// Also try blocks owned by directory files
        #[arg(long = "include-directory-blocks")]
        include_directory_blocks: bool,

        /// Progress update interval in blocks
        #[arg(long = "progress-interval")]
        progress_interval: Option<usize>,

        /// Export every recovered save into this directory
        #[arg(short = 'o', long = "output", value_name = "DIR")]
        output: Option<PathBuf>,

        /// Write a JSON report
        #[arg(long = "report", value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Export the files listed by the card's directory
    Export {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        #[arg(short = 'o', long = "output", value_name = "DIR", default_value = "exported")]
        output: PathBuf,

        /// Only files of this game id
        #[arg(long = "game")]
        game: Option<String>,
    },

    /// Write a copy of a GameCube card with consistent system tables
    Repair {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::Scan {
                progress_interval: Some(0),
                ..
            } => Err("progress-interval must be greater than 0".to_string()),
            Command::Repair { image, output } if image == output => {
                Err("repair output must differ from the input image".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Configuration file values with command-line overrides applied
    pub fn engine_config(&self) -> crate::error::Result<EngineConfig> {
        let mut config = match &self.global.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if self.global.format.is_some() {
            config.format = self.global.format;
        }
        if self.global.no_env_db {
            config.use_env_search_path = false;
        }
        if let Command::Scan {
            restrict_to_used,
            include_directory_blocks,
            progress_interval,
            ..
        } = &self.command
        {
            config.scan.restrict_to_used |= *restrict_to_used;
            config.scan.include_directory_blocks |= *include_directory_blocks;
            if let Some(interval) = progress_interval {
                config.scan.progress_interval = *interval;
            }
        }
        Ok(config)
    }
}

fn structure_name(structure: &Structure) -> String {
    match structure {
        Structure::Header => "header".to_string(),
        Structure::Directory(id) => format!("directory {id}"),
        Structure::BlockTable(id) => format!("block table {id}"),
    }
}

fn structure_error_text(error: &StructureError) -> String {
    match error {
        StructureError::OutOfBounds {
            offset,
            len,
            image_size,
        } => format!("{len} bytes at 0x{offset:X} lie outside the {image_size}-byte image"),
        StructureError::Malformed { reason } => reason.clone(),
    }
}

/// One line of text for a diagnosis condition
pub fn describe(condition: &Condition) -> String {
    match condition {
        Condition::ImageTooSmall { size, minimum } => {
            format!("image is {size} bytes, smaller than the minimum {minimum}")
        }
        Condition::ImageTooLarge { size, maximum } => {
            format!("image is {size} bytes, larger than the maximum {maximum}")
        }
        Condition::SizeNotPowerOfTwo { size } => format!("image size {size} is not a power of two"),
        Condition::SizeNotBlockAligned { size, block_size } => {
            format!("image size {size} is not a multiple of the {block_size}-byte block")
        }
        Condition::UnreadableStructure { structure, error } => format!(
            "{} could not be read: {}",
            structure_name(structure),
            structure_error_text(error)
        ),
        Condition::HeaderMagicInvalid => "header format magic is missing".to_string(),
        Condition::HeaderChecksumInvalid {
            expected,
            calculated,
        } => format!("header checksum 0x{expected:08X} does not match computed 0x{calculated:08X}"),
        Condition::HeaderLooksBlank { byte, percent } => {
            format!("header is {percent}% byte 0x{byte:02X}, card looks unformatted")
        }
        Condition::HeaderSizeMismatch { declared, actual } => {
            format!("header declares {declared} bytes but the image is {actual}")
        }
        Condition::HeaderLayoutDefaulted => {
            "root block layout fields are unusable, standard layout assumed".to_string()
        }
        Condition::DirectoryInvalid { table } => format!("directory {table} fails its checksum"),
        Condition::NoValidDirectory => "no directory copy is valid".to_string(),
        Condition::DirectoryAmbiguous { identical: true } => {
            "both directories share an update counter (contents identical)".to_string()
        }
        Condition::DirectoryAmbiguous { identical: false } => {
            "both directories share an update counter but differ, using A".to_string()
        }
        Condition::BlockTableInvalid { table } => format!("block table {table} fails its checksum"),
        Condition::NoValidBlockTable => "no block table copy is valid".to_string(),
        Condition::BlockTableAmbiguous { identical: true } => {
            "both block tables share an update counter (contents identical)".to_string()
        }
        Condition::BlockTableAmbiguous { identical: false } => {
            "both block tables share an update counter but differ, using A".to_string()
        }
        Condition::FreeBlockCountMismatch { recorded, counted } => {
            format!("block table records {recorded} free blocks, {counted} are free")
        }
        Condition::BlockAccountingMismatch {
            directory_blocks,
            allocated_blocks,
        } => format!(
            "directory claims {directory_blocks} blocks, block table allocates {allocated_blocks}"
        ),
        Condition::BrokenChain { slot, reason } => {
            format!("file in slot {slot} has a broken block chain ({})", reason.code())
        }
        Condition::CrossLinkedBlock { block, slots } => {
            format!("block {block} is claimed by slots {slots:?}")
        }
        Condition::NoDatabasesFound => "no signature databases found, scanning is unavailable".to_string(),
    }
}

/// Hint printed with a scan precondition failure
pub fn precondition_hint(precondition: ScanPrecondition) -> &'static str {
    match precondition {
        ScanPrecondition::NoThreadInfo | ScanPrecondition::NoCard => "open a card image first",
        ScanPrecondition::NoDatabases => "pass --db or set MEMCARD_RECOVERY_DB",
        ScanPrecondition::NoBlocks => "try without --restrict-to-used",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::ChainError;
    use crate::types::TableId;

    #[test]
    fn test_parse_scan_command() {
        let args = Args::try_parse_from([
            "memcard-recovery",
            "scan",
            "card.raw",
            "--restrict-to-used",
            "--progress-interval",
            "8",
            "--db",
            "extra",
            "--format",
            "gcn",
        ])
        .unwrap();
        assert!(args.validate().is_ok());
        assert_eq!(args.global.databases, vec![PathBuf::from("extra")]);

        let config = args.engine_config().unwrap();
        assert_eq!(config.format, Some(CardFormat::Gcn));
        assert!(config.scan.restrict_to_used);
        assert!(!config.scan.include_directory_blocks);
        assert_eq!(config.scan.progress_interval, 8);
    }

    #[test]
    fn test_invalid_arguments() {
        let args = Args::try_parse_from(["memcard-recovery", "scan", "card.raw", "--progress-interval", "0"])
            .unwrap();
        assert!(args.validate().is_err());

        let args = Args::try_parse_from(["memcard-recovery", "repair", "card.raw", "card.raw"]).unwrap();
        assert!(args.validate().is_err());

        assert!(Args::try_parse_from(["memcard-recovery", "inspect"]).is_err());
        assert!(Args::try_parse_from(["memcard-recovery", "inspect", "a.raw", "--format", "ps2"]).is_err());
    }

    #[test]
    fn test_describe_conditions() {
        assert_eq!(
            describe(&Condition::DirectoryInvalid { table: TableId::A }),
            "directory A fails its checksum"
        );
        assert_eq!(
            describe(&Condition::BrokenChain {
                slot: 2,
                reason: ChainError::Loop { block: 9 }
            }),
            "file in slot 2 has a broken block chain (loop)"
        );
        assert_eq!(
            describe(&Condition::CrossLinkedBlock {
                block: 6,
                slots: vec![0, 1]
            }),
            "block 6 is claimed by slots [0, 1]"
        );
    }
}
