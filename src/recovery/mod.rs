pub mod export;
pub mod reconstructor;
pub mod repair;

pub use export::{default_export_name, export_file};
pub use repair::{repair, RepairAction, RepairOutcome};
