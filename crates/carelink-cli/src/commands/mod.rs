//! Command implementations for the CLI.

mod clear;
mod config;
mod history;
mod measure;
mod scan;
mod status;
mod sync;

pub use clear::cmd_clear;
pub use config::cmd_config;
pub use history::{HistoryArgs, cmd_history};
pub use measure::{MeasureArgs, MeasureMode, cmd_measure};
pub use scan::cmd_scan;
pub use status::cmd_status;
pub use sync::cmd_sync;
