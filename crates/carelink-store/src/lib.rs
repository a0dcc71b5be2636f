//! Local data persistence for blood pressure readings.
//!
//! This crate keeps every reading the cuff produces in a SQLite database so
//! history survives restarts and can be exported.
//!
//! # Features
//!
//! - Append readings, ignoring duplicates by id
//! - Query by source and time range, with pagination
//! - Summary statistics
//! - CSV and JSON export
//!
//! # Example
//!
//! ```no_run
//! use carelink_store::{ReadingQuery, Store};
//!
//! let store = Store::open(carelink_store::default_db_path())?;
//! for reading in store.query_readings(&ReadingQuery::new().limit(10))? {
//!     println!("{} {}", reading.timestamp, reading.formatted_value());
//! }
//! # Ok::<(), carelink_store::Error>(())
//! ```

mod error;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use queries::ReadingQuery;
pub use store::{ReadingStats, Store};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/carelink/readings.db`
/// - macOS: `~/Library/Application Support/carelink/readings.db`
/// - Windows: `C:\Users\<user>\AppData\Local\carelink\readings.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("carelink")
        .join("readings.db")
}
