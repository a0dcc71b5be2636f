//! SQLite-backed [`ReadingStore`] for the cuff service.

use carelink_core::{Error, ReadingStore, Result};
use carelink_store::Store;
use carelink_types::Reading;

/// Records every reading the service produces in the local database.
pub struct SqliteReadingStore(Store);

impl SqliteReadingStore {
    pub fn new(store: Store) -> Self {
        Self(store)
    }
}

fn store_error(e: carelink_store::Error) -> Error {
    Error::Store(e.to_string())
}

impl ReadingStore for SqliteReadingStore {
    fn append(&self, reading: &Reading) -> Result<()> {
        self.0.insert_reading(reading).map_err(store_error)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Reading>> {
        self.0.list(None).map_err(store_error)
    }

    fn clear_all(&self) -> Result<()> {
        self.0.clear().map_err(store_error)?;
        Ok(())
    }
}
