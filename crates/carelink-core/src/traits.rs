//! Collaborator seams for persistence and cloud upload.
//!
//! The service records every reading through a [`ReadingStore`] and uploads
//! Bluetooth readings through a [`CloudSync`]. Both are injected at
//! construction so the application decides the backends.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use carelink_types::Reading;

use crate::error::{Error, Result};

/// Append-only reading history, most recent first.
///
/// `append` is called from the service task. On a multi-threaded runtime the
/// call is wrapped in `block_in_place`, so blocking file or database I/O is
/// fine there; on a current-thread runtime it stalls the service until it
/// returns.
///
/// # Example
///
/// ```
/// use carelink_core::{MemoryStore, ReadingStore};
/// use carelink_types::{Reading, ReadingSource};
///
/// let store = MemoryStore::new();
/// store.append(&Reading::new(120, 80, 72, ReadingSource::Manual)).unwrap();
/// assert_eq!(store.load_all().unwrap().len(), 1);
/// ```
pub trait ReadingStore: Send {
    /// Add a reading.
    fn append(&self, reading: &Reading) -> Result<()>;

    /// All readings, newest first.
    fn load_all(&self) -> Result<Vec<Reading>>;

    /// Delete every reading.
    fn clear_all(&self) -> Result<()>;
}

impl<T: ReadingStore + Sync + ?Sized> ReadingStore for Arc<T> {
    fn append(&self, reading: &Reading) -> Result<()> {
        (**self).append(reading)
    }

    fn load_all(&self) -> Result<Vec<Reading>> {
        (**self).load_all()
    }

    fn clear_all(&self) -> Result<()> {
        (**self).clear_all()
    }
}

/// Remote upload of readings.
#[async_trait]
pub trait CloudSync: Send + Sync {
    /// Upload one reading.
    async fn upload(&self, reading: &Reading) -> Result<()>;

    /// Upload several readings. The default uploads them one at a time.
    async fn upload_batch(&self, readings: &[Reading]) -> Result<()> {
        for reading in readings {
            self.upload(reading).await?;
        }
        Ok(())
    }
}

/// In-memory [`ReadingStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<Reading>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Reading>>> {
        self.readings
            .lock()
            .map_err(|_| Error::Store("reading list lock poisoned".to_string()))
    }
}

impl ReadingStore for MemoryStore {
    fn append(&self, reading: &Reading) -> Result<()> {
        self.lock()?.insert(0, reading.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Reading>> {
        Ok(self.lock()?.clone())
    }

    fn clear_all(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}

/// [`CloudSync`] that accepts and discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCloudSync;

#[async_trait]
impl CloudSync for NoopCloudSync {
    async fn upload(&self, _reading: &Reading) -> Result<()> {
        Ok(())
    }
}
