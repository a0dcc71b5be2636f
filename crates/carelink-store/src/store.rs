//! Main store implementation.

use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};
use uuid::Uuid;

use carelink_types::{Reading, ReadingSource};

use crate::error::{Error, Result};
use crate::queries::ReadingQuery;
use crate::schema;

pub(crate) fn to_millis(time: OffsetDateTime) -> i64 {
    (time.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(ms: i64) -> std::result::Result<OffsetDateTime, time::error::ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
}

/// Summary over every stored reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadingStats {
    pub count: u64,
    pub bluetooth: u64,
    pub simulated: u64,
    pub manual: u64,
    pub avg_systolic: Option<f64>,
    pub avg_diastolic: Option<f64>,
    pub avg_pulse: Option<f64>,
    pub min_systolic: Option<u16>,
    pub max_systolic: Option<u16>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last: Option<OffsetDateTime>,
}

/// SQLite-based store for blood pressure readings.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // === Writes ===

    /// Store a reading. Returns `false` if a reading with the same id exists.
    pub fn insert_reading(&self, reading: &Reading) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO readings (id, systolic, diastolic, pulse, captured_at, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                reading.id.to_string(),
                reading.systolic,
                reading.diastolic,
                reading.pulse,
                to_millis(reading.timestamp),
                reading.source.as_str(),
            ],
        )?;
        debug!(id = %reading.id, inserted = changed > 0, "Stored reading");
        Ok(changed > 0)
    }

    /// Delete every reading. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM readings", [])?;
        info!(removed, "Cleared readings");
        Ok(removed)
    }

    // === Reads ===

    /// Query readings.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), RawRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRow::into_reading).collect()
    }

    /// Newest readings first, optionally capped.
    pub fn list(&self, limit: Option<u32>) -> Result<Vec<Reading>> {
        let mut query = ReadingQuery::new();
        query.limit = limit;
        self.query_readings(&query)
    }

    /// The most recent reading.
    pub fn latest(&self) -> Result<Option<Reading>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, systolic, diastolic, pulse, captured_at, source FROM readings
                 ORDER BY captured_at DESC, rowid DESC LIMIT 1",
                [],
                RawRow::from_row,
            )
            .optional()?;
        raw.map(RawRow::into_reading).transpose()
    }

    /// Number of stored readings, optionally for one source.
    pub fn count(&self, source: Option<ReadingSource>) -> Result<u64> {
        let count: i64 = match source {
            Some(source) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE source = ?",
                [source.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    /// Aggregate statistics across all readings.
    pub fn stats(&self) -> Result<ReadingStats> {
        let (count, avg_sys, avg_dia, avg_pulse, min_sys, max_sys, first, last) =
            self.conn.query_row(
                "SELECT COUNT(*), AVG(systolic), AVG(diastolic), AVG(pulse),
                        MIN(systolic), MAX(systolic), MIN(captured_at), MAX(captured_at)
                 FROM readings",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                        row.get::<_, Option<i64>>(7)?,
                    ))
                },
            )?;

        let time_of = |ms: Option<i64>| -> Result<Option<OffsetDateTime>> {
            ms.map(|ms| {
                from_millis(ms).map_err(|e| Error::CorruptRow {
                    id: "stats".to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
        };

        Ok(ReadingStats {
            count: count as u64,
            bluetooth: self.count(Some(ReadingSource::Bluetooth))?,
            simulated: self.count(Some(ReadingSource::Simulated))?,
            manual: self.count(Some(ReadingSource::Manual))?,
            avg_systolic: avg_sys,
            avg_diastolic: avg_dia,
            avg_pulse,
            min_systolic: min_sys.map(|v| v as u16),
            max_systolic: max_sys.map(|v| v as u16),
            first: time_of(first)?,
            last: time_of(last)?,
        })
    }

    // === Export ===

    /// Write readings matching `query` as CSV with a header row.
    pub fn export_csv<W: Write>(&self, query: &ReadingQuery, writer: W) -> Result<usize> {
        let readings = self.query_readings(query)?;
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record([
            "id",
            "timestamp",
            "systolic",
            "diastolic",
            "pulse",
            "source",
            "category",
        ])?;
        for reading in &readings {
            let timestamp = reading
                .timestamp
                .format(&Rfc3339)
                .map_err(|e| Error::CorruptRow {
                    id: reading.id.to_string(),
                    reason: e.to_string(),
                })?;
            csv.write_record([
                reading.id.to_string(),
                timestamp,
                reading.systolic.to_string(),
                reading.diastolic.to_string(),
                reading.pulse.to_string(),
                reading.source.to_string(),
                reading.category().label().to_string(),
            ])?;
        }
        csv.flush()?;
        Ok(readings.len())
    }

    /// Write readings matching `query` as a pretty-printed JSON array.
    pub fn export_json<W: Write>(&self, query: &ReadingQuery, writer: W) -> Result<usize> {
        let readings = self.query_readings(query)?;
        serde_json::to_writer_pretty(writer, &readings)?;
        Ok(readings.len())
    }
}

/// Columns as stored, before validation.
struct RawRow {
    id: String,
    systolic: i64,
    diastolic: i64,
    pulse: i64,
    captured_at: i64,
    source: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            systolic: row.get(1)?,
            diastolic: row.get(2)?,
            pulse: row.get(3)?,
            captured_at: row.get(4)?,
            source: row.get(5)?,
        })
    }

    fn into_reading(self) -> Result<Reading> {
        let corrupt = |reason: String| Error::CorruptRow {
            id: self.id.clone(),
            reason,
        };
        let value = |name: &str, v: i64| {
            u16::try_from(v).map_err(|_| corrupt(format!("{name} out of range: {v}")))
        };

        Ok(Reading {
            id: Uuid::parse_str(&self.id).map_err(|e| corrupt(e.to_string()))?,
            systolic: value("systolic", self.systolic)?,
            diastolic: value("diastolic", self.diastolic)?,
            pulse: value("pulse", self.pulse)?,
            timestamp: from_millis(self.captured_at).map_err(|e| corrupt(e.to_string()))?,
            source: ReadingSource::from_str(&self.source).map_err(|e| corrupt(e.to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn reading_at(systolic: u16, source: ReadingSource, secs: i64) -> Reading {
        Reading::with_timestamp(
            systolic,
            80,
            70,
            source,
            OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap(),
        )
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count(None).unwrap(), 0);
        assert!(store.latest().unwrap().is_none());
    }

    #[test]
    fn test_insert_and_read_back() {
        let store = Store::open_in_memory().unwrap();
        let reading = reading_at(122, ReadingSource::Bluetooth, 0);

        assert!(store.insert_reading(&reading).unwrap());
        assert_eq!(store.latest().unwrap(), Some(reading));
    }

    #[test]
    fn test_duplicate_id_is_ignored() {
        let store = Store::open_in_memory().unwrap();
        let reading = reading_at(122, ReadingSource::Bluetooth, 0);

        assert!(store.insert_reading(&reading).unwrap());
        assert!(!store.insert_reading(&reading).unwrap());
        assert_eq!(store.count(None).unwrap(), 1);
    }

    #[test]
    fn test_sub_second_timestamps_survive() {
        let store = Store::open_in_memory().unwrap();
        let mut reading = reading_at(122, ReadingSource::Bluetooth, 0);
        reading.timestamp += Duration::milliseconds(250);

        store.insert_reading(&reading).unwrap();
        assert_eq!(store.latest().unwrap().unwrap().timestamp, reading.timestamp);
    }

    #[test]
    fn test_list_is_newest_first() {
        let store = Store::open_in_memory().unwrap();
        let old = reading_at(110, ReadingSource::Bluetooth, 0);
        let new = reading_at(130, ReadingSource::Bluetooth, 60);
        store.insert_reading(&new).unwrap();
        store.insert_reading(&old).unwrap();

        let listed = store.list(None).unwrap();
        assert_eq!(listed, vec![new.clone(), old]);
        assert_eq!(store.list(Some(1)).unwrap(), vec![new]);
    }

    #[test]
    fn test_same_timestamp_keeps_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        let first = reading_at(110, ReadingSource::Bluetooth, 0);
        let second = reading_at(130, ReadingSource::Simulated, 0);
        store.insert_reading(&first).unwrap();
        store.insert_reading(&second).unwrap();

        assert_eq!(store.latest().unwrap(), Some(second));
    }

    #[test]
    fn test_query_by_source_and_range() {
        let store = Store::open_in_memory().unwrap();
        for reading in [
            reading_at(110, ReadingSource::Bluetooth, 0),
            reading_at(120, ReadingSource::Simulated, 10),
            reading_at(130, ReadingSource::Bluetooth, 20),
            reading_at(140, ReadingSource::Bluetooth, 30),
        ] {
            store.insert_reading(&reading).unwrap();
        }

        let query = ReadingQuery::new()
            .source(ReadingSource::Bluetooth)
            .since(OffsetDateTime::from_unix_timestamp(1_700_000_010).unwrap())
            .oldest_first();
        let found: Vec<u16> = store
            .query_readings(&query)
            .unwrap()
            .iter()
            .map(|r| r.systolic)
            .collect();
        assert_eq!(found, vec![130, 140]);

        let paged = store
            .query_readings(&ReadingQuery::new().limit(2).offset(1))
            .unwrap();
        let paged: Vec<u16> = paged.iter().map(|r| r.systolic).collect();
        assert_eq!(paged, vec![130, 120]);
    }

    #[test]
    fn test_clear() {
        let store = Store::open_in_memory().unwrap();
        for reading in [
            reading_at(110, ReadingSource::Bluetooth, 0),
            reading_at(120, ReadingSource::Bluetooth, 1),
        ] {
            store.insert_reading(&reading).unwrap();
        }

        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.count(None).unwrap(), 0);
    }

    #[test]
    fn test_stats() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.stats().unwrap().count, 0);
        assert!(store.stats().unwrap().avg_systolic.is_none());

        store
            .insert_reading(&reading_at(110, ReadingSource::Bluetooth, 0))
            .unwrap();
        store
            .insert_reading(&reading_at(130, ReadingSource::Simulated, 60))
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.bluetooth, 1);
        assert_eq!(stats.simulated, 1);
        assert_eq!(stats.avg_systolic, Some(120.0));
        assert_eq!(stats.min_systolic, Some(110));
        assert_eq!(stats.max_systolic, Some(130));
        assert_eq!(
            stats.last,
            Some(OffsetDateTime::from_unix_timestamp(1_700_000_060).unwrap())
        );
    }

    #[test]
    fn test_corrupt_source_is_reported() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO readings VALUES (?1, 120, 80, 70, 0, 'carrier-pigeon')",
                [Uuid::new_v4().to_string()],
            )
            .unwrap();

        assert!(matches!(store.latest(), Err(Error::CorruptRow { .. })));
    }

    #[test]
    fn test_export_csv() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_reading(&reading_at(145, ReadingSource::Bluetooth, 0))
            .unwrap();

        let mut out = Vec::new();
        let n = store.export_csv(&ReadingQuery::new(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(n, 1);
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("id,timestamp,systolic,diastolic,pulse,source,category")
        );
        let row = lines.next().unwrap();
        assert!(row.contains(",2023-11-14T22:13:20Z,145,80,70,bluetooth,"));
    }

    #[test]
    fn test_export_json() {
        let store = Store::open_in_memory().unwrap();
        let reading = reading_at(118, ReadingSource::Manual, 0);
        store.insert_reading(&reading).unwrap();

        let mut out = Vec::new();
        store.export_json(&ReadingQuery::new(), &mut out).unwrap();
        let parsed: Vec<Reading> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed, vec![reading]);
    }

    #[test]
    fn test_open_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("readings.db");
        let reading = reading_at(120, ReadingSource::Bluetooth, 0);

        {
            let store = Store::open(&path).unwrap();
            store.insert_reading(&reading).unwrap();
        }

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.latest().unwrap(), Some(reading));
    }
}
