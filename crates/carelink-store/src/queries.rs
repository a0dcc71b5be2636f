//! Query builder for stored readings.
//!
//! # Example
//!
//! ```
//! use carelink_store::{ReadingQuery, Store};
//! use carelink_types::ReadingSource;
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let last_week = OffsetDateTime::now_utc() - Duration::days(7);
//!
//! let query = ReadingQuery::new()
//!     .source(ReadingSource::Bluetooth)
//!     .since(last_week)
//!     .limit(20);
//! let readings = store.query_readings(&query)?;
//! assert!(readings.is_empty());
//! # Ok::<(), carelink_store::Error>(())
//! ```

use time::OffsetDateTime;

use carelink_types::ReadingSource;

/// Fluent query builder for [`Store::query_readings`](crate::Store::query_readings).
///
/// Results are newest first unless [`oldest_first`](Self::oldest_first) is
/// set.
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by origin.
    pub source: Option<ReadingSource>,
    /// Readings taken at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Readings taken at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by time descending.
    pub newest_first: bool,
}

impl ReadingQuery {
    /// All readings, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn source(mut self, source: ReadingSource) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    #[must_use]
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` results.
    #[must_use]
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Chronological order, e.g. for export.
    #[must_use]
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(source) = self.source {
            conditions.push("source = ?");
            params.push(Box::new(source.as_str()));
        }
        if let Some(since) = self.since {
            conditions.push("captured_at >= ?");
            params.push(Box::new(crate::store::to_millis(since)));
        }
        if let Some(until) = self.until {
            conditions.push("captured_at <= ?");
            params.push(Box::new(crate::store::to_millis(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (where_clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, systolic, diastolic, pulse, captured_at, source \
             FROM readings {where_clause} ORDER BY captured_at {order}, rowid {order}"
        );
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            // SQLite needs a LIMIT before OFFSET.
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        sql
    }
}
