//! History command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use carelink_store::ReadingQuery;
use carelink_types::ReadingSource;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_readings_text};
use crate::util::{open_store, write_output};

/// Parse a date/time string in RFC3339 or YYYY-MM-DD format.
fn parse_datetime(s: &str) -> Result<OffsetDateTime> {
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt);
    }

    // A bare date means the start of that day in UTC
    if let Ok(date) = Date::parse(s, format_description!("[year]-[month]-[day]")) {
        return Ok(date.with_time(Time::MIDNIGHT).assume_utc());
    }

    bail!(
        "Invalid date format '{}'. Use RFC3339 (e.g., 2024-01-15T10:30:00Z) or YYYY-MM-DD",
        s
    )
}

/// Arguments for the history command.
pub struct HistoryArgs<'a> {
    pub limit: u32,
    pub source: Option<ReadingSource>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub offset: u32,
    pub oldest_first: bool,
    pub format: OutputFormat,
    pub database: &'a Path,
    pub output: Option<&'a PathBuf>,
    pub opts: &'a FormatOptions,
}

fn build_query(args: &HistoryArgs<'_>) -> Result<ReadingQuery> {
    let mut query = ReadingQuery::new();
    if args.limit > 0 {
        query = query.limit(args.limit);
    }
    if args.offset > 0 {
        query = query.offset(args.offset);
    }
    if let Some(source) = args.source {
        query = query.source(source);
    }
    if let Some(since) = args.since.as_deref() {
        query = query.since(parse_datetime(since)?);
    }
    if let Some(until) = args.until.as_deref() {
        query = query.until(parse_datetime(until)?);
    }
    if args.oldest_first {
        query = query.oldest_first();
    }
    Ok(query)
}

pub fn cmd_history(args: HistoryArgs<'_>) -> Result<()> {
    let query = build_query(&args)?;
    let store = open_store(args.database)?;

    let content = match args.format {
        OutputFormat::Text => {
            let readings = store
                .query_readings(&query)
                .context("Failed to load readings")?;
            format_readings_text(&readings, args.opts)
        }
        OutputFormat::Json => {
            let mut buf = Vec::new();
            store
                .export_json(&query, &mut buf)
                .context("Failed to export readings")?;
            buf.push(b'\n');
            String::from_utf8(buf).context("Export produced invalid UTF-8")?
        }
        OutputFormat::Csv => {
            let mut buf = Vec::new();
            store
                .export_csv(&query, &mut buf)
                .context("Failed to export readings")?;
            String::from_utf8(buf).context("Export produced invalid UTF-8")?
        }
    };
    write_output(args.output, &content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(database: &Path) -> HistoryArgs<'_> {
        HistoryArgs {
            limit: 0,
            source: None,
            since: None,
            until: None,
            offset: 0,
            oldest_first: false,
            format: OutputFormat::Text,
            database,
            output: None,
            opts: &FormatOptions { no_color: true },
        }
    }

    #[test]
    fn test_parse_datetime_formats() {
        let dt = parse_datetime("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(dt.hour(), 10);

        let day = parse_datetime("2024-01-15").unwrap();
        assert_eq!((day.year(), day.day(), day.hour()), (2024, 15, 0));

        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_build_query_rejects_bad_date() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("readings.db");
        let mut a = args(&db);
        a.until = Some("15/01/2024".into());
        assert!(build_query(&a).is_err());
    }

    #[test]
    fn test_build_query_applies_range_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("readings.db");
        let mut a = args(&db);
        a.since = Some("2024-01-15".into());
        a.limit = 3;
        a.offset = 1;
        a.oldest_first = true;

        let query = build_query(&a).unwrap();
        assert_eq!(query.limit, Some(3));
        assert_eq!(query.offset, Some(1));
        assert!(!query.newest_first);
        assert_eq!(query.since, Some(parse_datetime("2024-01-15").unwrap()));
        assert!(query.until.is_none());
    }
}
