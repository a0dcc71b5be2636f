//! Clear command implementation.

use std::path::Path;

use anyhow::{Context, Result};

use crate::util::{confirm, open_store};

pub fn cmd_clear(database: &Path, yes: bool, quiet: bool) -> Result<()> {
    let store = open_store(database)?;
    let count = store.count(None)?;
    if count == 0 {
        if !quiet {
            println!("No readings stored.");
        }
        return Ok(());
    }

    if !yes && !confirm(&format!("Delete all {count} stored readings?"))? {
        eprintln!("Aborted. Pass --yes to clear without a prompt.");
        return Ok(());
    }

    let removed = store.clear().context("Failed to clear readings")?;
    if !quiet {
        println!("Deleted {removed} readings.");
    }
    Ok(())
}
