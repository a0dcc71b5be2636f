//! Sync command - upload local readings to the cloud.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use carelink_core::CloudSync;
use tracing::info;

use crate::config::Config;
use crate::style;
use crate::util::{cloud_client, open_store};

pub async fn cmd_sync(config: &Config, database: &Path, quiet: bool) -> Result<()> {
    let client = cloud_client(config)?.ok_or_else(|| {
        anyhow!("No cloud endpoint configured. Run 'carelink config set-endpoint <URL>' first.")
    })?;

    let store = open_store(database)?;
    let readings = store.list(None).context("Failed to load readings")?;
    if readings.is_empty() {
        if !quiet {
            println!("Nothing to sync.");
        }
        return Ok(());
    }

    let spinner = style::spinner(
        format!("Uploading {} readings to {}...", readings.len(), client.endpoint()),
        quiet,
    );
    let result = client.upload_batch(&readings).await;
    spinner.finish_and_clear();
    result.context("Upload failed")?;

    info!(count = readings.len(), endpoint = client.endpoint(), "Synced readings");
    if !quiet {
        println!("Uploaded {} readings.", readings.len());
    }
    Ok(())
}
