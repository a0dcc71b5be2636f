//! Utility functions for CLI operations.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use carelink_core::{
    BtleplugTransport, CloudSync, CuffHandle, CuffService, HttpCloudSync, NoopCloudSync,
};
use carelink_store::Store;
use dialoguer::{Confirm, theme::ColorfulTheme};
use tracing::{debug, info};

use crate::config::Config;
use crate::store::SqliteReadingStore;
use crate::style;

/// Write to a file if one was given, else stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

pub fn open_store(path: &Path) -> Result<Store> {
    Store::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// Cloud client from config, if an endpoint is set.
pub fn cloud_client(config: &Config) -> Result<Option<HttpCloudSync>> {
    let Some(endpoint) = config.endpoint.as_deref() else {
        return Ok(None);
    };
    let client = HttpCloudSync::new(endpoint, config.api_key())
        .with_context(|| format!("Invalid cloud endpoint '{endpoint}'"))?;
    Ok(Some(client))
}

/// Ask a yes/no question. Non-interactive sessions answer no.
pub fn confirm(prompt: &str) -> Result<bool> {
    if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
        return Ok(false);
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

/// Settings for bringing up a connected cuff.
pub struct ConnectOptions<'a> {
    pub config: &'a Config,
    pub database: PathBuf,
    pub scan_timeout: Option<u64>,
    pub measurement_timeout: Option<u64>,
    pub quiet: bool,
}

/// Start the service, power up the adapter, and connect to the first cuff found.
pub async fn connect_cuff(opts: ConnectOptions<'_>) -> Result<CuffHandle> {
    let ConnectOptions {
        config,
        database,
        scan_timeout,
        measurement_timeout,
        quiet,
    } = opts;

    let store = open_store(&database)?;
    let cloud: Arc<dyn CloudSync> = match cloud_client(config)? {
        Some(client) if config.auto_upload => {
            debug!(endpoint = client.endpoint(), "Uploading new readings");
            Arc::new(client)
        }
        _ => Arc::new(NoopCloudSync),
    };

    let transport = BtleplugTransport::new()
        .await
        .context("No Bluetooth adapter available")?;
    let cuff = CuffService::new(Arc::new(transport))
        .config(config.cuff_config(measurement_timeout))
        .store(Box::new(SqliteReadingStore::new(store)))
        .cloud(cloud)
        .spawn()
        .context("Failed to start cuff service")?;

    if let Err(e) = cuff.initialize().await {
        cuff.shutdown().await;
        bail!("Bluetooth is not available: {e}");
    }

    // The service falls back to the configured scan window.
    let timeout = scan_timeout.map(Duration::from_secs);
    let spinner = style::spinner("Scanning for the blood pressure monitor...", quiet);
    let scanned = cuff.scan(timeout).await;
    spinner.finish_and_clear();
    if let Err(e) = scanned {
        cuff.shutdown().await;
        bail!(
            "Could not connect to the cuff: {e}\n\
             Make sure it is switched on and within range."
        );
    }

    let name = cuff.connected_device_name();
    info!(device = ?name, battery = cuff.battery_level(), "Cuff ready");
    if !quiet {
        eprintln!(
            "Connected to {} (battery {}%)",
            name.as_deref().unwrap_or("cuff"),
            cuff.battery_level()
        );
    }
    Ok(cuff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_output(Some(&path), "120/80\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "120/80\n");
    }

    #[test]
    fn test_cloud_client_requires_endpoint() {
        assert!(cloud_client(&Config::default()).unwrap().is_none());

        let config = Config {
            endpoint: Some("https://cloud.test/api/".to_string()),
            ..Default::default()
        };
        let client = cloud_client(&config).unwrap().unwrap();
        assert_eq!(client.endpoint(), "https://cloud.test/api");
    }

    #[test]
    fn test_cloud_client_rejects_bad_endpoint() {
        let config = Config {
            endpoint: Some("ftp://cloud.test".to_string()),
            ..Default::default()
        };
        assert!(cloud_client(&config).is_err());
    }

    #[test]
    fn test_open_store_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("readings.db");
        let store = open_store(&path).unwrap();
        assert_eq!(store.count(None).unwrap(), 0);
        assert!(path.exists());
    }
}
