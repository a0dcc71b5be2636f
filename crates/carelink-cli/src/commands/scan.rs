//! Scan command implementation.

use std::path::PathBuf;

use anyhow::Result;

use crate::config::Config;
use crate::util::{ConnectOptions, connect_cuff, write_output};

pub async fn cmd_scan(
    timeout: Option<u64>,
    config: &Config,
    database: PathBuf,
    output: Option<&PathBuf>,
    quiet: bool,
) -> Result<()> {
    let cuff = connect_cuff(ConnectOptions {
        config,
        database,
        scan_timeout: timeout,
        measurement_timeout: None,
        quiet,
    })
    .await?;

    let status = cuff.status();
    let content = format!(
        "Device:  {}\nBattery: {}%\n",
        status.device_name.as_deref().unwrap_or("Unknown"),
        status.battery_level
    );
    cuff.shutdown().await;

    write_output(output, &content)
}
