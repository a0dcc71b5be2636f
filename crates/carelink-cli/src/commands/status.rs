//! Status command implementation.

use std::path::{Path, PathBuf};

use anyhow::Result;
use carelink_core::{BleTransport, BtleplugTransport};
use owo_colors::OwoColorize;

use crate::config::Config;
use crate::format::FormatOptions;
use crate::util::{cloud_client, open_store, write_output};

pub async fn cmd_status(
    config: &Config,
    database: &Path,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let mut out = String::new();

    let adapter = match BtleplugTransport::new().await {
        Ok(transport) => match transport.adapter_state().await {
            Ok(state) => format!("{state:?}"),
            Err(e) => format!("unknown ({e})"),
        },
        Err(e) => format!("unavailable ({e})"),
    };
    out.push_str(&format!("Bluetooth adapter: {adapter}\n"));

    out.push_str(&format!("Config file:       {}\n", Config::path().display()));
    match cloud_client(config) {
        Ok(Some(client)) => {
            let reachable = if client.is_reachable().await {
                paint("reachable", true, opts)
            } else {
                paint("unreachable", false, opts)
            };
            out.push_str(&format!(
                "Cloud endpoint:    {} ({reachable})\n",
                client.endpoint()
            ));
            out.push_str(&format!(
                "API key:           {}\n",
                if config.api_key().is_some() { "set" } else { "not set" }
            ));
            out.push_str(&format!("Auto upload:       {}\n", config.auto_upload));
        }
        Ok(None) => out.push_str("Cloud endpoint:    not configured\n"),
        Err(e) => out.push_str(&format!("Cloud endpoint:    invalid ({e})\n")),
    }

    out.push_str(&format!("Database:          {}\n", database.display()));
    let store = open_store(database)?;
    let stats = store.stats()?;
    out.push_str(&format!(
        "Readings:          {} ({} bluetooth, {} simulated, {} manual)\n",
        stats.count, stats.bluetooth, stats.simulated, stats.manual
    ));
    if let (Some(sys), Some(dia), Some(pulse)) =
        (stats.avg_systolic, stats.avg_diastolic, stats.avg_pulse)
    {
        out.push_str(&format!(
            "Average:           {sys:.0}/{dia:.0} mmHg, pulse {pulse:.0}\n"
        ));
    }
    if let Some(latest) = store.latest()? {
        out.push_str(&format!(
            "Last reading:      {} mmHg, pulse {} ({}, {})\n",
            latest.formatted_value(),
            latest.pulse,
            latest.source,
            latest.timestamp
        ));
    }

    write_output(output, &out)
}

fn paint(text: &str, good: bool, opts: &FormatOptions) -> String {
    match (opts.no_color, good) {
        (true, _) => text.to_string(),
        (false, true) => text.green().to_string(),
        (false, false) => text.red().to_string(),
    }
}
