//! Measure and listen commands.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use carelink_core::{CareEvent, CuffHandle, Error};
use carelink_types::Reading;
use indicatif::ProgressBar;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::config::Config;
use crate::format::{FormatOptions, format_reading_json, format_reading_text};
use crate::style;
use crate::util::{ConnectOptions, connect_cuff, write_output};

/// Who starts the measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureMode {
    /// Send the start command.
    Start,
    /// Wait for the cuff's own start button.
    Listen,
}

pub struct MeasureArgs<'a> {
    pub mode: MeasureMode,
    pub timeout: Option<u64>,
    pub json: bool,
    pub database: PathBuf,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

pub async fn cmd_measure(args: MeasureArgs<'_>, config: &Config) -> Result<()> {
    let MeasureArgs {
        mode,
        timeout,
        json,
        database,
        output,
        quiet,
        opts,
    } = args;

    let cuff = connect_cuff(ConnectOptions {
        config,
        database,
        scan_timeout: None,
        measurement_timeout: timeout,
        quiet: quiet || json,
    })
    .await?;

    let message = match mode {
        MeasureMode::Start => "Measuring... keep your arm still",
        MeasureMode::Listen => "Waiting for a measurement (press start on the cuff)",
    };
    let spinner = style::spinner(message, quiet || json);
    let progress = tokio::spawn(report_progress(cuff.clone(), spinner.clone()));

    let result = take_reading(&cuff, mode).await;

    spinner.finish_and_clear();
    progress.abort();
    cuff.shutdown().await;

    let reading = match result {
        Ok(reading) => reading,
        Err(Error::Cancelled) => bail!("Measurement cancelled"),
        Err(e) => return Err(e).context("Measurement failed"),
    };

    let content = if json {
        format_reading_json(&reading)?
    } else {
        format_reading_text(&reading, opts)
    };
    write_output(output, &content)
}

async fn take_reading(cuff: &CuffHandle, mode: MeasureMode) -> carelink_core::Result<Reading> {
    let pending = async {
        match mode {
            MeasureMode::Start => cuff.measure().await,
            MeasureMode::Listen => cuff.listen().await,
        }
    };
    tokio::select! {
        result = pending => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nStopping measurement...");
            cuff.stop_measurement().await.ok();
            Err(Error::Cancelled)
        }
    }
}

/// Mirror cuff events on the spinner until aborted.
async fn report_progress(cuff: CuffHandle, spinner: ProgressBar) {
    let mut events = cuff.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => {
                debug!(event = event.name(), "Cuff event");
                match event {
                    CareEvent::MeasurementStarted => spinner.set_message("Cuff inflating..."),
                    CareEvent::MeasurementError { reason } => {
                        style::print_suspended(&spinner, &format!("Warning: {reason}"))
                    }
                    CareEvent::DeviceDisconnected { .. } => {
                        style::print_suspended(&spinner, "Connection to the cuff was lost")
                    }
                    _ => {}
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}
