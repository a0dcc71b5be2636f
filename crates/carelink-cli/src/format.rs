//! Output formatting for readings.

use anyhow::Result;
use carelink_types::{BloodPressureCategory, Reading, ReadingSource};
use owo_colors::OwoColorize;
use time::macros::format_description;

/// Formatting options shared by all commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    pub no_color: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self { no_color }
    }

    fn category(&self, category: BloodPressureCategory) -> String {
        let label = category.label();
        if self.no_color {
            return label.to_string();
        }
        match category {
            BloodPressureCategory::Normal => label.green().to_string(),
            BloodPressureCategory::Elevated => label.yellow().to_string(),
            BloodPressureCategory::HypertensionStage1 => label.bright_red().to_string(),
            BloodPressureCategory::HypertensionStage2 => label.red().to_string(),
            BloodPressureCategory::HypertensiveCrisis => label.red().bold().to_string(),
        }
    }
}

fn display_time(reading: &Reading) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    reading
        .timestamp
        .format(format)
        .unwrap_or_else(|_| reading.timestamp.to_string())
}

/// Multi-line summary of a single reading.
pub fn format_reading_text(reading: &Reading, opts: &FormatOptions) -> String {
    let category = reading.category();
    let mut out = String::new();
    out.push_str(&format!(
        "Blood pressure: {} mmHg\n",
        reading.formatted_value()
    ));
    out.push_str(&format!("Pulse:          {} bpm\n", reading.pulse));
    out.push_str(&format!("Category:       {}\n", opts.category(category)));
    out.push_str(&format!("Taken at:       {} UTC\n", display_time(reading)));
    if reading.source == ReadingSource::Simulated {
        out.push_str("Note:           no reading arrived from the cuff; values are simulated\n");
    }
    out.push('\n');
    out.push_str(category.recommendation());
    out.push('\n');
    out
}

pub fn format_reading_json(reading: &Reading) -> Result<String> {
    Ok(serde_json::to_string_pretty(reading)? + "\n")
}

/// One line per reading, newest first.
pub fn format_readings_text(readings: &[Reading], opts: &FormatOptions) -> String {
    if readings.is_empty() {
        return "No readings stored.\n".to_string();
    }
    let mut out = format!(
        "{:<19}  {:>9}  {:>5}  {:<10}  {}\n",
        "TIME", "BP", "PULSE", "SOURCE", "CATEGORY"
    );
    for reading in readings {
        out.push_str(&format!(
            "{:<19}  {:>9}  {:>5}  {:<10}  {}\n",
            display_time(reading),
            reading.formatted_value(),
            reading.pulse,
            reading.source.as_str(),
            opts.category(reading.category())
        ));
    }
    out
}
