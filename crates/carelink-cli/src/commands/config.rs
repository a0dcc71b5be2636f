//! Config command implementation.

use anyhow::{Context, Result};
use carelink_core::HttpCloudSync;

use crate::cli::ConfigAction;
use crate::config::{API_KEY_ENV, Config, mask_secret};

pub fn cmd_config(action: ConfigAction, quiet: bool) -> Result<()> {
    let mut config = Config::load();
    match action {
        ConfigAction::Show => {
            let mut shown = config.clone();
            shown.api_key = shown.api_key.as_deref().map(mask_secret);
            print!(
                "{}",
                toml::to_string_pretty(&shown).context("Failed to serialize config")?
            );
            if std::env::var(API_KEY_ENV).is_ok_and(|k| !k.is_empty()) {
                println!("# api_key overridden by {API_KEY_ENV}");
            }
        }
        ConfigAction::Path => println!("{}", Config::path().display()),
        ConfigAction::SetApiKey { key } => {
            let cleared = key.is_empty();
            config.api_key = (!cleared).then_some(key);
            config.save()?;
            if !quiet {
                println!("API key {}.", if cleared { "removed" } else { "saved" });
            }
        }
        ConfigAction::SetEndpoint { url } => {
            let client = HttpCloudSync::new(&url, None).context("Invalid endpoint")?;
            config.endpoint = Some(client.endpoint().to_string());
            config.save()?;
            if !quiet {
                println!("Endpoint set to {}.", client.endpoint());
            }
        }
    }
    Ok(())
}
