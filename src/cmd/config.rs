//! Configuration view command: `opendev config`.

use std::path::Path;

use anyhow::{Context, Result};

use opendev::config::OpendevConfig;

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    config: &OpendevConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let path = OpendevConfig::path_for(project_dir);

            println!();
            println!("{}", console::style("opendev Configuration").bold().cyan());
            println!("=====================");
            println!();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("No opendev.toml found at {}", path.display());
                println!("Using defaults.");
            }
            println!();

            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();

            println!("Effective values (with env overrides):");
            println!(
                "  api_key = {}",
                if config.generation.api_key.is_some() {
                    "set"
                } else {
                    "not set"
                }
            );
            println!("  sandbox memory = {} bytes", config.sandbox.memory_bytes()?);
            println!();
        }
    }
    Ok(())
}
