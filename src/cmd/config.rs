//! Configuration view and validation commands: `lockdispatch config`.

use std::path::Path;

use anyhow::Result;

use lockdispatch::config::{CONFIG_FILE, DispatchConfig};

use super::super::ConfigCommands;

pub fn cmd_config(
    config: &DispatchConfig,
    explicit_path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = explicit_path.unwrap_or_else(|| Path::new(CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No {} found; defaults plus environment", CONFIG_FILE);
            }
            println!("{}", config.to_display_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                anyhow::bail!("{} configuration problem(s)", problems.len());
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            let content = toml::to_string_pretty(&DispatchConfig::default())?;
            std::fs::write(config_path, content)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
